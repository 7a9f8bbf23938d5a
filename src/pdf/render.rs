//! Markdown to PDF rendering.
//!
//! Markdown is parsed with pulldown-cmark into styled lines, wrapped to the
//! page width and paginated onto A4 pages. Only the standard Type1 fonts are
//! used, so no font data is embedded.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};
use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::win_ansi_encode;
use crate::error::PdfError;

const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN: i64 = 40;
const BODY_SIZE: i64 = 11;
const CODE_SIZE: i64 = 10;
const INDENT_STEP: i64 = 15;

/// Renders markdown into a PDF file.
pub trait PdfRenderer: Send + Sync {
    fn render(&self, markdown: &str, output: &Path) -> Result<(), PdfError>;
}

/// Default renderer backed by [`render_markdown`].
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkdownPdfRenderer;

impl PdfRenderer for MarkdownPdfRenderer {
    fn render(&self, markdown: &str, output: &Path) -> Result<(), PdfError> {
        let mut document = render_markdown(markdown)?;
        let mut writer = BufWriter::new(File::create(output)?);
        document
            .save_to(&mut writer)
            .map_err(|e| PdfError::Render(e.to_string()))?;
        writer.flush()?;
        Ok(())
    }
}

/// Render markdown and return the encoded PDF.
pub fn render_markdown_to_bytes(markdown: &str) -> Result<Vec<u8>, PdfError> {
    let mut document = render_markdown(markdown)?;
    let mut bytes = Vec::new();
    document
        .save_to(&mut bytes)
        .map_err(|e| PdfError::Render(e.to_string()))?;
    Ok(bytes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FontKind {
    Regular,
    Bold,
    Mono,
}

impl FontKind {
    fn resource_name(self) -> &'static str {
        match self {
            FontKind::Regular => "F1",
            FontKind::Bold => "F2",
            FontKind::Mono => "F3",
        }
    }

    /// Average glyph width as a fraction of the font size.
    fn width_factor(self) -> f32 {
        match self {
            FontKind::Regular => 0.5,
            FontKind::Bold => 0.55,
            FontKind::Mono => 0.6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Style {
    font: FontKind,
    size: i64,
    indent: i64,
}

impl Style {
    const BODY: Style = Style {
        font: FontKind::Regular,
        size: BODY_SIZE,
        indent: 0,
    };

    fn line_height(self) -> i64 {
        (self.size * 14 + 5) / 10
    }

    fn max_chars(self) -> usize {
        let width = (PAGE_WIDTH - 2 * MARGIN - self.indent) as f32;
        ((width / (self.size as f32 * self.font.width_factor())) as usize).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Line {
    text: String,
    style: Style,
    /// Extra vertical space before the line.
    gap: i64,
}

fn heading_size(level: HeadingLevel) -> i64 {
    match level {
        HeadingLevel::H1 => 20,
        HeadingLevel::H2 => 16,
        HeadingLevel::H3 => 14,
        _ => 12,
    }
}

/// Break `text` into lines of at most `max` characters, preferring spaces.
fn wrap(text: &str, max: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word = word.to_string();
        while word.chars().count() > max {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let split: String = word.chars().take(max).collect();
            word = word.chars().skip(max).collect();
            lines.push(split);
        }
        let needed = current.chars().count() + usize::from(!current.is_empty()) + word.chars().count();
        if needed > max && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Turns markdown events into styled, wrapped lines.
struct LayoutBuilder {
    lines: Vec<Line>,
    text: String,
    style: Style,
    prefix: String,
    gap: i64,
    lists: Vec<Option<u64>>,
    quote_depth: i64,
    in_code: bool,
}

impl LayoutBuilder {
    fn new() -> Self {
        Self {
            lines: Vec::new(),
            text: String::new(),
            style: Style::BODY,
            prefix: String::new(),
            gap: 0,
            lists: Vec::new(),
            quote_depth: 0,
            in_code: false,
        }
    }

    fn indent(&self) -> i64 {
        (self.lists.len() as i64 + self.quote_depth) * INDENT_STEP
    }

    fn flush(&mut self) {
        let text = std::mem::take(&mut self.text);
        let prefix = std::mem::take(&mut self.prefix);
        let content = format!("{}{}", prefix, text.trim());
        if content.trim().is_empty() {
            return;
        }
        for line in wrap(&content, self.style.max_chars()) {
            self.lines.push(Line {
                text: line,
                style: self.style,
                gap: std::mem::take(&mut self.gap),
            });
        }
    }

    fn flush_code(&mut self) {
        let text = std::mem::take(&mut self.text);
        let style = Style {
            font: FontKind::Mono,
            size: CODE_SIZE,
            indent: self.indent() + INDENT_STEP,
        };
        let max = style.max_chars();
        for raw in text.trim_end_matches('\n').lines() {
            let raw = raw.replace('\t', "    ");
            let chars: Vec<char> = raw.chars().collect();
            let chunks: Vec<String> = if chars.is_empty() {
                vec![String::new()]
            } else {
                chars.chunks(max).map(|c| c.iter().collect()).collect()
            };
            for chunk in chunks {
                self.lines.push(Line {
                    text: chunk,
                    style,
                    gap: std::mem::take(&mut self.gap),
                });
            }
        }
    }

    fn end_block(&mut self) {
        self.flush();
        self.style = Style {
            indent: self.indent(),
            ..Style::BODY
        };
        self.gap = self.style.line_height() / 2;
    }

    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => self.text.push_str(&text),
            Event::Code(code) => self.text.push_str(&code),
            Event::Html(html) | Event::InlineHtml(html) => self.text.push_str(&html),
            Event::SoftBreak => self.text.push(' '),
            Event::HardBreak => self.flush(),
            Event::Rule => {
                self.end_block();
                self.gap += self.style.line_height();
            }
            Event::TaskListMarker(checked) => {
                self.text.push_str(if checked { "[x] " } else { "[ ] " })
            }
            _ => {}
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Heading { level, .. } => {
                self.end_block();
                self.gap = self.gap.max(heading_size(level) / 2);
                self.style = Style {
                    font: FontKind::Bold,
                    size: heading_size(level),
                    indent: 0,
                };
            }
            Tag::Paragraph => {
                if self.prefix.is_empty() {
                    self.flush();
                }
            }
            Tag::BlockQuote(_) => {
                self.end_block();
                self.quote_depth += 1;
                self.style.indent = self.indent();
            }
            Tag::List(start) => {
                self.flush();
                self.lists.push(start);
            }
            Tag::Item => {
                self.flush();
                let depth = self.lists.len();
                let marker = match self.lists.last_mut() {
                    Some(Some(n)) => {
                        let marker = format!("{}. ", n);
                        *n += 1;
                        marker
                    }
                    _ => "- ".to_string(),
                };
                self.style = Style {
                    indent: (depth as i64 - 1).max(0) * INDENT_STEP + self.quote_depth * INDENT_STEP,
                    ..Style::BODY
                };
                self.prefix = marker;
            }
            Tag::CodeBlock(_) => {
                self.end_block();
                self.in_code = true;
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Heading(_) | TagEnd::Paragraph => self.end_block(),
            TagEnd::Item => self.flush(),
            TagEnd::List(_) => {
                self.flush();
                self.lists.pop();
                self.end_block();
            }
            TagEnd::BlockQuote(_) => {
                self.flush();
                self.quote_depth = (self.quote_depth - 1).max(0);
                self.end_block();
            }
            TagEnd::CodeBlock => {
                self.flush_code();
                self.in_code = false;
                self.end_block();
            }
            _ => {}
        }
    }

    fn finish(mut self) -> Vec<Line> {
        if self.in_code {
            self.flush_code();
        } else {
            self.flush();
        }
        self.lines
    }
}

fn layout(markdown: &str) -> Vec<Line> {
    let options = Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TABLES | Options::ENABLE_TASKLISTS;
    let mut builder = LayoutBuilder::new();
    for event in Parser::new_ext(markdown, options) {
        builder.event(event);
    }
    builder.finish()
}

fn encode_text(text: &str) -> Object {
    Object::String(text.chars().map(win_ansi_encode).collect(), StringFormat::Literal)
}

/// Assign lines to pages and emit one content stream per page.
fn paginate(lines: &[Line]) -> Vec<Vec<Operation>> {
    let mut pages = Vec::new();
    let mut operations = Vec::new();
    let mut y = PAGE_HEIGHT - MARGIN;

    for line in lines {
        let advance = line.gap + line.style.line_height();
        if y - advance < MARGIN && !operations.is_empty() {
            pages.push(std::mem::take(&mut operations));
            y = PAGE_HEIGHT - MARGIN;
        }
        y -= advance;

        operations.extend([
            Operation::new("BT", vec![]),
            Operation::new(
                "Tf",
                vec![
                    Object::Name(line.style.font.resource_name().as_bytes().to_vec()),
                    Object::Integer(line.style.size),
                ],
            ),
            Operation::new(
                "Td",
                vec![
                    Object::Integer(MARGIN + line.style.indent),
                    Object::Integer(y),
                ],
            ),
            Operation::new("Tj", vec![encode_text(&line.text)]),
            Operation::new("ET", vec![]),
        ]);
    }
    pages.push(operations);
    pages
}

fn font(document: &mut Document, base_font: &str) -> ObjectId {
    document.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => base_font,
        "Encoding" => "WinAnsiEncoding",
    })
}

/// Build an in-memory PDF document from markdown.
pub fn render_markdown(markdown: &str) -> Result<Document, PdfError> {
    let mut document = Document::with_version("1.5");
    let pages_id = document.new_object_id();

    let regular = font(&mut document, "Helvetica");
    let bold = font(&mut document, "Helvetica-Bold");
    let mono = font(&mut document, "Courier");
    let resources_id = document.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => regular,
            "F2" => bold,
            "F3" => mono,
        },
    });

    let mut kids = Vec::new();
    for operations in paginate(&layout(markdown)) {
        let content = Content { operations };
        let encoded = content
            .encode()
            .map_err(|e| PdfError::Render(e.to_string()))?;
        let content_id = document.add_object(Stream::new(dictionary! {}, encoded));
        let page_id = document.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    document.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(PAGE_WIDTH),
                Object::Integer(PAGE_HEIGHT),
            ],
        }),
    );

    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    document.trailer.set("Root", catalog_id);
    document.compress();
    Ok(document)
}
