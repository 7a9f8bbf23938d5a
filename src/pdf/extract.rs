//! Page text extraction with vertical-position line breaks.

use lopdf::content::Content;
use lopdf::{Document, Object, ObjectId};
use std::path::Path;

use super::win_ansi_decode;
use crate::error::PdfError;

/// Baseline movement, in text-space units, treated as a new line.
const LINE_BREAK_THRESHOLD: f32 = 1.0;

/// TJ adjustment (thousandths of an em) wide enough to count as a word gap.
const WORD_GAP_ADJUSTMENT: f32 = -200.0;

/// Extract every page of the PDF at `path`, joined with newlines.
pub fn extract_text(path: &Path) -> Result<String, PdfError> {
    let document = Document::load(path)?;
    Ok(extract_pages(&document)?.join("\n"))
}

pub fn extract_pages_from_bytes(bytes: &[u8]) -> Result<Vec<String>, PdfError> {
    let document = Document::load_mem(bytes)?;
    extract_pages(&document)
}

/// Text of each page, in page order.
pub fn extract_pages(document: &Document) -> Result<Vec<String>, PdfError> {
    document
        .get_pages()
        .into_iter()
        .map(|(number, page_id)| page_text(document, number, page_id))
        .collect()
}

/// Pick one 1-based page, or join all pages when `page` is `None`.
pub fn select_pages(pages: &[String], page: Option<u32>) -> Result<String, PdfError> {
    match page {
        None => Ok(pages.join("\n")),
        Some(number) => number
            .checked_sub(1)
            .and_then(|index| pages.get(index as usize))
            .cloned()
            .ok_or(PdfError::PageNotFound {
                page: number,
                total: pages.len(),
            }),
    }
}

fn page_text(document: &Document, number: u32, page_id: ObjectId) -> Result<String, PdfError> {
    let data = document.get_page_content(page_id)?;
    let content = Content::decode(&data)?;

    let mut layout = TextLayout::default();
    for operation in &content.operations {
        layout.apply(&operation.operator, &operation.operands);
    }
    let text = layout.finish();

    // Composite fonts use multi-byte codes that need the font's ToUnicode map.
    if text.trim().is_empty() || looks_garbled(&text) {
        if let Ok(fallback) = document.extract_text(&[number]) {
            let fallback = fallback.trim().to_string();
            if !fallback.is_empty() {
                return Ok(fallback);
            }
        }
    }
    Ok(text)
}

fn looks_garbled(text: &str) -> bool {
    let total = text.chars().count();
    let control = text
        .chars()
        .filter(|c| c.is_control() && !matches!(c, '\n' | '\t' | '\r'))
        .count();
    total > 0 && control * 10 > total
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

fn decode_string(bytes: &[u8]) -> String {
    match bytes.strip_prefix(&[0xfe, 0xff]) {
        Some(utf16) => {
            let units: Vec<u16> = utf16
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        None => bytes.iter().map(|&b| win_ansi_decode(b)).collect(),
    }
}

/// Tracks the text baseline across text-positioning operators.
#[derive(Default)]
struct TextLayout {
    out: String,
    y: f32,
    leading: f32,
    last_y: Option<f32>,
    moved: bool,
}

impl TextLayout {
    fn apply(&mut self, operator: &str, operands: &[Object]) {
        match operator {
            "BT" => {
                self.y = 0.0;
                self.moved = true;
            }
            "Td" => self.move_by(operands.get(1).and_then(number)),
            "TD" => {
                let ty = operands.get(1).and_then(number);
                if let Some(ty) = ty {
                    self.leading = -ty;
                }
                self.move_by(ty);
            }
            "Tm" => {
                if let Some(f) = operands.get(5).and_then(number) {
                    self.y = f;
                }
                self.moved = true;
            }
            "TL" => {
                if let Some(leading) = operands.first().and_then(number) {
                    self.leading = leading;
                }
            }
            "T*" => self.next_line(),
            "Tj" => self.show(operands.first()),
            "'" => {
                self.next_line();
                self.show(operands.first());
            }
            "\"" => {
                self.next_line();
                self.show(operands.get(2));
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    self.show_array(items);
                }
            }
            _ => {}
        }
    }

    fn move_by(&mut self, ty: Option<f32>) {
        self.y += ty.unwrap_or(0.0);
        self.moved = true;
    }

    fn next_line(&mut self) {
        self.y -= self.leading;
        self.moved = true;
    }

    fn begin_run(&mut self) {
        match self.last_y {
            Some(last) if (last - self.y).abs() > LINE_BREAK_THRESHOLD => self.out.push('\n'),
            Some(_) if self.moved && !self.out.ends_with([' ', '\n']) => self.out.push(' '),
            _ => {}
        }
        self.last_y = Some(self.y);
        self.moved = false;
    }

    fn show(&mut self, operand: Option<&Object>) {
        if let Some(Object::String(bytes, _)) = operand {
            self.begin_run();
            self.out.push_str(&decode_string(bytes));
        }
    }

    fn show_array(&mut self, items: &[Object]) {
        self.begin_run();
        for item in items {
            match item {
                Object::String(bytes, _) => self.out.push_str(&decode_string(bytes)),
                other => {
                    if number(other).is_some_and(|n| n < WORD_GAP_ADJUSTMENT)
                        && !self.out.ends_with(' ')
                    {
                        self.out.push(' ');
                    }
                }
            }
        }
    }

    fn finish(self) -> String {
        self.out
            .lines()
            .map(str::trim_end)
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    }
}
