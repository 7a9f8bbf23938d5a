//! PDF text extraction and markdown rendering.
//!
//! Extraction walks each page's content stream in document order and breaks
//! lines whenever the text baseline moves vertically. Rendering lays markdown
//! out on A4 pages with the standard Helvetica and Courier fonts.

pub mod extract;
pub mod render;

pub use extract::{extract_pages, extract_pages_from_bytes, extract_text, select_pages};
pub use render::{render_markdown, render_markdown_to_bytes, MarkdownPdfRenderer, PdfRenderer};

/// WinAnsiEncoding code points that differ from Latin-1.
const WIN_ANSI_EXTRAS: &[(char, u8)] = &[
    ('€', 0x80),
    ('‚', 0x82),
    ('„', 0x84),
    ('…', 0x85),
    ('‘', 0x91),
    ('’', 0x92),
    ('“', 0x93),
    ('”', 0x94),
    ('•', 0x95),
    ('–', 0x96),
    ('—', 0x97),
    ('™', 0x99),
];

fn win_ansi_encode(c: char) -> u8 {
    if let Some((_, byte)) = WIN_ANSI_EXTRAS.iter().find(|(ch, _)| *ch == c) {
        return *byte;
    }
    match u32::from(c) {
        code @ (0x20..=0x7e | 0xa0..=0xff) => code as u8,
        _ => b'?',
    }
}

fn win_ansi_decode(byte: u8) -> char {
    WIN_ANSI_EXTRAS
        .iter()
        .find(|(_, b)| *b == byte)
        .map(|(ch, _)| *ch)
        .unwrap_or(char::from(byte))
}
