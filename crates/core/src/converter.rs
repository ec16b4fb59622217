use crate::error::IngestError;
use crate::models::RawSection;
use lopdf::Document;
use std::path::Path;
use tracing::debug;

/// A heading candidate longer than this is treated as body text.
const MAX_HEADING_CHARS: usize = 80;

/// Turns a source document into ordered [`RawSection`]s.
pub trait DocumentConverter: Send + Sync {
    fn convert(&self, path: &Path) -> Result<Vec<RawSection>, IngestError>;
}

/// PDF converter built on `lopdf` text extraction. Page text is split into
/// paragraphs on blank lines; short standalone lines without terminal
/// punctuation are classified as headings.
#[derive(Default)]
pub struct LopdfConverter;

impl DocumentConverter for LopdfConverter {
    fn convert(&self, path: &Path) -> Result<Vec<RawSection>, IngestError> {
        let document = Document::load(path)
            .map_err(|error| IngestError::Conversion(format!("{}: {error}", path.display())))?;

        let mut text = String::new();
        for (page_no, _page_id) in document.get_pages() {
            let page_text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::Conversion(format!("page {page_no}: {error}")))?;
            text.push_str(&page_text);
            text.push('\n');
        }

        let sections = sections_from_text(&text);
        if sections.is_empty() {
            return Err(IngestError::Conversion(format!(
                "no readable text in {}",
                path.display()
            )));
        }

        debug!(
            path = %path.display(),
            sections = sections.len(),
            "converted document"
        );
        Ok(sections)
    }
}

/// Splits extracted text into ordered sections. Paragraphs are separated by
/// blank lines; each paragraph's lines are rejoined with single spaces.
pub(crate) fn sections_from_text(text: &str) -> Vec<RawSection> {
    let mut sections = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();

    let mut flush = |lines: &mut Vec<&str>, sections: &mut Vec<RawSection>| {
        if lines.is_empty() {
            return;
        }
        let index = sections.len();
        if lines.len() == 1 {
            if let Some(level) = heading_level(lines[0]) {
                sections.push(RawSection::heading(index, level, lines[0]));
                lines.clear();
                return;
            }
        }
        sections.push(RawSection::body(index, lines.join(" ")));
        lines.clear();
    };

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            flush(&mut paragraph, &mut sections);
        } else {
            paragraph.push(line);
        }
    }
    flush(&mut paragraph, &mut sections);

    sections
}

/// Heading heuristic: a short line without terminal punctuation. Fully
/// uppercase lines read as chapter-level headings, capitalised ones as
/// subheadings.
fn heading_level(line: &str) -> Option<u8> {
    if line.chars().count() > MAX_HEADING_CHARS {
        return None;
    }
    if line.ends_with(['.', '!', '?', ',', ';', ':']) {
        return None;
    }

    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.is_empty() {
        return None;
    }

    if letters.iter().all(|c| c.is_uppercase()) {
        return Some(1);
    }
    if letters[0].is_uppercase() {
        return Some(2);
    }
    None
}
