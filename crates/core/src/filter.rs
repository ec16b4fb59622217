/// Decides whether a raw text fragment is worth normalizing and embedding.
///
/// The predicate is pure and total: any input yields a verdict, never an
/// error, and the same input always yields the same verdict.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentFilter;

/// Fragments shorter than this carry no retrievable content.
const MIN_MEANINGFUL_CHARS: usize = 50;

/// Above this length a fragment is expected to be prose and must contain
/// sentence-terminal punctuation. Shorter fragments may be headings or
/// labels and are exempt.
const PROSE_LENGTH_CHARS: usize = 120;

/// Fraction of tab/newline characters above which a fragment is treated as
/// layout debris.
const MAX_CONTROL_RATIO: f64 = 0.7;

/// Fraction of table-of-contents-looking lines above which a multi-line
/// fragment is treated as front matter.
const MAX_TOC_LINE_RATIO: f64 = 0.6;

impl ContentFilter {
    pub fn new() -> Self {
        Self
    }

    pub fn is_meaningful(&self, text: &str) -> bool {
        let trimmed = text.trim();

        if trimmed.chars().count() < MIN_MEANINGFUL_CHARS {
            return false;
        }

        // Single repeated character or symbol runs survive the length check
        // on decorated pages ("------ ... ------").
        let mut distinct = trimmed.chars().filter(|c| !c.is_whitespace());
        if let Some(first) = distinct.next() {
            if distinct.all(|c| c == first) {
                return false;
            }
        } else {
            return false;
        }

        if control_ratio(text) > MAX_CONTROL_RATIO {
            return false;
        }

        if looks_like_toc(trimmed) {
            return false;
        }

        let has_terminal = trimmed.contains(['.', '!', '?']);
        if !has_terminal && trimmed.chars().count() > PROSE_LENGTH_CHARS {
            return false;
        }

        true
    }
}

fn control_ratio(text: &str) -> f64 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }
    let control = text.chars().filter(|c| *c == '\t' || *c == '\n').count();
    control as f64 / total as f64
}

/// Table-of-contents heuristic: most lines are either short entries ending
/// in a page number, or mostly numeric.
fn looks_like_toc(text: &str) -> bool {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if lines.len() < 3 {
        return false;
    }

    let toc_like = lines
        .iter()
        .filter(|line| ends_with_page_number(line) || mostly_numeric(line))
        .count();

    toc_like as f64 / lines.len() as f64 > MAX_TOC_LINE_RATIO
}

fn ends_with_page_number(line: &str) -> bool {
    if line.chars().count() > 80 {
        return false;
    }
    let trailing_digits = line
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .count();
    if trailing_digits == 0 || trailing_digits > 4 {
        return false;
    }
    // Require a separator before the number so years inside prose don't count.
    let head: String = line
        .chars()
        .take(line.chars().count() - trailing_digits)
        .collect();
    head.ends_with([' ', '\t', '.']) && head.trim().chars().any(|c| c.is_alphabetic())
}

fn mostly_numeric(line: &str) -> bool {
    let visible: Vec<char> = line.chars().filter(|c| !c.is_whitespace()).collect();
    if visible.is_empty() {
        return false;
    }
    let numeric = visible
        .iter()
        .filter(|c| c.is_ascii_digit() || **c == '.')
        .count();
    numeric as f64 / visible.len() as f64 > 0.6
}
