use crate::error::IngestError;

/// Characters per subword piece. Approximates the granularity of the
/// embedding model's BPE tokenizer closely enough for size budgeting.
const SUBWORD_CHARS: usize = 4;

/// Inputs above this many bytes are refused rather than tokenized; a single
/// fragment this large points at broken extraction upstream.
const MAX_INPUT_BYTES: usize = 1 << 20;

/// Deterministic word/subword tokenizer: whitespace words are split into
/// fixed-width character pieces. Same input always yields the same tokens.
pub fn tokenize(text: &str) -> Result<Vec<String>, IngestError> {
    if text.len() > MAX_INPUT_BYTES {
        return Err(IngestError::Tokenization {
            position: 0,
            reason: format!("input of {} bytes exceeds {}", text.len(), MAX_INPUT_BYTES),
        });
    }

    let mut tokens = Vec::new();
    for word in text.split_whitespace() {
        let chars: Vec<char> = word.chars().collect();
        for piece in chars.chunks(SUBWORD_CHARS) {
            tokens.push(piece.iter().collect());
        }
    }
    Ok(tokens)
}

pub fn count_tokens(text: &str) -> Result<usize, IngestError> {
    let mut count = 0usize;
    if text.len() > MAX_INPUT_BYTES {
        return Err(IngestError::Tokenization {
            position: 0,
            reason: format!("input of {} bytes exceeds {}", text.len(), MAX_INPUT_BYTES),
        });
    }
    for word in text.split_whitespace() {
        let chars = word.chars().count();
        count += chars.div_ceil(SUBWORD_CHARS);
    }
    Ok(count)
}

/// Trailing whole words of `text` whose combined token count reaches at
/// least `overlap_tokens`, preserving order. Word-aligned so the carried
/// context never starts mid-word.
pub fn trailing_overlap(text: &str, overlap_tokens: usize) -> String {
    if overlap_tokens == 0 {
        return String::new();
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    let mut taken = 0usize;
    let mut start = words.len();

    while start > 0 && taken < overlap_tokens {
        start -= 1;
        taken += words[start].chars().count().div_ceil(SUBWORD_CHARS);
    }

    words[start..].join(" ")
}
