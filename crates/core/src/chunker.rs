use crate::config::ChunkingConfig;
use crate::models::{Chunk, RawSection};
use crate::tokenize::{count_tokens, trailing_overlap};
use tracing::warn;

/// Transforms a filtered, ordered sequence of [`RawSection`]s into chunks
/// within the configured token bounds, preserving reading order.
#[derive(Debug, Clone, Copy)]
pub struct ChunkNormalizer {
    config: ChunkingConfig,
}

/// A section dropped during normalization, reported so a human can see
/// exactly which fragment was lost.
#[derive(Debug, Clone)]
pub struct SkippedSection {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct NormalizedChunks {
    pub chunks: Vec<Chunk>,
    pub skipped: Vec<SkippedSection>,
}

impl ChunkNormalizer {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// Walk the sections in order, merging small neighbours and splitting
    /// oversized ones. A tokenization failure drops that section only.
    pub fn normalize(&self, sections: &[RawSection]) -> NormalizedChunks {
        let mut out = NormalizedChunks::default();
        let mut buffer = String::new();
        let mut buffer_tokens = 0usize;

        for section in sections {
            let text = section.text.trim();
            let tokens = match count_tokens(text) {
                Ok(count) => count,
                Err(error) => {
                    warn!(section = section.index, %error, "skipping section: tokenization failed");
                    out.skipped.push(SkippedSection {
                        index: section.index,
                        reason: error.to_string(),
                    });
                    continue;
                }
            };
            if tokens == 0 {
                continue;
            }

            if tokens > self.config.max_tokens {
                self.close_buffer(&mut out.chunks, &mut buffer, &mut buffer_tokens);
                let leftover = self.split_oversized(text, &mut out.chunks);
                if let Some((leftover_text, leftover_tokens)) = leftover {
                    buffer = leftover_text;
                    buffer_tokens = leftover_tokens;
                }
                continue;
            }

            if buffer.is_empty() {
                buffer.push_str(text);
                buffer_tokens = tokens;
                continue;
            }

            let below_optimal = buffer_tokens < self.config.optimal_tokens;
            let fits = buffer_tokens + tokens <= self.config.max_tokens;
            if below_optimal && fits {
                buffer.push(' ');
                buffer.push_str(text);
                buffer_tokens += tokens;
            } else {
                self.close_buffer(&mut out.chunks, &mut buffer, &mut buffer_tokens);
                buffer.push_str(text);
                buffer_tokens = tokens;
            }
        }

        self.close_buffer(&mut out.chunks, &mut buffer, &mut buffer_tokens);

        for (order, chunk) in out.chunks.iter_mut().enumerate() {
            chunk.source_order = order as u64;
        }

        out
    }

    /// Emit the running buffer as a chunk. An undersized buffer is merged
    /// backward into the previous chunk when that stays within max_tokens;
    /// with no merge candidate it is emitted as-is.
    fn close_buffer(&self, chunks: &mut Vec<Chunk>, buffer: &mut String, buffer_tokens: &mut usize) {
        if buffer.is_empty() {
            return;
        }

        if *buffer_tokens < self.config.min_tokens {
            if let Some(last) = chunks.last_mut() {
                if last.token_count + *buffer_tokens <= self.config.max_tokens {
                    last.content.push(' ');
                    last.content.push_str(buffer);
                    last.token_count += *buffer_tokens;
                    buffer.clear();
                    *buffer_tokens = 0;
                    return;
                }
            }
        }

        chunks.push(Chunk {
            content: std::mem::take(buffer),
            token_count: *buffer_tokens,
            source_order: 0,
        });
        *buffer_tokens = 0;
    }

    /// Split a section that exceeds max_tokens at sentence boundaries.
    /// Pieces accumulate sentences up to optimal_tokens, and each piece
    /// after the first starts with the trailing overlap of its predecessor.
    /// A final piece below min_tokens is handed back to the caller so it can
    /// merge with whatever follows.
    fn split_oversized(&self, text: &str, chunks: &mut Vec<Chunk>) -> Option<(String, usize)> {
        let mut piece = String::new();
        let mut piece_tokens = 0usize;

        for sentence in split_sentences(text) {
            let sentence_tokens = match count_tokens(sentence) {
                Ok(count) => count,
                Err(_) => continue,
            };
            if sentence_tokens == 0 {
                continue;
            }

            // A single sentence above max_tokens has no usable boundary;
            // fall back to word windows.
            if sentence_tokens > self.config.max_tokens {
                if !piece.is_empty() {
                    self.emit_piece(chunks, &piece);
                    piece = self.seed_overlap(&piece);
                    piece_tokens = count_tokens(&piece).unwrap_or(0);
                }
                let (head, head_tokens) = self.split_by_words(sentence, chunks, &piece);
                piece = head;
                piece_tokens = head_tokens;
                continue;
            }

            if piece_tokens + sentence_tokens > self.config.optimal_tokens && !piece.is_empty() {
                self.emit_piece(chunks, &piece);
                let overlap = self.seed_overlap(&piece);
                piece = overlap;
                piece_tokens = count_tokens(&piece).unwrap_or(0);

                // A sentence close to max_tokens leaves no room for the full
                // carried context; shrink the seed from the front so the
                // piece stays within the hard bound.
                while piece_tokens + sentence_tokens > self.config.max_tokens {
                    match piece.split_once(' ') {
                        Some((_, rest)) => {
                            piece = rest.to_string();
                            piece_tokens = count_tokens(&piece).unwrap_or(0);
                        }
                        None => {
                            piece.clear();
                            piece_tokens = 0;
                            break;
                        }
                    }
                }
            }

            if !piece.is_empty() {
                piece.push(' ');
            }
            piece.push_str(sentence);
            piece_tokens += sentence_tokens;
        }

        if piece.is_empty() {
            return None;
        }
        if piece_tokens < self.config.min_tokens {
            return Some((piece, piece_tokens));
        }
        self.emit_piece(chunks, &piece);
        None
    }

    fn emit_piece(&self, chunks: &mut Vec<Chunk>, piece: &str) {
        let token_count = count_tokens(piece).unwrap_or(0);
        chunks.push(Chunk {
            content: piece.to_string(),
            token_count,
            source_order: 0,
        });
    }

    fn seed_overlap(&self, previous: &str) -> String {
        trailing_overlap(previous, self.config.overlap_tokens)
    }

    /// Last-resort split for a boundary-free sentence: word windows of at
    /// most `optimal_tokens`, overlap carried between windows. Returns the
    /// final window for the caller to keep accumulating into.
    fn split_by_words(&self, sentence: &str, chunks: &mut Vec<Chunk>, seed: &str) -> (String, usize) {
        let mut piece = seed.to_string();
        let mut piece_tokens = count_tokens(&piece).unwrap_or(0);

        for word in sentence.split_whitespace() {
            let word_tokens = word.chars().count().div_ceil(4).max(1);
            if piece_tokens + word_tokens > self.config.optimal_tokens && !piece.is_empty() {
                self.emit_piece(chunks, &piece);
                piece = self.seed_overlap(&piece);
                piece_tokens = count_tokens(&piece).unwrap_or(0);
            }
            if !piece.is_empty() {
                piece.push(' ');
            }
            piece.push_str(word);
            piece_tokens += word_tokens;
        }

        (piece, piece_tokens)
    }
}

/// Sentence boundary: terminal punctuation (`.`, `!`, `?`) followed by
/// whitespace. The punctuation stays with its sentence.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let bytes = text.as_bytes();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        let b = bytes[i];
        if (b == b'.' || b == b'!' || b == b'?')
            && bytes.get(i + 1).is_some_and(|next| next.is_ascii_whitespace())
        {
            let sentence = text[start..=i].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = i + 1;
        }
        i += 1;
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }

    sentences
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenize::count_tokens;

    fn config() -> ChunkingConfig {
        ChunkingConfig::default()
    }

    /// Build a section of roughly `tokens` tokens made of short sentences.
    fn section_of(index: usize, tokens: usize) -> RawSection {
        // four words of at most four chars each = exactly 4 tokens
        let sentence = "word wort ward ok.";
        let repeats = tokens / 4;
        let text = std::iter::repeat(sentence)
            .take(repeats)
            .collect::<Vec<_>>()
            .join(" ");
        RawSection::body(index, text)
    }

    #[test]
    fn split_sentences_finds_terminal_boundaries() {
        let text = "First sentence. Second one! Third? Trailing tail";
        let sentences = split_sentences(text);
        assert_eq!(
            sentences,
            vec!["First sentence.", "Second one!", "Third?", "Trailing tail"]
        );
    }

    #[test]
    fn consecutive_small_sections_merge_until_optimal() {
        // 40 + 60 + 500 merge to 600 (<= max); the next 300 would cross 800.
        let sections = vec![
            section_of(0, 40),
            section_of(1, 60),
            section_of(2, 500),
            section_of(3, 300),
        ];
        let result = ChunkNormalizer::new(config()).normalize(&sections);

        assert_eq!(result.chunks.len(), 2);
        assert_eq!(result.chunks[0].token_count, 600);
        assert_eq!(result.chunks[1].token_count, 300);
    }

    #[test]
    fn source_order_is_strictly_increasing() {
        let sections: Vec<RawSection> = (0..8).map(|i| section_of(i, 200)).collect();
        let result = ChunkNormalizer::new(config()).normalize(&sections);

        assert!(!result.chunks.is_empty());
        for window in result.chunks.windows(2) {
            assert!(window[0].source_order < window[1].source_order);
        }
    }

    #[test]
    fn chunks_respect_bounds_except_possibly_last() {
        let sections = vec![
            section_of(0, 120),
            section_of(1, 480),
            section_of(2, 700),
            section_of(3, 64),
            section_of(4, 900),
            section_of(5, 128),
        ];
        let normalizer = ChunkNormalizer::new(config());
        let result = normalizer.normalize(&sections);

        let config = config();
        for chunk in &result.chunks[..result.chunks.len() - 1] {
            assert!(
                chunk.token_count >= config.min_tokens && chunk.token_count <= config.max_tokens,
                "chunk of {} tokens outside [{}, {}]",
                chunk.token_count,
                config.min_tokens,
                config.max_tokens
            );
        }
        assert!(result.chunks.last().unwrap().token_count <= config.max_tokens);
    }

    #[test]
    fn oversized_section_splits_with_shared_overlap() {
        let sections = vec![section_of(0, 1600)];
        let cfg = config();
        let result = ChunkNormalizer::new(cfg).normalize(&sections);

        assert!(result.chunks.len() >= 2);
        for chunk in &result.chunks {
            assert!(chunk.token_count <= cfg.max_tokens);
        }
        for window in result.chunks.windows(2) {
            let overlap = trailing_overlap(&window[0].content, cfg.overlap_tokens);
            assert!(
                window[1].content.starts_with(&overlap),
                "adjacent pieces must share carried context"
            );
            assert!(count_tokens(&overlap).unwrap() >= cfg.overlap_tokens);
        }
    }

    #[test]
    fn near_max_sentences_never_push_a_piece_past_max() {
        // Two 780-token sentences: after the first piece closes, the carried
        // overlap must shrink so overlap + sentence stays within max.
        let cfg = config();
        let sentence = format!("{}end.", "word ".repeat(779));
        let sections = vec![RawSection::body(0, format!("{sentence} {sentence}"))];
        let result = ChunkNormalizer::new(cfg).normalize(&sections);

        assert_eq!(result.chunks.len(), 2);
        for chunk in &result.chunks {
            assert!(
                chunk.token_count <= cfg.max_tokens,
                "piece of {} tokens exceeds max {}",
                chunk.token_count,
                cfg.max_tokens
            );
        }
    }

    #[test]
    fn trailing_undersized_buffer_merges_backward() {
        let sections = vec![section_of(0, 400), section_of(1, 40)];
        let result = ChunkNormalizer::new(config()).normalize(&sections);

        // 400 >= min closes on end-of-input; the 40-token tail folds into it.
        assert_eq!(result.chunks.len(), 1);
        assert_eq!(result.chunks[0].token_count, 440);
    }

    #[test]
    fn trailing_undersized_without_candidate_is_emitted() {
        let sections = vec![section_of(0, 40)];
        let result = ChunkNormalizer::new(config()).normalize(&sections);

        assert_eq!(result.chunks.len(), 1);
        assert_eq!(result.chunks[0].token_count, 40);
    }

    #[test]
    fn tokenization_failure_skips_that_section_only() {
        let huge = "a".repeat((1 << 20) + 1);
        let sections = vec![
            section_of(0, 200),
            RawSection::body(1, huge),
            section_of(2, 200),
        ];
        let result = ChunkNormalizer::new(config()).normalize(&sections);

        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].index, 1);
        let total: usize = result.chunks.iter().map(|c| c.token_count).sum();
        assert_eq!(total, 400);
    }

    #[test]
    fn empty_input_produces_no_chunks() {
        let result = ChunkNormalizer::new(config()).normalize(&[]);
        assert!(result.chunks.is_empty());
        assert!(result.skipped.is_empty());
    }
}
