use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::chunk::Chunk;
use crate::document::ProcessedDocument;

/// Sizes are measured in characters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2000,
            chunk_overlap: 200,
        }
    }
}

/// Recursive splitter: paragraphs first, then lines, sentences and words,
/// and finally raw characters for pieces that are still too long. Pieces
/// are packed into chunks of at most `chunk_size` characters, each chunk
/// starting with up to `chunk_overlap` characters of its predecessor.
pub struct Chunker {
    config: ChunkerConfig,
}

#[derive(Debug, Clone, Copy)]
enum Level {
    Paragraph,
    Line,
    Sentence,
    Word,
}

impl Level {
    fn next(self) -> Option<Level> {
        match self {
            Level::Paragraph => Some(Level::Line),
            Level::Line => Some(Level::Sentence),
            Level::Sentence => Some(Level::Word),
            Level::Word => None,
        }
    }

    fn split(self, text: &str) -> Vec<&str> {
        match self {
            Level::Paragraph => text.split_inclusive("\n\n").collect(),
            Level::Line => text.split_inclusive('\n').collect(),
            Level::Sentence => text.split_sentence_bounds().collect(),
            Level::Word => text.split_word_bounds().collect(),
        }
    }
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        let chunk_size = config.chunk_size.max(1);
        Self {
            config: ChunkerConfig {
                chunk_size,
                chunk_overlap: config.chunk_overlap.min(chunk_size - 1),
            },
        }
    }

    pub fn config(&self) -> ChunkerConfig {
        self.config
    }

    pub fn chunk_text(&self, doc_id: &str, text: &str) -> Vec<Chunk> {
        let mut pieces = Vec::new();
        self.split_recursive(text, Level::Paragraph, &mut pieces);

        self.merge_pieces(&pieces)
            .into_iter()
            .enumerate()
            .map(|(index, text)| {
                Chunk::new(
                    doc_id.to_string(),
                    index,
                    text,
                    self.config.chunk_size,
                    self.config.chunk_overlap,
                )
            })
            .collect()
    }

    pub fn chunk_document(&self, doc: &mut ProcessedDocument) {
        doc.chunks = self.chunk_text(&doc.doc_id, &doc.source);
        tracing::info!(
            filename = %doc.filename,
            chunks = doc.chunks.len(),
            "Document chunked"
        );
    }

    fn split_recursive<'a>(&self, text: &'a str, level: Level, out: &mut Vec<&'a str>) {
        for piece in level.split(text) {
            if char_len(piece) <= self.config.chunk_size {
                out.push(piece);
                continue;
            }
            match level.next() {
                Some(next) => self.split_recursive(piece, next, out),
                None => out.extend(split_chars(piece, self.config.chunk_size)),
            }
        }
    }

    fn merge_pieces(&self, pieces: &[&str]) -> Vec<String> {
        let ChunkerConfig {
            chunk_size,
            chunk_overlap,
        } = self.config;

        let mut chunks = Vec::new();
        let mut window: std::collections::VecDeque<(&str, usize)> = Default::default();
        let mut total = 0;

        for &piece in pieces {
            let len = char_len(piece);

            if total + len > chunk_size && !window.is_empty() {
                push_chunk(&mut chunks, &window);

                // Keep a tail of the previous chunk as overlap
                while total > chunk_overlap || (total + len > chunk_size && total > 0) {
                    let Some((_, front)) = window.pop_front() else {
                        break;
                    };
                    total -= front;
                }
            }

            window.push_back((piece, len));
            total += len;
        }

        push_chunk(&mut chunks, &window);
        chunks
    }
}

fn push_chunk(chunks: &mut Vec<String>, window: &std::collections::VecDeque<(&str, usize)>) {
    let text: String = window.iter().map(|(p, _)| *p).collect();
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn split_chars(text: &str, size: usize) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in text.char_indices() {
        if count == size {
            parts.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        parts.push(&text[start..]);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_chunking() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let text = "This is a test paragraph.\n\nThis is another paragraph.";
        let chunks = chunker.chunk_text("test-doc", text);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].doc_id, "test-doc");
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].chunk_size, 2000);
    }

    #[test]
    fn test_chunks_respect_size() {
        let chunker = Chunker::new(ChunkerConfig {
            chunk_size: 60,
            chunk_overlap: 0,
        });
        let text = "Marco Rossi lives in Rome. He works in Milan. ".repeat(10);
        let chunks = chunker.chunk_text("doc", &text);

        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert!(chunk.text.chars().count() <= 60, "chunk too long: {:?}", chunk.text);
            assert_eq!(chunk.index, i);
        }
    }

    #[test]
    fn test_overlap_repeats_tail() {
        let chunker = Chunker::new(ChunkerConfig {
            chunk_size: 30,
            chunk_overlap: 12,
        });
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let chunks = chunker.chunk_text("doc", text);

        assert!(chunks.len() > 1);
        let first_words: Vec<&str> = chunks[0].text.split_whitespace().collect();
        let last_of_first = first_words.last().unwrap();
        assert!(chunks[1].text.contains(last_of_first));
    }

    #[test]
    fn test_long_word_is_split_by_characters() {
        let chunker = Chunker::new(ChunkerConfig {
            chunk_size: 10,
            chunk_overlap: 0,
        });
        let chunks = chunker.chunk_text("doc", &"x".repeat(25));

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].text, "xxxxx");
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        let chunker = Chunker::new(ChunkerConfig::default());
        assert!(chunker.chunk_text("doc", "  \n\n ").is_empty());
    }
}
