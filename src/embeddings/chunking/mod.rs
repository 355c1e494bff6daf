
use std::collections::VecDeque;

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Separators tried in order: paragraphs, lines, words, then single characters
const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// A source document loaded from the corpus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Stable identifier, the path exactly as produced by the scanner
    pub source: String,
    /// Raw document text
    pub text: String,
}

/// Represents a chunk of a document ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Identifier of the parent document
    pub source: String,
    /// The content text
    pub content: String,
    /// The index of this chunk within the document
    pub chunk_index: usize,
}

/// Configuration for content chunking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters
    pub chunk_size: usize,
    /// Characters shared between adjacent chunks
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
        }
    }
}

/// Splits text on the coarsest separator present, recursing into pieces that
/// are still too large, then greedily merges pieces back up to `chunk_size`.
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveSplitter {
    #[inline]
    pub fn new(config: &ChunkingConfig) -> Result<Self> {
        ensure!(config.chunk_size > 0, "Chunk size must be greater than 0");
        ensure!(
            config.chunk_overlap < config.chunk_size,
            "Chunk overlap ({}) must be smaller than chunk size ({})",
            config.chunk_overlap,
            config.chunk_size
        );

        Ok(Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| (*s).to_string()).collect(),
        })
    }

    /// Replace the separator hierarchy (coarsest first)
    #[inline]
    #[must_use]
    pub fn with_separators(mut self, separators: Vec<String>) -> Self {
        self.separators = separators;
        self
    }

    /// Split a document into chunks carrying its identifier
    #[inline]
    pub fn split_document(&self, document: &Document) -> Vec<TextChunk> {
        let chunks: Vec<TextChunk> = self
            .split_text(&document.text)
            .into_iter()
            .enumerate()
            .map(|(chunk_index, content)| TextChunk {
                source: document.source.clone(),
                content,
                chunk_index,
            })
            .collect();

        debug!(
            "Split '{}' into {} chunks ({} chars)",
            document.source,
            chunks.len(),
            char_len(&document.text)
        );

        chunks
    }

    #[inline]
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut final_chunks = Vec::new();

        let mut separator = separators.last().map_or("", String::as_str);
        let mut finer_separators: &[String] = &[];
        for (i, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = "";
                break;
            }
            if text.contains(candidate.as_str()) {
                separator = candidate.as_str();
                finer_separators = &separators[i + 1..];
                break;
            }
        }

        let mut good_splits = Vec::new();
        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                good_splits.push(piece);
                continue;
            }

            if !good_splits.is_empty() {
                final_chunks.extend(self.merge_splits(&good_splits));
                good_splits.clear();
            }

            if finer_separators.is_empty() {
                final_chunks.push(piece.to_string());
            } else {
                final_chunks.extend(self.split_recursive(piece, finer_separators));
            }
        }

        if !good_splits.is_empty() {
            final_chunks.extend(self.merge_splits(&good_splits));
        }

        final_chunks
    }

    /// Greedily merge small pieces into chunks, sliding a window that keeps at
    /// most `chunk_overlap` characters of the previous chunk.
    fn merge_splits(&self, splits: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0;

        for &piece in splits {
            let len = char_len(piece);

            if total + len > self.chunk_size {
                if total > self.chunk_size {
                    warn!(
                        "Created a chunk of size {}, which is longer than the specified {}",
                        total, self.chunk_size
                    );
                }

                if !window.is_empty() {
                    if let Some(chunk) = join_pieces(&window) {
                        chunks.push(chunk);
                    }

                    while total > self.chunk_overlap
                        || (total + len > self.chunk_size && total > 0)
                    {
                        let Some(dropped) = window.pop_front() else {
                            break;
                        };
                        total -= char_len(dropped);
                    }
                }
            }

            window.push_back(piece);
            total += len;
        }

        if let Some(chunk) = join_pieces(&window) {
            chunks.push(chunk);
        }

        chunks
    }
}

/// Split on `separator`, attaching each separator to the start of the piece
/// that follows it. An empty separator splits into single characters.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text.split_inclusive(|_: char| true).collect();
    }

    let mut pieces = Vec::new();
    let (head, mut rest) = match text.find(separator) {
        Some(index) => text.split_at(index),
        None => (text, ""),
    };
    pieces.push(head);

    while !rest.is_empty() {
        let (_, after_separator) = rest.split_at(separator.len());
        match after_separator.find(separator) {
            Some(index) => {
                let (piece, tail) = rest.split_at(separator.len() + index);
                pieces.push(piece);
                rest = tail;
            }
            None => {
                pieces.push(rest);
                rest = "";
            }
        }
    }

    pieces.retain(|piece| !piece.is_empty());
    pieces
}

fn join_pieces(pieces: &VecDeque<&str>) -> Option<String> {
    let joined: String = pieces.iter().copied().collect();
    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Length in characters, the unit `chunk_size` is expressed in
#[inline]
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}
