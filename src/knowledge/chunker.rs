use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Slice of an ingested data item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub text: String,
    /// Word offset of the first token inside the item.
    pub start: usize,
    /// Word offset after the last token.
    pub end: usize,
    /// Dataset the item was added to.
    pub dataset: String,
}

impl Chunk {
    pub fn new(text: String, start: usize, end: usize, dataset: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text,
            start,
            end,
            dataset: dataset.into(),
        }
    }
}

/// Word window chunker with overlap.
#[derive(Debug, Clone)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(size: usize, overlap: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            overlap: overlap.min(size - 1),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Split text into overlapping word windows.
    pub fn chunk(&self, text: &str, dataset: &str) -> Vec<Chunk> {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            return Vec::new();
        }

        let step = (self.size - self.overlap).max(1);
        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let end = (start + self.size).min(words.len());
            chunks.push(Chunk::new(words[start..end].join(" "), start, end, dataset));
            if end == words.len() {
                break;
            }
            start += step;
        }

        chunks
    }
}

/// Split OCR output into ingestable pieces: paragraphs first, then lines.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let paragraphs = non_blank(text.split("\n\n"));
    if !paragraphs.is_empty() {
        return paragraphs;
    }
    non_blank(text.split('\n'))
}

fn non_blank<'a>(parts: impl Iterator<Item = &'a str>) -> Vec<String> {
    parts
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}
