//! Splits note bodies into overlapping character windows for summarizing.
//!
//! Windows are measured in chars, never bytes, so a chunk boundary cannot land
//! inside a UTF-8 sequence.

use sha2::{Digest, Sha256};

use crate::notes::Note;

/// Default window size in chars.
pub const DEFAULT_CHUNK_SIZE: usize = 3000;
/// Default overlap between consecutive windows, in chars.
pub const DEFAULT_CHUNK_OVERLAP: usize = 300;

/// Window size and overlap. `overlap < size` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    size: usize,
    overlap: usize,
}

impl ChunkParams {
    pub fn new(size: usize, overlap: usize) -> Result<Self, ChunkError> {
        if size == 0 {
            return Err(ChunkError::ZeroSize);
        }
        if overlap >= size {
            return Err(ChunkError::OverlapTooLarge { size, overlap });
        }
        Ok(Self { size, overlap })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// A chunk of text from a note, with source reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// 12 hex chars of sha256(source + index).
    pub id: String,
    pub source: String,
    /// Index of this chunk within the note (0, 1, 2, …).
    pub index: usize,
    pub text: String,
    /// 16 hex chars of sha256(text); used to detect unchanged chunks on rebuild.
    pub content_hash: String,
}

/// Chunk a single note's body.
pub fn chunk_note(note: &Note, params: ChunkParams) -> Vec<Chunk> {
    split_windows(&note.body, params)
        .into_iter()
        .enumerate()
        .map(|(i, text)| Chunk {
            id: chunk_id(&note.source, i),
            source: note.source.clone(),
            index: i,
            content_hash: content_hash(&text),
            text,
        })
        .collect()
}

/// Chunk all notes. Returns chunks from all notes in order.
pub fn chunk_notes(notes: &[Note], params: ChunkParams) -> Vec<Chunk> {
    notes.iter().flat_map(|n| chunk_note(n, params)).collect()
}

pub fn chunk_id(source: &str, index: usize) -> String {
    let digest = Sha256::digest(format!("{source}{index}").as_bytes());
    hex_prefix(&digest, 12)
}

pub fn content_hash(text: &str) -> String {
    hex_prefix(&Sha256::digest(text.as_bytes()), 16)
}

pub(crate) fn hex_prefix(bytes: &[u8], len: usize) -> String {
    let mut s: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    s.truncate(len);
    s
}

/// Windows of `size` chars, each starting `overlap` chars before the previous one ended.
/// Stops once a window reaches the end, so the tail is never repeated on its own.
fn split_windows(text: &str, params: ChunkParams) -> Vec<String> {
    // Byte offset of every char, plus the end, so slicing stays on char boundaries.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let len = bounds.len() - 1;
    let step = params.size - params.overlap;

    let mut out = Vec::new();
    let mut start = 0;
    while start < len {
        let end = (start + params.size).min(len);
        let piece = text[bounds[start]..bounds[end]].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        if end == len {
            break;
        }
        start += step;
    }
    out
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("chunk size must be greater than zero")]
    ZeroSize,
    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({size})")]
    OverlapTooLarge { size: usize, overlap: usize },
}
