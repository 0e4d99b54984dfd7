//! Vector index over note summaries: cosine search plus persistence.
//!
//! Records live in `summaries.json`. Vectors live either in a compact binary
//! index (`index.bin`) or, as a fallback any tool can read, in plain JSON
//! arrays (`vectors.json`). Loading prefers the binary index and falls back
//! to the raw vectors when it is missing or unreadable.
//!
//! `summaries.json` is written last and records a digest of its vectors, so a
//! save interrupted halfway never loads as mismatched records and vectors.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::chunks::hex_prefix;

use crate::summarize::SummaryOrigin;

const SUMMARIES_VERSION: u32 = 1;
const BINARY_MAGIC: &[u8; 8] = b"MNEMOIDX";
const BINARY_VERSION: u32 = 1;
const BINARY_HEADER_LEN: usize = 8 + 4 + 4 + 8;

/// Which file holds the vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexFormat {
    #[default]
    Binary,
    Raw,
}

/// One summarized chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub source: String,
    pub chunk_index: usize,
    pub summary: String,
    /// Length of the chunk in chars.
    pub length: usize,
    pub content_hash: String,
    #[serde(default)]
    pub origin: SummaryOrigin,
}

/// A search result with its cosine similarity.
#[derive(Debug, Clone, Serialize)]
pub struct Hit {
    pub record: MemoryRecord,
    pub score: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct SummariesFile {
    version: u32,
    embedder: String,
    dimensions: usize,
    /// Digest of the vectors saved alongside; absent in older files.
    #[serde(default)]
    vectors_digest: Option<String>,
    records: Vec<MemoryRecord>,
}

/// File locations for one index.
#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub summaries: PathBuf,
    pub binary: PathBuf,
    pub raw: PathBuf,
}

impl IndexPaths {
    pub fn from_project(project: &crate::config::Project) -> Self {
        Self {
            summaries: project.summaries_path(),
            binary: project.index_path(),
            raw: project.raw_vectors_path(),
        }
    }

    /// Whether a previous build left records behind.
    pub fn exists(&self) -> bool {
        self.summaries.is_file()
    }
}

/// Summaries and their unit-length embeddings, searched by brute-force cosine similarity.
#[derive(Debug, Clone, Default)]
pub struct MemoryIndex {
    embedder: String,
    dimensions: usize,
    records: Vec<MemoryRecord>,
    vectors: Vec<Vec<f32>>,
}

impl MemoryIndex {
    /// Empty index for vectors produced by `embedder` (see `Embedder::fingerprint`).
    pub fn new(embedder: impl Into<String>) -> Self {
        Self {
            embedder: embedder.into(),
            ..Self::default()
        }
    }

    pub fn embedder(&self) -> &str {
        &self.embedder
    }

    /// Vector dimension; 0 while empty.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn records(&self) -> &[MemoryRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Add a record with its embedding. The embedding is normalized before storage.
    pub fn add(&mut self, record: MemoryRecord, embedding: &[f32]) -> Result<(), StoreError> {
        if embedding.is_empty() {
            return Err(StoreError::EmptyVector(record.id));
        }
        if self.dimensions == 0 {
            self.dimensions = embedding.len();
        } else if embedding.len() != self.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimensions,
                got: embedding.len(),
            });
        }
        self.records.push(record);
        self.vectors.push(normalize(embedding));
        Ok(())
    }

    /// Records and vectors keyed by chunk id, for reuse across rebuilds.
    pub fn entries_by_id(&self) -> HashMap<&str, (&MemoryRecord, &[f32])> {
        self.records
            .iter()
            .zip(&self.vectors)
            .map(|(r, v)| (r.id.as_str(), (r, v.as_slice())))
            .collect()
    }

    /// Up to `k` records most similar to `query`, best first. Ties keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<Hit> {
        if self.is_empty() || query.is_empty() || k == 0 {
            return Vec::new();
        }
        let q = normalize(query);
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, dot(&q, v)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored
            .into_iter()
            .take(k)
            .map(|(i, score)| Hit {
                record: self.records[i].clone(),
                score,
            })
            .collect()
    }

    /// Persist records and vectors. The file of the other format is removed so a
    /// stale copy is never loaded.
    pub fn save(&self, paths: &IndexPaths, format: IndexFormat) -> Result<(), StoreError> {
        let (target, stale) = match format {
            IndexFormat::Binary => (&paths.binary, &paths.raw),
            IndexFormat::Raw => (&paths.raw, &paths.binary),
        };
        let bytes = match format {
            IndexFormat::Binary => encode_binary(self.dimensions, &self.vectors),
            IndexFormat::Raw => serde_json::to_vec(&self.vectors).map_err(StoreError::Serialize)?,
        };
        write_atomic(target, &bytes)?;

        let file = SummariesFile {
            version: SUMMARIES_VERSION,
            embedder: self.embedder.clone(),
            dimensions: self.dimensions,
            vectors_digest: Some(vectors_digest(&self.vectors)),
            records: self.records.clone(),
        };
        let json = serde_json::to_vec_pretty(&file).map_err(StoreError::Serialize)?;
        write_atomic(&paths.summaries, &json)?;

        if stale.exists() {
            std::fs::remove_file(stale).map_err(|e| StoreError::Io(stale.clone(), e))?;
        }
        debug!(records = self.len(), ?format, path = %target.display(), "saved memory index");
        Ok(())
    }

    /// Load records and vectors. Falls back from the binary index to raw vectors.
    pub fn load(paths: &IndexPaths) -> Result<Self, StoreError> {
        if !paths.summaries.is_file() {
            return Err(StoreError::NotBuilt(paths.summaries.clone()));
        }
        let s = std::fs::read(&paths.summaries).map_err(|e| StoreError::Io(paths.summaries.clone(), e))?;
        let file: SummariesFile = serde_json::from_slice(&s)
            .map_err(|e| StoreError::Corrupt(paths.summaries.clone(), e.to_string()))?;

        let vectors = load_vectors(paths, file.vectors_digest.as_deref())?;
        if vectors.len() != file.records.len() {
            return Err(StoreError::Corrupt(
                paths.summaries.clone(),
                format!("{} records but {} vectors", file.records.len(), vectors.len()),
            ));
        }
        let mut index = MemoryIndex::new(file.embedder);
        for (record, v) in file.records.into_iter().zip(vectors) {
            index.add(record, &v)?;
        }
        if !index.is_empty() && index.dimensions != file.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: file.dimensions,
                got: index.dimensions,
            });
        }
        Ok(index)
    }
}

/// Vectors from the binary index, else the raw file. A candidate whose digest
/// differs from `expected` belongs to another save and is skipped.
fn load_vectors(paths: &IndexPaths, expected: Option<&str>) -> Result<Vec<Vec<f32>>, StoreError> {
    let check = |path: &PathBuf, vectors: Vec<Vec<f32>>| match expected {
        Some(digest) if vectors_digest(&vectors) != digest => Err(StoreError::Corrupt(
            path.clone(),
            "vectors do not belong to summaries.json (interrupted save?)".into(),
        )),
        _ => Ok(vectors),
    };

    let mut binary_err = None;
    if paths.binary.is_file() {
        match std::fs::read(&paths.binary)
            .map_err(|e| StoreError::Io(paths.binary.clone(), e))
            .and_then(|b| decode_binary(&b).map_err(|m| StoreError::Corrupt(paths.binary.clone(), m)))
            .and_then(|v| check(&paths.binary, v))
        {
            Ok(v) => return Ok(v),
            Err(e) => {
                warn!(error = %e, "binary index unusable, trying raw vectors");
                binary_err = Some(e);
            }
        }
    }
    if paths.raw.is_file() {
        let b = std::fs::read(&paths.raw).map_err(|e| StoreError::Io(paths.raw.clone(), e))?;
        debug!(path = %paths.raw.display(), "loading raw vectors");
        let vectors = serde_json::from_slice(&b).map_err(|e| StoreError::Corrupt(paths.raw.clone(), e.to_string()))?;
        return check(&paths.raw, vectors);
    }
    Err(binary_err.unwrap_or_else(|| StoreError::NotBuilt(paths.binary.clone())))
}

/// 16 hex chars of sha256 over every component, little-endian.
fn vectors_digest(vectors: &[Vec<f32>]) -> String {
    let mut hasher = Sha256::new();
    for x in vectors.iter().flatten() {
        hasher.update(x.to_le_bytes());
    }
    hex_prefix(&hasher.finalize(), 16)
}

fn encode_binary(dimensions: usize, vectors: &[Vec<f32>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(BINARY_HEADER_LEN + vectors.len() * dimensions * 4);
    out.extend_from_slice(BINARY_MAGIC);
    out.extend_from_slice(&BINARY_VERSION.to_le_bytes());
    out.extend_from_slice(&(dimensions as u32).to_le_bytes());
    out.extend_from_slice(&(vectors.len() as u64).to_le_bytes());
    for v in vectors {
        for x in v {
            out.extend_from_slice(&x.to_le_bytes());
        }
    }
    out
}

fn decode_binary(bytes: &[u8]) -> Result<Vec<Vec<f32>>, String> {
    if bytes.len() < BINARY_HEADER_LEN || &bytes[..8] != BINARY_MAGIC {
        return Err("missing index header".into());
    }
    let version = u32::from_le_bytes(read_array(&bytes[8..12]));
    if version != BINARY_VERSION {
        return Err(format!("unsupported index version {version}"));
    }
    let dims = u32::from_le_bytes(read_array(&bytes[12..16])) as usize;
    let count = u64::from_le_bytes(read_array(&bytes[16..24])) as usize;
    let body = &bytes[BINARY_HEADER_LEN..];
    let expected = count
        .checked_mul(dims)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| "index size overflows".to_string())?;
    if body.len() != expected {
        return Err(format!("expected {expected} bytes of vectors, found {}", body.len()));
    }
    if dims == 0 {
        return Ok(vec![Vec::new(); count]);
    }
    Ok(body
        .chunks_exact(dims * 4)
        .map(|row| {
            row.chunks_exact(4)
                .map(|b| f32::from_le_bytes(read_array(b)))
                .collect()
        })
        .collect())
}

fn read_array<const N: usize>(b: &[u8]) -> [u8; N] {
    let mut a = [0u8; N];
    a.copy_from_slice(&b[..N]);
    a
}

/// Write to a sibling temp file, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(parent.to_path_buf(), e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes).map_err(|e| StoreError::Io(tmp.clone(), e))?;
    std::fs::rename(&tmp, path).map_err(|e| StoreError::Io(path.to_path_buf(), e))
}

/// Unit-length copy of `v`; zero vectors are returned unchanged.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("memory has not been built yet ({0} missing); run `mnemo build`")]
    NotBuilt(PathBuf),
    #[error("vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("empty embedding for record {0}")]
    EmptyVector(String),
    #[error("corrupt memory file {0}: {1}")]
    Corrupt(PathBuf, String),
    #[error("failed to serialize memory: {0}")]
    Serialize(serde_json::Error),
    #[error("I/O error on {0}: {1}")]
    Io(PathBuf, std::io::Error),
}
