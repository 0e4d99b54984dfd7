//! Memory build pipeline: scan → chunk → summarize → embed → store → save.
//!
//! Rebuilds are incremental: a chunk whose id and content hash match the
//! previous index keeps its summary and vector, so only new or edited text
//! goes through llama.cpp and the embedder again. Excerpt fallbacks are never
//! reused; the next build tries the model again.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::chunks::{chunk_notes, ChunkError, ChunkParams};
use crate::config::Project;
use crate::embed::{EmbedError, Embedder};
use crate::llama::LlamaCli;
use crate::notes::{scan_notes, Note, ScanError};
use crate::store::{IndexPaths, MemoryIndex, MemoryRecord, StoreError};
use crate::summarize::{SummaryOrigin, Summarizer};

/// Counts from one build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub notes: usize,
    pub chunks: usize,
    /// Chunks sent to the summarizer this run.
    pub summarized: usize,
    /// Chunks carried over unchanged from the previous index.
    pub reused: usize,
    /// Summaries that fell back to an excerpt.
    pub fallbacks: usize,
}

/// Scan the project's notes directory and rebuild memory.
pub async fn build_memory(project: &Project, embedder: &Embedder) -> Result<BuildReport, BuildError> {
    let notes = scan_notes(&project.notes_dir())?;
    build_memory_from_notes(project, embedder, &notes).await
}

/// Rebuild memory from already-scanned notes and save it.
pub async fn build_memory_from_notes(
    project: &Project,
    embedder: &Embedder,
    notes: &[Note],
) -> Result<BuildReport, BuildError> {
    if notes.is_empty() {
        return Err(BuildError::NoNotes(project.notes_dir()));
    }
    let cfg = &project.config;
    let params = ChunkParams::new(cfg.chunk_size_chars, cfg.chunk_overlap_chars)?;
    let chunks = chunk_notes(notes, params);

    let paths = IndexPaths::from_project(project);
    let previous = load_previous(&paths, &embedder.fingerprint());
    let reusable = previous.as_ref().map(|p| p.entries_by_id()).unwrap_or_default();

    let summarizer = Summarizer::new(&LlamaCli::from_project(project), cfg.summarizer.clone());
    let mut report = BuildReport {
        notes: notes.len(),
        chunks: chunks.len(),
        ..BuildReport::default()
    };

    // Reused entries carry their vector; fresh ones are embedded below in one batch.
    let mut slots: Vec<(MemoryRecord, Option<Vec<f32>>)> = Vec::with_capacity(chunks.len());
    for chunk in &chunks {
        if let Some((record, vector)) = reusable
            .get(chunk.id.as_str())
            .filter(|(r, _)| r.content_hash == chunk.content_hash && r.origin == SummaryOrigin::Model)
        {
            report.reused += 1;
            slots.push((MemoryRecord::clone(record), Some(vector.to_vec())));
            continue;
        }
        let length = chunk.text.chars().count();
        info!("Summarizing chunk {}#{} (chars={})", chunk.source, chunk.index, length);
        let summary = summarizer.summarize(&chunk.text).await;
        report.summarized += 1;
        if summary.origin == SummaryOrigin::Fallback {
            report.fallbacks += 1;
        }
        slots.push((
            MemoryRecord {
                id: chunk.id.clone(),
                source: chunk.source.clone(),
                chunk_index: chunk.index,
                summary: summary.text,
                length,
                content_hash: chunk.content_hash.clone(),
                origin: summary.origin,
            },
            None,
        ));
    }

    let fresh: Vec<String> = slots
        .iter()
        .filter(|(_, v)| v.is_none())
        .map(|(r, _)| r.summary.clone())
        .collect();
    let mut fresh_vectors = embedder.embed_batch(&fresh).await?.into_iter();

    let mut index = MemoryIndex::new(embedder.fingerprint());
    for (record, vector) in slots {
        let vector = match vector {
            Some(v) => v,
            None => fresh_vectors.next().ok_or(EmbedError::CountMismatch {
                expected: fresh.len(),
                got: 0,
            })?,
        };
        index.add(record, &vector)?;
    }
    index.save(&paths, cfg.index_format)?;

    info!(
        notes = report.notes,
        chunks = report.chunks,
        summarized = report.summarized,
        reused = report.reused,
        fallbacks = report.fallbacks,
        "memory saved to {}",
        paths.summaries.display()
    );
    Ok(report)
}

/// Previous index if it exists, loads, and was built by the same embedder.
fn load_previous(paths: &IndexPaths, fingerprint: &str) -> Option<MemoryIndex> {
    if !paths.exists() {
        return None;
    }
    match MemoryIndex::load(paths) {
        Ok(idx) if idx.embedder() == fingerprint => Some(idx),
        Ok(idx) => {
            info!(
                previous = idx.embedder(),
                current = fingerprint,
                "embedder changed; re-summarizing everything"
            );
            None
        }
        Err(e) => {
            warn!(error = %e, "previous memory unreadable; rebuilding from scratch");
            None
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no note files found in {0}; add some .txt or .md files and re-run")]
    NoNotes(PathBuf),
    #[error("scan error: {0}")]
    Scan(#[from] ScanError),
    #[error("invalid chunk settings: {0}")]
    Chunk(#[from] ChunkError),
    #[error("embedding error: {0}")]
    Embed(#[from] EmbedError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
