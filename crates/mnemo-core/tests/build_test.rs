#![cfg(unix)]

mod helpers;

use helpers::*;
use mnemo_core::summarize::SummaryOrigin;
use mnemo_core::{build_memory, BuildError, IndexFormat, IndexPaths, MemoryIndex};
use tempfile::TempDir;

#[tokio::test]
async fn build_writes_summaries_and_binary_index() {
    let _guard = script_lock();
    let bin = TempDir::new().unwrap();
    let script = write_script(bin.path(), "llama-cli", SUMMARY_SCRIPT);
    let (tmp, project) = test_project(&script);
    write_note(tmp.path(), "cat.md", "The cat sleeps on the sofa.\nIt likes the sun.");
    write_note(tmp.path(), "rust/ownership.txt", "Rust ownership moves values.");

    let report = build_memory(&project, &embedder(&project)).await.unwrap();
    assert_eq!(report.notes, 2);
    assert_eq!(report.chunks, 2);
    assert_eq!(report.summarized, 2);
    assert_eq!(report.reused, 0);
    assert_eq!(report.fallbacks, 0);

    let paths = IndexPaths::from_project(&project);
    assert!(paths.summaries.is_file());
    assert!(paths.binary.is_file());
    assert!(!paths.raw.exists());

    let index = MemoryIndex::load(&paths).unwrap();
    assert_eq!(index.embedder(), "hashed:384");
    assert_eq!(index.dimensions(), 384);
    let summaries: Vec<(&str, &str)> = index
        .records()
        .iter()
        .map(|r| (r.source.as_str(), r.summary.as_str()))
        .collect();
    assert_eq!(
        summaries,
        vec![
            ("cat.md", "Note: The cat sleeps on the sofa."),
            ("rust/ownership.txt", "Note: Rust ownership moves values."),
        ]
    );
    assert!(index.records().iter().all(|r| r.origin == SummaryOrigin::Model));
}

#[tokio::test]
async fn rebuild_reuses_unchanged_chunks() {
    let _guard = script_lock();
    let bin = TempDir::new().unwrap();
    let script = write_script(bin.path(), "llama-cli", SUMMARY_SCRIPT);
    let (tmp, project) = test_project(&script);
    write_note(tmp.path(), "a.md", "Alpha note.");
    write_note(tmp.path(), "b.md", "Beta note.");
    let embedder = embedder(&project);

    build_memory(&project, &embedder).await.unwrap();
    let again = build_memory(&project, &embedder).await.unwrap();
    assert_eq!(again.chunks, 2);
    assert_eq!(again.reused, 2);
    assert_eq!(again.summarized, 0);

    write_note(tmp.path(), "b.md", "Beta note, edited.");
    let edited = build_memory(&project, &embedder).await.unwrap();
    assert_eq!(edited.reused, 1);
    assert_eq!(edited.summarized, 1);

    let index = MemoryIndex::load(&IndexPaths::from_project(&project)).unwrap();
    let b = index.records().iter().find(|r| r.source == "b.md").unwrap();
    assert_eq!(b.summary, "Note: Beta note, edited.");
}

#[tokio::test]
async fn deleted_notes_drop_out_of_memory() {
    let _guard = script_lock();
    let bin = TempDir::new().unwrap();
    let script = write_script(bin.path(), "llama-cli", SUMMARY_SCRIPT);
    let (tmp, project) = test_project(&script);
    write_note(tmp.path(), "a.md", "Alpha note.");
    write_note(tmp.path(), "b.md", "Beta note.");
    let embedder = embedder(&project);
    build_memory(&project, &embedder).await.unwrap();

    std::fs::remove_file(tmp.path().join("notes/b.md")).unwrap();
    let report = build_memory(&project, &embedder).await.unwrap();
    assert_eq!(report.chunks, 1);
    let index = MemoryIndex::load(&IndexPaths::from_project(&project)).unwrap();
    assert_eq!(index.len(), 1);
    assert_eq!(index.records()[0].source, "a.md");
}

#[tokio::test]
async fn no_notes_leaves_existing_memory_untouched() {
    let _guard = script_lock();
    let bin = TempDir::new().unwrap();
    let script = write_script(bin.path(), "llama-cli", SUMMARY_SCRIPT);
    let (tmp, project) = test_project(&script);
    write_note(tmp.path(), "a.md", "Alpha note.");
    let embedder = embedder(&project);
    build_memory(&project, &embedder).await.unwrap();
    let paths = IndexPaths::from_project(&project);
    let before = std::fs::read(&paths.summaries).unwrap();

    std::fs::remove_file(tmp.path().join("notes/a.md")).unwrap();
    let err = build_memory(&project, &embedder).await.unwrap_err();
    assert!(matches!(err, BuildError::NoNotes(_)));
    assert_eq!(std::fs::read(&paths.summaries).unwrap(), before);
}

#[tokio::test]
async fn failing_model_falls_back_to_excerpts() {
    let _guard = script_lock();
    let bin = TempDir::new().unwrap();
    let script = write_script(bin.path(), "llama-cli", FAILING_SCRIPT);
    let (tmp, mut project) = test_project(&script);
    project.config.summarizer.fallback_chars = 12;
    write_note(tmp.path(), "a.md", "Alpha line one\nand two.");

    let report = build_memory(&project, &embedder(&project)).await.unwrap();
    assert_eq!(report.fallbacks, 1);
    let index = MemoryIndex::load(&IndexPaths::from_project(&project)).unwrap();
    let record = &index.records()[0];
    assert_eq!(record.origin, SummaryOrigin::Fallback);
    assert_eq!(record.summary, "Alpha line o");
}

#[tokio::test]
async fn raw_format_writes_vectors_json_and_removes_binary() {
    let _guard = script_lock();
    let bin = TempDir::new().unwrap();
    let script = write_script(bin.path(), "llama-cli", SUMMARY_SCRIPT);
    let (tmp, mut project) = test_project(&script);
    write_note(tmp.path(), "a.md", "Alpha note.");
    let embedder = embedder(&project);
    build_memory(&project, &embedder).await.unwrap();
    let paths = IndexPaths::from_project(&project);
    assert!(paths.binary.is_file());

    project.config.index_format = IndexFormat::Raw;
    let report = build_memory(&project, &embedder).await.unwrap();
    assert_eq!(report.reused, 1);
    assert!(paths.raw.is_file());
    assert!(!paths.binary.exists());
    assert_eq!(MemoryIndex::load(&paths).unwrap().len(), 1);
}

#[tokio::test]
async fn changing_embedder_resummarizes_everything() {
    let _guard = script_lock();
    let bin = TempDir::new().unwrap();
    let script = write_script(bin.path(), "llama-cli", SUMMARY_SCRIPT);
    let (tmp, mut project) = test_project(&script);
    write_note(tmp.path(), "a.md", "Alpha note.");
    build_memory(&project, &embedder(&project)).await.unwrap();

    project.config.embedding.dimensions = 64;
    let report = build_memory(&project, &embedder(&project)).await.unwrap();
    assert_eq!(report.reused, 0);
    assert_eq!(report.summarized, 1);
    let index = MemoryIndex::load(&IndexPaths::from_project(&project)).unwrap();
    assert_eq!(index.embedder(), "hashed:64");
    assert_eq!(index.dimensions(), 64);
}

#[tokio::test]
async fn fallback_summaries_are_retried_on_next_build() {
    let _guard = script_lock();
    let bin = TempDir::new().unwrap();
    let failing = write_script(bin.path(), "failing", FAILING_SCRIPT);
    let working = write_script(bin.path(), "working", SUMMARY_SCRIPT);
    let (tmp, mut project) = test_project(&failing);
    write_note(tmp.path(), "a.md", "Alpha note.");
    let embedder = embedder(&project);

    let first = build_memory(&project, &embedder).await.unwrap();
    assert_eq!(first.fallbacks, 1);

    project.config.llama_cpp_path = working.to_string_lossy().into_owned();
    let second = build_memory(&project, &embedder).await.unwrap();
    assert_eq!(second.reused, 0);
    assert_eq!(second.summarized, 1);
    assert_eq!(second.fallbacks, 0);

    let index = MemoryIndex::load(&IndexPaths::from_project(&project)).unwrap();
    assert_eq!(index.records()[0].origin, SummaryOrigin::Model);
    assert_eq!(index.records()[0].summary, "Note: Alpha note.");
}
