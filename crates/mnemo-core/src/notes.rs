//! Discovering and parsing notes (`.txt`, `.md`, `.markdown`) from the notes directory.
//!
//! We only read the notes folder; nothing here ever writes to it.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use walkdir::WalkDir;

const NOTE_EXTENSIONS: &[&str] = &["txt", "md", "markdown"];

/// A note file we found: path and parsed content (body with optional frontmatter stripped).
#[derive(Debug, Clone)]
pub struct Note {
    pub path: PathBuf,
    /// Path relative to the notes root, `/`-separated. Stable identity of the note.
    pub source: String,
    /// Raw file content.
    pub raw: String,
    /// Content without YAML frontmatter.
    pub body: String,
    pub meta: NoteMeta,
}

/// Optional frontmatter fields we care about. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NoteMeta {
    pub title: Option<String>,
    pub tags: Vec<String>,
}

/// Whether `path` has one of the note extensions (case-insensitive).
pub fn is_note_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| NOTE_EXTENSIONS.iter().any(|n| ext.eq_ignore_ascii_case(n)))
}

/// Scans `root` for all note files and returns their content, sorted by path.
/// Does not follow symlinks into directories (walkdir default).
pub fn scan_notes(root: &Path) -> Result<Vec<Note>, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }
    let mut notes = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
    {
        let entry = entry.map_err(|e| ScanError::Walk(e.to_string()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || !is_note_file(path) {
            continue;
        }
        let bytes = std::fs::read(path).map_err(|e| ScanError::Read(path.to_path_buf(), e))?;
        let raw = String::from_utf8_lossy(&bytes).into_owned();
        let (meta, body) = split_frontmatter(&raw);
        notes.push(Note {
            path: path.to_path_buf(),
            source: source_name(root, path),
            raw,
            body,
            meta,
        });
    }
    notes.sort_by(|a, b| a.source.cmp(&b.source));
    Ok(notes)
}

fn source_name(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

/// Splits optional YAML frontmatter (between the first `---` and the next `---`)
/// from the body. Unparseable frontmatter still gets stripped; metadata is then default.
fn split_frontmatter(content: &str) -> (NoteMeta, String) {
    let s = content.trim_start();
    let Some(after_first) = s.strip_prefix("---") else {
        return (NoteMeta::default(), content.to_string());
    };
    let Some(end) = after_first.find("\n---") else {
        return (NoteMeta::default(), content.to_string());
    };
    let yaml = &after_first[..end];
    let body = after_first[end + 4..].trim_start().to_string();
    let meta = serde_yaml::from_str::<NoteMeta>(yaml).unwrap_or_default();
    (meta, body)
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("walk error: {0}")]
    Walk(String),
    #[error("read error for {0}: {1}")]
    Read(PathBuf, std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontmatter_plain() {
        let (meta, body) = split_frontmatter("Hello world.");
        assert_eq!(body, "Hello world.");
        assert_eq!(meta, NoteMeta::default());
    }

    #[test]
    fn frontmatter_with_yaml() {
        let s = "---\ntitle: Foo\ntags: [a, b]\ndate: 2024-01-01\n---\n\nActual content here.";
        let (meta, body) = split_frontmatter(s);
        assert_eq!(body, "Actual content here.");
        assert_eq!(meta.title.as_deref(), Some("Foo"));
        assert_eq!(meta.tags, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn frontmatter_malformed_is_still_stripped() {
        let (meta, body) = split_frontmatter("---\n: : [\n---\nBody");
        assert_eq!(body, "Body");
        assert_eq!(meta, NoteMeta::default());
    }

    #[test]
    fn note_extensions() {
        assert!(is_note_file(Path::new("a.md")));
        assert!(is_note_file(Path::new("a.TXT")));
        assert!(is_note_file(Path::new("dir/a.markdown")));
        assert!(!is_note_file(Path::new("a.pdf")));
        assert!(!is_note_file(Path::new("README")));
    }

    #[test]
    fn scan_finds_notes_sorted_and_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::create_dir_all(root.join(".hidden")).unwrap();
        std::fs::write(root.join("b.txt"), "bee").unwrap();
        std::fs::write(root.join("a.md"), "---\ntitle: A\n---\nay").unwrap();
        std::fs::write(root.join("sub/c.markdown"), "sea").unwrap();
        std::fs::write(root.join(".hidden/d.md"), "secret").unwrap();
        std::fs::write(root.join("image.png"), [0u8, 1, 2]).unwrap();

        let notes = scan_notes(root).unwrap();
        let sources: Vec<_> = notes.iter().map(|n| n.source.as_str()).collect();
        assert_eq!(sources, vec!["a.md", "b.txt", "sub/c.markdown"]);
        assert_eq!(notes[0].body, "ay");
        assert_eq!(notes[0].meta.title.as_deref(), Some("A"));
    }

    #[test]
    fn scan_reads_invalid_utf8_lossily() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.txt"), [b'o', b'k', 0xff, b'!']).unwrap();
        let notes = scan_notes(dir.path()).unwrap();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].body.starts_with("ok"));
        assert!(notes[0].body.ends_with('!'));
    }

    #[test]
    fn scan_rejects_missing_dir() {
        let err = scan_notes(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, ScanError::NotADirectory(_)));
    }
}
