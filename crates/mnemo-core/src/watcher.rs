//! File watcher for the notes directory. Reports changed note files.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use notify_debouncer_mini::notify;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult};
use tracing::warn;

use crate::notes::is_note_file;

const DEBOUNCE: Duration = Duration::from_millis(400);

/// Watches `root` and calls `on_change` with the note files that changed (debounced).
/// Changes to other files are ignored. Blocks until the process is stopped
/// (e.g. Ctrl+C). Returns Err on setup failure.
pub fn watch_notes(
    root: &Path,
    on_change: impl Fn(Vec<PathBuf>) + Send + 'static,
) -> Result<(), WatchError> {
    if !root.is_dir() {
        return Err(WatchError::NotADirectory(root.to_path_buf()));
    }
    let root = root.canonicalize().map_err(WatchError::Canonicalize)?;
    let watch_root = root.clone();

    let mut debouncer = new_debouncer(DEBOUNCE, move |res: DebounceEventResult| match res {
        Ok(events) => {
            let changed = changed_notes(&watch_root, events.into_iter().map(|e| e.path));
            if !changed.is_empty() {
                on_change(changed);
            }
        }
        Err(e) => warn!(error = %e, "watcher error"),
    })
    .map_err(|e| WatchError::Notify(e.to_string()))?;

    debouncer
        .watcher()
        .watch(&root, notify::RecursiveMode::Recursive)
        .map_err(|e| WatchError::Watch(e.to_string()))?;

    let (_tx, rx) = mpsc::channel::<()>();
    rx.recv().ok();
    Ok(())
}

/// Note files among `paths`, deduplicated and sorted. Hidden components below `root`
/// are skipped the same way the scanner skips them.
fn changed_notes(root: &Path, paths: impl Iterator<Item = PathBuf>) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = paths
        .filter(|p| is_note_file(p))
        .filter(|p| {
            let rel = p.strip_prefix(root).unwrap_or(p);
            !rel.components()
                .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
        })
        .collect();
    out.sort();
    out.dedup();
    out
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("failed to resolve path: {0}")]
    Canonicalize(std::io::Error),
    #[error("watcher init: {0}")]
    Notify(String),
    #[error("watch failed: {0}")]
    Watch(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_visible_note_files_are_reported() {
        let paths = vec![
            PathBuf::from("/n/b.md"),
            PathBuf::from("/n/a.txt"),
            PathBuf::from("/n/b.md"),
            PathBuf::from("/n/image.png"),
            PathBuf::from("/n/.obsidian/x.md"),
            PathBuf::from("/n/.draft.md"),
        ];
        assert_eq!(
            changed_notes(Path::new("/n"), paths.into_iter()),
            vec![PathBuf::from("/n/a.txt"), PathBuf::from("/n/b.md")]
        );
    }

    #[test]
    fn hidden_root_does_not_hide_notes() {
        let paths = vec![PathBuf::from("/home/u/.notes/a.md")];
        assert_eq!(
            changed_notes(Path::new("/home/u/.notes"), paths.into_iter()),
            vec![PathBuf::from("/home/u/.notes/a.md")]
        );
    }

    #[test]
    fn missing_root_is_an_error() {
        let err = watch_notes(Path::new("/no/such/notes"), |_| {}).unwrap_err();
        assert!(matches!(err, WatchError::NotADirectory(_)));
    }
}
