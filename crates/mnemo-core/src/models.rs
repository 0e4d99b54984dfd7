//! Model files under `model/` and picking one of them.

use std::path::{Path, PathBuf};

const MODEL_EXTENSIONS: &[&str] = &["gguf", "bin", "safetensors"];

/// Model files directly inside `dir`, sorted by name. A missing dir has no models.
pub fn find_models(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut models: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| MODEL_EXTENSIONS.iter().any(|m| ext.eq_ignore_ascii_case(m)))
        })
        .collect();
    models.sort();
    models
}

/// Resolve a user choice: a 1-based number from the listing, or a file name.
pub fn resolve_selection<'a>(models: &'a [PathBuf], choice: &str) -> Option<&'a PathBuf> {
    let choice = choice.trim();
    if let Ok(n) = choice.parse::<usize>() {
        return n.checked_sub(1).and_then(|i| models.get(i));
    }
    models
        .iter()
        .find(|m| m.file_name().is_some_and(|f| f.to_string_lossy() == choice))
}

/// Whether `candidate` is the configured model (compared by file name).
pub fn is_current(candidate: &Path, current: &Path) -> bool {
    candidate.file_name().is_some() && candidate.file_name() == current.file_name()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.gguf", "a.GGUF", "c.safetensors", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("d.gguf")).unwrap();
        dir
    }

    #[test]
    fn lists_model_files_only() {
        let dir = model_dir();
        let names: Vec<String> = find_models(dir.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.GGUF", "b.gguf", "c.safetensors"]);
    }

    #[test]
    fn missing_dir_is_empty() {
        assert!(find_models(Path::new("/no/models/here")).is_empty());
    }

    #[test]
    fn selection_by_number_or_name() {
        let dir = model_dir();
        let models = find_models(dir.path());
        assert!(resolve_selection(&models, "2").unwrap().ends_with("b.gguf"));
        assert!(resolve_selection(&models, "c.safetensors").unwrap().ends_with("c.safetensors"));
        assert!(resolve_selection(&models, "0").is_none());
        assert!(resolve_selection(&models, "9").is_none());
        assert!(resolve_selection(&models, "zzz.gguf").is_none());
    }

    #[test]
    fn current_by_file_name() {
        assert!(is_current(Path::new("/a/model/x.gguf"), Path::new("model/x.gguf")));
        assert!(!is_current(Path::new("/a/model/y.gguf"), Path::new("model/x.gguf")));
    }
}
