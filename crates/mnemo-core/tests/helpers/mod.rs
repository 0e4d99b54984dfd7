#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use mnemo_core::config::{EmbeddingConfig, EmbeddingProvider};
use mnemo_core::{Config, Embedder, Project};
use tempfile::TempDir;

/// Prints the first line of the chunk (line 3 of the summary prompt), plus a
/// llama.cpp log line that cleanup must strip.
pub const SUMMARY_SCRIPT: &str = r#"#!/bin/sh
prompt=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-p" ]; then prompt="$2"; shift; fi
  shift
done
echo "llama_perf_context_print: load time = 1.00 ms"
printf 'Note: %s\n' "$(printf '%s\n' "$prompt" | sed -n 3p)"
"#;

pub const ANSWER_SCRIPT: &str = "#!/bin/sh\nprintf 'The cat sleeps on the sofa. [end of text]\\n'\necho 'load: tensors loaded' >&2\n";

pub const FAILING_SCRIPT: &str = "#!/bin/sh\necho 'model not found' >&2\nexit 3\n";

pub const SILENT_SCRIPT: &str = "#!/bin/sh\nexit 0\n";

pub const SLOW_SCRIPT: &str = "#!/bin/sh\nsleep 5\necho late\n";

static SCRIPTS: Mutex<()> = Mutex::new(());

/// Serializes tests that write and exec scripts. Exec'ing a file while another
/// thread forks with its write handle open fails with ETXTBSY.
pub fn script_lock() -> MutexGuard<'static, ()> {
    SCRIPTS.lock().unwrap_or_else(|e| e.into_inner())
}

/// Write an executable shell script into `dir`.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn write_note(root: &Path, rel: &str, body: &str) {
    let path = root.join("notes").join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

/// Project in a fresh temp dir using the hashed embedder and `llama` as the binary.
pub fn test_project(llama: &Path) -> (TempDir, Project) {
    let tmp = TempDir::new().unwrap();
    let config = Config {
        llama_cpp_path: llama.to_string_lossy().into_owned(),
        show_thinking: false,
        embedding: EmbeddingConfig {
            provider: EmbeddingProvider::Hashed,
            dimensions: 384,
            ..EmbeddingConfig::default()
        },
        ..Config::default()
    };
    let project = Project::with_config(tmp.path(), config);
    std::fs::create_dir_all(project.notes_dir()).unwrap();
    (tmp, project)
}

pub fn embedder(project: &Project) -> Embedder {
    Embedder::from_config(&project.config.embedding).unwrap()
}
