//! Per-session chat transcript: `<log_dir>/session-YYYYmmdd-HHMMSS.log`.
//!
//! Transcript lines use a small fixed vocabulary (`You:`, `AI:`,
//! `[llama.cpp-stdout]`, `[llama.cpp-stderr]`, `[info]`, `[debug]`, `[error]`) so the
//! files stay easy to grep. Write failures are logged and otherwise ignored;
//! losing a transcript line must never end a chat.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::warn;

use crate::chat::ChatError;

#[derive(Debug)]
pub struct SessionLog {
    path: PathBuf,
    file: File,
}

impl SessionLog {
    /// Create `log_dir` if needed and open a fresh transcript there.
    pub fn create(log_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        let now = Local::now();
        let path = log_dir.join(format!("session-{}.log", now.format("%Y%m%d-%H%M%S")));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut log = Self { path, file };
        let started = format!("[info] session started {} -> {}", now.to_rfc3339(), log.path.display());
        log.line(&started);
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line and flush.
    pub fn line(&mut self, line: &str) {
        let res = writeln!(self.file, "{line}").and_then(|_| self.file.flush());
        if let Err(e) = res {
            warn!(path = %self.path.display(), error = %e, "failed to write session log");
        }
    }

    pub fn user(&mut self, text: &str) {
        self.line(&format!("You: {text}"));
    }

    pub fn assistant(&mut self, text: &str) {
        self.line(&format!("AI: {text}"));
    }

    pub fn info(&mut self, text: &str) {
        self.line(&format!("[info] {text}"));
    }

    pub fn error(&mut self, text: &str) {
        self.line(&format!("[error] {text}"));
    }

    pub fn debug(&mut self, text: &str) {
        self.line(&format!("[debug] {text}"));
    }

    /// A failed turn: whatever llama.cpp printed, then the `[error]` line.
    pub fn turn_error(&mut self, err: &ChatError) {
        if let Some((stdout, stderr)) = err.raw_output() {
            self.llama_output(stdout, stderr);
        }
        self.error(&err.to_string());
    }

    /// Raw process output, when there is any.
    pub fn llama_output(&mut self, stdout: &str, stderr: &str) {
        if !stdout.is_empty() {
            self.line(&format!("[llama.cpp-stdout] {stdout}"));
        }
        if !stderr.is_empty() {
            self.line(&format!("[llama.cpp-stderr] {stderr}"));
        }
    }
}
