//! Runs the llama.cpp CLI as a child process and cleans up what it prints.
//!
//! Every call is a fresh process: the model is loaded, one completion is
//! generated, and the process exits. Output arrives on stdout mixed with
//! loader and perf logs; [strip_llama_logs] and [sanitize_text] turn it into
//! the assistant's text.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

/// How a prompt is wrapped before it is handed to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PromptFormat {
    #[default]
    #[serde(rename = "chatml")]
    ChatMl,
    #[serde(rename = "alpaca")]
    Alpaca,
    #[serde(rename = "raw")]
    Raw,
}

impl PromptFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptFormat::ChatMl => "chatml",
            PromptFormat::Alpaca => "alpaca",
            PromptFormat::Raw => "raw",
        }
    }
}

impl std::fmt::Display for PromptFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromptFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chatml" => Ok(PromptFormat::ChatMl),
            "alpaca" => Ok(PromptFormat::Alpaca),
            "raw" => Ok(PromptFormat::Raw),
            other => Err(format!("unknown prompt format: {other} (expected chatml|alpaca|raw)")),
        }
    }
}

/// Sampling and process options passed on every invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingOptions {
    pub ctx_size: u32,
    pub n_gpu_layers: u32,
    pub temp: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub repeat_penalty: f32,
    pub n_predict: u32,
    pub timeout_secs: u64,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            ctx_size: 2048,
            n_gpu_layers: 999,
            temp: 0.3,
            top_k: 40,
            top_p: 0.95,
            repeat_penalty: 1.1,
            n_predict: 300,
            timeout_secs: 300,
        }
    }
}

impl SamplingOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// What the process printed, and how it exited.
#[derive(Debug, Clone, Default)]
pub struct LlamaOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
    pub success: bool,
}

/// A llama.cpp CLI binary bound to one model file.
#[derive(Debug, Clone)]
pub struct LlamaCli {
    binary: PathBuf,
    model: PathBuf,
    options: SamplingOptions,
}

impl LlamaCli {
    pub fn new(binary: impl Into<PathBuf>, model: impl Into<PathBuf>, options: SamplingOptions) -> Self {
        Self {
            binary: binary.into(),
            model: model.into(),
            options,
        }
    }

    pub fn from_project(project: &crate::config::Project) -> Self {
        Self::new(
            project.llama_binary(),
            project.model_path(),
            project.config.generation.clone(),
        )
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn model(&self) -> &Path {
        &self.model
    }

    pub fn options(&self) -> &SamplingOptions {
        &self.options
    }

    /// Same binary and model with different sampling options.
    pub fn with_options(&self, options: SamplingOptions) -> Self {
        Self {
            binary: self.binary.clone(),
            model: self.model.clone(),
            options,
        }
    }

    /// Model and sampling arguments, plus the chat template switch for `format`.
    pub fn base_args(&self, format: PromptFormat) -> Vec<String> {
        let o = &self.options;
        let mut args = vec![
            "--model".to_string(),
            self.model.to_string_lossy().into_owned(),
            "--n-gpu-layers".into(),
            o.n_gpu_layers.to_string(),
            "--ctx-size".into(),
            o.ctx_size.to_string(),
            "--temp".into(),
            o.temp.to_string(),
            "--top-k".into(),
            o.top_k.to_string(),
            "--top-p".into(),
            o.top_p.to_string(),
            "--repeat-penalty".into(),
            o.repeat_penalty.to_string(),
        ];
        match format {
            PromptFormat::ChatMl => args.extend(["--chat-template".into(), "chatml".into()]),
            // Keep llama-cli from re-wrapping prompts we already formatted.
            PromptFormat::Alpaca | PromptFormat::Raw => args.push("-no-cnv".into()),
        }
        args
    }

    /// Full argument list for one completion.
    pub fn generation_args(&self, format: PromptFormat, prompt: &str) -> Vec<String> {
        let mut args = self.base_args(format);
        args.extend([
            "-p".to_string(),
            prompt.to_string(),
            "-n".into(),
            self.options.n_predict.to_string(),
            "--no-display-prompt".into(),
        ]);
        args
    }

    /// Printable command line with the prompt elided.
    pub fn describe_command(&self, format: PromptFormat) -> String {
        let mut parts = vec![self.binary.to_string_lossy().into_owned()];
        parts.extend(self.generation_args(format, "<prompt>"));
        parts.join(" ")
    }

    /// Generate a completion. Fails on spawn error, timeout, non-zero exit, or empty stdout.
    pub async fn run(&self, format: PromptFormat, prompt: &str) -> Result<LlamaOutput, LlamaError> {
        let args = self.generation_args(format, prompt);
        debug!(
            binary = %self.binary.display(),
            format = %format,
            prompt_chars = prompt.chars().count(),
            "starting llama.cpp"
        );
        let out = self.exec(&args, self.options.timeout()).await?;
        debug!(code = ?out.code, stdout_chars = out.stdout.len(), "llama.cpp finished");
        if !out.success {
            return Err(LlamaError::Exit {
                code: out.code,
                stderr: excerpt(out.stderr.trim(), 400),
            });
        }
        if out.stdout.trim().is_empty() {
            return Err(LlamaError::EmptyOutput);
        }
        Ok(out)
    }

    /// `llama --help`, used to check that the binary is reachable.
    pub async fn help(&self, timeout: Duration) -> Result<LlamaOutput, LlamaError> {
        self.exec(&["--help".to_string()], timeout).await
    }

    async fn exec(&self, args: &[String], timeout: Duration) -> Result<LlamaOutput, LlamaError> {
        let child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LlamaError::Spawn(self.binary.clone(), e))?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(res) => res.map_err(LlamaError::Io)?,
            Err(_) => return Err(LlamaError::Timeout(timeout)),
        };
        Ok(LlamaOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code(),
            success: output.status.success(),
        })
    }
}

/// Line prefixes llama.cpp uses for loader, backend and perf logs.
const LOG_PREFIXES: &[&str] = &[
    "llama_perf_",
    "llama_model_loader:",
    "llama_model_load_from_file_impl:",
    "llama_memory_breakdown_print:",
    "llama_context:",
    "llama_kv_cache:",
    "ggml_metal_",
    "ggml_metal:",
    "ggml_graph_",
    "ggml_cuda_",
    "print_info:",
    "load_tensors:",
    "load:",
    "build:",
    "main:",
    "system_info:",
    "common_init_from_params:",
    "sampler",
];

/// Drop blank lines and llama.cpp log lines.
pub fn strip_llama_logs(text: &str) -> String {
    text.lines()
        .filter(|line| {
            let t = line.trim();
            !t.is_empty() && !LOG_PREFIXES.iter().any(|p| t.starts_with(p))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

static END_OF_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*\[end of text\]\s*").expect("valid regex"));
static EOF_BY_USER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)>\s*EOF\s+by\s+user\s*").expect("valid regex"));
static TRAILING_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+\n").expect("valid regex"));

/// Remove chat markers and end-of-generation artefacts, then trim.
pub fn sanitize_text(text: &str) -> String {
    let text = text.replace("<|im_start|>", "").replace("<|im_end|>", "");
    let text = END_OF_TEXT.replace_all(&text, "");
    let text = EOF_BY_USER.replace_all(&text, "");
    let text = TRAILING_SPACE.replace_all(&text, "\n");
    text.trim().to_string()
}

/// Strip logs (when asked) and sanitize.
pub fn clean_output(stdout: &str, strip_logs: bool) -> String {
    if strip_logs {
        sanitize_text(&strip_llama_logs(stdout))
    } else {
        sanitize_text(stdout)
    }
}

/// First `max` chars of `s`.
pub(crate) fn excerpt(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[derive(Debug, thiserror::Error)]
pub enum LlamaError {
    #[error("failed to start {0}: {1}")]
    Spawn(PathBuf, std::io::Error),
    #[error("llama.cpp did not finish within {0:?}")]
    Timeout(Duration),
    #[error("llama.cpp exited with code {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },
    #[error("llama.cpp produced no output")]
    EmptyOutput,
    #[error("llama.cpp I/O error: {0}")]
    Io(std::io::Error),
}
