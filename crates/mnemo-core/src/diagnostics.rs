//! Setup checks for the llama.cpp binary and the configured model.

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::llama::{clean_output, LlamaCli, PromptFormat, SamplingOptions};

const HELP_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

impl CheckResult {
    fn pass(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ok: true,
            detail: detail.into(),
        }
    }

    fn fail(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ok: false,
            detail: detail.into(),
        }
    }
}

/// `llama --help` exits 0 and prints something.
pub async fn check_binary(llama: &LlamaCli) -> CheckResult {
    let name = "llama.cpp binary reachable";
    match llama.help(HELP_TIMEOUT).await {
        Ok(out) if out.success && !(out.stdout.trim().is_empty() && out.stderr.trim().is_empty()) => {
            CheckResult::pass(name, llama.binary().display().to_string())
        }
        Ok(out) => CheckResult::fail(
            name,
            format!("exit code {:?}: {}", out.code, crate::llama::excerpt(out.stderr.trim(), 400)),
        ),
        Err(e) => CheckResult::fail(name, e.to_string()),
    }
}

/// Load the model and generate a few tokens with a small context.
pub async fn check_model_load(llama: &LlamaCli) -> CheckResult {
    let name = format!(
        "model loads: {}",
        llama
            .model()
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default()
    );
    if !llama.model().is_file() {
        return CheckResult::fail(name, format!("{} does not exist", llama.model().display()));
    }
    let probe = llama.with_options(SamplingOptions {
        ctx_size: 1024,
        temp: 0.7,
        n_predict: 16,
        ..llama.options().clone()
    });
    match probe.run(PromptFormat::Raw, "hello").await {
        Ok(_) => CheckResult::pass(name, "ok"),
        Err(e) => CheckResult::fail(name, e.to_string()),
    }
}

/// Send `prompt` and report the cleaned answer.
pub async fn ping(llama: &LlamaCli, prompt: &str, n_predict: u32) -> CheckResult {
    let probe = llama.with_options(SamplingOptions {
        n_predict,
        ..llama.options().clone()
    });
    debug!(prompt, "diagnostic prompt");
    match probe.run(PromptFormat::Raw, prompt).await {
        Ok(out) => {
            let text = clean_output(&out.stdout, true);
            if text.is_empty() {
                CheckResult::fail("model responds", "output was only llama.cpp logs")
            } else {
                CheckResult::pass("model responds", text)
            }
        }
        Err(e) => CheckResult::fail("model responds", e.to_string()),
    }
}
