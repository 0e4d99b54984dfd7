//! One- or two-sentence summaries of chunks via llama.cpp, with an excerpt fallback.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::SummarizerConfig;
use crate::llama::{clean_output, LlamaCli, PromptFormat, SamplingOptions};

/// Where a stored summary came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SummaryOrigin {
    #[default]
    Model,
    /// The model failed or said nothing; the summary is an excerpt of the chunk.
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub text: String,
    pub origin: SummaryOrigin,
}

pub fn summary_prompt(chunk: &str) -> String {
    format!(
        "Summarize the following text into 1-2 short bullet sentences (keep it factual):\n\n{chunk}\n\nSummary:"
    )
}

/// Summarizes chunks with a dedicated low-temperature llama.cpp configuration.
#[derive(Debug, Clone)]
pub struct Summarizer {
    llama: LlamaCli,
    config: SummarizerConfig,
}

impl Summarizer {
    pub fn new(llama: &LlamaCli, config: SummarizerConfig) -> Self {
        let options = SamplingOptions {
            temp: config.temp,
            n_predict: config.n_predict,
            timeout_secs: config.timeout_secs,
            ..llama.options().clone()
        };
        Self {
            llama: llama.with_options(options),
            config,
        }
    }

    /// Summarize `chunk`. Never fails: any model problem yields the excerpt fallback.
    pub async fn summarize(&self, chunk: &str) -> Summary {
        let prompt = summary_prompt(chunk);
        match self.llama.run(PromptFormat::Raw, &prompt).await {
            Ok(out) => {
                let text = first_lines(&clean_output(&out.stdout, true), self.config.max_lines);
                if !text.is_empty() {
                    return Summary {
                        text,
                        origin: SummaryOrigin::Model,
                    };
                }
                warn!("summary was empty after cleanup; using excerpt");
            }
            Err(e) => warn!(error = %e, "summarization failed; using excerpt"),
        }
        Summary {
            text: fallback_summary(chunk, self.config.fallback_chars),
            origin: SummaryOrigin::Fallback,
        }
    }
}

/// The first `n` non-empty lines, trimmed and joined with a space.
pub fn first_lines(text: &str, n: usize) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(n)
        .collect::<Vec<_>>()
        .join(" ")
}

/// First `max_chars` of the chunk on one line.
pub fn fallback_summary(chunk: &str, max_chars: usize) -> String {
    chunk
        .chars()
        .take(max_chars)
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}
