//! Chat session state and one assistant turn: retrieve → prompt → llama.cpp → clean.
//!
//! Terminal I/O lives in the CLI; everything here is plain state so it can be
//! driven by a REPL or a one-shot `ask`.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{Config, Project, RetrievalConfig};
use crate::embed::Embedder;
use crate::llama::{clean_output, LlamaCli, LlamaError, PromptFormat};
use crate::persona::PersonaStore;
use crate::store::{Hit, IndexPaths, MemoryIndex, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// One line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    Exit,
    Help,
    /// `None` means the argument was missing or not a switch value.
    Debug(Option<bool>),
    Thinking(Option<bool>),
    Logs(Option<bool>),
    Reset,
    Remember(String),
    Name(String),
    Memory,
    Model(Option<PromptFormat>),
    Sources,
    Unknown(String),
    Message(String),
}

/// Parse a line of user input into a command or a message.
pub fn parse_input(line: &str) -> Input {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Input::Empty;
    }
    let lower = trimmed.to_lowercase();
    if lower == "exit" || lower == "quit" {
        return Input::Exit;
    }
    if !trimmed.starts_with('/') {
        return Input::Message(trimmed.to_string());
    }
    let (cmd, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((c, r)) => (c.to_lowercase(), r.trim()),
        None => (lower.clone(), ""),
    };
    match cmd.as_str() {
        "/help" => Input::Help,
        "/debug" => Input::Debug(parse_switch(rest)),
        "/thinking" => Input::Thinking(parse_switch(rest)),
        "/logs" => Input::Logs(parse_switch(rest)),
        "/reset" => Input::Reset,
        "/remember" => Input::Remember(rest.to_string()),
        "/name" => Input::Name(rest.to_string()),
        "/memory" => Input::Memory,
        "/model" => Input::Model(rest.parse().ok()),
        "/sources" => Input::Sources,
        _ => Input::Unknown(cmd),
    }
}

fn parse_switch(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

fn on_off(v: bool) -> &'static str {
    if v {
        "ON"
    } else {
        "OFF"
    }
}

/// Toggles a user can flip during a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSettings {
    /// Log the llama.cpp command line before each turn.
    pub debug: bool,
    /// Show a spinner while generating.
    pub thinking: bool,
    /// Drop llama.cpp log lines from the answer.
    pub strip_logs: bool,
    pub format: PromptFormat,
}

impl ChatSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            debug: config.debug_cmd,
            thinking: config.show_thinking,
            strip_logs: config.suppress_llama_logs,
            format: config.model_type,
        }
    }
}

/// Conversation state: settings, history and the persona.
#[derive(Debug, Clone)]
pub struct ChatSession {
    pub settings: ChatSettings,
    history: Vec<Message>,
    persona: PersonaStore,
}

const ALPACA_PREAMBLE: &str =
    "Below is an instruction that describes a task. Write a response that appropriately completes the request.";

impl ChatSession {
    pub fn new(settings: ChatSettings, persona: PersonaStore) -> Self {
        Self {
            settings,
            history: Vec::new(),
            persona,
        }
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn persona(&self) -> &PersonaStore {
        &self.persona
    }

    /// Record a completed exchange.
    pub fn push_turn(&mut self, user: &str, assistant: &str) {
        self.history.push(Message {
            role: Role::User,
            content: user.to_string(),
        });
        self.history.push(Message {
            role: Role::Assistant,
            content: assistant.to_string(),
        });
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// System instructions: persona plus retrieved notes.
    pub fn system_prompt(&self, context: &str) -> String {
        let mut s = self.persona.persona().system_prompt();
        if !context.is_empty() {
            s.push_str("\n\nRelevant notes from memory (use them when they help):\n");
            s.push_str(context);
        }
        s
    }

    /// Full prompt for `user` in the current format.
    pub fn build_prompt(&self, user: &str, context: &str) -> String {
        match self.settings.format {
            PromptFormat::ChatMl => {
                let mut p = format!("<|im_start|>system\n{}<|im_end|>\n", self.system_prompt(context));
                for m in &self.history {
                    p.push_str(&format!("<|im_start|>{}\n{}<|im_end|>\n", m.role.as_str(), m.content));
                }
                p.push_str(&format!("<|im_start|>user\n{user}<|im_end|>\n<|im_start|>assistant\n"));
                p
            }
            PromptFormat::Alpaca => {
                let notes = if context.is_empty() {
                    String::new()
                } else {
                    format!("Relevant notes:\n{context}\n\n")
                };
                format!("{ALPACA_PREAMBLE}\n\n### Instruction:\n{notes}{user}\n\n### Response:")
            }
            PromptFormat::Raw => user.to_string(),
        }
    }
}

/// Render retrieved hits as `- [source] summary` lines.
pub fn format_context(hits: &[Hit]) -> String {
    hits.iter()
        .map(|h| format!("- [{}] {}", h.record.source, h.record.summary))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Result of one assistant turn.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<Hit>,
    pub stdout: String,
    pub stderr: String,
}

/// A chat session wired to llama.cpp and (when available) note memory.
#[derive(Debug)]
pub struct Assistant {
    llama: LlamaCli,
    embedder: Option<Embedder>,
    memory: Option<MemoryIndex>,
    retrieval: RetrievalConfig,
    pub session: ChatSession,
    last_sources: Vec<Hit>,
}

impl Assistant {
    pub fn new(
        llama: LlamaCli,
        embedder: Option<Embedder>,
        memory: Option<MemoryIndex>,
        retrieval: RetrievalConfig,
        session: ChatSession,
    ) -> Self {
        Self {
            llama,
            embedder,
            memory,
            retrieval,
            session,
            last_sources: Vec::new(),
        }
    }

    /// Assistant for a project. Memory that is missing, unreadable or built by
    /// another embedder disables retrieval instead of failing.
    pub fn for_project(project: &Project) -> Self {
        let config = &project.config;
        let embedder = match Embedder::from_config(&config.embedding) {
            Ok(e) => Some(e),
            Err(e) => {
                warn!(error = %e, "embedder unavailable; answering without note memory");
                None
            }
        };
        let memory = match MemoryIndex::load(&IndexPaths::from_project(project)) {
            Ok(m) => Some(m),
            Err(StoreError::NotBuilt(_)) => {
                info!("no note memory yet; run `mnemo build` to enable retrieval");
                None
            }
            Err(e) => {
                warn!(error = %e, "note memory unreadable; answering without it");
                None
            }
        };
        let memory = match (&embedder, memory) {
            (Some(e), Some(m)) if m.embedder() != e.fingerprint() => {
                warn!(
                    built_with = m.embedder(),
                    configured = %e.fingerprint(),
                    "note memory was built with a different embedder; rebuild it to enable retrieval"
                );
                None
            }
            (_, m) => m,
        };
        let session = ChatSession::new(
            ChatSettings::from_config(config),
            PersonaStore::open(project.persona_path()),
        );
        Self::new(
            LlamaCli::from_project(project),
            embedder,
            memory,
            config.retrieval.clone(),
            session,
        )
    }

    pub fn has_memory(&self) -> bool {
        self.memory.is_some() && self.embedder.is_some()
    }

    pub fn memory_len(&self) -> usize {
        self.memory.as_ref().map_or(0, MemoryIndex::len)
    }

    pub fn describe_command(&self) -> String {
        self.llama.describe_command(self.session.settings.format)
    }

    pub fn last_sources(&self) -> &[Hit] {
        &self.last_sources
    }

    /// Nearest note summaries for `question`. Failures disable retrieval for this turn only.
    pub async fn retrieve(&self, question: &str) -> Vec<Hit> {
        let (Some(embedder), Some(memory)) = (&self.embedder, &self.memory) else {
            return Vec::new();
        };
        match embedder.embed(question).await {
            Ok(q) => memory
                .search(&q, self.retrieval.top_k)
                .into_iter()
                .filter(|h| h.score >= self.retrieval.min_score)
                .collect(),
            Err(e) => {
                warn!(error = %e, "could not embed question; answering without note memory");
                Vec::new()
            }
        }
    }

    /// Run one turn. On success the exchange is appended to the history.
    pub async fn answer(&mut self, question: &str) -> Result<Answer, ChatError> {
        let sources = self.retrieve(question).await;
        debug!(hits = sources.len(), "retrieved notes");
        let prompt = self.session.build_prompt(question, &format_context(&sources));
        let out = self.llama.run(self.session.settings.format, &prompt).await?;
        let text = clean_output(&out.stdout, self.session.settings.strip_logs);
        if text.is_empty() {
            return Err(ChatError::EmptyAfterCleanup {
                stdout: out.stdout,
                stderr: out.stderr,
            });
        }
        self.session.push_turn(question, &text);
        self.last_sources = sources.clone();
        Ok(Answer {
            text,
            sources,
            stdout: out.stdout,
            stderr: out.stderr,
        })
    }

    /// Apply a command and return the info lines to show.
    /// `Message`, `Empty` and `Exit` are the caller's business and return nothing.
    pub fn apply(&mut self, input: &Input) -> Vec<String> {
        let settings = &mut self.session.settings;
        match input {
            Input::Empty | Input::Exit | Input::Message(_) => Vec::new(),
            Input::Help => HELP.lines().map(str::to_string).collect(),
            Input::Debug(Some(v)) => {
                settings.debug = *v;
                vec![
                    format!("debug output: {}", on_off(*v)),
                    format!("current llama.cpp command: {}", crate::llama::excerpt(&self.describe_command(), 100)),
                ]
            }
            Input::Debug(None) => vec!["usage: /debug on|off".into()],
            Input::Thinking(Some(v)) => {
                settings.thinking = *v;
                vec![format!("thinking indicator: {}", on_off(*v))]
            }
            Input::Thinking(None) => vec!["usage: /thinking on|off".into()],
            Input::Logs(Some(show)) => {
                settings.strip_logs = !show;
                if *show {
                    vec!["llama logs: ON (will not strip)".into()]
                } else {
                    vec!["llama logs: OFF (stripped from answers)".into()]
                }
            }
            Input::Logs(None) => vec!["usage: /logs on|off".into()],
            Input::Reset => {
                self.session.reset();
                self.last_sources.clear();
                vec!["conversation history cleared".into()]
            }
            Input::Remember(fact) if fact.is_empty() => vec!["usage: /remember FACT".into()],
            Input::Remember(fact) => match self.session.persona.remember(fact) {
                Ok(()) => vec![format!("remembered: {fact}")],
                Err(e) => vec![format!("could not save memory: {e}")],
            },
            Input::Name(name) if name.is_empty() => vec!["usage: /name NAME".into()],
            Input::Name(name) => match self.session.persona.rename(name) {
                Ok(()) => vec![format!("AI name changed to: {name}")],
                Err(e) => vec![format!("could not save memory: {e}")],
            },
            Input::Memory => {
                let p = self.session.persona.reload();
                let mut lines = vec![
                    format!("AI name: {}", p.ai_name),
                    format!("important facts: {:?}", p.important_facts),
                ];
                lines.push(match &self.memory {
                    Some(m) => format!("note memory: {} summaries ({})", m.len(), m.embedder()),
                    None => "note memory: not loaded".into(),
                });
                lines
            }
            Input::Model(Some(f)) => {
                settings.format = *f;
                vec![format!("model type switched to: {f}")]
            }
            Input::Model(None) => vec!["usage: /model chatml|alpaca|raw".into()],
            Input::Sources if self.last_sources.is_empty() => vec!["no notes were used for the last answer".into()],
            Input::Sources => self
                .last_sources
                .iter()
                .map(|h| {
                    format!(
                        "[{:.3}] {}#{}: {}",
                        h.score, h.record.source, h.record.chunk_index, h.record.summary
                    )
                })
                .collect(),
            Input::Unknown(cmd) => vec![format!("unknown command {cmd}; try /help")],
        }
    }
}

const HELP: &str = "\
commands:
  /debug on|off      show the llama.cpp command line
  /thinking on|off   spinner while generating
  /logs on|off       keep or strip llama.cpp log lines
  /model chatml|alpaca|raw
  /remember FACT     add a fact to persistent memory
  /name NAME         rename the assistant
  /memory            show persistent memory
  /sources           notes used for the last answer
  /reset             clear conversation history
  exit | quit";

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    Llama(#[from] LlamaError),
    #[error(
        "model output was empty after cleanup ({} raw chars); check /logs and the prompt format",
        stdout.chars().count()
    )]
    EmptyAfterCleanup { stdout: String, stderr: String },
}

impl ChatError {
    /// Whatever llama.cpp printed before the turn failed, as `(stdout, stderr)`.
    pub fn raw_output(&self) -> Option<(&str, &str)> {
        match self {
            ChatError::EmptyAfterCleanup { stdout, stderr } => Some((stdout, stderr)),
            ChatError::Llama(LlamaError::Exit { stderr, .. }) => Some(("", stderr)),
            ChatError::Llama(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llama::SamplingOptions;
    use crate::store::MemoryRecord;
    use crate::summarize::SummaryOrigin;

    fn session(format: PromptFormat) -> (tempfile::TempDir, ChatSession) {
        let dir = tempfile::tempdir().unwrap();
        let persona = PersonaStore::open(dir.path().join("memory.json"));
        let settings = ChatSettings {
            debug: false,
            thinking: true,
            strip_logs: false,
            format,
        };
        (dir, ChatSession::new(settings, persona))
    }

    fn assistant(format: PromptFormat) -> (tempfile::TempDir, Assistant) {
        let (dir, s) = session(format);
        let llama = LlamaCli::new("llama-cli", "m.gguf", SamplingOptions::default());
        (dir, Assistant::new(llama, None, None, RetrievalConfig::default(), s))
    }

    fn hit(source: &str, summary: &str) -> Hit {
        Hit {
            record: MemoryRecord {
                id: "id".into(),
                source: source.into(),
                chunk_index: 0,
                summary: summary.into(),
                length: 1,
                content_hash: "h".into(),
                origin: SummaryOrigin::Model,
            },
            score: 0.5,
        }
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse_input("   "), Input::Empty);
        assert_eq!(parse_input("QUIT"), Input::Exit);
        assert_eq!(parse_input("/debug on"), Input::Debug(Some(true)));
        assert_eq!(parse_input("/thinking 0"), Input::Thinking(Some(false)));
        assert_eq!(parse_input("/logs maybe"), Input::Logs(None));
        assert_eq!(parse_input("/debug"), Input::Debug(None));
        assert_eq!(parse_input("/reset"), Input::Reset);
        assert_eq!(parse_input("/remember  I like tea "), Input::Remember("I like tea".into()));
        assert_eq!(parse_input("/Name Iris"), Input::Name("Iris".into()));
        assert_eq!(parse_input("/model alpaca"), Input::Model(Some(PromptFormat::Alpaca)));
        assert_eq!(parse_input("/model gpt"), Input::Model(None));
        assert_eq!(parse_input("/frobnicate"), Input::Unknown("/frobnicate".into()));
        assert_eq!(parse_input("what is rust?"), Input::Message("what is rust?".into()));
    }

    #[test]
    fn chatml_prompt_includes_history_and_context() {
        let (_dir, mut s) = session(PromptFormat::ChatMl);
        s.push_turn("hi", "hello!");
        let p = s.build_prompt("and now?", "- [a.md] note A");
        assert!(p.starts_with("<|im_start|>system\nYou are Alex,"));
        assert!(p.contains("Relevant notes from memory (use them when they help):\n- [a.md] note A<|im_end|>\n"));
        assert!(p.contains("<|im_start|>user\nhi<|im_end|>\n<|im_start|>assistant\nhello!<|im_end|>\n"));
        assert!(p.ends_with("<|im_start|>user\nand now?<|im_end|>\n<|im_start|>assistant\n"));
    }

    #[test]
    fn alpaca_and_raw_prompts() {
        let (_dir, s) = session(PromptFormat::Alpaca);
        let p = s.build_prompt("do it", "- [a.md] A");
        assert!(p.starts_with(ALPACA_PREAMBLE));
        assert!(p.ends_with("### Instruction:\nRelevant notes:\n- [a.md] A\n\ndo it\n\n### Response:"));

        let (_dir, s) = session(PromptFormat::Raw);
        assert_eq!(s.build_prompt("verbatim", "- [a.md] A"), "verbatim");
    }

    #[test]
    fn context_lines() {
        let c = format_context(&[hit("a.md", "first"), hit("sub/b.txt", "second")]);
        assert_eq!(c, "- [a.md] first\n- [sub/b.txt] second");
        assert_eq!(format_context(&[]), "");
    }

    #[test]
    fn toggles_and_reset() {
        let (_dir, mut a) = assistant(PromptFormat::ChatMl);
        let lines = a.apply(&Input::Debug(Some(true)));
        assert!(a.session.settings.debug);
        assert_eq!(lines[0], "debug output: ON");
        assert!(lines[1].starts_with("current llama.cpp command: llama-cli --model m.gguf"));

        a.apply(&Input::Logs(Some(false)));
        assert!(a.session.settings.strip_logs);
        a.apply(&Input::Model(Some(PromptFormat::Raw)));
        assert_eq!(a.session.settings.format, PromptFormat::Raw);

        a.session.push_turn("q", "a");
        assert_eq!(a.apply(&Input::Reset), vec!["conversation history cleared".to_string()]);
        assert!(a.session.history().is_empty());
    }

    #[test]
    fn remember_and_name_update_persona() {
        let (_dir, mut a) = assistant(PromptFormat::ChatMl);
        assert_eq!(a.apply(&Input::Remember(String::new())), vec!["usage: /remember FACT".to_string()]);
        a.apply(&Input::Remember("likes tea".into()));
        a.apply(&Input::Name("Iris".into()));
        let lines = a.apply(&Input::Memory);
        assert_eq!(lines[0], "AI name: Iris");
        assert!(lines[1].contains("likes tea"));
        assert_eq!(lines[2], "note memory: not loaded");
        assert!(a.session.system_prompt("").starts_with("You are Iris,"));
    }

    #[tokio::test]
    async fn retrieval_without_memory_is_empty() {
        let (_dir, a) = assistant(PromptFormat::ChatMl);
        assert!(!a.has_memory());
        assert!(a.retrieve("anything").await.is_empty());
    }

    #[tokio::test]
    async fn failed_turn_keeps_history_unchanged() {
        let (dir, s) = session(PromptFormat::ChatMl);
        let llama = LlamaCli::new(dir.path().join("no-such-llama"), "m.gguf", SamplingOptions::default());
        let mut a = Assistant::new(llama, None, None, RetrievalConfig::default(), s);
        let err = a.answer("hello?").await.unwrap_err();
        assert!(matches!(err, ChatError::Llama(LlamaError::Spawn(..))));
        assert!(a.session.history().is_empty());
    }
}
