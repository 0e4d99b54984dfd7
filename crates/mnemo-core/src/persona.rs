//! The assistant's persistent identity (`memory.json`): name, preferences, remembered facts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

pub const DEFAULT_AI_NAME: &str = "Alex";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Persona {
    pub ai_name: String,
    /// Free-form values; whatever the file holds is kept as is.
    pub user_preferences: BTreeMap<String, Value>,
    pub important_facts: Vec<String>,
    pub conversation_context: String,
    /// Keys we don't use, carried through on save.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            ai_name: DEFAULT_AI_NAME.into(),
            user_preferences: BTreeMap::new(),
            important_facts: Vec::new(),
            conversation_context: String::new(),
            extra: Map::new(),
        }
    }
}

impl Persona {
    /// Load from `path`. A missing or malformed file yields the default persona.
    pub fn load(path: &Path) -> Self {
        Self::read(path).unwrap_or_else(|e| {
            warn!(error = %e, "using the default persona");
            Persona::default()
        })
    }

    /// Strict load: a missing file is the default persona, an unreadable or
    /// malformed one is an error.
    pub fn read(path: &Path) -> Result<Self, PersonaError> {
        let s = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Persona::default()),
            Err(e) => return Err(PersonaError::Read(path.to_path_buf(), e)),
        };
        serde_json::from_str(&s).map_err(|e| PersonaError::Malformed(path.to_path_buf(), e))
    }

    pub fn save(&self, path: &Path) -> Result<(), PersonaError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PersonaError::Write(parent.to_path_buf(), e))?;
        }
        let s = serde_json::to_string_pretty(self).map_err(PersonaError::Serialize)?;
        std::fs::write(path, s).map_err(|e| PersonaError::Write(path.to_path_buf(), e))
    }

    /// Instructions for the model, built from the name, facts and context.
    pub fn system_prompt(&self) -> String {
        let name = &self.ai_name;
        let mut s = format!(
            "You are {name}, a local assistant with persistent memory of the user's notes and of past conversations. \
             Always respond directly to the user's current input. Do not invent statistics or continue imaginary conversations. \
             Follow the user's instructions directly and concisely. \
             Do not include meta statements like 'As an AI'. \
             Do not repeat the user's prompt. Keep outputs focused, useful, and on-topic. \
             Remember: your name is {name}."
        );
        if !self.important_facts.is_empty() {
            s.push_str(&format!(" Key facts about you: {}", self.important_facts.join("; ")));
        }
        if !self.user_preferences.is_empty() {
            let prefs: Vec<String> = self
                .user_preferences
                .iter()
                .map(|(k, v)| match v {
                    Value::String(s) => format!("{k}: {s}"),
                    other => format!("{k}: {other}"),
                })
                .collect();
            s.push_str(&format!(" User preferences: {}", prefs.join("; ")));
        }
        if !self.conversation_context.is_empty() {
            s.push_str(&format!(" Current context: {}", self.conversation_context));
        }
        s
    }
}

/// Persona bound to its file; every change is written straight through.
#[derive(Debug, Clone)]
pub struct PersonaStore {
    path: PathBuf,
    persona: Persona,
}

impl PersonaStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let persona = Persona::load(&path);
        Self { path, persona }
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    /// Re-read the file so edits made elsewhere are picked up.
    pub fn reload(&mut self) -> &Persona {
        self.persona = Persona::load(&self.path);
        &self.persona
    }

    /// Append a fact. Refuses to touch a file that exists but does not parse.
    pub fn remember(&mut self, fact: &str) -> Result<(), PersonaError> {
        let mut next = Persona::read(&self.path)?;
        next.important_facts.push(fact.to_string());
        next.save(&self.path)?;
        self.persona = next;
        Ok(())
    }

    pub fn rename(&mut self, name: &str) -> Result<(), PersonaError> {
        let mut next = Persona::read(&self.path)?;
        next.ai_name = name.to_string();
        next.save(&self.path)?;
        self.persona = next;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PersonaError {
    #[error("failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("{0} is not a valid persona file; fix or remove it: {1}")]
    Malformed(PathBuf, serde_json::Error),
    #[error("failed to serialize persona: {0}")]
    Serialize(serde_json::Error),
    #[error("failed to write {0}: {1}")]
    Write(PathBuf, std::io::Error),
}
