//! Project config (`config.json`, or `config.toml`) and path resolution.
//!
//! A project root holds `config.json`, `notes/`, `model/`, `memory/` and `logs/`.
//! When the root has no config file, the user-level one in the app data
//! directory is used; when that is missing too, defaults apply.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::app_data;
use crate::llama::{PromptFormat, SamplingOptions};
use crate::store::IndexFormat;

pub const CONFIG_JSON: &str = "config.json";
pub const CONFIG_TOML: &str = "config.toml";

/// On-disk format of a config file, picked by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigFormat {
    #[default]
    Json,
    Toml,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// llama.cpp CLI binary (name on PATH or a path).
    #[serde(alias = "llama_cli")]
    pub llama_cpp_path: String,
    pub model_path: String,
    pub model_dir: String,
    pub model_type: PromptFormat,
    pub notes_dir: String,
    pub summaries_path: String,
    pub index_path: String,
    pub raw_vectors_path: String,
    pub index_format: IndexFormat,
    pub chunk_size_chars: usize,
    pub chunk_overlap_chars: usize,
    pub persona_path: String,
    pub log_dir: String,
    pub log_level: String,
    pub debug_cmd: bool,
    pub show_thinking: bool,
    pub suppress_llama_logs: bool,
    pub embedding: EmbeddingConfig,
    pub generation: SamplingOptions,
    pub summarizer: SummarizerConfig,
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[default]
    Ollama,
    Hashed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub url: String,
    /// Only used by the hashed provider; Ollama models decide their own size.
    pub dimensions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SummarizerConfig {
    pub n_predict: u32,
    pub temp: f32,
    pub timeout_secs: u64,
    /// How many non-empty output lines make up a summary.
    pub max_lines: usize,
    /// Length of the excerpt used when the model gives no summary.
    pub fallback_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub min_score: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llama_cpp_path: "llama-cli".into(),
            model_path: "model/model.gguf".into(),
            model_dir: "model".into(),
            model_type: PromptFormat::ChatMl,
            notes_dir: "notes".into(),
            summaries_path: "memory/summaries.json".into(),
            index_path: "memory/index.bin".into(),
            raw_vectors_path: "memory/vectors.json".into(),
            index_format: IndexFormat::Binary,
            chunk_size_chars: 3000,
            chunk_overlap_chars: 300,
            persona_path: "memory.json".into(),
            log_dir: "logs".into(),
            log_level: "info".into(),
            debug_cmd: false,
            show_thinking: true,
            suppress_llama_logs: false,
            embedding: EmbeddingConfig::default(),
            generation: SamplingOptions::default(),
            summarizer: SummarizerConfig::default(),
            retrieval: RetrievalConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Ollama,
            model: crate::embed::DEFAULT_EMBED_MODEL.into(),
            url: crate::embed::DEFAULT_BASE_URL.into(),
            dimensions: 384,
        }
    }
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            n_predict: 256,
            temp: 0.2,
            timeout_secs: 120,
            max_lines: 2,
            fallback_chars: 200,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            min_score: 0.0,
        }
    }
}

impl Config {
    /// Parse a config from text in the given format.
    pub fn parse(s: &str, format: ConfigFormat, origin: &Path) -> Result<Self, ConfigError> {
        match format {
            ConfigFormat::Json => {
                serde_json::from_str(s).map_err(|e| ConfigError::ParseJson(origin.to_path_buf(), e))
            }
            ConfigFormat::Toml => {
                toml::from_str(s).map_err(|e| ConfigError::ParseToml(origin.to_path_buf(), e))
            }
        }
    }

    /// Apply `MNEMO_MODEL`, `MNEMO_LLAMA_CLI` and `MNEMO_LOG` from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("MNEMO_MODEL") {
            self.model_path = val;
        }
        if let Some(val) = lookup("MNEMO_LLAMA_CLI") {
            self.llama_cpp_path = val;
        }
        if let Some(val) = lookup("MNEMO_LOG") {
            self.log_level = val;
        }
    }
}

/// A project root together with its resolved config.
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub config: Config,
    /// File the config was read from, if any. `set_model_path` writes back here.
    config_file: Option<PathBuf>,
}

impl Project {
    /// Open a project root: read its config (or the user-level one, or defaults)
    /// and apply env overrides.
    pub fn open(root: &Path) -> Result<Self, ConfigError> {
        let root = root.canonicalize().map_err(ConfigError::Canonicalize)?;
        if !root.is_dir() {
            return Err(ConfigError::NotADirectory(root));
        }
        let config_file = find_config_file(&root);
        let mut config = match &config_file {
            Some(path) => {
                let s = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.clone(), e))?;
                debug!(path = %path.display(), "loaded config");
                Config::parse(&s, ConfigFormat::from_path(path), path)?
            }
            None => {
                info!("no config file under {}, using defaults", root.display());
                Config::default()
            }
        };
        config.apply_env_overrides();
        Ok(Self {
            root,
            config,
            config_file,
        })
    }

    /// Project with an explicit config; nothing is read from disk.
    pub fn with_config(root: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            root: root.into(),
            config,
            config_file: None,
        }
    }

    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    /// Resolve a config path against the project root. Absolute paths and `~/` are kept.
    pub fn resolve(&self, p: &str) -> PathBuf {
        if let Some(rest) = p.strip_prefix("~/") {
            if let Some(home) = directories::BaseDirs::new() {
                return home.home_dir().join(rest);
            }
        }
        let path = Path::new(p);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn notes_dir(&self) -> PathBuf {
        self.resolve(&self.config.notes_dir)
    }

    pub fn model_path(&self) -> PathBuf {
        self.resolve(&self.config.model_path)
    }

    pub fn model_dir(&self) -> PathBuf {
        self.resolve(&self.config.model_dir)
    }

    pub fn summaries_path(&self) -> PathBuf {
        self.resolve(&self.config.summaries_path)
    }

    pub fn index_path(&self) -> PathBuf {
        self.resolve(&self.config.index_path)
    }

    pub fn raw_vectors_path(&self) -> PathBuf {
        self.resolve(&self.config.raw_vectors_path)
    }

    pub fn persona_path(&self) -> PathBuf {
        self.resolve(&self.config.persona_path)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.resolve(&self.config.log_dir)
    }

    /// llama.cpp binary. Bare names are looked up on PATH; anything with a separator
    /// is resolved against the root.
    pub fn llama_binary(&self) -> PathBuf {
        let p = &self.config.llama_cpp_path;
        if p.contains('/') || p.contains(std::path::MAIN_SEPARATOR) {
            self.resolve(p)
        } else {
            PathBuf::from(p)
        }
    }

    /// Point `model_path` at `model` and persist it to the config file it came from
    /// (or `<root>/config.json`). Only that key is written: everything else in the
    /// file stays as it was, and env overrides never reach disk.
    /// Paths inside the root are stored relative.
    pub fn set_model_path(&mut self, model: &Path) -> Result<PathBuf, ConfigError> {
        let stored = match model.strip_prefix(&self.root) {
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => model.to_string_lossy().into_owned(),
        };
        let path = self
            .config_file
            .clone()
            .unwrap_or_else(|| self.root.join(CONFIG_JSON));
        update_config_key(&path, "model_path", &stored)?;
        self.config.model_path = stored;
        self.config_file = Some(path.clone());
        Ok(path)
    }
}

/// Set one top-level string key in a config file, creating the file if needed.
fn update_config_key(path: &Path, key: &str, value: &str) -> Result<(), ConfigError> {
    let existing = match std::fs::read_to_string(path) {
        Ok(s) => Some(s),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(ConfigError::Read(path.to_path_buf(), e)),
    };
    let out = match ConfigFormat::from_path(path) {
        ConfigFormat::Json => {
            let mut doc = match existing.as_deref() {
                Some(s) => serde_json::from_str::<serde_json::Value>(s)
                    .map_err(|e| ConfigError::ParseJson(path.to_path_buf(), e))?,
                None => serde_json::Value::Object(serde_json::Map::new()),
            };
            let Some(obj) = doc.as_object_mut() else {
                return Err(ConfigError::NotAnObject(path.to_path_buf()));
            };
            obj.insert(key.to_string(), value.into());
            serde_json::to_string_pretty(&doc).map_err(ConfigError::SerializeJson)?
        }
        ConfigFormat::Toml => {
            let mut doc = match existing.as_deref() {
                Some(s) => toml::from_str::<toml::Table>(s)
                    .map_err(|e| ConfigError::ParseToml(path.to_path_buf(), e))?,
                None => toml::Table::new(),
            };
            doc.insert(key.to_string(), toml::Value::String(value.to_string()));
            toml::to_string_pretty(&doc).map_err(ConfigError::SerializeToml)?
        }
    };
    std::fs::write(path, out).map_err(ConfigError::Write)
}

fn find_config_file(root: &Path) -> Option<PathBuf> {
    app_data::config_in(root).or_else(app_data::user_config_file)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("invalid JSON in {0}: {1}")]
    ParseJson(PathBuf, serde_json::Error),
    #[error("invalid TOML in {0}: {1}")]
    ParseToml(PathBuf, toml::de::Error),
    #[error("failed to serialize config: {0}")]
    SerializeJson(serde_json::Error),
    #[error("failed to serialize config: {0}")]
    SerializeToml(toml::ser::Error),
    #[error("{0} must hold a JSON object at the top level")]
    NotAnObject(PathBuf),
    #[error("failed to write config: {0}")]
    Write(std::io::Error),
    #[error("failed to resolve path: {0}")]
    Canonicalize(std::io::Error),
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = Config::default();
        assert_eq!(c.chunk_size_chars, 3000);
        assert_eq!(c.chunk_overlap_chars, 300);
        assert_eq!(c.model_type, PromptFormat::ChatMl);
        assert_eq!(c.index_format, IndexFormat::Binary);
        assert_eq!(c.summarizer.n_predict, 256);
        assert_eq!(c.retrieval.top_k, 3);
        assert!(c.show_thinking);
    }

    #[test]
    fn parse_partial_json_keeps_defaults() {
        let s = r#"{
            "llama_cli": "/opt/llama/llama-cli",
            "model_path": "model/Mistral.gguf",
            "model_type": "alpaca",
            "chunk_size_chars": 1000,
            "embedding": { "provider": "hashed", "dimensions": 64 }
        }"#;
        let c = Config::parse(s, ConfigFormat::Json, Path::new("config.json")).unwrap();
        assert_eq!(c.llama_cpp_path, "/opt/llama/llama-cli");
        assert_eq!(c.model_type, PromptFormat::Alpaca);
        assert_eq!(c.chunk_size_chars, 1000);
        assert_eq!(c.chunk_overlap_chars, 300);
        assert_eq!(c.embedding.provider, EmbeddingProvider::Hashed);
        assert_eq!(c.embedding.dimensions, 64);
        assert_eq!(c.embedding.model, crate::embed::DEFAULT_EMBED_MODEL);
    }

    #[test]
    fn parse_toml() {
        let s = r#"
model_type = "raw"
index_format = "raw"

[retrieval]
top_k = 7
"#;
        let c = Config::parse(s, ConfigFormat::Toml, Path::new("config.toml")).unwrap();
        assert_eq!(c.model_type, PromptFormat::Raw);
        assert_eq!(c.index_format, IndexFormat::Raw);
        assert_eq!(c.retrieval.top_k, 7);
        assert_eq!(c.retrieval.min_score, 0.0);
    }

    #[test]
    fn bad_json_is_an_error() {
        let err = Config::parse("{ not json", ConfigFormat::Json, Path::new("config.json")).unwrap_err();
        assert!(matches!(err, ConfigError::ParseJson(..)));
    }

    #[test]
    fn overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("MNEMO_MODEL", "model/other.gguf"),
            ("MNEMO_LLAMA_CLI", "llama-main"),
            ("MNEMO_LOG", "debug"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        c.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.model_path, "model/other.gguf");
        assert_eq!(c.llama_cpp_path, "llama-main");
        assert_eq!(c.log_level, "debug");
    }

    #[test]
    fn resolve_relative_and_absolute() {
        let p = Project::with_config("/srv/proj", Config::default());
        assert_eq!(p.notes_dir(), PathBuf::from("/srv/proj/notes"));
        assert_eq!(p.resolve("/abs/x"), PathBuf::from("/abs/x"));
        assert_eq!(p.llama_binary(), PathBuf::from("llama-cli"));
    }

    #[test]
    fn open_reads_root_config_and_set_model_persists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_JSON),
            r#"{ "model_path": "model/a.gguf", "log_dir": "transcripts" }"#,
        )
        .unwrap();
        let mut project = Project::open(dir.path()).unwrap();
        assert_eq!(project.config.log_dir, "transcripts");

        let model = project.root.join("model").join("b.gguf");
        project.set_model_path(&model).unwrap();

        let reopened = Project::open(dir.path()).unwrap();
        assert_eq!(reopened.config.model_path, "model/b.gguf");
        assert_eq!(reopened.config.log_dir, "transcripts");
    }

    #[test]
    fn set_model_keeps_file_values_and_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_JSON),
            r#"{ "llama_cpp_path": "/opt/llama-cli", "embeddings_npy": "memory/embeddings.npy" }"#,
        )
        .unwrap();
        let mut project = Project::open(dir.path()).unwrap();
        let env: HashMap<&str, &str> = [("MNEMO_LLAMA_CLI", "/tmp/one-off-llama"), ("MNEMO_LOG", "trace")]
            .into_iter()
            .collect();
        project.config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        let model = project.root.join("model").join("c.gguf");
        project.set_model_path(&model).unwrap();
        assert_eq!(project.config.model_path, "model/c.gguf");
        assert_eq!(project.config.llama_cpp_path, "/tmp/one-off-llama");

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(CONFIG_JSON)).unwrap()).unwrap();
        assert_eq!(saved["model_path"], "model/c.gguf");
        assert_eq!(saved["llama_cpp_path"], "/opt/llama-cli");
        assert_eq!(saved["embeddings_npy"], "memory/embeddings.npy");
        assert!(saved.get("log_level").is_none());
    }

    #[test]
    fn set_model_updates_toml_in_place() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_TOML), "model_type = \"alpaca\"\n\n[retrieval]\ntop_k = 5\n").unwrap();
        let mut project = Project::open(dir.path()).unwrap();
        let saved = project.set_model_path(Path::new("/models/big.gguf")).unwrap();
        assert_eq!(saved.file_name().unwrap(), CONFIG_TOML);

        let reopened = Project::open(dir.path()).unwrap();
        assert_eq!(reopened.config.model_path, "/models/big.gguf");
        assert_eq!(reopened.config.model_type, PromptFormat::Alpaca);
        assert_eq!(reopened.config.retrieval.top_k, 5);
    }

    #[test]
    fn set_model_creates_minimal_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = Project::with_config(dir.path(), Config::default());
        let saved = project.set_model_path(&dir.path().join("model/d.gguf")).unwrap();
        assert_eq!(saved, dir.path().join(CONFIG_JSON));
        let doc: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&saved).unwrap()).unwrap();
        assert_eq!(doc, serde_json::json!({ "model_path": "model/d.gguf" }));
    }
}
