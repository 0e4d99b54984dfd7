//! All backend logic independent of how Mnemo is run.
//!
//! A project root holds `config.json`, the user's `notes/`, the llama.cpp
//! `model/`, the built `memory/` and chat `logs/`. Building memory summarizes
//! and embeds every note chunk; chatting retrieves the nearest summaries and
//! hands them to the model together with the conversation.

pub mod app_data;
pub mod chat;
pub mod chunks;
pub mod config;
pub mod diagnostics;
pub mod embed;
pub mod index;
pub mod llama;
pub mod models;
pub mod notes;
pub mod persona;
pub mod session_log;
pub mod store;
pub mod summarize;
pub mod watcher;

pub use app_data::app_data_dir;
pub use chat::{parse_input, Answer, Assistant, ChatError, ChatSession, ChatSettings, Input};
pub use chunks::{chunk_note, chunk_notes, Chunk, ChunkError, ChunkParams};
pub use config::{Config, ConfigError, Project};
pub use embed::{EmbedError, Embedder};
pub use index::{build_memory, build_memory_from_notes, BuildError, BuildReport};
pub use llama::{LlamaCli, LlamaError, PromptFormat};
pub use notes::{scan_notes, Note, ScanError};
pub use persona::{Persona, PersonaStore};
pub use session_log::SessionLog;
pub use store::{Hit, IndexFormat, IndexPaths, MemoryIndex, MemoryRecord, StoreError};
pub use watcher::{watch_notes, WatchError};

/// Returns a short status string. Used to verify the backend is wired up.
pub fn status() -> &'static str {
    "mnemo-core ready"
}
