//! Where Mnemo looks for user-level state outside a project root.
//!
//! Notes, memory and logs live in the project directory. The app data dir only
//! holds a fallback config shared by every project.

use std::path::{Path, PathBuf};

use crate::config::{CONFIG_JSON, CONFIG_TOML};

/// Returns the directory where Mnemo keeps its user-level config.
/// On Linux: `~/.local/share/mnemo/`; on macOS: `~/Library/Application Support/Mnemo/`.
/// Creates the directory if it doesn't exist; returns `None` if we can't determine the path.
pub fn app_data_dir() -> Option<PathBuf> {
    let dir = directories::ProjectDirs::from("app", "Mnemo", "Mnemo")?
        .data_local_dir()
        .to_path_buf();
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}

/// The first config file found in `dir`, JSON before TOML.
pub fn config_in(dir: &Path) -> Option<PathBuf> {
    [CONFIG_JSON, CONFIG_TOML]
        .into_iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
}

/// User-level config shared by every project, if one exists.
pub fn user_config_file() -> Option<PathBuf> {
    config_in(&app_data_dir()?)
}
