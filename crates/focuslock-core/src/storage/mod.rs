mod config;
pub mod database;
mod store;

pub use config::{Config, StorageConfig};
pub use database::{ArchiveStats, Database};
pub use store::{load_json, save_json, MemoryStore, PersistenceStore};

use std::path::PathBuf;

/// Returns `~/.config/focuslock[-dev]/` based on FOCUSLOCK_ENV.
///
/// Set FOCUSLOCK_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the data directory fails.
pub fn data_dir() -> std::io::Result<PathBuf> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("FOCUSLOCK_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("focuslock-dev")
    } else {
        base_dir.join("focuslock")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
