mod config;
pub mod database;
pub mod session_store;

pub use config::{Config, LoggingConfig, TimerConfig, WatchConfig};
pub use database::Database;
pub use session_store::SessionStore;

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/pomowake[-dev]/` based on POMOWAKE_ENV.
///
/// Set POMOWAKE_ENV=dev to use the development data directory.
/// POMOWAKE_DATA_DIR overrides the location entirely.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("POMOWAKE_DATA_DIR") {
        Some(custom) => PathBuf::from(custom),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");

            let env = std::env::var("POMOWAKE_ENV").unwrap_or_else(|_| "production".to_string());

            if env == "dev" {
                base_dir.join("pomowake-dev")
            } else {
                base_dir.join("pomowake")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
