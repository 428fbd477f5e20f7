//! `pomowake-cli config ...`: read and edit `config.toml`.
//!
//! Most keys take effect the next time a command opens the session. The
//! cycle length also reshapes the stored record, so changing it applies the
//! new rules right away.

use clap::Subcommand;
use pomowake_core::{Config, ConfigError};

use super::open_service;

const CYCLE_KEY: &str = "timer.sessions_before_long_break";

/// Keys whose value only seeds a session record that does not exist yet.
const SEED_KEYS: [&str; 2] = ["timer.default_work_minutes", "timer.default_short_break_minutes"];

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print one value (e.g. "timer.sessions_before_long_break", "logging.filter")
    Get { key: String },
    /// Change one value and save
    Set { key: String, value: String },
    /// Print the whole configuration as JSON
    List,
    /// Restore every value to its default
    Reset,
}

pub fn run(action: ConfigAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key).ok_or(ConfigError::UnknownKey(key))?;
            println!("{value}");
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            println!("{key} = {value}");

            if key == CYCLE_KEY {
                apply_cycle(&config)?;
            } else if SEED_KEYS.contains(&key.as_str()) {
                eprintln!(
                    "note: {key} applies to new sessions; use `timer set-work` or `timer set-break` for the current one"
                );
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigAction::Reset => {
            let config = Config::default();
            config.save()?;
            apply_cycle(&config)?;
            println!("config reset to defaults");
        }
    }
    Ok(())
}

/// Fit the stored work counter to the configured cycle length.
fn apply_cycle(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    // Opening the session applies the rules.
    let view = open_service(config)?.view()?;
    tracing::debug!(
        completed_work_sessions = view.completed_work_sessions,
        sessions_before_long_break = view.sessions_before_long_break,
        "cycle rules applied"
    );
    Ok(())
}
