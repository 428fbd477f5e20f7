//! TOML-based application configuration.
//!
//! Holds values that shape the timer but are not part of the persisted
//! session record:
//! - cycle length before a long break and the durations a fresh install starts with
//! - how long a dismissed exact-alarm warning stays quiet
//! - polling cadence of the `watch` loop
//! - default log filter
//!
//! Configuration is stored at `~/.config/pomowake/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::data_dir;
use crate::error::ConfigError;
use crate::timer::{
    PhaseRules, SessionState, DEFAULT_SESSIONS_BEFORE_LONG_BREAK, DEFAULT_SHORT_BREAK_MINUTES,
    DEFAULT_WORK_MINUTES,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerConfig {
    #[serde(default = "default_sessions_before_long_break")]
    pub sessions_before_long_break: u32,
    /// Work duration for a freshly created session record.
    #[serde(default = "default_work_minutes")]
    pub default_work_minutes: u32,
    #[serde(default = "default_short_break_minutes")]
    pub default_short_break_minutes: u32,
    /// How long "dismiss" silences the missing exact-alarm permission warning.
    #[serde(default = "default_snooze_minutes")]
    pub exact_alarm_snooze_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Wall-clock jumps larger than this between two polls count as a clock change.
    #[serde(default = "default_clock_jump_tolerance_ms")]
    pub clock_jump_tolerance_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when RUST_LOG is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/pomowake/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub timer: TimerConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_sessions_before_long_break() -> u32 {
    DEFAULT_SESSIONS_BEFORE_LONG_BREAK
}
fn default_work_minutes() -> u32 {
    DEFAULT_WORK_MINUTES
}
fn default_short_break_minutes() -> u32 {
    DEFAULT_SHORT_BREAK_MINUTES
}
fn default_snooze_minutes() -> u32 {
    24 * 60
}
fn default_poll_interval_ms() -> u64 {
    1_000
}
fn default_clock_jump_tolerance_ms() -> u64 {
    5_000
}
fn default_log_filter() -> String {
    "info".into()
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            sessions_before_long_break: default_sessions_before_long_break(),
            default_work_minutes: default_work_minutes(),
            default_short_break_minutes: default_short_break_minutes(),
            exact_alarm_snooze_minutes: default_snooze_minutes(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            clock_jump_tolerance_ms: default_clock_jump_tolerance_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => value
                        .parse::<u64>()
                        .map(|n| serde_json::Value::Number(n.into()))
                        .map_err(|_| invalid(format!("cannot parse '{value}' as number")))?,
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        return Err(invalid("cannot replace a whole section".into()));
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk, writing and returning the default when no file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation, or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let cfg: Config = toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
                cfg.validate()?;
                Ok(cfg)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save()?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path,
                message: e.to_string(),
            }),
        }
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::path()?;
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::SaveFailed {
            path: path.clone(),
            message: e.to_string(),
        })?;
        std::fs::write(&path, content).map_err(|e| ConfigError::SaveFailed {
            path,
            message: e.to_string(),
        })
    }

    /// Load from disk, returning default on error.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "falling back to default configuration");
            Self::default()
        })
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (
                "timer.sessions_before_long_break",
                self.timer.sessions_before_long_break,
            ),
            ("timer.default_work_minutes", self.timer.default_work_minutes),
            (
                "timer.default_short_break_minutes",
                self.timer.default_short_break_minutes,
            ),
        ];
        for (key, value) in checks {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    message: "must be at least 1".into(),
                });
            }
        }
        if self.watch.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "watch.poll_interval_ms".into(),
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a value by dot-separated key without saving.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed,
    /// or the result fails validation. `self` is unchanged on error.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::InvalidValue {
            key: key.into(),
            message: e.to_string(),
        })?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config =
            serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
                key: key.into(),
                message: e.to_string(),
            })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Set a value by key and save.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.apply(key, value)?;
        self.save()
    }

    pub fn phase_rules(&self) -> PhaseRules {
        PhaseRules {
            sessions_before_long_break: self.timer.sessions_before_long_break,
        }
    }

    /// Record used when no session state has been persisted yet.
    pub fn seed_state(&self) -> SessionState {
        SessionState::new(
            self.timer.default_work_minutes,
            self.timer.default_short_break_minutes,
        )
    }

    pub fn exact_alarm_snooze_millis(&self) -> i64 {
        crate::timer::minutes_to_millis(self.timer.exact_alarm_snooze_minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn missing_sections_use_defaults() {
        let parsed: Config = toml::from_str("[timer]\nsessions_before_long_break = 3\n").unwrap();
        assert_eq!(parsed.timer.sessions_before_long_break, 3);
        assert_eq!(parsed.timer.default_work_minutes, 25);
        assert_eq!(parsed.watch.poll_interval_ms, 1_000);
        assert_eq!(parsed.logging.filter, "info");
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = Config::default();
        assert_eq!(cfg.get("timer.default_work_minutes").as_deref(), Some("25"));
        assert_eq!(cfg.get("logging.filter").as_deref(), Some("info"));
        assert!(cfg.get("timer.missing_key").is_none());
    }

    #[test]
    fn apply_updates_nested_number() {
        let mut cfg = Config::default();
        cfg.apply("timer.sessions_before_long_break", "6").unwrap();
        assert_eq!(cfg.phase_rules().sessions_before_long_break, 6);
    }

    #[test]
    fn apply_updates_nested_string() {
        let mut cfg = Config::default();
        cfg.apply("logging.filter", "pomowake_core=debug").unwrap();
        assert_eq!(cfg.logging.filter, "pomowake_core=debug");
    }

    #[test]
    fn apply_rejects_unknown_key() {
        let mut cfg = Config::default();
        assert!(matches!(
            cfg.apply("timer.nonexistent", "1"),
            Err(ConfigError::UnknownKey(_))
        ));
    }

    #[test]
    fn apply_rejects_invalid_type() {
        let mut cfg = Config::default();
        assert!(cfg.apply("timer.default_work_minutes", "soon").is_err());
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn apply_rejects_zero_cycle_length() {
        let mut cfg = Config::default();
        assert!(cfg.apply("timer.sessions_before_long_break", "0").is_err());
        assert_eq!(cfg.timer.sessions_before_long_break, 4);
    }

    #[test]
    fn seed_state_uses_configured_durations() {
        let mut cfg = Config::default();
        cfg.timer.default_work_minutes = 45;
        cfg.timer.default_short_break_minutes = 9;
        let seed = cfg.seed_state();
        assert_eq!(seed.remaining_millis, 45 * 60_000);
        assert_eq!(seed.long_break_minutes(), 27);
    }

    #[test]
    fn snooze_window_defaults_to_one_day() {
        assert_eq!(Config::default().exact_alarm_snooze_millis(), 86_400_000);
    }
}
