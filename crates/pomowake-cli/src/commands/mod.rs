pub mod config;
pub mod timer;
pub mod watch;

use std::sync::Arc;

use pomowake_core::{Config, CoreError, Database, SessionStore, SystemClock, TimerService};

use crate::terminal::TerminalScheduler;

/// Wire a [`TimerService`] against the on-disk store and the terminal scheduler.
///
/// The stored record is fitted to `config`'s cycle rules before returning.
pub fn open_service(config: &Config) -> Result<TimerService, CoreError> {
    let db = Database::open()?;
    let store = Arc::new(SessionStore::open(db, config.seed_state())?);
    let service = TimerService::new(
        store,
        Arc::new(SystemClock),
        Arc::new(TerminalScheduler),
        config.phase_rules(),
        config.exact_alarm_snooze_millis(),
    );
    service.apply_rules()?;
    Ok(service)
}
