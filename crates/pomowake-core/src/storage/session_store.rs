//! Durable, observable home of the single [`SessionState`] record.
//!
//! All writes go through [`SessionStore::update`], which holds one mutex and
//! one SQLite write transaction across read, transform and persist. Every
//! transform sees the latest committed value, transforms never interleave
//! (in this process or another one sharing the file), and the broadcast
//! order equals commit order.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;

use tokio::sync::broadcast;

use super::database::Database;
use crate::error::{DatabaseError, Result};
use crate::events::StateChange;
use crate::timer::SessionState;

/// Capacity of the change channel. Slow subscribers that fall further behind
/// get `Lagged` and re-read the latest state.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Sentinel for absent optional numbers.
const NONE_SENTINEL: i64 = -1;

pub mod keys {
    pub const WORK_MINUTES: &str = "work_minutes";
    pub const SHORT_BREAK_MINUTES: &str = "short_break_minutes";
    pub const AUTO_START_BREAKS: &str = "auto_start_breaks";
    pub const AUTO_START_WORK: &str = "auto_start_work";
    pub const CURRENT_PHASE: &str = "current_phase";
    pub const STATUS: &str = "status";
    pub const REMAINING_MILLIS: &str = "remaining_millis";
    pub const COMPLETED_SESSIONS: &str = "completed_sessions";
    pub const PHASE_TOKEN: &str = "phase_token";
    pub const NOTIFICATION_ID: &str = "notification_id";
    pub const END_TIMESTAMP: &str = "end_timestamp";
    pub const EXACT_ALARM_SNOOZED_UNTIL: &str = "exact_alarm_snoozed_until";
}

struct StoreInner {
    db: Database,
    state: SessionState,
}

pub struct SessionStore {
    inner: Mutex<StoreInner>,
    updates_tx: broadcast::Sender<StateChange>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("subscriber_count", &self.updates_tx.receiver_count())
            .finish()
    }
}

impl SessionStore {
    /// Load the record from `db`, creating it from `seed` on first access.
    pub fn open(mut db: Database, seed: SessionState) -> Result<Self> {
        let tx = db.begin_write()?;
        let entries = tx.kv_all()?;
        let state = if entries.contains_key(keys::STATUS) {
            decode(&entries, &seed)?
        } else {
            tracing::info!("no session record found, creating defaults");
            tx.kv_set_many(&encode(&seed))?;
            seed
        };
        tx.commit()?;

        let (updates_tx, _rx) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            inner: Mutex::new(StoreInner { db, state }),
            updates_tx,
        })
    }

    /// Latest committed snapshot.
    pub fn current(&self) -> Result<SessionState> {
        let inner = self.inner.lock().map_err(|_| DatabaseError::Poisoned)?;
        Ok(inner.state.clone())
    }

    /// Atomically apply `transform` to the latest committed state.
    ///
    /// The read, the transform and the write all run inside one SQLite
    /// `BEGIN IMMEDIATE` transaction, so other processes sharing the file
    /// are serialized too: the transform sees every commit that preceded it
    /// and no commit can slip in between its read and its write. Commits
    /// picked up from disk that way are published before the transform's
    /// own change. A transform that returns an equal value is a no-op:
    /// nothing is written and nothing is published, but the (empty) change
    /// is still returned so callers can tell.
    pub fn update<F>(&self, transform: F) -> Result<StateChange>
    where
        F: FnOnce(&SessionState) -> SessionState,
    {
        let mut inner = self.inner.lock().map_err(|_| DatabaseError::Poisoned)?;
        let StoreInner { db, state } = &mut *inner;
        let tx = db.begin_write()?;
        if let Some(foreign) = self.adopt(state, &tx.kv_all()?)? {
            self.publish(&foreign);
        }

        let previous = state.clone();
        let current = transform(&previous);
        let change = StateChange { previous, current };
        if change.is_noop() {
            return Ok(change);
        }

        let written = tx
            .kv_set_many(&encode(&change.current))
            .and_then(|()| tx.commit());
        if let Err(e) = written {
            tracing::error!(error = %e, "failed to persist session state");
            return Err(e.into());
        }
        *state = change.current.clone();
        self.publish(&change);
        Ok(change)
    }

    /// Re-read the record from disk, publishing if another process changed it.
    pub fn refresh(&self) -> Result<Option<StateChange>> {
        let mut inner = self.inner.lock().map_err(|_| DatabaseError::Poisoned)?;
        self.reload(&mut inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.updates_tx.subscribe()
    }

    fn reload(&self, inner: &mut StoreInner) -> Result<Option<StateChange>> {
        let entries = inner.db.kv_all()?;
        let change = self.adopt(&mut inner.state, &entries)?;
        if let Some(change) = &change {
            self.publish(change);
        }
        Ok(change)
    }

    /// Replace `state` with the decoded record when they differ.
    fn adopt(
        &self,
        state: &mut SessionState,
        entries: &HashMap<String, String>,
    ) -> Result<Option<StateChange>> {
        let reloaded = decode(entries, state)?;
        if reloaded == *state {
            return Ok(None);
        }
        tracing::debug!(status = %reloaded.status, "picked up session change from disk");
        Ok(Some(StateChange {
            previous: std::mem::replace(state, reloaded.clone()),
            current: reloaded,
        }))
    }

    fn publish(&self, change: &StateChange) {
        match self.updates_tx.send(change.clone()) {
            Ok(count) => {
                tracing::trace!("state change sent to {} subscribers", count);
            }
            Err(_) => {
                tracing::debug!("no subscribers for state change");
            }
        }
    }
}

// ── Codec ────────────────────────────────────────────────────────────

fn encode(state: &SessionState) -> Vec<(&'static str, String)> {
    vec![
        (keys::WORK_MINUTES, state.selected_work_minutes.to_string()),
        (
            keys::SHORT_BREAK_MINUTES,
            state.selected_short_break_minutes.to_string(),
        ),
        (keys::AUTO_START_BREAKS, state.auto_start_breaks.to_string()),
        (keys::AUTO_START_WORK, state.auto_start_work.to_string()),
        (keys::CURRENT_PHASE, state.phase.as_str().to_string()),
        (keys::STATUS, state.status.as_str().to_string()),
        (keys::REMAINING_MILLIS, state.remaining_millis.to_string()),
        (
            keys::COMPLETED_SESSIONS,
            state.completed_work_sessions.to_string(),
        ),
        (keys::PHASE_TOKEN, state.phase_token.clone()),
        (
            keys::NOTIFICATION_ID,
            state
                .scheduled_notification_id
                .map_or(NONE_SENTINEL, i64::from)
                .to_string(),
        ),
        (
            keys::END_TIMESTAMP,
            state
                .last_known_end_timestamp
                .unwrap_or(NONE_SENTINEL)
                .to_string(),
        ),
        (
            keys::EXACT_ALARM_SNOOZED_UNTIL,
            state
                .exact_alarm_warning_snoozed_until_millis
                .unwrap_or(NONE_SENTINEL)
                .to_string(),
        ),
    ]
}

/// Missing keys fall back to `seed`'s durations and the defaults derived
/// from them; present-but-unparseable values are corruption.
fn decode(entries: &HashMap<String, String>, seed: &SessionState) -> Result<SessionState> {
    let work = field(entries, keys::WORK_MINUTES, seed.selected_work_minutes)?;
    let short = field(
        entries,
        keys::SHORT_BREAK_MINUTES,
        seed.selected_short_break_minutes,
    )?;
    let defaults = SessionState::new(work, short);

    Ok(SessionState {
        selected_work_minutes: work,
        selected_short_break_minutes: short,
        phase: field(entries, keys::CURRENT_PHASE, defaults.phase)?,
        status: field(entries, keys::STATUS, defaults.status)?,
        remaining_millis: field(entries, keys::REMAINING_MILLIS, defaults.remaining_millis)?,
        completed_work_sessions: field(entries, keys::COMPLETED_SESSIONS, 0)?,
        phase_token: entries
            .get(keys::PHASE_TOKEN)
            .cloned()
            .unwrap_or_default(),
        scheduled_notification_id: optional::<i32>(entries, keys::NOTIFICATION_ID)?,
        last_known_end_timestamp: optional::<i64>(entries, keys::END_TIMESTAMP)?,
        auto_start_breaks: field(entries, keys::AUTO_START_BREAKS, false)?,
        auto_start_work: field(entries, keys::AUTO_START_WORK, false)?,
        exact_alarm_warning_snoozed_until_millis: optional::<i64>(
            entries,
            keys::EXACT_ALARM_SNOOZED_UNTIL,
        )?,
    })
}

fn field<T: FromStr>(entries: &HashMap<String, String>, key: &str, default: T) -> Result<T> {
    match entries.get(key) {
        Some(raw) => raw.parse().map_err(|_| corrupt(key, raw)),
        None => Ok(default),
    }
}

fn optional<T>(entries: &HashMap<String, String>, key: &str) -> Result<Option<T>>
where
    T: TryFrom<i64>,
{
    let raw = field::<i64>(entries, key, NONE_SENTINEL)?;
    if raw == NONE_SENTINEL {
        return Ok(None);
    }
    T::try_from(raw)
        .map(Some)
        .map_err(|_| corrupt(key, &raw.to_string()))
}

fn corrupt(key: &str, value: &str) -> crate::error::CoreError {
    DatabaseError::Corrupt {
        key: key.to_string(),
        value: value.to_string(),
    }
    .into()
}
