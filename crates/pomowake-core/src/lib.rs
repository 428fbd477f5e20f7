//! # pomowake Core Library
//!
//! Business logic for a single-user Pomodoro timer whose state survives
//! process death and whose completion alarms are never delivered twice.
//! Front ends (the bundled CLI, or any GUI) read the session projection and
//! issue commands; everything with invariants lives here.
//!
//! ## Architecture
//!
//! - **Timer**: the persisted [`SessionState`] and the pure
//!   [`PhaseTransitionEngine`] that computes the next state for a command
//! - **Storage**: [`SessionStore`], a SQLite key-value record with atomic
//!   read-modify-write and a change broadcast; TOML [`Config`]
//! - **Scheduler**: the [`SchedulerPort`] contract with the platform's alarm
//!   and notification APIs, plus a recording [`FakeScheduler`]
//! - **Service**: [`TimerService`], which applies commands, arms wake-ups,
//!   and validates delivered wake-ups against the live phase token
//! - **Keep-alive**: [`ForegroundKeepAlive`], the running-timer notification
//!   and its in-process completion fallback
//! - **Reconcile**: [`ReconciliationTrigger`], re-arming after boot and clock
//!   changes

pub mod clock;
pub mod error;
pub mod events;
pub mod keepalive;
pub mod reconcile;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod timer;

pub use clock::{ManualClock, SystemClock, TimeSource};
pub use error::{ConfigError, CoreError, DatabaseError, SchedulerError, ValidationError};
pub use events::StateChange;
pub use keepalive::{ForegroundKeepAlive, KeepAliveMode};
pub use reconcile::{ClockJumpDetector, ReconcileOutcome, ReconciliationTrigger, SystemEvent};
pub use scheduler::{
    ChannelId, CompletionPayload, FakeScheduler, ForegroundPayload, MessageId, SchedulerCall,
    SchedulerPort, WAKE_ALARM_ID,
};
pub use service::{SessionView, TimerService, UserMessage, WakeOutcome};
pub use storage::{Config, Database, SessionStore};
pub use timer::{Command, Phase, PhaseRules, PhaseTransitionEngine, SessionState, Status};
