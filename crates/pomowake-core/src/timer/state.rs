use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const DEFAULT_WORK_MINUTES: u32 = 25;
pub const DEFAULT_SHORT_BREAK_MINUTES: u32 = 5;

const MILLIS_PER_MINUTE: i64 = 60_000;
const LONG_BREAK_MIN_MINUTES: u32 = 10;
const LONG_BREAK_MAX_MINUTES: u32 = 30;

/// The interval type currently being timed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Work,
    ShortBreak,
    LongBreak,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Work => "WORK",
            Phase::ShortBreak => "SHORT_BREAK",
            Phase::LongBreak => "LONG_BREAK",
        }
    }

    pub fn is_break(self) -> bool {
        !matches!(self, Phase::Work)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WORK" => Ok(Phase::Work),
            "SHORT_BREAK" => Ok(Phase::ShortBreak),
            "LONG_BREAK" => Ok(Phase::LongBreak),
            other => Err(format!("unknown phase: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Idle,
    Running,
    Paused,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Idle => "IDLE",
            Status::Running => "RUNNING",
            Status::Paused => "PAUSED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(Status::Idle),
            "RUNNING" => Ok(Status::Running),
            "PAUSED" => Ok(Status::Paused),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// `minutes * 60_000`, in the signed millisecond domain used for timestamps.
pub fn minutes_to_millis(minutes: u32) -> i64 {
    i64::from(minutes) * MILLIS_PER_MINUTE
}

/// Long breaks are three short breaks, clamped to 10..=30 minutes.
pub fn long_break_minutes(short_break_minutes: u32) -> u32 {
    short_break_minutes
        .saturating_mul(3)
        .clamp(LONG_BREAK_MIN_MINUTES, LONG_BREAK_MAX_MINUTES)
}

/// The one persisted session record.
///
/// Only the phase engine produces new values of this type; everything else
/// reads snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub selected_work_minutes: u32,
    pub selected_short_break_minutes: u32,
    pub phase: Phase,
    pub status: Status,
    /// Authoritative while idle or paused. While running this is only the
    /// snapshot taken at start; use [`SessionState::live_remaining_millis`].
    pub remaining_millis: i64,
    pub completed_work_sessions: u32,
    /// Empty unless running.
    pub phase_token: String,
    pub scheduled_notification_id: Option<i32>,
    /// Epoch millis at which the running interval ends.
    pub last_known_end_timestamp: Option<i64>,
    pub auto_start_breaks: bool,
    pub auto_start_work: bool,
    pub exact_alarm_warning_snoozed_until_millis: Option<i64>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(DEFAULT_WORK_MINUTES, DEFAULT_SHORT_BREAK_MINUTES)
    }
}

impl SessionState {
    /// Fresh idle work phase with the given duration selections.
    pub fn new(work_minutes: u32, short_break_minutes: u32) -> Self {
        Self {
            selected_work_minutes: work_minutes,
            selected_short_break_minutes: short_break_minutes,
            phase: Phase::Work,
            status: Status::Idle,
            remaining_millis: minutes_to_millis(work_minutes),
            completed_work_sessions: 0,
            phase_token: String::new(),
            scheduled_notification_id: None,
            last_known_end_timestamp: None,
            auto_start_breaks: false,
            auto_start_work: false,
            exact_alarm_warning_snoozed_until_millis: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == Status::Running
    }

    pub fn long_break_minutes(&self) -> u32 {
        long_break_minutes(self.selected_short_break_minutes)
    }

    pub fn phase_minutes(&self, phase: Phase) -> u32 {
        match phase {
            Phase::Work => self.selected_work_minutes,
            Phase::ShortBreak => self.selected_short_break_minutes,
            Phase::LongBreak => self.long_break_minutes(),
        }
    }

    /// Full length of `phase` under the current selections.
    pub fn phase_duration_millis(&self, phase: Phase) -> i64 {
        minutes_to_millis(self.phase_minutes(phase))
    }

    /// Remaining time as of `now`: derived from the end timestamp while
    /// running, otherwise the stored value.
    pub fn live_remaining_millis(&self, now_millis: i64) -> i64 {
        match (self.status, self.last_known_end_timestamp) {
            (Status::Running, Some(end)) => (end - now_millis).max(0),
            _ => self.remaining_millis,
        }
    }

    /// True iff `token` identifies the currently armed interval.
    pub fn accepts_token(&self, token: &str) -> bool {
        self.is_running() && !token.is_empty() && self.phase_token == token
    }

    /// Checks the record-level invariants.
    ///
    /// Running, a present end timestamp, and a non-empty token must agree;
    /// remaining time is never negative; the counter stays within
    /// `0..=sessions_before_long_break`.
    pub fn is_consistent(&self, sessions_before_long_break: u32) -> bool {
        let running = self.is_running();
        running == self.last_known_end_timestamp.is_some()
            && running == !self.phase_token.is_empty()
            && self.remaining_millis >= 0
            && self.completed_work_sessions <= sessions_before_long_break
    }
}
