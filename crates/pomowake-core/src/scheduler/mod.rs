//! Contract with the platform alarm / notification scheduler.
//!
//! The core never talks to an OS API directly. It drives a [`SchedulerPort`]
//! and treats everything it passes across as opaque identifiers: text is
//! resolved by the presentation layer from [`MessageId`] tags.
//!
//! Every wake-up carries the phase token of the interval it was armed for.
//! The receiving side must compare it with the live session token before
//! acting, so alarms that outlive a pause, skip, or reset are dropped.

mod fake;

pub use fake::{FakeScheduler, SchedulerCall};

use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;
use crate::timer::{Phase, SessionState};

/// Id under which the phase-completion wake-up is scheduled.
pub const WAKE_ALARM_ID: i32 = 1001;

/// Text resource tags for notification content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageId {
    WorkRunningTitle,
    ShortBreakRunningTitle,
    LongBreakRunningTitle,
    /// Format args: phase minutes, completed work sessions.
    TimerRunningMessage,
    WorkFinishedTitle,
    BreakFinishedTitle,
    StartBreakPrompt,
    StartWorkPrompt,
    ExactAlarmPermissionMissing,
    SchedulerFailure,
}

/// Notification channels the adapter should register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelId {
    RunningTimer,
    PhaseCompletion,
}

/// What to show when a phase finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionPayload {
    pub title: MessageId,
    pub message: MessageId,
    pub channel: ChannelId,
    /// The phase that just finished.
    pub phase: Phase,
    /// Token of the interval this completion belongs to.
    pub token: String,
}

impl CompletionPayload {
    pub fn for_state(state: &SessionState) -> Self {
        let (title, message) = if state.phase.is_break() {
            (MessageId::BreakFinishedTitle, MessageId::StartWorkPrompt)
        } else {
            (MessageId::WorkFinishedTitle, MessageId::StartBreakPrompt)
        };
        Self {
            title,
            message,
            channel: ChannelId::PhaseCompletion,
            phase: state.phase,
            token: state.phase_token.clone(),
        }
    }
}

/// Persistent "timer running" notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForegroundPayload {
    pub title: MessageId,
    pub message: MessageId,
    pub format_args: Vec<i64>,
    pub channel: ChannelId,
    /// Absolute epoch millis the countdown runs to.
    pub end_time_millis: i64,
    pub completion: CompletionPayload,
}

impl ForegroundPayload {
    /// `None` unless the state is running.
    pub fn for_state(state: &SessionState) -> Option<Self> {
        let end_time_millis = state.last_known_end_timestamp.filter(|_| state.is_running())?;
        let title = match state.phase {
            Phase::Work => MessageId::WorkRunningTitle,
            Phase::ShortBreak => MessageId::ShortBreakRunningTitle,
            Phase::LongBreak => MessageId::LongBreakRunningTitle,
        };
        Some(Self {
            title,
            message: MessageId::TimerRunningMessage,
            format_args: vec![
                i64::from(state.phase_minutes(state.phase)),
                i64::from(state.completed_work_sessions),
            ],
            channel: ChannelId::RunningTimer,
            end_time_millis,
            completion: CompletionPayload::for_state(state),
        })
    }
}

/// Platform alarm and notification capabilities.
///
/// All methods are synchronous; adapters that need I/O do it behind this
/// boundary. `can_schedule_exactly` must be side-effect free.
pub trait SchedulerPort: Send + Sync {
    /// Arm a one-shot wake-up at an absolute time, replacing any wake-up with the same id.
    fn schedule_wake_at(&self, id: i32, at_millis: i64, token: &str)
        -> Result<(), SchedulerError>;

    fn cancel(&self, id: i32) -> Result<(), SchedulerError>;

    fn can_schedule_exactly(&self) -> bool;

    fn show_foreground_timer(&self, payload: &ForegroundPayload) -> Result<(), SchedulerError>;

    /// Refresh the already-visible foreground notification in place.
    fn update_foreground_timer(&self, payload: &ForegroundPayload) -> Result<(), SchedulerError>;

    fn stop_foreground_timer(&self) -> Result<(), SchedulerError>;

    fn show_completion(&self, payload: &CompletionPayload) -> Result<(), SchedulerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::Status;

    #[test]
    fn foreground_payload_requires_running() {
        assert!(ForegroundPayload::for_state(&SessionState::default()).is_none());
    }

    #[test]
    fn foreground_payload_carries_token_and_end() {
        let state = SessionState {
            status: Status::Running,
            phase: Phase::ShortBreak,
            phase_token: "T3".into(),
            last_known_end_timestamp: Some(9_000),
            completed_work_sessions: 2,
            ..SessionState::default()
        };
        let payload = ForegroundPayload::for_state(&state).unwrap();
        assert_eq!(payload.title, MessageId::ShortBreakRunningTitle);
        assert_eq!(payload.end_time_millis, 9_000);
        assert_eq!(payload.format_args, vec![5, 2]);
        assert_eq!(payload.completion.token, "T3");
        assert_eq!(payload.completion.message, MessageId::StartWorkPrompt);
    }
}
