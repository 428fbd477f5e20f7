//! Scheduler adapter for a terminal session.
//!
//! A terminal has no OS alarm service, so exact scheduling is always
//! refused and completion relies on the keep-alive fallback inside
//! `pomowake-cli watch`. Notifications are written to stderr.

use chrono::{DateTime, Local};
use pomowake_core::{
    CompletionPayload, ForegroundPayload, MessageId, SchedulerError, SchedulerPort,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalScheduler;

impl SchedulerPort for TerminalScheduler {
    fn schedule_wake_at(
        &self,
        id: i32,
        at_millis: i64,
        _token: &str,
    ) -> Result<(), SchedulerError> {
        tracing::debug!(id, at_millis, "terminal cannot arm exact wake-ups");
        Err(SchedulerError::PermissionDenied)
    }

    fn cancel(&self, _id: i32) -> Result<(), SchedulerError> {
        Ok(())
    }

    fn can_schedule_exactly(&self) -> bool {
        false
    }

    fn show_foreground_timer(&self, payload: &ForegroundPayload) -> Result<(), SchedulerError> {
        eprintln!("{}", render_running(payload));
        Ok(())
    }

    fn update_foreground_timer(&self, payload: &ForegroundPayload) -> Result<(), SchedulerError> {
        eprintln!("{}", render_running(payload));
        Ok(())
    }

    fn stop_foreground_timer(&self) -> Result<(), SchedulerError> {
        Ok(())
    }

    fn show_completion(&self, payload: &CompletionPayload) -> Result<(), SchedulerError> {
        eprintln!(
            "\x07{}. {}",
            text(payload.title, &[]),
            text(payload.message, &[])
        );
        Ok(())
    }
}

fn render_running(payload: &ForegroundPayload) -> String {
    let ends = DateTime::from_timestamp_millis(payload.end_time_millis)
        .map(|t| t.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "?".to_string());
    format!(
        "{}: {} (ends {ends})",
        text(payload.title, &[]),
        text(payload.message, &payload.format_args)
    )
}

/// Resolve a message tag to English text.
pub fn text(id: MessageId, args: &[i64]) -> String {
    match id {
        MessageId::WorkRunningTitle => "Focus".into(),
        MessageId::ShortBreakRunningTitle => "Short break".into(),
        MessageId::LongBreakRunningTitle => "Long break".into(),
        MessageId::TimerRunningMessage => match args {
            [minutes, completed, ..] => {
                format!("{minutes} min interval, {completed} sessions completed")
            }
            _ => "timer running".into(),
        },
        MessageId::WorkFinishedTitle => "Focus session complete".into(),
        MessageId::BreakFinishedTitle => "Break is over".into(),
        MessageId::StartBreakPrompt => "Time for a break".into(),
        MessageId::StartWorkPrompt => "Ready to focus again".into(),
        MessageId::ExactAlarmPermissionMissing => {
            "Exact alarms unavailable; phases complete only while `pomowake-cli watch` runs".into()
        }
        MessageId::SchedulerFailure => "Could not schedule the completion alarm".into(),
    }
}
