//! Timer use cases: commands in, scheduled wake-ups out.
//!
//! [`TimerService`] is the single entry point callers use to mutate the
//! session. Each command is applied through the store's atomic update, then
//! the exact wake-up for the running interval is armed or cancelled to match
//! the committed state. Scheduler failures never fail a command; they only
//! change the read-side projection ([`SessionView`]).

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::TimeSource;
use crate::error::{Result, SchedulerError, ValidationError};
use crate::events::StateChange;
use crate::scheduler::{CompletionPayload, MessageId, SchedulerPort, WAKE_ALARM_ID};
use crate::storage::SessionStore;
use crate::timer::{Command, Phase, PhaseRules, PhaseTransitionEngine, SessionState, Status};

/// One-shot message for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessage {
    pub id: MessageId,
    pub detail: String,
}

/// What happened to a delivered wake-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeOutcome {
    /// Token matched; completion shown and the phase advanced.
    Advanced(SessionState),
    /// Token did not match the live interval; nothing changed.
    Stale,
}

/// Read-side projection of the session for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub phase: Phase,
    pub status: Status,
    /// Live remaining time at `now`.
    pub remaining_millis: i64,
    pub phase_total_millis: i64,
    pub ends_at: Option<DateTime<Utc>>,
    pub selected_work_minutes: u32,
    pub selected_short_break_minutes: u32,
    pub long_break_minutes: u32,
    pub completed_work_sessions: u32,
    pub sessions_before_long_break: u32,
    pub auto_start_breaks: bool,
    pub auto_start_work: bool,
    pub is_exact_alarm_permission_missing: bool,
}

#[derive(Debug, Default)]
struct Alerts {
    permission_missing: bool,
    pending_message: Option<UserMessage>,
}

pub struct TimerService {
    store: Arc<SessionStore>,
    engine: PhaseTransitionEngine,
    clock: Arc<dyn TimeSource>,
    scheduler: Arc<dyn SchedulerPort>,
    snooze_millis: i64,
    alerts: Mutex<Alerts>,
}

impl TimerService {
    pub fn new(
        store: Arc<SessionStore>,
        clock: Arc<dyn TimeSource>,
        scheduler: Arc<dyn SchedulerPort>,
        rules: PhaseRules,
        snooze_millis: i64,
    ) -> Self {
        Self {
            store,
            engine: PhaseTransitionEngine::new(rules, clock.clone()),
            clock,
            scheduler,
            snooze_millis,
            alerts: Mutex::new(Alerts::default()),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn TimeSource> {
        &self.clock
    }

    pub fn scheduler(&self) -> &Arc<dyn SchedulerPort> {
        &self.scheduler
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Apply `command` atomically and bring the scheduled wake-up in line.
    ///
    /// Commands issued in a state where they do nothing are not errors; the
    /// returned state is simply unchanged.
    pub fn execute(&self, command: Command) -> Result<SessionState> {
        let change = self
            .store
            .update(|state| self.engine.apply(state, &command))?;
        if change.is_noop() {
            tracing::debug!(?command, status = %change.current.status, "command ignored");
            return Ok(change.current);
        }
        tracing::info!(
            ?command,
            phase = %change.current.phase,
            status = %change.current.status,
            "session updated"
        );
        self.sync_wake(&change)
    }

    pub fn start_or_resume(&self) -> Result<SessionState> {
        self.execute(Command::StartOrResume)
    }

    pub fn pause(&self) -> Result<SessionState> {
        self.execute(Command::Pause)
    }

    pub fn skip(&self) -> Result<SessionState> {
        self.execute(Command::Skip)
    }

    pub fn stop(&self) -> Result<SessionState> {
        self.execute(Command::Stop)
    }

    pub fn reset(&self) -> Result<SessionState> {
        self.execute(Command::Reset)
    }

    pub fn update_work_duration(&self, minutes: u32) -> Result<SessionState> {
        validate_minutes("work_minutes", minutes)?;
        self.execute(Command::UpdateWorkDuration(minutes))
    }

    pub fn update_short_break_duration(&self, minutes: u32) -> Result<SessionState> {
        validate_minutes("short_break_minutes", minutes)?;
        self.execute(Command::UpdateShortBreakDuration(minutes))
    }

    pub fn set_auto_start_breaks(&self, enabled: bool) -> Result<SessionState> {
        self.execute(Command::SetAutoStartBreaks(enabled))
    }

    pub fn set_auto_start_work(&self, enabled: bool) -> Result<SessionState> {
        self.execute(Command::SetAutoStartWork(enabled))
    }

    /// Silence the missing-permission warning for the configured window.
    pub fn snooze_exact_alarm_warning(&self) -> Result<SessionState> {
        let until = self.clock.now_millis() + self.snooze_millis;
        self.lock_alerts().permission_missing = false;
        self.execute(Command::SnoozeExactAlarmWarningUntil(Some(until)))
    }

    /// Bring the stored record in line with this service's cycle rules.
    ///
    /// A record written while `sessions_before_long_break` was larger can
    /// carry a work counter past the current cycle; it is clamped here.
    pub fn apply_rules(&self) -> Result<SessionState> {
        let change = self.store.update(|state| self.engine.normalize(state))?;
        if !change.is_noop() {
            tracing::info!(
                from = change.previous.completed_work_sessions,
                to = change.current.completed_work_sessions,
                "work counter clamped to cycle length"
            );
        }
        Ok(change.current)
    }

    // ── Wake-ups ─────────────────────────────────────────────────────

    /// Receiver for a fired wake-up carrying `token`.
    ///
    /// The token check and the phase advance happen inside one store
    /// update, so two deliveries of the same alarm can advance at most once.
    pub fn on_wake(&self, token: &str) -> Result<WakeOutcome> {
        let change = self.store.update(|state| {
            if state.accepts_token(token) {
                self.engine.advance_phase(state)
            } else {
                state.clone()
            }
        })?;
        if change.is_noop() {
            tracing::debug!(token, "dropping stale wake-up");
            return Ok(WakeOutcome::Stale);
        }

        tracing::info!(
            finished = %change.previous.phase,
            next = %change.current.phase,
            "phase completed"
        );
        if let Err(e) = self
            .scheduler
            .show_completion(&CompletionPayload::for_state(&change.previous))
        {
            self.report_failure(&e);
        }
        let current = self.sync_wake(&change)?;
        Ok(WakeOutcome::Advanced(current))
    }

    /// Re-issue the wake-up for an already running interval, same token.
    pub fn rearm(&self, state: &SessionState) -> Result<SessionState> {
        if !state.is_running() {
            return Ok(state.clone());
        }
        self.arm_wake(state)
    }

    // ── Projection ───────────────────────────────────────────────────

    pub fn view(&self) -> Result<SessionView> {
        let state = self.engine.normalize(&self.store.current()?);
        let now = self.clock.now_millis();
        // Another process may have armed the interval, so the flag alone
        // says nothing about a timer this one did not start.
        let unscheduled = state.is_running()
            && state.scheduled_notification_id.is_none()
            && !self.scheduler.can_schedule_exactly();
        let permission_missing =
            (self.lock_alerts().permission_missing || unscheduled) && !is_snoozed(&state, now);
        Ok(SessionView {
            phase: state.phase,
            status: state.status,
            remaining_millis: state.live_remaining_millis(now),
            phase_total_millis: state.phase_duration_millis(state.phase),
            ends_at: state
                .last_known_end_timestamp
                .and_then(DateTime::<Utc>::from_timestamp_millis),
            selected_work_minutes: state.selected_work_minutes,
            selected_short_break_minutes: state.selected_short_break_minutes,
            long_break_minutes: state.long_break_minutes(),
            completed_work_sessions: state.completed_work_sessions,
            sessions_before_long_break: self.engine.rules().sessions_before_long_break,
            auto_start_breaks: state.auto_start_breaks,
            auto_start_work: state.auto_start_work,
            is_exact_alarm_permission_missing: permission_missing,
        })
    }

    /// The pending one-shot message, cleared on read.
    pub fn take_user_message(&self) -> Option<UserMessage> {
        self.lock_alerts().pending_message.take()
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn sync_wake(&self, change: &StateChange) -> Result<SessionState> {
        if change.armed_new_interval() {
            return self.arm_wake(&change.current);
        }
        if change.left_running() {
            if let Some(id) = change.previous.scheduled_notification_id {
                if let Err(e) = self.scheduler.cancel(id) {
                    // The token is already cleared, so a late delivery is dropped anyway.
                    tracing::warn!(id, error = %e, "failed to cancel wake-up");
                }
            }
        }
        Ok(change.current.clone())
    }

    fn arm_wake(&self, state: &SessionState) -> Result<SessionState> {
        let Some(end) = state.last_known_end_timestamp else {
            return Ok(state.clone());
        };
        let token = state.phase_token.clone();
        match self.scheduler.schedule_wake_at(WAKE_ALARM_ID, end, &token) {
            Ok(()) => {
                self.lock_alerts().permission_missing = false;
                let change = self.store.update(|s| {
                    if s.phase_token == token {
                        self.engine
                            .set_scheduled_notification_id(s, Some(WAKE_ALARM_ID))
                    } else {
                        s.clone()
                    }
                })?;
                Ok(change.current)
            }
            Err(e) => {
                self.report_failure(&e);
                Ok(state.clone())
            }
        }
    }

    fn report_failure(&self, err: &SchedulerError) {
        let now = self.clock.now_millis();
        match err {
            SchedulerError::PermissionDenied => {
                let snoozed = self
                    .store
                    .current()
                    .map(|s| is_snoozed(&s, now))
                    .unwrap_or(false);
                tracing::warn!(snoozed, "exact alarm permission missing, relying on fallback");
                if !snoozed {
                    self.lock_alerts().permission_missing = true;
                }
            }
            SchedulerError::Unknown(detail) => {
                tracing::warn!(%detail, "scheduler call failed");
                self.lock_alerts().pending_message = Some(UserMessage {
                    id: MessageId::SchedulerFailure,
                    detail: detail.clone(),
                });
            }
        }
    }

    fn lock_alerts(&self) -> std::sync::MutexGuard<'_, Alerts> {
        self.alerts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn is_snoozed(state: &SessionState, now: i64) -> bool {
    state
        .exact_alarm_warning_snoozed_until_millis
        .is_some_and(|until| now < until)
}

fn validate_minutes(field: &str, minutes: u32) -> Result<()> {
    if minutes == 0 {
        return Err(ValidationError::InvalidValue {
            field: field.into(),
            message: "must be at least 1 minute".into(),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::scheduler::{FakeScheduler, SchedulerCall};
    use crate::storage::Database;

    struct Harness {
        service: TimerService,
        clock: Arc<ManualClock>,
        scheduler: Arc<FakeScheduler>,
    }

    fn harness(exact_allowed: bool) -> Harness {
        let clock = Arc::new(ManualClock::new(0));
        let scheduler = Arc::new(FakeScheduler::new(exact_allowed));
        let store = Arc::new(
            SessionStore::open(Database::open_memory().unwrap(), SessionState::default()).unwrap(),
        );
        let service = TimerService::new(
            store,
            clock.clone(),
            scheduler.clone(),
            PhaseRules::default(),
            60_000,
        );
        Harness {
            service,
            clock,
            scheduler,
        }
    }

    #[test]
    fn start_schedules_wake_and_records_id() {
        let h = harness(true);
        let state = h.service.start_or_resume().unwrap();
        assert_eq!(state.scheduled_notification_id, Some(WAKE_ALARM_ID));
        assert_eq!(
            h.scheduler.pending_wakes()[&WAKE_ALARM_ID],
            (1_500_000, "T1".to_string())
        );
        assert_eq!(h.service.store().current().unwrap(), state);
    }

    #[test]
    fn pause_cancels_wake() {
        let h = harness(true);
        h.service.start_or_resume().unwrap();
        h.clock.set(1_000);
        let paused = h.service.pause().unwrap();
        assert_eq!(paused.remaining_millis, 1_499_000);
        assert!(h.scheduler.pending_wakes().is_empty());
        assert!(h
            .scheduler
            .calls()
            .contains(&SchedulerCall::Cancel { id: WAKE_ALARM_ID }));
    }

    #[test]
    fn repeated_commands_are_silent_noops() {
        let h = harness(true);
        h.service.pause().unwrap();
        assert!(h.scheduler.calls().is_empty());
        h.service.start_or_resume().unwrap();
        h.scheduler.clear_calls();
        h.service.start_or_resume().unwrap();
        assert!(h.scheduler.calls().is_empty());
    }

    #[test]
    fn matching_wake_advances_once() {
        let h = harness(true);
        h.service.start_or_resume().unwrap();
        h.clock.set(1_500_000);

        let outcome = h.service.on_wake("T1").unwrap();
        let WakeOutcome::Advanced(state) = outcome else {
            panic!("expected advance");
        };
        assert_eq!(state.phase, Phase::ShortBreak);
        assert_eq!(state.status, Status::Idle);
        assert_eq!(h.scheduler.completions().len(), 1);
        assert_eq!(h.scheduler.completions()[0].phase, Phase::Work);

        assert_eq!(h.service.on_wake("T1").unwrap(), WakeOutcome::Stale);
        assert_eq!(h.scheduler.completions().len(), 1);
    }

    #[test]
    fn stale_wake_after_pause_changes_nothing() {
        let h = harness(true);
        h.service.start_or_resume().unwrap();
        h.clock.set(10_000);
        let paused = h.service.pause().unwrap();

        assert_eq!(h.service.on_wake("T1").unwrap(), WakeOutcome::Stale);
        assert_eq!(h.service.store().current().unwrap(), paused);
        assert!(h.scheduler.completions().is_empty());
    }

    #[test]
    fn wake_from_previous_interval_is_stale_after_resume() {
        let h = harness(true);
        h.service.start_or_resume().unwrap();
        h.service.pause().unwrap();
        h.service.start_or_resume().unwrap();
        assert_eq!(h.service.on_wake("T1").unwrap(), WakeOutcome::Stale);
        assert!(matches!(
            h.service.on_wake("T2").unwrap(),
            WakeOutcome::Advanced(_)
        ));
    }

    #[test]
    fn auto_started_break_gets_its_own_wake() {
        let h = harness(true);
        h.service.set_auto_start_breaks(true).unwrap();
        h.service.start_or_resume().unwrap();
        h.clock.set(1_500_000);
        let WakeOutcome::Advanced(state) = h.service.on_wake("T1").unwrap() else {
            panic!("expected advance");
        };
        assert_eq!(state.status, Status::Running);
        assert_eq!(state.phase_token, "T2");
        assert_eq!(
            h.scheduler.pending_wakes()[&WAKE_ALARM_ID],
            (1_800_000, "T2".to_string())
        );
    }

    #[test]
    fn permission_denied_sets_warning() {
        let h = harness(false);
        let state = h.service.start_or_resume().unwrap();
        assert_eq!(state.status, Status::Running);
        assert_eq!(state.scheduled_notification_id, None);
        assert!(h.service.view().unwrap().is_exact_alarm_permission_missing);
    }

    #[test]
    fn snoozed_warning_stays_hidden() {
        let h = harness(false);
        h.service.snooze_exact_alarm_warning().unwrap();
        h.service.start_or_resume().unwrap();
        assert!(!h.service.view().unwrap().is_exact_alarm_permission_missing);

        h.clock.set(60_000);
        h.service.pause().unwrap();
        h.service.start_or_resume().unwrap();
        assert!(h.service.view().unwrap().is_exact_alarm_permission_missing);
    }

    #[test]
    fn granted_permission_clears_warning() {
        let h = harness(false);
        h.service.start_or_resume().unwrap();
        h.service.pause().unwrap();
        h.scheduler.set_exact_allowed(true);
        h.service.start_or_resume().unwrap();
        assert!(!h.service.view().unwrap().is_exact_alarm_permission_missing);
    }

    #[test]
    fn warning_derives_from_running_state_in_a_fresh_service() {
        let h = harness(false);
        h.service.start_or_resume().unwrap();

        let other = TimerService::new(
            h.service.store().clone(),
            h.clock.clone(),
            Arc::new(FakeScheduler::new(false)),
            PhaseRules::default(),
            60_000,
        );
        assert!(other.view().unwrap().is_exact_alarm_permission_missing);

        other.pause().unwrap();
        assert!(!other.view().unwrap().is_exact_alarm_permission_missing);
    }

    #[test]
    fn view_and_apply_rules_clamp_counter_to_cycle() {
        let h = harness(true);
        h.service
            .store()
            .update(|s| SessionState {
                completed_work_sessions: 3,
                ..s.clone()
            })
            .unwrap();
        let shorter = TimerService::new(
            h.service.store().clone(),
            h.clock.clone(),
            h.scheduler.clone(),
            PhaseRules {
                sessions_before_long_break: 2,
            },
            60_000,
        );

        assert_eq!(shorter.view().unwrap().completed_work_sessions, 1);
        let state = shorter.apply_rules().unwrap();
        assert_eq!(state.completed_work_sessions, 1);
        assert!(state.is_consistent(2));
        assert_eq!(shorter.apply_rules().unwrap(), state);
    }

    #[test]
    fn unknown_failure_surfaces_once() {
        let h = harness(true);
        h.scheduler
            .fail_next_schedule(SchedulerError::Unknown("alarm service gone".into()));
        let state = h.service.start_or_resume().unwrap();
        assert_eq!(state.status, Status::Running);

        let message = h.service.take_user_message().unwrap();
        assert_eq!(message.id, MessageId::SchedulerFailure);
        assert!(h.service.take_user_message().is_none());
        assert!(!h.service.view().unwrap().is_exact_alarm_permission_missing);
    }

    #[test]
    fn zero_minute_durations_are_rejected() {
        let h = harness(true);
        assert!(h.service.update_work_duration(0).is_err());
        assert_eq!(
            h.service.store().current().unwrap().selected_work_minutes,
            25
        );
    }

    #[test]
    fn view_reports_live_remaining() {
        let h = harness(true);
        h.service.start_or_resume().unwrap();
        h.clock.set(500_000);
        let view = h.service.view().unwrap();
        assert_eq!(view.remaining_millis, 1_000_000);
        assert_eq!(view.phase_total_millis, 1_500_000);
        assert_eq!(view.long_break_minutes, 15);
        assert!(view.ends_at.is_some());
    }

    #[test]
    fn rearm_reuses_live_token() {
        let h = harness(true);
        let running = h.service.start_or_resume().unwrap();
        h.scheduler.clear_calls();
        h.service.rearm(&running).unwrap();
        assert_eq!(
            h.scheduler.calls(),
            vec![SchedulerCall::ScheduleWake {
                id: WAKE_ALARM_ID,
                at_millis: 1_500_000,
                token: "T1".into(),
            }]
        );
    }
}
