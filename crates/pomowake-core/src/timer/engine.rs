//! Phase transition engine.
//!
//! Every command is a pure transform `SessionState -> SessionState`. The
//! engine never stores state of its own; the session store applies these
//! transforms under its write lock, which is what makes each command atomic.
//!
//! ## State Transitions
//!
//! ```text
//! Idle --start--> Running --pause--> Paused --start--> Running
//!   ^                |
//!   |   stop/reset/  |  advance (auto-start off)
//!   +---- skip ------+
//! ```
//!
//! Leaving `Running` always clears the phase token, so an alarm armed for
//! the old interval can no longer be matched against the live state.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::state::{minutes_to_millis, Phase, SessionState, Status};
use crate::clock::TimeSource;

pub const DEFAULT_SESSIONS_BEFORE_LONG_BREAK: u32 = 4;

/// Cycle parameters that are configuration rather than session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRules {
    pub sessions_before_long_break: u32,
}

impl Default for PhaseRules {
    fn default() -> Self {
        Self {
            sessions_before_long_break: DEFAULT_SESSIONS_BEFORE_LONG_BREAK,
        }
    }
}

/// A state-mutating command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Command {
    StartOrResume,
    Pause,
    /// The running phase elapsed naturally.
    AdvancePhase,
    Skip,
    Stop,
    Reset,
    UpdateWorkDuration(u32),
    UpdateShortBreakDuration(u32),
    SetAutoStartBreaks(bool),
    SetAutoStartWork(bool),
    SnoozeExactAlarmWarningUntil(Option<i64>),
    /// Records the id under which the scheduler accepted the wake-up.
    SetScheduledNotificationId(Option<i32>),
}

pub struct PhaseTransitionEngine {
    rules: PhaseRules,
    clock: Arc<dyn TimeSource>,
}

impl PhaseTransitionEngine {
    pub fn new(rules: PhaseRules, clock: Arc<dyn TimeSource>) -> Self {
        Self { rules, clock }
    }

    pub fn rules(&self) -> PhaseRules {
        self.rules
    }

    /// Fit a record written under other rules to the current ones.
    ///
    /// Only the work counter depends on the rules. A counter beyond what the
    /// current cycle length allows is clamped, which means the next work
    /// completion leads straight into the long break.
    pub fn normalize(&self, state: &SessionState) -> SessionState {
        let completed = self.bounded_counter(state);
        if completed == state.completed_work_sessions {
            return state.clone();
        }
        SessionState {
            completed_work_sessions: completed,
            ..state.clone()
        }
    }

    pub fn apply(&self, state: &SessionState, command: &Command) -> SessionState {
        match command {
            Command::StartOrResume => self.start_or_resume(state),
            Command::Pause => self.pause(state),
            Command::AdvancePhase => self.advance_phase(state),
            Command::Skip => self.skip(state),
            Command::Stop => self.stop(state),
            Command::Reset => self.reset(state),
            Command::UpdateWorkDuration(minutes) => self.update_work_duration(state, *minutes),
            Command::UpdateShortBreakDuration(minutes) => {
                self.update_short_break_duration(state, *minutes)
            }
            Command::SetAutoStartBreaks(enabled) => SessionState {
                auto_start_breaks: *enabled,
                ..state.clone()
            },
            Command::SetAutoStartWork(enabled) => SessionState {
                auto_start_work: *enabled,
                ..state.clone()
            },
            Command::SnoozeExactAlarmWarningUntil(until) => SessionState {
                exact_alarm_warning_snoozed_until_millis: *until,
                ..state.clone()
            },
            Command::SetScheduledNotificationId(id) => self.set_scheduled_notification_id(state, *id),
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub fn start_or_resume(&self, state: &SessionState) -> SessionState {
        if state.is_running() {
            return state.clone();
        }
        let mut next = state.clone();
        self.arm(&mut next);
        next
    }

    pub fn pause(&self, state: &SessionState) -> SessionState {
        if !state.is_running() {
            return state.clone();
        }
        let now = self.clock.now_millis();
        let mut next = state.clone();
        next.remaining_millis = state.live_remaining_millis(now);
        disarm(&mut next, Status::Paused);
        next
    }

    /// Moves to the following phase. Auto-starts it if the matching flag is set.
    ///
    /// Callers are expected to have validated that the running interval
    /// actually elapsed (the wake-up receiver does this via the token).
    pub fn advance_phase(&self, state: &SessionState) -> SessionState {
        let (phase, completed) = self.next_cycle(state);
        let auto_start = if phase.is_break() {
            state.auto_start_breaks
        } else {
            state.auto_start_work
        };
        let mut next = enter_phase(state, phase, completed);
        if auto_start {
            self.arm(&mut next);
        }
        next
    }

    /// Same progression as [`advance_phase`](Self::advance_phase) but never auto-starts.
    pub fn skip(&self, state: &SessionState) -> SessionState {
        let (phase, completed) = self.next_cycle(state);
        enter_phase(state, phase, completed)
    }

    pub fn stop(&self, state: &SessionState) -> SessionState {
        enter_phase(state, state.phase, state.completed_work_sessions)
    }

    pub fn reset(&self, state: &SessionState) -> SessionState {
        enter_phase(state, Phase::Work, 0)
    }

    pub fn update_work_duration(&self, state: &SessionState, minutes: u32) -> SessionState {
        let mut next = state.clone();
        next.selected_work_minutes = minutes;
        if state.status == Status::Idle && state.phase == Phase::Work {
            next.remaining_millis = minutes_to_millis(minutes);
        }
        next
    }

    pub fn update_short_break_duration(&self, state: &SessionState, minutes: u32) -> SessionState {
        let mut next = state.clone();
        next.selected_short_break_minutes = minutes;
        if state.status == Status::Idle && state.phase == Phase::ShortBreak {
            next.remaining_millis = minutes_to_millis(minutes);
        }
        next
    }

    pub fn set_scheduled_notification_id(
        &self,
        state: &SessionState,
        id: Option<i32>,
    ) -> SessionState {
        if !state.is_running() {
            return state.clone();
        }
        SessionState {
            scheduled_notification_id: id,
            ..state.clone()
        }
    }

    // ── Internal ─────────────────────────────────────────────────────

    /// Phase and work counter after the current phase ends.
    fn next_cycle(&self, state: &SessionState) -> (Phase, u32) {
        let total = self.total();
        let completed = self.bounded_counter(state);
        match state.phase {
            Phase::Work => {
                let done = completed + 1;
                let phase = if done >= total {
                    Phase::LongBreak
                } else {
                    Phase::ShortBreak
                };
                (phase, done % total.saturating_add(1))
            }
            Phase::ShortBreak => (Phase::Work, completed),
            Phase::LongBreak => (Phase::Work, 0),
        }
    }

    fn total(&self) -> u32 {
        self.rules.sessions_before_long_break.max(1)
    }

    /// Largest counter `state.phase` can legitimately carry under the
    /// current rules: a long break follows the `total`-th work session,
    /// every other phase comes before it.
    fn bounded_counter(&self, state: &SessionState) -> u32 {
        let total = self.total();
        let ceiling = match state.phase {
            Phase::LongBreak => total,
            Phase::Work | Phase::ShortBreak => total - 1,
        };
        state.completed_work_sessions.min(ceiling)
    }

    fn arm(&self, state: &mut SessionState) {
        let now = self.clock.now_millis();
        state.status = Status::Running;
        state.phase_token = self.clock.new_token();
        state.last_known_end_timestamp = Some(now + state.remaining_millis);
    }
}

/// Idle at the start of `phase` with its full duration.
fn enter_phase(state: &SessionState, phase: Phase, completed: u32) -> SessionState {
    let mut next = state.clone();
    next.phase = phase;
    next.completed_work_sessions = completed;
    next.remaining_millis = state.phase_duration_millis(phase);
    disarm(&mut next, Status::Idle);
    next
}

fn disarm(state: &mut SessionState, status: Status) {
    state.status = status;
    state.phase_token.clear();
    state.last_known_end_timestamp = None;
    state.scheduled_notification_id = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn engine_at(now: i64) -> (PhaseTransitionEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now));
        (
            PhaseTransitionEngine::new(PhaseRules::default(), clock.clone()),
            clock,
        )
    }

    fn running(remaining: i64, end: i64, token: &str) -> SessionState {
        SessionState {
            status: Status::Running,
            remaining_millis: remaining,
            last_known_end_timestamp: Some(end),
            phase_token: token.into(),
            ..SessionState::default()
        }
    }

    #[test]
    fn start_mints_token_and_end_timestamp() {
        let (engine, _) = engine_at(0);
        let next = engine.start_or_resume(&SessionState::default());
        assert_eq!(next.status, Status::Running);
        assert_eq!(next.phase_token, "T1");
        assert_eq!(next.last_known_end_timestamp, Some(1_500_000));
    }

    #[test]
    fn start_while_running_is_noop() {
        let (engine, _) = engine_at(0);
        let state = running(1_000, 1_000, "T9");
        assert_eq!(engine.start_or_resume(&state), state);
    }

    #[test]
    fn pause_recomputes_from_wall_clock() {
        let (engine, _) = engine_at(1_000);
        let next = engine.pause(&running(1_500, 4_000, "T1"));
        assert_eq!(next.remaining_millis, 3_000);
        assert_eq!(next.status, Status::Paused);
        assert_eq!(next.phase_token, "");
        assert_eq!(next.last_known_end_timestamp, None);
    }

    #[test]
    fn pause_after_end_clamps_to_zero() {
        let (engine, _) = engine_at(10_000);
        let next = engine.pause(&running(1_500, 4_000, "T1"));
        assert_eq!(next.remaining_millis, 0);
    }

    #[test]
    fn pause_when_not_running_is_noop() {
        let (engine, _) = engine_at(1_000);
        let idle = SessionState::default();
        assert_eq!(engine.pause(&idle), idle);
        let paused = SessionState {
            status: Status::Paused,
            remaining_millis: 42,
            ..SessionState::default()
        };
        assert_eq!(engine.pause(&paused), paused);
    }

    #[test]
    fn resume_mints_a_new_token() {
        let (engine, clock) = engine_at(0);
        let started = engine.start_or_resume(&SessionState::default());
        clock.set(60_000);
        let paused = engine.pause(&started);
        let resumed = engine.start_or_resume(&paused);
        assert_eq!(resumed.phase_token, "T2");
        assert_eq!(
            resumed.last_known_end_timestamp,
            Some(60_000 + 1_500_000 - 60_000)
        );
    }

    #[test]
    fn fourth_work_session_leads_to_long_break() {
        let (engine, _) = engine_at(0);
        let state = SessionState {
            completed_work_sessions: 3,
            ..SessionState::default()
        };
        let next = engine.advance_phase(&state);
        assert_eq!(next.phase, Phase::LongBreak);
        assert_eq!(next.completed_work_sessions, 4);
        assert_eq!(next.remaining_millis, 15 * 60_000);
    }

    #[test]
    fn long_break_completion_resets_counter() {
        let (engine, _) = engine_at(0);
        let state = SessionState {
            phase: Phase::LongBreak,
            completed_work_sessions: 4,
            ..SessionState::default()
        };
        let next = engine.advance_phase(&state);
        assert_eq!(next.phase, Phase::Work);
        assert_eq!(next.completed_work_sessions, 0);
    }

    #[test]
    fn short_break_completion_keeps_counter() {
        let (engine, _) = engine_at(0);
        let state = SessionState {
            phase: Phase::ShortBreak,
            completed_work_sessions: 2,
            ..SessionState::default()
        };
        let next = engine.advance_phase(&state);
        assert_eq!(next.phase, Phase::Work);
        assert_eq!(next.completed_work_sessions, 2);
    }

    #[test]
    fn modulo_counter_agrees_with_increment_then_reset() {
        let total = 4;
        for completed in 0..total {
            let modulo = (completed + 1) % (total + 1);
            let simple = completed + 1;
            assert_eq!(modulo, simple, "completed={completed}");
        }
        assert_eq!((3 + 1) % (total + 1), 4);
    }

    #[test]
    fn shorter_cycle_clamps_counter() {
        let clock = Arc::new(ManualClock::new(0));
        let engine = PhaseTransitionEngine::new(
            PhaseRules {
                sessions_before_long_break: 2,
            },
            clock,
        );
        let work = SessionState {
            completed_work_sessions: 3,
            ..SessionState::default()
        };
        assert_eq!(engine.normalize(&work).completed_work_sessions, 1);

        let long_break = SessionState {
            phase: Phase::LongBreak,
            completed_work_sessions: 4,
            ..SessionState::default()
        };
        assert_eq!(engine.normalize(&long_break).completed_work_sessions, 2);

        let next = engine.advance_phase(&work);
        assert_eq!(next.phase, Phase::LongBreak);
        assert_eq!(next.completed_work_sessions, 2);
        assert!(next.is_consistent(2));

        let short_break = SessionState {
            phase: Phase::ShortBreak,
            completed_work_sessions: 3,
            ..SessionState::default()
        };
        let next = engine.advance_phase(&short_break);
        assert_eq!(next.phase, Phase::Work);
        assert_eq!(next.completed_work_sessions, 1);
    }

    #[test]
    fn normalize_leaves_counter_in_range_alone() {
        let (engine, _) = engine_at(0);
        let state = SessionState {
            phase: Phase::LongBreak,
            completed_work_sessions: 4,
            ..SessionState::default()
        };
        assert_eq!(engine.normalize(&state), state);
    }

    #[test]
    fn advance_auto_starts_break_when_enabled() {
        let (engine, _) = engine_at(1_500_000);
        let state = SessionState {
            auto_start_breaks: true,
            ..running(1_500_000, 1_500_000, "T0")
        };
        let next = engine.advance_phase(&state);
        assert_eq!(next.phase, Phase::ShortBreak);
        assert_eq!(next.status, Status::Running);
        assert_eq!(next.phase_token, "T1");
        assert_eq!(next.last_known_end_timestamp, Some(1_500_000 + 300_000));
    }

    #[test]
    fn advance_uses_work_flag_when_entering_work() {
        let (engine, _) = engine_at(0);
        let state = SessionState {
            phase: Phase::ShortBreak,
            auto_start_breaks: true,
            auto_start_work: false,
            ..running(300_000, 300_000, "T4")
        };
        let next = engine.advance_phase(&state);
        assert_eq!(next.phase, Phase::Work);
        assert_eq!(next.status, Status::Idle);
        assert!(next.phase_token.is_empty());
    }

    #[test]
    fn skip_never_auto_starts() {
        let (engine, _) = engine_at(0);
        let state = SessionState {
            auto_start_breaks: true,
            ..running(1_000, 1_000, "T1")
        };
        let next = engine.skip(&state);
        assert_eq!(next.phase, Phase::ShortBreak);
        assert_eq!(next.status, Status::Idle);
        assert!(next.phase_token.is_empty());
        assert_eq!(next.scheduled_notification_id, None);
    }

    #[test]
    fn stop_restores_full_duration_of_current_phase() {
        let (engine, _) = engine_at(0);
        let state = SessionState {
            phase: Phase::ShortBreak,
            completed_work_sessions: 2,
            scheduled_notification_id: Some(7),
            ..running(10, 100, "T1")
        };
        let next = engine.stop(&state);
        assert_eq!(next.phase, Phase::ShortBreak);
        assert_eq!(next.status, Status::Idle);
        assert_eq!(next.remaining_millis, 300_000);
        assert_eq!(next.completed_work_sessions, 2);
        assert_eq!(next.scheduled_notification_id, None);
    }

    #[test]
    fn reset_returns_to_first_work_phase() {
        let (engine, _) = engine_at(0);
        let state = SessionState {
            phase: Phase::LongBreak,
            completed_work_sessions: 4,
            selected_work_minutes: 40,
            ..running(10, 100, "T1")
        };
        let next = engine.reset(&state);
        assert_eq!(next.phase, Phase::Work);
        assert_eq!(next.status, Status::Idle);
        assert_eq!(next.completed_work_sessions, 0);
        assert_eq!(next.remaining_millis, 40 * 60_000);
        assert!(next.is_consistent(4));
    }

    #[test]
    fn work_duration_change_while_running_leaves_remaining() {
        let (engine, _) = engine_at(0);
        let state = running(1_500_000, 1_500_000, "T1");
        let next = engine.update_work_duration(&state, 30);
        assert_eq!(next.selected_work_minutes, 30);
        assert_eq!(next.remaining_millis, 1_500_000);
        assert_eq!(next.phase_token, "T1");
    }

    #[test]
    fn duration_change_only_resets_matching_idle_phase() {
        let (engine, _) = engine_at(0);
        let idle_work = SessionState::default();
        assert_eq!(
            engine.update_work_duration(&idle_work, 50).remaining_millis,
            50 * 60_000
        );
        assert_eq!(
            engine
                .update_short_break_duration(&idle_work, 10)
                .remaining_millis,
            idle_work.remaining_millis
        );

        let idle_break = SessionState {
            phase: Phase::ShortBreak,
            remaining_millis: 300_000,
            ..SessionState::default()
        };
        assert_eq!(
            engine
                .update_short_break_duration(&idle_break, 10)
                .remaining_millis,
            600_000
        );

        let paused_work = SessionState {
            status: Status::Paused,
            remaining_millis: 1_000,
            ..SessionState::default()
        };
        assert_eq!(
            engine.update_work_duration(&paused_work, 50).remaining_millis,
            1_000
        );
    }

    #[test]
    fn notification_id_is_only_recorded_while_running() {
        let (engine, _) = engine_at(0);
        let idle = SessionState::default();
        assert_eq!(engine.set_scheduled_notification_id(&idle, Some(3)), idle);
        let armed = engine.set_scheduled_notification_id(&running(1, 1, "T1"), Some(3));
        assert_eq!(armed.scheduled_notification_id, Some(3));
    }

    #[test]
    fn start_advance_scenario() {
        let (engine, clock) = engine_at(0);
        let started = engine.apply(&SessionState::default(), &Command::StartOrResume);
        assert_eq!(started.status, Status::Running);
        assert_eq!(started.phase_token, "T1");
        assert_eq!(started.last_known_end_timestamp, Some(1_500_000));

        let reconfigured = engine.apply(&started, &Command::UpdateWorkDuration(30));
        assert_eq!(
            reconfigured,
            SessionState {
                selected_work_minutes: 30,
                ..started.clone()
            }
        );

        clock.set(1_500_000);
        let advanced = engine.apply(&reconfigured, &Command::AdvancePhase);
        assert_eq!(advanced.phase, Phase::ShortBreak);
        assert_eq!(advanced.status, Status::Idle);
        assert_eq!(advanced.remaining_millis, 300_000);
        assert_eq!(advanced.phase_token, "");
    }
}
