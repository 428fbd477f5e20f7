use std::collections::HashMap;
use std::sync::Mutex;

use super::{CompletionPayload, ForegroundPayload, SchedulerPort};
use crate::error::SchedulerError;

/// One recorded call into the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerCall {
    ScheduleWake { id: i32, at_millis: i64, token: String },
    Cancel { id: i32 },
    ShowForeground(ForegroundPayload),
    UpdateForeground(ForegroundPayload),
    StopForeground,
    ShowCompletion(CompletionPayload),
}

#[derive(Debug, Default)]
struct FakeInner {
    exact_allowed: bool,
    calls: Vec<SchedulerCall>,
    pending: HashMap<i32, (i64, String)>,
    fail_next_schedule: Option<SchedulerError>,
    fail_next_show: Option<SchedulerError>,
}

/// Deterministic in-memory scheduler that records every call.
///
/// Scheduling without exact permission fails with `PermissionDenied`, the
/// way platform alarm APIs do.
#[derive(Debug, Default)]
pub struct FakeScheduler {
    inner: Mutex<FakeInner>,
}

impl FakeScheduler {
    pub fn new(exact_allowed: bool) -> Self {
        Self {
            inner: Mutex::new(FakeInner {
                exact_allowed,
                ..FakeInner::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeInner> {
        // A test that panicked mid-call already failed; keep serving the rest.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_exact_allowed(&self, allowed: bool) {
        self.lock().exact_allowed = allowed;
    }

    pub fn fail_next_schedule(&self, err: SchedulerError) {
        self.lock().fail_next_schedule = Some(err);
    }

    pub fn fail_next_show(&self, err: SchedulerError) {
        self.lock().fail_next_show = Some(err);
    }

    pub fn calls(&self) -> Vec<SchedulerCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Wake-ups currently armed, by id: `(at_millis, token)`.
    pub fn pending_wakes(&self) -> HashMap<i32, (i64, String)> {
        self.lock().pending.clone()
    }

    pub fn completions(&self) -> Vec<CompletionPayload> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                SchedulerCall::ShowCompletion(payload) => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, matches: impl Fn(&SchedulerCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| matches(c)).count()
    }
}

impl SchedulerPort for FakeScheduler {
    fn schedule_wake_at(
        &self,
        id: i32,
        at_millis: i64,
        token: &str,
    ) -> Result<(), SchedulerError> {
        let mut inner = self.lock();
        inner.calls.push(SchedulerCall::ScheduleWake {
            id,
            at_millis,
            token: token.to_string(),
        });
        if let Some(err) = inner.fail_next_schedule.take() {
            return Err(err);
        }
        if !inner.exact_allowed {
            return Err(SchedulerError::PermissionDenied);
        }
        inner.pending.insert(id, (at_millis, token.to_string()));
        Ok(())
    }

    fn cancel(&self, id: i32) -> Result<(), SchedulerError> {
        let mut inner = self.lock();
        inner.calls.push(SchedulerCall::Cancel { id });
        inner.pending.remove(&id);
        Ok(())
    }

    fn can_schedule_exactly(&self) -> bool {
        self.lock().exact_allowed
    }

    fn show_foreground_timer(&self, payload: &ForegroundPayload) -> Result<(), SchedulerError> {
        let mut inner = self.lock();
        inner
            .calls
            .push(SchedulerCall::ShowForeground(payload.clone()));
        match inner.fail_next_show.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn update_foreground_timer(&self, payload: &ForegroundPayload) -> Result<(), SchedulerError> {
        self.lock()
            .calls
            .push(SchedulerCall::UpdateForeground(payload.clone()));
        Ok(())
    }

    fn stop_foreground_timer(&self) -> Result<(), SchedulerError> {
        self.lock().calls.push(SchedulerCall::StopForeground);
        Ok(())
    }

    fn show_completion(&self, payload: &CompletionPayload) -> Result<(), SchedulerError> {
        self.lock()
            .calls
            .push(SchedulerCall::ShowCompletion(payload.clone()));
        Ok(())
    }
}
