//! Foreground keep-alive: the visible "timer running" notification.
//!
//! ## States
//!
//! ```text
//! Stopped --running--> Active --not running--> Stopped
//!                        |  ^
//!                        +--+ running (update in place)
//! ```
//!
//! While the platform refuses exact alarms, every show/update also arms an
//! in-process fallback delay to the interval's end. When it fires, the
//! foreground notification is taken down and the wake-up is delivered
//! through [`TimerService::on_wake`], which validates the token, shows the
//! completion, and advances the phase.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::events::StateChange;
use crate::scheduler::ForegroundPayload;
use crate::service::{TimerService, WakeOutcome};
use crate::timer::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveMode {
    Stopped,
    Active,
}

struct KeepAliveInner {
    mode: KeepAliveMode,
    /// Payload currently on screen, to skip no-change refreshes.
    shown: Option<ForegroundPayload>,
    /// Bumped on every re-arm and stop; a fallback only acts if it still matches.
    generation: u64,
    fallback: Option<JoinHandle<()>>,
}

pub struct ForegroundKeepAlive {
    service: Arc<TimerService>,
    inner: Arc<Mutex<KeepAliveInner>>,
}

impl ForegroundKeepAlive {
    pub fn new(service: Arc<TimerService>) -> Self {
        Self {
            service,
            inner: Arc::new(Mutex::new(KeepAliveInner {
                mode: KeepAliveMode::Stopped,
                shown: None,
                generation: 0,
                fallback: None,
            })),
        }
    }

    pub fn mode(&self) -> KeepAliveMode {
        lock(&self.inner).mode
    }

    pub fn has_fallback(&self) -> bool {
        lock(&self.inner)
            .fallback
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// React to a committed state. Unchanged payloads are not re-rendered.
    pub fn on_state(&self, state: &SessionState) {
        self.apply(state, false);
    }

    /// Like [`on_state`](Self::on_state) but always re-renders and re-arms.
    pub fn reapply(&self, state: &SessionState) {
        self.apply(state, true);
    }

    /// Subscribe to the store, render the current state, and follow changes
    /// on a background task.
    pub fn start(self: &Arc<Self>) -> crate::error::Result<JoinHandle<()>> {
        let updates = self.service.store().subscribe();
        let current = self.service.store().current()?;
        self.on_state(&current);
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move { this.run(updates).await }))
    }

    pub async fn run(&self, mut updates: broadcast::Receiver<StateChange>) {
        loop {
            match updates.recv().await {
                Ok(change) => self.on_state(&change.current),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "keep-alive lagged, re-reading session");
                    match self.service.store().current() {
                        Ok(state) => self.on_state(&state),
                        Err(e) => tracing::error!(error = %e, "failed to read session state"),
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
        self.shutdown();
    }

    /// Cancel any pending fallback and take the notification down.
    pub fn shutdown(&self) {
        let mut inner = lock(&self.inner);
        cancel_fallback(&mut inner);
        if inner.mode == KeepAliveMode::Active {
            self.stop_foreground(&mut inner);
        }
    }

    fn apply(&self, state: &SessionState, force: bool) {
        let scheduler = self.service.scheduler();
        let mut inner = lock(&self.inner);

        let Some(payload) = ForegroundPayload::for_state(state) else {
            cancel_fallback(&mut inner);
            if inner.mode == KeepAliveMode::Active {
                self.stop_foreground(&mut inner);
            }
            return;
        };

        let result = match inner.mode {
            KeepAliveMode::Active if !force && inner.shown.as_ref() == Some(&payload) => return,
            KeepAliveMode::Active => scheduler.update_foreground_timer(&payload),
            KeepAliveMode::Stopped => scheduler.show_foreground_timer(&payload),
        };
        match result {
            Ok(()) => {
                inner.mode = KeepAliveMode::Active;
                self.arm_fallback(&mut inner, &payload);
                inner.shown = Some(payload);
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to show running-timer notification");
            }
        }
    }

    fn stop_foreground(&self, inner: &mut KeepAliveInner) {
        if let Err(e) = self.service.scheduler().stop_foreground_timer() {
            tracing::warn!(error = %e, "failed to stop running-timer notification");
        }
        inner.mode = KeepAliveMode::Stopped;
        inner.shown = None;
    }

    /// Cancels the previous fallback first, then arms a new one if exact
    /// scheduling is unavailable.
    fn arm_fallback(&self, inner: &mut KeepAliveInner, payload: &ForegroundPayload) {
        cancel_fallback(inner);
        if self.service.scheduler().can_schedule_exactly() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no async runtime, completion fallback not armed");
            return;
        };

        let now = self.service.clock().now_millis();
        let delay = Duration::from_millis((payload.end_time_millis - now).max(0) as u64);
        let generation = inner.generation;
        let token = payload.completion.token.clone();
        let shared = Arc::clone(&self.inner);
        let service = Arc::clone(&self.service);

        tracing::debug!(delay_ms = delay.as_millis() as u64, "arming completion fallback");
        inner.fallback = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            fire_fallback(&shared, &service, generation, &token);
        }));
    }
}

impl Drop for ForegroundKeepAlive {
    fn drop(&mut self) {
        cancel_fallback(&mut lock(&self.inner));
    }
}

fn lock(inner: &Mutex<KeepAliveInner>) -> MutexGuard<'_, KeepAliveInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

fn cancel_fallback(inner: &mut KeepAliveInner) {
    inner.generation += 1;
    if let Some(handle) = inner.fallback.take() {
        handle.abort();
    }
}

fn fire_fallback(
    shared: &Mutex<KeepAliveInner>,
    service: &TimerService,
    generation: u64,
    token: &str,
) {
    {
        let mut inner = lock(shared);
        if inner.generation != generation || inner.mode != KeepAliveMode::Active {
            return;
        }
        inner.fallback = None;
        if let Err(e) = service.scheduler().stop_foreground_timer() {
            tracing::warn!(error = %e, "failed to stop running-timer notification");
        }
        inner.mode = KeepAliveMode::Stopped;
        inner.shown = None;
    }

    tracing::info!("completion fallback fired");
    match service.on_wake(token) {
        Ok(WakeOutcome::Advanced(_)) => {}
        Ok(WakeOutcome::Stale) => tracing::debug!("fallback token no longer live"),
        Err(e) => tracing::error!(error = %e, "fallback completion failed"),
    }
}
