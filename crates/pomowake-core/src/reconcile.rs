//! Re-arming after system events that invalidate scheduled alarms.
//!
//! Reboots drop every pending alarm, and clock or timezone changes can make
//! an armed wake-up fire at the wrong instant. None of these change the
//! session itself: a running interval keeps its token and end timestamp,
//! and the scheduler is simply told about it again.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::keepalive::ForegroundKeepAlive;
use crate::service::TimerService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemEvent {
    Boot,
    ClockChanged,
    TimezoneChanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing was running; nothing to re-arm.
    NotRunning,
    /// The running interval was re-armed under its existing token.
    Rearmed { token: String },
}

pub struct ReconciliationTrigger {
    service: Arc<TimerService>,
    keep_alive: Arc<ForegroundKeepAlive>,
}

impl ReconciliationTrigger {
    pub fn new(service: Arc<TimerService>, keep_alive: Arc<ForegroundKeepAlive>) -> Self {
        Self {
            service,
            keep_alive,
        }
    }

    pub fn handle(&self, event: SystemEvent) -> Result<ReconcileOutcome> {
        let state = self.service.store().current()?;
        if !state.is_running() {
            tracing::debug!(?event, "nothing running, no re-arm needed");
            return Ok(ReconcileOutcome::NotRunning);
        }

        tracing::info!(?event, token = %state.phase_token, "re-arming running interval");
        let state = self.service.rearm(&state)?;
        self.keep_alive.reapply(&state);
        Ok(ReconcileOutcome::Rearmed {
            token: state.phase_token,
        })
    }
}

/// Detects wall-clock jumps by comparing wall time against a monotonic clock.
///
/// Feed it `(wall_millis, monotonic_millis)` pairs; a pair whose wall delta
/// differs from its monotonic delta by more than the tolerance is a jump.
#[derive(Debug, Clone)]
pub struct ClockJumpDetector {
    tolerance_millis: i64,
    last: Option<(i64, i64)>,
}

impl ClockJumpDetector {
    pub fn new(tolerance_millis: u64) -> Self {
        Self {
            tolerance_millis: i64::try_from(tolerance_millis).unwrap_or(i64::MAX),
            last: None,
        }
    }

    /// Records a sample; returns the skew in millis if the clock jumped.
    pub fn observe(&mut self, wall_millis: i64, monotonic_millis: i64) -> Option<i64> {
        let previous = self.last.replace((wall_millis, monotonic_millis));
        let (last_wall, last_mono) = previous?;
        let skew = (wall_millis - last_wall) - (monotonic_millis - last_mono);
        (skew.abs() > self.tolerance_millis).then_some(skew)
    }
}
