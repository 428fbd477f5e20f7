//! Wall-clock time and phase-token generation.
//!
//! Everything that reads "now" or mints a token goes through [`TimeSource`]
//! so the engine stays a pure function of its inputs.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::Utc;

/// Supplies the current wall-clock time and unique opaque tokens.
pub trait TimeSource: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;

    /// A fresh token, never equal to any previously returned one and never empty.
    fn new_token(&self) -> String;
}

/// Production time source backed by the system clock and v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn new_token(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Deterministic time source for tests and replays.
///
/// Time only moves when told to; tokens are `T1`, `T2`, ... in mint order.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
    minted: AtomicU64,
}

impl ManualClock {
    pub fn new(now_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(now_millis),
            minted: AtomicU64::new(0),
        }
    }

    pub fn set(&self, now_millis: i64) {
        self.now.store(now_millis, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_millis: i64) {
        self.now.fetch_add(delta_millis, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    fn new_token(&self) -> String {
        let n = self.minted.fetch_add(1, Ordering::SeqCst) + 1;
        format!("T{n}")
    }
}
