use serde::{Deserialize, Serialize};

use crate::timer::SessionState;

/// Every committed write to the session store produces one of these.
///
/// Observers diff `previous` against `current` to decide on side effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub previous: SessionState,
    pub current: SessionState,
}

impl StateChange {
    pub fn is_noop(&self) -> bool {
        self.previous == self.current
    }

    pub fn entered_running(&self) -> bool {
        !self.previous.is_running() && self.current.is_running()
    }

    pub fn left_running(&self) -> bool {
        self.previous.is_running() && !self.current.is_running()
    }

    /// A new interval was armed: either fresh entry into running or an
    /// auto-started phase that minted a new token.
    pub fn armed_new_interval(&self) -> bool {
        self.current.is_running() && self.previous.phase_token != self.current.phase_token
    }
}
