mod engine;
mod state;

pub use engine::{Command, PhaseRules, PhaseTransitionEngine, DEFAULT_SESSIONS_BEFORE_LONG_BREAK};
pub use state::{
    long_break_minutes, minutes_to_millis, Phase, SessionState, Status,
    DEFAULT_SHORT_BREAK_MINUTES, DEFAULT_WORK_MINUTES,
};
