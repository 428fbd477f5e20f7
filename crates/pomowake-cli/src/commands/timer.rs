use clap::Subcommand;
use pomowake_core::{Config, TimerService, WakeOutcome};

use super::open_service;
use crate::terminal::text;

#[derive(Subcommand)]
pub enum TimerAction {
    /// Start the current phase, or resume it when paused
    Start,
    /// Pause the running phase
    Pause,
    /// Move to the next phase without completing this one
    Skip,
    /// Return to the start of the current phase
    Stop,
    /// Back to an idle work phase with the cycle counter cleared
    Reset,
    /// Print current timer state as JSON
    Status,
    /// Complete the running phase now, as if its alarm had fired
    Advance,
    /// Set the work duration in minutes
    SetWork {
        minutes: u32,
    },
    /// Set the short break duration in minutes
    SetBreak {
        minutes: u32,
    },
    /// Start breaks automatically when a work phase completes
    AutoBreaks {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Start work automatically when a break completes
    AutoWork {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Hide the exact-alarm warning for the configured snooze window
    SnoozeWarning,
}

pub fn run(action: TimerAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load_or_default();
    let service = open_service(&config)?;

    match action {
        TimerAction::Start => {
            service.start_or_resume()?;
        }
        TimerAction::Pause => {
            service.pause()?;
        }
        TimerAction::Skip => {
            service.skip()?;
        }
        TimerAction::Stop => {
            service.stop()?;
        }
        TimerAction::Reset => {
            service.reset()?;
        }
        TimerAction::Status => {
            complete_if_overdue(&service)?;
        }
        TimerAction::Advance => {
            let state = service.store().current()?;
            if let WakeOutcome::Stale = service.on_wake(&state.phase_token)? {
                eprintln!("nothing running");
            }
        }
        TimerAction::SetWork { minutes } => {
            service.update_work_duration(minutes)?;
        }
        TimerAction::SetBreak { minutes } => {
            service.update_short_break_duration(minutes)?;
        }
        TimerAction::AutoBreaks { enabled } => {
            service.set_auto_start_breaks(enabled)?;
        }
        TimerAction::AutoWork { enabled } => {
            service.set_auto_start_work(enabled)?;
        }
        TimerAction::SnoozeWarning => {
            service.snooze_exact_alarm_warning()?;
        }
    }

    print_view(&service)
}

/// Deliver the wake-up for a running phase whose end already passed while
/// nothing was watching.
fn complete_if_overdue(service: &TimerService) -> Result<(), Box<dyn std::error::Error>> {
    let state = service.store().current()?;
    let now = service.clock().now_millis();
    if state.is_running() && state.live_remaining_millis(now) == 0 {
        tracing::info!(phase = %state.phase, "completing overdue phase");
        service.on_wake(&state.phase_token)?;
    }
    Ok(())
}

fn print_view(service: &TimerService) -> Result<(), Box<dyn std::error::Error>> {
    let view = service.view()?;
    println!("{}", serde_json::to_string_pretty(&view)?);
    if let Some(message) = service.take_user_message() {
        eprintln!("{}: {}", text(message.id, &[]), message.detail);
    }
    Ok(())
}
