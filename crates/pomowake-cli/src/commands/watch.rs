//! Long-running host for the keep-alive.
//!
//! Other `pomowake-cli timer ...` invocations write to the same store; the
//! watcher polls it for their commits, keeps the running-timer line on
//! screen, and completes phases through the in-process fallback.

use std::sync::Arc;
use std::time::{Duration, Instant};

use pomowake_core::{
    ClockJumpDetector, Config, ForegroundKeepAlive, ReconciliationTrigger, SystemEvent,
};

use super::open_service;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(watch(Config::load_or_default()))
}

async fn watch(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let service = Arc::new(open_service(&config)?);
    let keep_alive = Arc::new(ForegroundKeepAlive::new(service.clone()));
    let trigger = ReconciliationTrigger::new(service.clone(), keep_alive.clone());

    let follower = keep_alive.start()?;
    trigger.handle(SystemEvent::Boot)?;
    tracing::info!(
        poll_interval_ms = config.watch.poll_interval_ms,
        "watching session"
    );

    let started = Instant::now();
    let mut detector = ClockJumpDetector::new(config.watch.clock_jump_tolerance_ms);
    let mut ticker = tokio::time::interval(Duration::from_millis(config.watch.poll_interval_ms));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = service.store().refresh() {
                    tracing::warn!(error = %e, "failed to re-read session state");
                }

                let wall = service.clock().now_millis();
                let monotonic = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
                if let Some(skew_ms) = detector.observe(wall, monotonic) {
                    tracing::info!(skew_ms, "wall clock jumped");
                    if let Err(e) = trigger.handle(SystemEvent::ClockChanged) {
                        tracing::warn!(error = %e, "re-arm after clock change failed");
                    }
                }
            }
            _ = &mut shutdown => {
                tracing::info!("shutting down watcher");
                break;
            }
        }
    }

    follower.abort();
    keep_alive.shutdown();
    Ok(())
}
