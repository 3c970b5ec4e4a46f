use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration};

use super::manager::PyramidManager;

/// Background pyramid timer: expires timed-out sessions, queues deferred
/// waves once their gap has elapsed, and re-checks take profit.
pub async fn run_pyramid_timer(
    manager: Arc<PyramidManager>,
    timer_interval_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(Duration::from_millis(timer_interval_ms.max(1)));
    tracing::info!(timer_interval_ms, "Pyramid timer started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("Pyramid timer shutting down");
                    return;
                }
            }
        }

        if let Err(e) = manager.timer_tick().await {
            tracing::error!(error = %e, "Pyramid timer tick failed");
            if e.is_fatal() {
                tracing::error!("Pyramid timer paused — operator attention required");
                return;
            }
        }
    }
}
