use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration};

use super::engine::PaperEngine;
use crate::db::order_repo;
use crate::errors::AppError;
use crate::models::OrderStatus;

/// Entry in the latency queue, ordered by due time with submission sequence
/// as the tiebreak so dispatch stays stable FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScheduledOrder {
    pub due_at: DateTime<Utc>,
    pub seq: u64,
    pub order_id: i64,
}

impl Ord for ScheduledOrder {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.due_at, self.seq).cmp(&(other.due_at, other.seq))
    }
}

impl PartialOrd for ScheduledOrder {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Dashboard view of an order waiting out its simulated latency.
#[derive(Debug, Clone, Serialize)]
pub struct PendingProgress {
    pub order_id: i64,
    pub client_order_id: String,
    pub symbol: String,
    pub side: String,
    pub elapsed_ms: i64,
    pub remaining_ms: i64,
    pub progress_pct: f64,
}

/// Execute every scheduled order whose due time has passed.
///
/// Status is re-checked from the store before firing: an order cancelled
/// while PENDING is skipped, which is how reject-during-latency wins.
pub async fn poll_due(engine: &PaperEngine) -> Result<usize, AppError> {
    let mut executed = 0usize;

    loop {
        let due = {
            let mut schedule = engine.schedule.lock().expect("schedule lock poisoned");
            match schedule.peek() {
                Some(entry) if entry.0.due_at <= engine.clock.now() => schedule.pop().map(|e| e.0),
                _ => None,
            }
        };
        let Some(entry) = due else { break };
        metrics::gauge!("scheduled_orders").decrement(1.0);

        let order = {
            let mut conn = engine.sot.acquire().await?;
            order_repo::get_order(&mut conn, entry.order_id).await?
        };
        let Some(order) = order else {
            tracing::warn!(order_id = entry.order_id, "Scheduled order no longer exists");
            continue;
        };

        if order.status != OrderStatus::Pending {
            tracing::debug!(
                order_id = order.id,
                status = %order.status,
                "Scheduled order no longer PENDING — skipping"
            );
            continue;
        }

        match engine.execute_order_inline(order).await {
            Ok(_) => executed += 1,
            Err(AppError::InsufficientPosition { .. }) => {
                // Already cancelled with an ERROR event by the engine.
                continue;
            }
            Err(e) => {
                tracing::error!(order_id = entry.order_id, error = %e, "Scheduled execution failed");
                if e.is_fatal() {
                    return Err(e);
                }
            }
        }
    }

    Ok(executed)
}

/// Progress view over orders sitting in the latency queue. Pure read — the
/// numbers come from the injected clock and the persisted latency window.
pub async fn pending_progress(engine: &PaperEngine) -> Result<Vec<PendingProgress>, AppError> {
    let orders = order_repo::list_latency_pending(&engine.sot).await?;
    let now = engine.clock.now();

    let mut view = Vec::with_capacity(orders.len());
    for order in orders {
        let Some(submitted_at) = order.submitted_at else {
            continue;
        };
        let elapsed_ms = (now - submitted_at).num_milliseconds().max(0);
        let remaining_ms = (order.latency_ms - elapsed_ms).max(0);
        let progress_pct = if order.latency_ms > 0 {
            ((elapsed_ms as f64 / order.latency_ms as f64) * 100.0).min(100.0)
        } else {
            100.0
        };

        view.push(PendingProgress {
            order_id: order.id,
            client_order_id: order.client_order_id,
            symbol: order.symbol,
            side: order.side.as_str().to_string(),
            elapsed_ms,
            remaining_ms,
            progress_pct,
        });
    }

    Ok(view)
}

/// Background latency dispatcher: pops due orders in submitted order and
/// executes them inline.
pub async fn run_latency_dispatcher(
    engine: Arc<PaperEngine>,
    poll_interval_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(Duration::from_millis(poll_interval_ms.max(1)));
    tracing::info!(poll_interval_ms, "Latency dispatcher started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("Latency dispatcher shutting down");
                    return;
                }
            }
        }

        match poll_due(&engine).await {
            Ok(0) => {}
            Ok(count) => tracing::debug!(count, "Dispatched due orders"),
            Err(e) => {
                tracing::error!(error = %e, "Latency dispatcher error");
                if e.is_fatal() {
                    tracing::error!("Latency dispatcher paused — operator attention required");
                    return;
                }
            }
        }
    }
}
