use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration};

use super::engine::PaperEngine;
use crate::db::order_repo;
use crate::errors::AppError;
use crate::models::{EventType, Side};

/// One pass over every armed stop-loss order.
///
/// A SELL stop triggers at `price ≤ stop`, a BUY stop at `price ≥ stop`.
/// When the price source has nothing usable the scan appends a
/// STOP_SCAN_SKIPPED event and leaves the stop armed for the next tick.
pub async fn scan_once(engine: &PaperEngine) -> Result<usize, AppError> {
    let armed = order_repo::list_armed_stops(&engine.sot).await?;
    if armed.is_empty() {
        return Ok(0);
    }

    let mut triggered = 0usize;
    for order in armed {
        let Some(stop_price) = order.stop_price else {
            tracing::error!(order_id = order.id, "Stop order without stop price — skipping");
            continue;
        };

        let quote = match engine.price_source.current_price(&order.symbol).await {
            Ok(q) => q,
            Err(e) => {
                let now = engine.clock.now();
                let payload = json!({ "reason": e.to_string() }).to_string();
                let mut conn = engine.sot.acquire().await?;
                order_repo::append_event(
                    &mut conn,
                    order.id,
                    EventType::StopScanSkipped,
                    now,
                    Some(&payload),
                )
                .await?;
                metrics::counter!("stop_scans_skipped_total").increment(1);
                tracing::warn!(
                    order_id = order.id,
                    symbol = %order.symbol,
                    error = %e,
                    "Stop scan skipped — price unavailable"
                );
                continue;
            }
        };

        let should_trigger = match order.side {
            Side::Sell => quote.price <= stop_price,
            Side::Buy => quote.price >= stop_price,
        };
        if !should_trigger {
            continue;
        }

        match engine.trigger_stop(&order, quote.price).await {
            Ok(_) => triggered += 1,
            Err(AppError::InsufficientPosition { .. }) => {
                // Cancelled with an ERROR event; nothing left to scan.
                continue;
            }
            Err(e) => {
                tracing::error!(order_id = order.id, error = %e, "Stop trigger failed");
                if e.is_fatal() {
                    return Err(e);
                }
            }
        }
    }

    Ok(triggered)
}

/// Background stop-loss scanner firing on a fixed timer.
pub async fn run_stop_scanner(
    engine: Arc<PaperEngine>,
    scan_interval_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(Duration::from_millis(scan_interval_ms.max(1)));
    tracing::info!(scan_interval_ms, "Stop-loss scanner started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("Stop-loss scanner shutting down");
                    return;
                }
            }
        }

        match scan_once(&engine).await {
            Ok(0) => {}
            Ok(count) => tracing::info!(count, "Stop orders triggered"),
            Err(e) => {
                tracing::error!(error = %e, "Stop scan failed");
                if e.is_fatal() {
                    tracing::error!("Stop scanner paused — operator attention required");
                    return;
                }
            }
        }
    }
}
