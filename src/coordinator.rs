use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};

use crate::api::ws_types::WsMessage;
use crate::db::{order_repo, position_repo, trade_repo};
use crate::errors::AppError;
use crate::execution::FillEvent;
use crate::models::Side;
use crate::pyramid::PyramidManager;

/// Attempts on one fill before the coordinator trips its circuit breaker.
const CIRCUIT_BREAK_ATTEMPTS: u32 = 3;

/// Single-owner fan-out of fill events.
///
/// For each fill, in order: project into the TS store (position, trade,
/// trade PnL — one transaction), dispatch to the pyramid manager when the
/// originating order is pyramid-sourced, then broadcast to the dashboard
/// channel best-effort. Fills for one order arrive in append order because
/// the engine emits them synchronously and this task is the only consumer.
pub struct Coordinator {
    sot: SqlitePool,
    ts: SqlitePool,
    pyramid: Arc<PyramidManager>,
    ws_tx: broadcast::Sender<WsMessage>,
}

impl Coordinator {
    pub fn new(
        sot: SqlitePool,
        ts: SqlitePool,
        pyramid: Arc<PyramidManager>,
        ws_tx: broadcast::Sender<WsMessage>,
    ) -> Self {
        Coordinator {
            sot,
            ts,
            pyramid,
            ws_tx,
        }
    }

    /// Apply one fill end to end.
    pub async fn apply_fill(&self, event: &FillEvent) -> Result<(), AppError> {
        self.project_fill(event).await?;

        if event
            .source_ref
            .as_deref()
            .is_some_and(|r| r.starts_with("pyramid:"))
        {
            if let Err(e) = self.pyramid.handle_fill(event).await {
                if e.is_fatal() {
                    return Err(e);
                }
                tracing::error!(
                    order_id = event.order_id,
                    error = %e,
                    "Pyramid fill hook failed — continuing"
                );
            }
        }

        let _ = self.ws_tx.send(WsMessage::FillUpdate(event.clone()));
        Ok(())
    }

    /// Project a fill into the TS store. All mutations for one fill commit
    /// atomically; the TS store stays rebuildable from SOT facts.
    async fn project_fill(&self, event: &FillEvent) -> Result<(), AppError> {
        let mut tx = self.ts.begin().await?;

        match event.side {
            Side::Buy => {
                position_repo::apply_buy(
                    &mut tx,
                    &event.symbol,
                    event.fill_qty,
                    event.effective_price,
                    event.fees,
                    event.filled_at,
                )
                .await?;

                match trade_repo::find_open_trade(&mut tx, &event.symbol).await? {
                    Some(trade) => {
                        trade_repo::add_entry_fill(
                            &mut tx,
                            &trade,
                            event.fill_qty,
                            event.effective_price,
                            event.fees,
                            event.filled_at,
                        )
                        .await?;
                    }
                    None => {
                        trade_repo::open_trade(
                            &mut tx,
                            event.order_id,
                            &event.symbol,
                            Side::Buy,
                            event.fill_qty,
                            event.effective_price,
                            event.fees,
                            event.filled_at,
                            event.strategy_name.as_deref(),
                        )
                        .await?;
                    }
                }
            }
            Side::Sell => {
                position_repo::apply_sell(
                    &mut tx,
                    &event.symbol,
                    event.fill_qty,
                    event.effective_price,
                    event.fees,
                    event.filled_at,
                )
                .await?;

                match trade_repo::find_open_trade(&mut tx, &event.symbol).await? {
                    Some(trade) => {
                        trade_repo::apply_exit_fill(
                            &mut tx,
                            &trade,
                            event.order_id,
                            event.fill_qty,
                            event.effective_price,
                            event.fees,
                            event.filled_at,
                        )
                        .await?;
                    }
                    None => {
                        tracing::warn!(
                            order_id = event.order_id,
                            symbol = %event.symbol,
                            "SELL fill without an open trade — position updated, trade skipped"
                        );
                    }
                }
            }
        }

        tx.commit().await?;

        let open = position_repo::list_positions(&self.ts)
            .await?
            .into_iter()
            .filter(|p| p.quantity > rust_decimal::Decimal::ZERO)
            .count();
        metrics::gauge!("open_positions").set(open as f64);

        Ok(())
    }

    /// Rebuild the TS store from SOT facts: wipe the derived tables and
    /// replay every fill in append order through the same projection.
    pub async fn rebuild_from_sot(&self) -> Result<usize, AppError> {
        {
            let mut tx = self.ts.begin().await?;
            trade_repo::clear_all(&mut tx).await?;
            position_repo::clear_all(&mut tx).await?;
            tx.commit().await?;
        }

        let fills = order_repo::list_all_fills(&self.sot).await?;
        let mut replayed = 0usize;

        for fill in &fills {
            let order = {
                let mut conn = self.sot.acquire().await?;
                order_repo::get_order(&mut conn, fill.order_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::Internal(format!("fill {} references missing order", fill.id))
                    })?
            };

            let event = FillEvent {
                order_id: order.id,
                fill_id: fill.id,
                symbol: order.symbol.clone(),
                side: order.side,
                source: order.source,
                source_ref: order.source_ref.clone(),
                strategy_name: order.strategy_name.clone(),
                fill_qty: fill.fill_qty,
                fill_price: fill.fill_price,
                effective_price: fill.effective_price,
                fees: fill.fees,
                liquidity: fill.liquidity,
                filled_at: fill.filled_at,
                order_filled: false,
            };
            self.project_fill(&event).await?;
            replayed += 1;
        }

        tracing::info!(replayed, "TS store rebuilt from SOT");
        Ok(replayed)
    }

    /// Sequential consumer loop. Non-fatal errors are logged and the fill
    /// skipped; a fill that keeps failing fatally trips the circuit breaker
    /// and parks the coordinator for operator attention.
    pub async fn run(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<FillEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!("Coordinator started");

        loop {
            let event = tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => {
                        tracing::info!("Fill channel closed — coordinator exiting");
                        return;
                    }
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("Coordinator shutting down");
                        return;
                    }
                    continue;
                }
            };

            let mut attempts = 0u32;
            loop {
                match self.apply_fill(&event).await {
                    Ok(()) => break,
                    Err(e) if !e.is_fatal() => {
                        metrics::counter!("coordinator_errors_total").increment(1);
                        tracing::error!(
                            order_id = event.order_id,
                            fill_id = event.fill_id,
                            error = %e,
                            "Fill projection failed — skipping fill"
                        );
                        break;
                    }
                    Err(e) => {
                        attempts += 1;
                        metrics::counter!("coordinator_errors_total").increment(1);
                        tracing::error!(
                            order_id = event.order_id,
                            fill_id = event.fill_id,
                            attempt = attempts,
                            error = %e,
                            "Fatal error applying fill"
                        );
                        if attempts >= CIRCUIT_BREAK_ATTEMPTS {
                            tracing::error!(
                                fill_id = event.fill_id,
                                "Coordinator circuit breaker tripped — operator attention required"
                            );
                            return;
                        }
                    }
                }
            }
        }
    }
}
