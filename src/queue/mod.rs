use chrono::NaiveTime;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::db::{pending_repo, position_repo, trade_repo};
use crate::errors::AppError;
use crate::execution::{Clock, ExecutionOutcome, PaperEngine};
use crate::models::{OrderIntent, OrderSource, OrderType, PendingOrder, PendingStatus};
use crate::pricefeed::PriceSource;
use crate::risk::{self, RiskInputs, RiskLimits};
use sqlx::SqlitePool;

/// Resolution notice for a pending order. The pyramid manager subscribes to
/// this channel instead of being called by the queue directly, which keeps
/// the queue free of pyramid internals.
#[derive(Debug, Clone)]
pub enum PendingResolved {
    Queued {
        id: i64,
    },
    Approved {
        id: i64,
        source: OrderSource,
        source_ref: Option<String>,
    },
    Rejected {
        id: i64,
        source: OrderSource,
        source_ref: Option<String>,
        reason: String,
    },
}

/// The mandatory human-approval queue in front of the execution engine.
///
/// State machine: PENDING → (APPROVED → EXECUTED) | REJECTED. The
/// APPROVED → PENDING edge exists only as a rollback after an engine
/// failure, with the error recorded on the row.
pub struct ApprovalQueue {
    sot: SqlitePool,
    ts: SqlitePool,
    engine: Arc<PaperEngine>,
    price_source: Arc<dyn PriceSource>,
    limits: RiskLimits,
    clock: Arc<dyn Clock>,
    resolved_tx: broadcast::Sender<PendingResolved>,
}

impl ApprovalQueue {
    pub fn new(
        sot: SqlitePool,
        ts: SqlitePool,
        engine: Arc<PaperEngine>,
        price_source: Arc<dyn PriceSource>,
        limits: RiskLimits,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (resolved_tx, _) = broadcast::channel(256);
        ApprovalQueue {
            sot,
            ts,
            engine,
            price_source,
            limits,
            clock,
            resolved_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PendingResolved> {
        self.resolved_tx.subscribe()
    }

    /// Queue an intent for human approval.
    ///
    /// Pip-sized intents are resolved to a concrete quantity first, then
    /// risk checks run against a frozen view of positions and today's
    /// realized PnL. Violations never block: they land in `risk_note` for
    /// the approver. Idempotent on `(source, source_ref)`.
    pub async fn queue(&self, intent: &OrderIntent) -> Result<PendingOrder, AppError> {
        if let Some(source_ref) = intent.source_ref.as_deref().filter(|r| !r.is_empty()) {
            if let Some(existing) =
                pending_repo::find_by_source_ref(&self.sot, intent.source, source_ref).await?
            {
                tracing::debug!(
                    pending_id = existing.id,
                    source_ref,
                    "Duplicate source ref — returning existing pending order"
                );
                return Ok(existing);
            }
        }

        let quantity = self.resolve_quantity(intent).await?;
        if quantity <= Decimal::ZERO {
            return Err(AppError::Validation(format!(
                "quantity must be positive, got {quantity}"
            )));
        }
        if intent.order_type == OrderType::StopLoss && intent.stop_price.is_none() {
            return Err(AppError::Validation(
                "stop-loss intent requires a stop price".into(),
            ));
        }

        let risk_note = self.compute_risk_note(intent, quantity).await?;

        let now = self.clock.now();
        let new = pending_repo::NewPending {
            client_order_id: intent.client_order_id.clone(),
            symbol: intent.symbol.clone(),
            side: intent.side,
            order_type: intent.order_type,
            quantity,
            pips: intent.pips,
            price: intent.price,
            stop_price: intent.stop_price,
            source: intent.source,
            source_ref: intent.source_ref.clone(),
            strategy_name: intent.strategy_name.clone(),
            confidence: intent.confidence,
            risk_note: risk_note.clone(),
            note: intent.note.clone(),
            created_at: now,
        };

        let mut conn = self.sot.acquire().await?;
        let pending = match pending_repo::insert_pending(&mut conn, &new).await {
            Ok(p) => p,
            Err(AppError::Store(e)) if is_unique_violation(&e) => {
                // Concurrent queue with the same source ref won the insert.
                drop(conn);
                let source_ref = intent.source_ref.as_deref().unwrap_or_default();
                return pending_repo::find_by_source_ref(&self.sot, intent.source, source_ref)
                    .await?
                    .ok_or(AppError::Store(e));
            }
            Err(e) => return Err(e),
        };

        metrics::counter!("pending_queued_total").increment(1);
        tracing::info!(
            pending_id = pending.id,
            symbol = %pending.symbol,
            side = %pending.side,
            quantity = %pending.quantity,
            price = %pending.price,
            source = %pending.source,
            risk_note = ?risk_note,
            "Order queued for approval"
        );

        let _ = self.resolved_tx.send(PendingResolved::Queued { id: pending.id });
        Ok(pending)
    }

    async fn resolve_quantity(&self, intent: &OrderIntent) -> Result<Decimal, AppError> {
        match (intent.qty, intent.pips) {
            (Some(qty), _) => Ok(qty),
            (None, Some(pips)) => {
                let info = self
                    .price_source
                    .exchange_info(&intent.symbol)
                    .await
                    .map_err(|e| AppError::PriceSourceUnavailable(e.to_string()))?;
                Ok(risk::resolve_qty(&info, pips, self.limits.pip_multiplier))
            }
            (None, None) => Err(AppError::Validation(
                "intent needs either a quantity or a pip count".into(),
            )),
        }
    }

    async fn compute_risk_note(
        &self,
        intent: &OrderIntent,
        quantity: Decimal,
    ) -> Result<Option<String>, AppError> {
        let info = self
            .price_source
            .exchange_info(&intent.symbol)
            .await
            .unwrap_or_else(|_| crate::pricefeed::ExchangeInfo::default_for(&intent.symbol));

        let symbol_exposure = match position_repo::get_position(&self.ts, &intent.symbol).await? {
            Some(pos) => pos.quantity * pos.avg_entry_price,
            None => Decimal::ZERO,
        };

        let now = self.clock.now();
        let day_start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        let daily_realized_pnl =
            trade_repo::realized_pnl_between(&self.ts, day_start, now).await?;

        let inputs = RiskInputs {
            symbol_exposure,
            daily_realized_pnl,
        };
        let violations = risk::run_checks(&inputs, &info, quantity, intent.price, &self.limits);

        Ok(if violations.is_empty() {
            None
        } else {
            Some(violations.join("; "))
        })
    }

    /// Approve a pending order and hand it to the execution engine.
    ///
    /// The PENDING → APPROVED move is a CAS; concurrent approvers race and
    /// exactly one wins. On a store failure during handoff the row rolls
    /// back to PENDING with the error attached and the attempt counted.
    /// An `InsufficientPosition` outcome is a completed handoff: the order
    /// exists, CANCELLED, and the error is surfaced to the approver.
    pub async fn approve(
        &self,
        id: i64,
        reviewed_by: &str,
        note: Option<&str>,
    ) -> Result<(PendingOrder, ExecutionOutcome), AppError> {
        let now = self.clock.now();
        let pending =
            pending_repo::mark_reviewed(&self.sot, id, PendingStatus::Approved, reviewed_by, note, now)
                .await?;

        match self.engine.execute_pending(&pending).await {
            Ok(outcome) => {
                pending_repo::mark_executed(&self.sot, id).await?;
                metrics::counter!("pending_approved_total").increment(1);
                tracing::info!(
                    pending_id = id,
                    order_id = outcome.order().id,
                    reviewed_by,
                    "Pending order approved and executed"
                );
                let _ = self.resolved_tx.send(PendingResolved::Approved {
                    id,
                    source: pending.source,
                    source_ref: pending.source_ref.clone(),
                });
                let pending = pending_repo::get_pending(&self.sot, id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("pending order {id}")))?;
                Ok((pending, outcome))
            }
            Err(e @ AppError::InsufficientPosition { .. }) => {
                // The engine recorded the cancelled order; the handoff is
                // complete even though execution failed.
                pending_repo::mark_executed(&self.sot, id).await?;
                metrics::counter!("pending_approved_total").increment(1);
                tracing::warn!(pending_id = id, error = %e, "Approved order rejected by engine");
                Err(e)
            }
            Err(e) => {
                let note = format!("execution failed: {e}");
                pending_repo::revert_to_pending(&self.sot, id, &note).await?;
                tracing::error!(pending_id = id, error = %e, "Engine handoff failed — rolled back to PENDING");
                Err(e)
            }
        }
    }

    /// Reject a pending order. Pyramid-sourced rejections are broadcast so
    /// the session manager can stop the session.
    pub async fn reject(
        &self,
        id: i64,
        reviewed_by: &str,
        reason: &str,
    ) -> Result<PendingOrder, AppError> {
        let now = self.clock.now();
        let pending = pending_repo::mark_reviewed(
            &self.sot,
            id,
            PendingStatus::Rejected,
            reviewed_by,
            Some(reason),
            now,
        )
        .await?;

        metrics::counter!("pending_rejected_total").increment(1);
        tracing::info!(pending_id = id, reviewed_by, reason, "Pending order rejected");

        if pending.source == OrderSource::Pyramid {
            let _ = self.resolved_tx.send(PendingResolved::Rejected {
                id,
                source: pending.source,
                source_ref: pending.source_ref.clone(),
                reason: reason.to_string(),
            });
        }

        Ok(pending)
    }

    /// Internal cancellation of a still-pending row (e.g. a pyramid wave
    /// withdrawn by its own session). Does not broadcast: the caller already
    /// knows. Already-resolved rows are left alone.
    pub async fn withdraw(&self, id: i64, reason: &str) -> Result<(), AppError> {
        let now = self.clock.now();
        match pending_repo::mark_reviewed(
            &self.sot,
            id,
            PendingStatus::Rejected,
            "system",
            Some(reason),
            now,
        )
        .await
        {
            Ok(_) => {
                tracing::info!(pending_id = id, reason, "Pending order withdrawn");
                Ok(())
            }
            Err(AppError::StaleState(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn get(&self, id: i64) -> Result<PendingOrder, AppError> {
        pending_repo::get_pending(&self.sot, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("pending order {id}")))
    }

    pub async fn list(
        &self,
        filter: &pending_repo::PendingFilter,
    ) -> Result<Vec<PendingOrder>, AppError> {
        pending_repo::list_pending(&self.sot, filter).await
    }

    pub async fn count_pending(&self) -> Result<i64, AppError> {
        pending_repo::count_pending(&self.sot).await
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed"))
}

pub use self::listener::run_pending_resolved_listener;

mod listener {
    use super::PendingResolved;
    use crate::pyramid::PyramidManager;
    use std::sync::Arc;
    use tokio::sync::{broadcast, watch};

    /// Routes pending-order resolutions to the pyramid manager. Runs as its
    /// own task so the queue never calls into pyramid code directly.
    pub async fn run_pending_resolved_listener(
        manager: Arc<PyramidManager>,
        mut rx: broadcast::Receiver<PendingResolved>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!("Pending-resolution listener started");
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Ok(event) => {
                        if let Err(e) = manager.handle_resolved(&event).await {
                            tracing::error!(error = %e, "Pyramid resolution hook failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Pending-resolution listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("Pending-resolution listener shutting down");
                        return;
                    }
                }
            }
        }
    }
}
