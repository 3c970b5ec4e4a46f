use chrono::Duration;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::SqlitePool;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::dispatcher::ScheduledOrder;
use super::{Clock, ExecutionConfig, FillEvent, RandomSource};
use crate::db::{order_repo, position_repo};
use crate::errors::AppError;
use crate::models::{EventType, Order, OrderStatus, OrderType, PendingOrder, Side};
use crate::money::{pct, round_to_step};
use crate::pricefeed::{ExchangeInfo, PriceSource};

/// Safety bound on the partial-fill loop; a well-formed config converges in
/// a handful of iterations.
const MAX_FILL_ITERATIONS: usize = 1000;

/// Result of handing an approved pending order to the engine.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// Filled inline; the order is terminal.
    Executed(Order),
    /// Parked in the latency queue; the dispatcher will execute it.
    Scheduled(Order),
    /// Stop-loss accepted and armed; the scanner owns it from here.
    Armed(Order),
    /// An order with this client id already exists — idempotent no-op.
    AlreadyExecuted(Order),
}

impl ExecutionOutcome {
    pub fn order(&self) -> &Order {
        match self {
            ExecutionOutcome::Executed(o)
            | ExecutionOutcome::Scheduled(o)
            | ExecutionOutcome::Armed(o)
            | ExecutionOutcome::AlreadyExecuted(o) => o,
        }
    }
}

/// Deterministic paper-fill engine.
///
/// Owns all writes to the SOT store. Fill pricing, partial fills, stop
/// triggers and latency scheduling all flow through the injected `Clock`
/// and `RandomSource`, so a seeded run replays identically.
pub struct PaperEngine {
    pub(crate) sot: SqlitePool,
    pub(crate) ts: SqlitePool,
    pub(crate) config: ExecutionConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) rng: Arc<dyn RandomSource>,
    pub(crate) price_source: Arc<dyn PriceSource>,
    pub(crate) fill_tx: mpsc::Sender<FillEvent>,
    pub(crate) schedule: Mutex<BinaryHeap<Reverse<ScheduledOrder>>>,
    pub(crate) schedule_seq: AtomicU64,
}

impl PaperEngine {
    pub fn new(
        sot: SqlitePool,
        ts: SqlitePool,
        config: ExecutionConfig,
        clock: Arc<dyn Clock>,
        rng: Arc<dyn RandomSource>,
        price_source: Arc<dyn PriceSource>,
        fill_tx: mpsc::Sender<FillEvent>,
    ) -> Self {
        PaperEngine {
            sot,
            ts,
            config,
            clock,
            rng,
            price_source,
            fill_tx,
            schedule: Mutex::new(BinaryHeap::new()),
            schedule_seq: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Execute an approved pending order.
    ///
    /// Appends the order and its CREATED event atomically, then either fills
    /// inline, parks it in the latency queue, or arms it as a stop-loss.
    /// Duplicate client order ids return the existing order unchanged.
    pub async fn execute_pending(
        &self,
        pending: &PendingOrder,
    ) -> Result<ExecutionOutcome, AppError> {
        let client_order_id = pending.effective_client_order_id();

        {
            let mut conn = self.sot.acquire().await?;
            if let Some(existing) =
                order_repo::get_order_by_client_id(&mut conn, &client_order_id).await?
            {
                tracing::info!(
                    order_id = existing.id,
                    client_order_id,
                    "Duplicate client order id — returning existing order"
                );
                return Ok(ExecutionOutcome::AlreadyExecuted(existing));
            }
        }

        let now = self.clock.now();
        let new_order = order_repo::NewOrder {
            client_order_id,
            pending_id: Some(pending.id),
            symbol: pending.symbol.clone(),
            side: pending.side,
            order_type: pending.order_type,
            qty: pending.quantity,
            price: pending.price,
            stop_price: pending.stop_price,
            is_maker: false,
            latency_ms: 0,
            maker_fee_rate: self.config.maker_fee,
            taker_fee_rate: self.config.taker_fee,
            source: pending.source,
            source_ref: pending.source_ref.clone(),
            strategy_name: pending.strategy_name.clone(),
            created_at: now,
        };

        let mut tx = self.sot.begin().await?;
        let order = order_repo::insert_order(&mut tx, &new_order).await?;
        order_repo::append_event(&mut tx, order.id, EventType::Created, now, None).await?;

        // Stop-loss orders stay NEW until the scanner sees the trigger price.
        if order.order_type == OrderType::StopLoss {
            let payload = json!({ "stop_price": order.stop_price }).to_string();
            order_repo::append_event(&mut tx, order.id, EventType::Submitted, now, Some(&payload))
                .await?;
            tx.commit().await?;
            tracing::info!(
                order_id = order.id,
                symbol = %order.symbol,
                stop_price = ?order.stop_price,
                "Stop-loss order armed"
            );
            return Ok(ExecutionOutcome::Armed(order));
        }

        if self.config.latency_ms > 0 {
            let jitter = if self.config.random_latency_ms > 0 {
                (self.rng.next_fraction() * Decimal::from(self.config.random_latency_ms))
                    .to_i64()
                    .unwrap_or(0)
            } else {
                0
            };
            let total_latency = self.config.latency_ms + jitter;

            order_repo::mark_submitted(&mut tx, order.id, total_latency, now).await?;
            let payload = json!({ "latency_ms": total_latency }).to_string();
            order_repo::append_event(&mut tx, order.id, EventType::Submitted, now, Some(&payload))
                .await?;
            tx.commit().await?;

            let due_at = now + Duration::milliseconds(total_latency);
            self.push_schedule(order.id, due_at);
            metrics::gauge!("scheduled_orders").increment(1.0);

            let mut conn = self.sot.acquire().await?;
            let scheduled = order_repo::get_order(&mut conn, order.id)
                .await?
                .ok_or_else(|| AppError::Internal(format!("order {} vanished", order.id)))?;
            tracing::info!(
                order_id = scheduled.id,
                latency_ms = total_latency,
                "Order parked in latency queue"
            );
            return Ok(ExecutionOutcome::Scheduled(scheduled));
        }

        tx.commit().await?;

        let filled = self.execute_order_inline(order).await?;
        Ok(ExecutionOutcome::Executed(filled))
    }

    /// Fill an order to completion at its accepted order price. MARKET and
    /// LIMIT orders both settle here; triggered stops go through
    /// `execute_at_price` with the observed market price instead.
    pub(crate) async fn execute_order_inline(&self, order: Order) -> Result<Order, AppError> {
        self.fill_loop(order, None).await
    }

    /// Fill a triggered stop at the observed market price.
    pub(crate) async fn execute_at_price(
        &self,
        order: Order,
        price: Decimal,
    ) -> Result<Order, AppError> {
        self.fill_loop(order, Some(price)).await
    }

    async fn fill_loop(
        &self,
        mut order: Order,
        reference_override: Option<Decimal>,
    ) -> Result<Order, AppError> {
        let reference_price = reference_override.unwrap_or(order.price);

        // SELL validation is atomic with the fill decision: the whole
        // remaining quantity must be covered before anything mutates.
        let mut position_avg = Decimal::ZERO;
        if order.side == Side::Sell {
            let held = match position_repo::get_position(&self.ts, &order.symbol).await? {
                Some(pos) => {
                    position_avg = pos.avg_entry_price;
                    pos.quantity
                }
                None => Decimal::ZERO,
            };
            if held < order.remaining_qty {
                return self.cancel_insufficient(order, held).await;
            }
        }

        let info = self.lot_info(&order.symbol).await;
        let fee_rate = order.fee_rate();
        let liquidity = order.liquidity();

        let mut iterations = 0usize;
        while order.remaining_qty > Decimal::ZERO {
            iterations += 1;
            if iterations > MAX_FILL_ITERATIONS {
                return Err(AppError::Internal(format!(
                    "fill loop for order {} did not converge",
                    order.id
                )));
            }

            let mut fill_qty = round_to_step(order.remaining_qty * self.config.fill_pct, info.step_size);
            if fill_qty <= Decimal::ZERO || fill_qty > order.remaining_qty {
                fill_qty = order.remaining_qty;
            }

            let draw = self.rng.next_fraction();
            let (effective_price, fees, slippage) = fill_costs(
                reference_price,
                fill_qty,
                order.side,
                fee_rate,
                self.config.slippage_pct,
                draw,
            );

            let now = self.clock.now();
            let new_remaining = order.remaining_qty - fill_qty;
            let terminal = new_remaining == Decimal::ZERO;
            let next_status = if terminal {
                OrderStatus::Filled
            } else {
                OrderStatus::PartiallyFilled
            };

            if !order.status.can_transition(next_status) {
                return Err(AppError::Internal(format!(
                    "illegal order status transition {} -> {} for order {}",
                    order.status, next_status, order.id
                )));
            }

            // A fill, its cost row and its event are one transaction.
            let mut tx = self.sot.begin().await?;
            let fill = order_repo::append_fill(
                &mut tx,
                &order_repo::NewFill {
                    order_id: order.id,
                    fill_qty,
                    fill_price: reference_price,
                    effective_price,
                    fees,
                    slippage_amount: slippage,
                    liquidity,
                    filled_at: now,
                },
            )
            .await?;

            order_repo::apply_fill_progress(
                &mut tx,
                order.id,
                new_remaining,
                next_status,
                terminal.then_some(now),
                now,
            )
            .await?;

            let event_type = if terminal {
                EventType::Fill
            } else {
                EventType::PartialFill
            };
            let payload = json!({
                "fill_qty": fill_qty,
                "effective_price": effective_price,
                "remaining_qty": new_remaining,
            })
            .to_string();
            order_repo::append_event(&mut tx, order.id, event_type, now, Some(&payload)).await?;

            order_repo::upsert_cost(&mut tx, order.id, fees, fee_rate, liquidity).await?;

            if order.side == Side::Sell {
                let realized = (effective_price - position_avg) * fill_qty - fees;
                let cost_basis = fill_qty * position_avg;
                order_repo::upsert_pnl(&mut tx, order.id, realized, cost_basis, now).await?;
            }

            tx.commit().await?;

            metrics::counter!("fills_total").increment(1);
            tracing::info!(
                order_id = order.id,
                symbol = %order.symbol,
                side = %order.side,
                fill_qty = %fill_qty,
                effective_price = %effective_price,
                fees = %fees,
                remaining = %new_remaining,
                "Fill appended"
            );

            let event = FillEvent {
                order_id: order.id,
                fill_id: fill.id,
                symbol: order.symbol.clone(),
                side: order.side,
                source: order.source,
                source_ref: order.source_ref.clone(),
                strategy_name: order.strategy_name.clone(),
                fill_qty,
                fill_price: reference_price,
                effective_price,
                fees,
                liquidity,
                filled_at: now,
                order_filled: terminal,
            };
            if self.fill_tx.send(event).await.is_err() {
                tracing::warn!(order_id = order.id, "Fill channel closed; event dropped");
            }

            order.remaining_qty = new_remaining;
            order.status = next_status;
            if terminal {
                order.executed_at = Some(now);
            }
        }

        metrics::counter!("orders_executed_total").increment(1);

        let mut conn = self.sot.acquire().await?;
        order_repo::get_order(&mut conn, order.id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("order {} vanished", order.id)))
    }

    async fn cancel_insufficient(
        &self,
        order: Order,
        held: Decimal,
    ) -> Result<Order, AppError> {
        let now = self.clock.now();
        let payload = json!({
            "error": "insufficient position",
            "requested": order.remaining_qty,
            "held": held,
        })
        .to_string();

        let mut tx = self.sot.begin().await?;
        order_repo::transition_status(&mut tx, order.id, order.status, OrderStatus::Cancelled, now)
            .await?;
        order_repo::append_event(&mut tx, order.id, EventType::Error, now, Some(&payload)).await?;
        order_repo::append_event(&mut tx, order.id, EventType::Cancelled, now, None).await?;
        tx.commit().await?;

        metrics::counter!("orders_cancelled_total").increment(1);
        tracing::warn!(
            order_id = order.id,
            symbol = %order.symbol,
            requested = %order.remaining_qty,
            held = %held,
            "SELL exceeds position — order cancelled"
        );

        Err(AppError::InsufficientPosition {
            symbol: order.symbol,
            requested: order.remaining_qty,
            held,
        })
    }

    /// Cancel a non-terminal order. The latency dispatcher re-checks status
    /// before firing, so cancelling a PENDING order wins the race.
    pub async fn cancel_order(&self, order_id: i64) -> Result<Order, AppError> {
        let order = {
            let mut conn = self.sot.acquire().await?;
            order_repo::get_order(&mut conn, order_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("order {order_id}")))?
        };

        if order.status.is_terminal() {
            return Err(AppError::StaleState(format!(
                "order {order_id} is already {}",
                order.status
            )));
        }

        let now = self.clock.now();
        let mut tx = self.sot.begin().await?;
        order_repo::transition_status(&mut tx, order.id, order.status, OrderStatus::Cancelled, now)
            .await?;
        order_repo::append_event(&mut tx, order.id, EventType::Cancelled, now, None).await?;
        tx.commit().await?;

        metrics::counter!("orders_cancelled_total").increment(1);
        tracing::info!(order_id, "Order cancelled");

        let mut conn = self.sot.acquire().await?;
        order_repo::get_order(&mut conn, order_id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("order {order_id} vanished")))
    }

    /// NEW → TRIGGERED, then execute at the observed price (not the stop
    /// price). Called by the stop scanner.
    pub async fn trigger_stop(&self, order: &Order, current_price: Decimal) -> Result<Order, AppError> {
        let now = self.clock.now();
        let payload = json!({
            "stop_price": order.stop_price,
            "trigger_price": current_price,
        })
        .to_string();

        let mut tx = self.sot.begin().await?;
        order_repo::transition_status(&mut tx, order.id, OrderStatus::New, OrderStatus::Triggered, now)
            .await?;
        order_repo::append_event(&mut tx, order.id, EventType::Triggered, now, Some(&payload))
            .await?;
        tx.commit().await?;

        metrics::counter!("stop_triggers_total").increment(1);
        tracing::info!(
            order_id = order.id,
            symbol = %order.symbol,
            stop_price = ?order.stop_price,
            trigger_price = %current_price,
            "Stop-loss triggered"
        );

        let mut conn = self.sot.acquire().await?;
        let triggered = order_repo::get_order(&mut conn, order.id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("order {} vanished", order.id)))?;
        drop(conn);

        self.execute_at_price(triggered, current_price).await
    }

    pub(crate) fn push_schedule(&self, order_id: i64, due_at: chrono::DateTime<chrono::Utc>) {
        let seq = self.schedule_seq.fetch_add(1, Ordering::Relaxed);
        self.schedule
            .lock()
            .expect("schedule lock poisoned")
            .push(Reverse(ScheduledOrder {
                due_at,
                seq,
                order_id,
            }));
    }

    async fn lot_info(&self, symbol: &str) -> ExchangeInfo {
        match self.price_source.exchange_info(symbol).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(symbol, error = %e, "Exchange info unavailable — using defaults");
                ExchangeInfo::default_for(symbol)
            }
        }
    }
}

/// Pure fill-pricing math.
///
/// `draw` is the uniform `[0, 1)` sample; slippage is `draw × slippage_pct`
/// of the reference price, signed against the taker (up for BUY, down for
/// SELL). Fees accrue on the post-slippage notional.
pub(crate) fn fill_costs(
    reference_price: Decimal,
    fill_qty: Decimal,
    side: Side,
    fee_rate: Decimal,
    slippage_pct: Decimal,
    draw: Decimal,
) -> (Decimal, Decimal, Decimal) {
    let magnitude = reference_price * pct(slippage_pct) * draw;
    let slippage = match side {
        Side::Buy => magnitude,
        Side::Sell => -magnitude,
    };
    let effective_price = reference_price + slippage;
    let fees = effective_price * fill_qty * fee_rate;
    (effective_price, fees, slippage)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fill_costs_zero_draw_is_exact() {
        let (effective, fees, slippage) =
            fill_costs(dec!(100), dec!(5), Side::Buy, dec!(0.001), dec!(1.0), Decimal::ZERO);
        assert_eq!(effective, dec!(100));
        assert_eq!(slippage, Decimal::ZERO);
        assert_eq!(fees, dec!(0.5)); // 100 × 5 × 0.001
    }

    #[test]
    fn test_fill_costs_buy_slips_up_sell_slips_down() {
        let (buy_eff, _, buy_slip) =
            fill_costs(dec!(100), dec!(1), Side::Buy, Decimal::ZERO, dec!(2.0), dec!(0.5));
        // 0.5 × 2% × 100 = 1.0 upward
        assert_eq!(buy_slip, dec!(1.0));
        assert_eq!(buy_eff, dec!(101.0));

        let (sell_eff, _, sell_slip) =
            fill_costs(dec!(100), dec!(1), Side::Sell, Decimal::ZERO, dec!(2.0), dec!(0.5));
        assert_eq!(sell_slip, dec!(-1.0));
        assert_eq!(sell_eff, dec!(99.0));
    }

    #[test]
    fn test_fill_costs_fees_on_slipped_notional() {
        let (effective, fees, _) =
            fill_costs(dec!(100), dec!(2), Side::Buy, dec!(0.001), dec!(1.0), dec!(1.0));
        // Fully adverse draw: effective 101, fees on 101 × 2.
        assert_eq!(effective, dec!(101.0));
        assert_eq!(fees, dec!(0.2020));
    }
}
