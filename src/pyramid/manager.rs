use chrono::Duration;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::math::{self, PyramidRef};
use crate::db::{order_repo, pyramid_repo};
use crate::errors::AppError;
use crate::execution::{Clock, FillEvent, PaperEngine};
use crate::models::pyramid::{SessionStatus, WaveStatus};
use crate::models::{OrderIntent, OrderSource, OrderType, PyramidSession, PyramidWave, Side};
use crate::pricefeed::{ExchangeInfo, PriceSource};
use crate::queue::{ApprovalQueue, PendingResolved};

/// Parameters for creating a pyramid session.
#[derive(Debug, Clone)]
pub struct CreateSession {
    pub symbol: String,
    pub entry_price: Decimal,
    pub distance_pct: Decimal,
    pub max_waves: i64,
    pub isolated_fund: Decimal,
    pub tp_pct: Decimal,
    pub timeout_min: i64,
    pub gap_min: i64,
    /// Defaults to the configured pip multiplier when absent.
    pub pip_multiplier: Option<Decimal>,
}

/// Dashboard projection of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: PyramidSession,
    pub waves: Vec<PyramidWave>,
    pub filled_waves: usize,
    pub used_fund: Decimal,
    pub remaining_fund: Decimal,
    pub estimated_tp_price: Decimal,
    pub current_price: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
}

/// Wave-based DCA session manager.
///
/// Sessions and waves live in the SOT database; every order a session
/// produces goes through the approval queue like any other intent. All
/// state transitions are serialized behind one lock, which is what makes
/// the "at most one queued wave per session" invariant cheap to keep.
pub struct PyramidManager {
    sot: SqlitePool,
    queue: Arc<ApprovalQueue>,
    engine: Arc<PaperEngine>,
    price_source: Arc<dyn PriceSource>,
    clock: Arc<dyn Clock>,
    default_pip_multiplier: Decimal,
    lock: Mutex<()>,
}

impl PyramidManager {
    pub fn new(
        sot: SqlitePool,
        queue: Arc<ApprovalQueue>,
        engine: Arc<PaperEngine>,
        price_source: Arc<dyn PriceSource>,
        clock: Arc<dyn Clock>,
        default_pip_multiplier: Decimal,
    ) -> Self {
        PyramidManager {
            sot,
            queue,
            engine,
            price_source,
            clock,
            default_pip_multiplier,
            lock: Mutex::new(()),
        }
    }

    // -----------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------

    /// Create a session (status PENDING). The estimated ladder cost is
    /// computed up front; exceeding the isolated fund flags the session but
    /// does not block creation.
    pub async fn create(&self, params: CreateSession) -> Result<PyramidSession, AppError> {
        validate_params(&params)?;

        let pip_multiplier = params.pip_multiplier.unwrap_or(self.default_pip_multiplier);
        let info = self.lot_info(&params.symbol).await;
        let estimated_cost = math::estimate_total_cost(
            params.entry_price,
            params.distance_pct,
            pip_multiplier,
            params.max_waves,
            &info,
        );
        let fund_flagged = estimated_cost > params.isolated_fund;
        if fund_flagged {
            tracing::warn!(
                symbol = %params.symbol,
                estimated_cost = %estimated_cost,
                isolated_fund = %params.isolated_fund,
                "Pyramid ladder estimate exceeds isolated fund"
            );
        }

        let session = pyramid_repo::insert_session(
            &self.sot,
            &pyramid_repo::NewSession {
                symbol: params.symbol.clone(),
                entry_price: params.entry_price,
                distance_pct: params.distance_pct,
                max_waves: params.max_waves,
                isolated_fund: params.isolated_fund,
                tp_pct: params.tp_pct,
                timeout_min: params.timeout_min,
                gap_min: params.gap_min,
                pip_multiplier,
                estimated_cost,
                fund_flagged,
                created_at: self.clock.now(),
            },
        )
        .await?;

        tracing::info!(
            session_id = session.id,
            symbol = %session.symbol,
            entry_price = %session.entry_price,
            max_waves = session.max_waves,
            isolated_fund = %session.isolated_fund,
            "Pyramid session created"
        );
        Ok(session)
    }

    /// PENDING → ACTIVE; queues wave 0 as a BUY LIMIT through the approval
    /// queue.
    pub async fn start(&self, id: i64) -> Result<PyramidSession, AppError> {
        let _guard = self.lock.lock().await;

        let session = self.load(id).await?;
        if session.status != SessionStatus::Pending {
            return Err(AppError::StaleState(format!(
                "pyramid session {id} is {}, not PENDING",
                session.status
            )));
        }

        let info = self.lot_info(&session.symbol).await;
        let wave0 = math::wave_target(
            session.entry_price,
            session.distance_pct,
            session.pip_multiplier,
            0,
            &info,
        );
        let wave0_cost = wave0.qty * wave0.price;
        if wave0_cost > session.isolated_fund {
            return Err(AppError::Validation(format!(
                "isolated fund {} cannot cover wave 0 cost {}",
                session.isolated_fund, wave0_cost
            )));
        }

        pyramid_repo::mark_started(&self.sot, id, self.clock.now()).await?;
        metrics::gauge!("active_pyramid_sessions").increment(1.0);

        let session = self.load(id).await?;
        self.enqueue_wave(&session, 0, &info).await?;

        tracing::info!(
            session_id = id,
            symbol = %session.symbol,
            "Pyramid session started — wave 0 queued"
        );
        self.load(id).await
    }

    /// ACTIVE → STOPPED; withdraws the outstanding queued wave, if any.
    pub async fn stop(&self, id: i64, reason: &str) -> Result<PyramidSession, AppError> {
        let _guard = self.lock.lock().await;
        self.stop_inner(id, reason).await
    }

    async fn stop_inner(&self, id: i64, reason: &str) -> Result<PyramidSession, AppError> {
        pyramid_repo::transition_status(
            &self.sot,
            id,
            SessionStatus::Active,
            SessionStatus::Stopped,
            Some(reason),
        )
        .await?;
        metrics::gauge!("active_pyramid_sessions").decrement(1.0);

        self.cancel_outstanding_wave(id, reason).await?;

        tracing::info!(session_id = id, reason, "Pyramid session stopped");
        self.load(id).await
    }

    /// Reshape an existing session. Only PENDING and ACTIVE sessions can be
    /// adjusted, and only unfilled waves are affected — filled waves are
    /// facts.
    pub async fn adjust(
        &self,
        id: i64,
        adjustment: pyramid_repo::SessionAdjustment,
    ) -> Result<PyramidSession, AppError> {
        let _guard = self.lock.lock().await;

        let session = self.load(id).await?;
        if !matches!(session.status, SessionStatus::Pending | SessionStatus::Active) {
            return Err(AppError::StaleState(format!(
                "pyramid session {id} is {}; only PENDING or ACTIVE sessions adjust",
                session.status
            )));
        }

        if let Some(max_waves) = adjustment.max_waves {
            if max_waves < session.current_wave + 1 {
                return Err(AppError::Validation(format!(
                    "max_waves {max_waves} below already-reached wave {}",
                    session.current_wave
                )));
            }
        }
        if let Some(fund) = adjustment.isolated_fund {
            if fund < session.total_cost {
                return Err(AppError::Validation(format!(
                    "isolated_fund {fund} below already-spent {}",
                    session.total_cost
                )));
            }
        }
        if let Some(distance) = adjustment.distance_pct {
            if distance <= Decimal::ZERO || distance >= Decimal::ONE_HUNDRED {
                return Err(AppError::Validation(format!(
                    "distance_pct must be in (0, 100), got {distance}"
                )));
            }
        }
        if let Some(tp) = adjustment.tp_pct {
            if tp <= Decimal::ZERO {
                return Err(AppError::Validation(format!(
                    "tp_pct must be positive, got {tp}"
                )));
            }
        }

        pyramid_repo::apply_adjustment(&self.sot, id, &adjustment).await?;
        tracing::info!(session_id = id, ?adjustment, "Pyramid session adjusted");
        self.load(id).await
    }

    /// Delete a non-active session and its waves.
    pub async fn delete(&self, id: i64) -> Result<(), AppError> {
        let _guard = self.lock.lock().await;
        let session = self.load(id).await?;
        if session.status == SessionStatus::Active {
            return Err(AppError::StaleState(format!(
                "pyramid session {id} is ACTIVE; stop it before deleting"
            )));
        }
        pyramid_repo::delete_session(&self.sot, id).await?;
        tracing::info!(session_id = id, "Pyramid session deleted");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Take profit
    // -----------------------------------------------------------------

    /// Check the TP condition against a supplied (or fetched) price and
    /// trigger the exit when met. Returns whether TP fired.
    pub async fn check_tp(&self, id: i64, price: Option<Decimal>) -> Result<bool, AppError> {
        let _guard = self.lock.lock().await;
        self.check_tp_inner(id, price).await
    }

    async fn check_tp_inner(&self, id: i64, price: Option<Decimal>) -> Result<bool, AppError> {
        let session = self.load(id).await?;
        if session.status != SessionStatus::Active || session.total_filled_qty <= Decimal::ZERO {
            return Ok(false);
        }

        let current_price = match price {
            Some(p) => p,
            None => match self.price_source.current_price(&session.symbol).await {
                Ok(quote) => quote.price,
                Err(e) => {
                    tracing::debug!(session_id = id, error = %e, "TP check skipped — no price");
                    return Ok(false);
                }
            },
        };
        if current_price < session.tp_threshold() {
            return Ok(false);
        }

        pyramid_repo::transition_status(
            &self.sot,
            id,
            SessionStatus::Active,
            SessionStatus::TpTriggered,
            None,
        )
        .await?;
        self.cancel_outstanding_wave(id, "take profit triggered").await?;

        let intent = OrderIntent {
            client_order_id: None,
            symbol: session.symbol.clone(),
            side: Side::Sell,
            order_type: OrderType::Market,
            qty: Some(session.total_filled_qty),
            pips: None,
            price: current_price,
            stop_price: None,
            source: OrderSource::Pyramid,
            source_ref: Some(math::tp_source_ref(id)),
            strategy_name: Some(format!("Pyramid_{}", session.symbol)),
            confidence: None,
            note: Some(format!(
                "Pyramid TP: sell {} @ market (avg={})",
                session.total_filled_qty,
                session.avg_price.round_dp(4)
            )),
        };
        let pending = self.queue.queue(&intent).await?;

        tracing::info!(
            session_id = id,
            pending_id = pending.id,
            current_price = %current_price,
            threshold = %session.tp_threshold(),
            qty = %session.total_filled_qty,
            "Pyramid take profit triggered"
        );
        Ok(true)
    }

    // -----------------------------------------------------------------
    // Hooks (driven by the coordinator / queue listener)
    // -----------------------------------------------------------------

    /// Fill hook: route a pyramid fill to its session. Wave fills advance
    /// the ladder; the TP fill completes the session.
    pub async fn handle_fill(&self, event: &FillEvent) -> Result<(), AppError> {
        let Some(parsed) = event.source_ref.as_deref().and_then(math::parse_source_ref) else {
            return Ok(());
        };
        let _guard = self.lock.lock().await;

        match parsed {
            PyramidRef::Wave {
                session_id,
                wave_num,
            } => self.apply_wave_fill(session_id, wave_num, event).await,
            PyramidRef::TakeProfit { session_id } => {
                if !event.order_filled {
                    return Ok(());
                }
                pyramid_repo::transition_status(
                    &self.sot,
                    session_id,
                    SessionStatus::TpTriggered,
                    SessionStatus::Completed,
                    None,
                )
                .await?;
                tracing::info!(session_id, "Pyramid session completed — TP exit filled");
                Ok(())
            }
        }
    }

    async fn apply_wave_fill(
        &self,
        session_id: i64,
        wave_num: i64,
        event: &FillEvent,
    ) -> Result<(), AppError> {
        let session = self.load(session_id).await?;
        if session.status != SessionStatus::Active {
            tracing::warn!(
                session_id,
                wave_num,
                status = %session.status,
                "Wave fill for inactive session — recording totals only"
            );
        }

        let info = self.lot_info(&session.symbol).await;
        let wave = pyramid_repo::get_wave(&self.sot, session_id, wave_num)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("wave {wave_num} of session {session_id}"))
            })?;

        let wave = pyramid_repo::record_wave_fill(
            &self.sot,
            &wave,
            event.fill_qty,
            event.effective_price,
            info.step_size,
            event.filled_at,
        )
        .await?;

        let total_filled_qty = session.total_filled_qty + event.fill_qty;
        let total_cost =
            session.total_cost + event.fill_qty * event.effective_price + event.fees;
        let avg_price = if total_filled_qty > Decimal::ZERO {
            total_cost / total_filled_qty
        } else {
            Decimal::ZERO
        };
        pyramid_repo::update_fill_state(
            &self.sot,
            session_id,
            total_filled_qty,
            total_cost,
            avg_price,
            event.filled_at,
        )
        .await?;

        if wave.status == WaveStatus::Filled {
            metrics::counter!("pyramid_waves_filled_total").increment(1);
        }
        tracing::info!(
            session_id,
            wave_num,
            fill_qty = %event.fill_qty,
            avg_price = %avg_price.round_dp(4),
            "Pyramid wave fill applied"
        );

        if session.status != SessionStatus::Active {
            return Ok(());
        }

        if wave.status == WaveStatus::Filled {
            let session = self.load(session_id).await?;
            self.maybe_queue_next_wave(&session, &info).await?;
        }

        // TP check rides on every fill with the freshest price available.
        self.check_tp_inner(session_id, None).await?;
        Ok(())
    }

    /// Queue the next wave when the ladder, the wave gap and the isolated
    /// fund all allow it. Deferred cases are retried by the pyramid timer.
    async fn maybe_queue_next_wave(
        &self,
        session: &PyramidSession,
        info: &ExchangeInfo,
    ) -> Result<(), AppError> {
        if session.status != SessionStatus::Active {
            return Ok(());
        }
        if pyramid_repo::find_queued_wave(&self.sot, session.id).await?.is_some() {
            return Ok(());
        }

        let next_num = session.current_wave + 1;
        if next_num >= session.max_waves {
            tracing::debug!(
                session_id = session.id,
                "All {} waves queued — waiting on fills or TP",
                session.max_waves
            );
            return Ok(());
        }

        if session.gap_min > 0 {
            if let Some(queued_at) = session.last_wave_queued_at {
                let gap = Duration::minutes(session.gap_min);
                if self.clock.now() - queued_at < gap {
                    tracing::debug!(
                        session_id = session.id,
                        next_wave = next_num,
                        "Wave gap not yet elapsed — deferring to timer"
                    );
                    return Ok(());
                }
            }
        }

        let target = math::wave_target(
            session.entry_price,
            session.distance_pct,
            session.pip_multiplier,
            next_num,
            info,
        );
        let next_cost = target.qty * target.price;
        if next_cost > session.remaining_fund() {
            tracing::warn!(
                session_id = session.id,
                next_wave = next_num,
                next_cost = %next_cost,
                remaining_fund = %session.remaining_fund(),
                "Isolated fund cannot cover next wave — deferring"
            );
            return Ok(());
        }

        self.enqueue_wave(session, next_num, info).await
    }

    async fn enqueue_wave(
        &self,
        session: &PyramidSession,
        wave_num: i64,
        info: &ExchangeInfo,
    ) -> Result<(), AppError> {
        let target = math::wave_target(
            session.entry_price,
            session.distance_pct,
            session.pip_multiplier,
            wave_num,
            info,
        );

        let intent = OrderIntent {
            client_order_id: None,
            symbol: session.symbol.clone(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            qty: Some(target.qty),
            pips: None,
            price: target.price,
            stop_price: None,
            source: OrderSource::Pyramid,
            source_ref: Some(math::wave_source_ref(session.id, wave_num)),
            strategy_name: Some(format!("Pyramid_{}", session.symbol)),
            confidence: None,
            note: Some(format!(
                "Pyramid wave {wave_num}/{}",
                session.max_waves
            )),
        };
        let pending = self.queue.queue(&intent).await?;

        pyramid_repo::insert_wave(
            &self.sot,
            session.id,
            wave_num,
            target.qty,
            target.price,
            Some(pending.id),
        )
        .await?;
        pyramid_repo::update_wave_cursor(&self.sot, session.id, wave_num, self.clock.now())
            .await?;

        tracing::info!(
            session_id = session.id,
            wave_num,
            target_qty = %target.qty,
            target_price = %target.price,
            pending_id = pending.id,
            "Pyramid wave queued"
        );
        Ok(())
    }

    /// Resolution hook from the approval queue: a rejected pyramid order
    /// stops its session with the reviewer's reason attached.
    pub async fn handle_resolved(&self, event: &PendingResolved) -> Result<(), AppError> {
        let PendingResolved::Rejected {
            source_ref, reason, ..
        } = event
        else {
            return Ok(());
        };
        let Some(parsed) = source_ref.as_deref().and_then(math::parse_source_ref) else {
            return Ok(());
        };

        let _guard = self.lock.lock().await;
        let session_id = parsed.session_id();

        if let PyramidRef::Wave { wave_num, .. } = parsed {
            if let Some(wave) = pyramid_repo::get_wave(&self.sot, session_id, wave_num).await? {
                pyramid_repo::cancel_wave(&self.sot, wave.id).await?;
            }
        }

        let stop_reason = format!("rejected_by_user:{reason}");
        match self.stop_inner(session_id, &stop_reason).await {
            Ok(_) => {}
            // Already stopped/completed; rejection arrived late.
            Err(AppError::StaleState(_)) => {}
            Err(e) => return Err(e),
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Timer
    // -----------------------------------------------------------------

    /// One pass of the background pyramid timer: expire timed-out sessions,
    /// queue deferred waves whose gap has elapsed, and re-check TP.
    pub async fn timer_tick(&self) -> Result<(), AppError> {
        let _guard = self.lock.lock().await;
        let sessions = pyramid_repo::list_active_sessions(&self.sot).await?;

        for session in sessions {
            let queued = pyramid_repo::find_queued_wave(&self.sot, session.id).await?;

            if queued.is_none() {
                if let Some(last_fill) = session.last_fill_at {
                    let idle = self.clock.now() - last_fill;
                    if idle > Duration::minutes(session.timeout_min) {
                        pyramid_repo::transition_status(
                            &self.sot,
                            session.id,
                            SessionStatus::Active,
                            SessionStatus::Timeout,
                            Some("timeout"),
                        )
                        .await?;
                        metrics::gauge!("active_pyramid_sessions").decrement(1.0);
                        self.cancel_outstanding_wave(session.id, "timeout").await?;
                        tracing::warn!(
                            session_id = session.id,
                            idle_min = idle.num_minutes(),
                            timeout_min = session.timeout_min,
                            "Pyramid session timed out"
                        );
                        continue;
                    }
                }

                let info = self.lot_info(&session.symbol).await;
                self.maybe_queue_next_wave(&session, &info).await?;
            }

            self.check_tp_inner(session.id, None).await?;
        }

        Ok(())
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    pub async fn get(&self, id: i64) -> Result<PyramidSession, AppError> {
        self.load(id).await
    }

    pub async fn detail(&self, id: i64) -> Result<SessionDetail, AppError> {
        let session = self.load(id).await?;
        let waves = pyramid_repo::list_waves(&self.sot, id).await?;
        let filled_waves = waves
            .iter()
            .filter(|w| w.status == WaveStatus::Filled)
            .count();

        let current_price = self
            .price_source
            .current_price(&session.symbol)
            .await
            .ok()
            .map(|q| q.price);
        let unrealized_pnl = current_price.and_then(|price| {
            (session.total_filled_qty > Decimal::ZERO)
                .then(|| session.total_filled_qty * price - session.total_cost)
        });

        Ok(SessionDetail {
            used_fund: session.total_cost,
            remaining_fund: session.remaining_fund(),
            estimated_tp_price: session.tp_threshold(),
            filled_waves,
            current_price,
            unrealized_pnl,
            session,
            waves,
        })
    }

    pub async fn summary(
        &self,
        status: Option<SessionStatus>,
        symbol: Option<&str>,
    ) -> Result<Vec<SessionDetail>, AppError> {
        let sessions = pyramid_repo::list_sessions(&self.sot, status, symbol).await?;
        let mut details = Vec::with_capacity(sessions.len());
        for session in sessions {
            details.push(self.detail(session.id).await?);
        }
        Ok(details)
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    async fn load(&self, id: i64) -> Result<PyramidSession, AppError> {
        pyramid_repo::get_session(&self.sot, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("pyramid session {id}")))
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

    /// Withdraw the queued wave of a session: cancel the wave row, reject
    /// its pending order if still reviewable, and cancel the scheduled
    /// order if the approval already went through.
    async fn cancel_outstanding_wave(&self, session_id: i64, reason: &str) -> Result<(), AppError> {
        let Some(wave) = pyramid_repo::find_queued_wave(&self.sot, session_id).await? else {
            return Ok(());
        };
        pyramid_repo::cancel_wave(&self.sot, wave.id).await?;

        if let Some(pending_id) = wave.pending_order_id {
            self.queue.withdraw(pending_id, reason).await?;

            // If the wave's order is already in the latency queue, cancel it
            // there too; the dispatcher re-checks status before firing.
            let client_order_id = format!("po-{pending_id}");
            let mut conn = self.sot.acquire().await?;
            if let Some(order) =
                order_repo::get_order_by_client_id(&mut conn, &client_order_id).await?
            {
                drop(conn);
                if !order.status.is_terminal() {
                    if let Err(e) = self.engine.cancel_order(order.id).await {
                        tracing::warn!(order_id = order.id, error = %e, "Wave order cancel failed");
                    }
                }
            }
        }

        tracing::info!(session_id, wave_num = wave.wave_num, reason, "Queued wave withdrawn");
        Ok(())
    }
}

fn validate_params(params: &CreateSession) -> Result<(), AppError> {
    if params.symbol.trim().is_empty() {
        return Err(AppError::Validation("symbol is required".into()));
    }
    if params.entry_price <= Decimal::ZERO {
        return Err(AppError::Validation(format!(
            "entry price must be positive, got {}",
            params.entry_price
        )));
    }
    if params.distance_pct <= Decimal::ZERO || params.distance_pct >= Decimal::ONE_HUNDRED {
        return Err(AppError::Validation(format!(
            "distance_pct must be in (0, 100), got {}",
            params.distance_pct
        )));
    }
    if params.max_waves < 1 {
        return Err(AppError::Validation(format!(
            "max_waves must be at least 1, got {}",
            params.max_waves
        )));
    }
    if params.isolated_fund <= Decimal::ZERO {
        return Err(AppError::Validation(format!(
            "isolated fund must be positive, got {}",
            params.isolated_fund
        )));
    }
    if params.tp_pct <= Decimal::ZERO {
        return Err(AppError::Validation(format!(
            "tp_pct must be positive, got {}",
            params.tp_pct
        )));
    }
    if params.timeout_min <= 0 {
        return Err(AppError::Validation(format!(
            "timeout_min must be positive, got {}",
            params.timeout_min
        )));
    }
    if params.gap_min < 0 {
        return Err(AppError::Validation(format!(
            "gap_min must be non-negative, got {}",
            params.gap_min
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
