use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};

use paperbot::api::ws_types::WsMessage;
use paperbot::coordinator::Coordinator;
use paperbot::db::{SOT_MIGRATOR, TS_MIGRATOR};
use paperbot::errors::AppError;
use paperbot::execution::{
    ExecutionConfig, ExecutionOutcome, FillEvent, ManualClock, PaperEngine, ZeroRng,
};
use paperbot::models::{OrderIntent, PendingOrder, Position};
use paperbot::pricefeed::FixedPriceSource;
use paperbot::pyramid::PyramidManager;
use paperbot::queue::{ApprovalQueue, PendingResolved};
use paperbot::risk::RiskLimits;

/// Full core wiring over in-memory stores with a manual clock, a zero RNG
/// and a scriptable price source. Background tasks are not spawned: tests
/// drive the dispatcher, scanner, timer and coordinator by hand so every
/// scenario is deterministic.
pub struct Harness {
    pub sot: SqlitePool,
    pub ts: SqlitePool,
    pub engine: Arc<PaperEngine>,
    pub queue: Arc<ApprovalQueue>,
    pub pyramid: Arc<PyramidManager>,
    pub coordinator: Arc<Coordinator>,
    pub clock: Arc<ManualClock>,
    pub price: Arc<FixedPriceSource>,
    fill_rx: Mutex<mpsc::Receiver<FillEvent>>,
    resolved_rx: Mutex<broadcast::Receiver<PendingResolved>>,
}

async fn memory_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool")
}

#[allow(dead_code)]
impl Harness {
    pub async fn new(exec: ExecutionConfig) -> Harness {
        let sot = memory_pool().await;
        SOT_MIGRATOR.run(&sot).await.expect("sot migrations");
        let ts = memory_pool().await;
        TS_MIGRATOR.run(&ts).await.expect("ts migrations");

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let price = Arc::new(FixedPriceSource::new());
        let (fill_tx, fill_rx) = mpsc::channel::<FillEvent>(1024);
        let (ws_tx, _) = broadcast::channel::<WsMessage>(64);

        let engine = Arc::new(PaperEngine::new(
            sot.clone(),
            ts.clone(),
            exec,
            clock.clone(),
            Arc::new(ZeroRng),
            price.clone(),
            fill_tx,
        ));

        let queue = Arc::new(ApprovalQueue::new(
            sot.clone(),
            ts.clone(),
            engine.clone(),
            price.clone(),
            RiskLimits::default(),
            clock.clone(),
        ));
        let resolved_rx = queue.subscribe();

        let pyramid = Arc::new(PyramidManager::new(
            sot.clone(),
            queue.clone(),
            engine.clone(),
            price.clone(),
            clock.clone(),
            Decimal::from(2),
        ));

        let coordinator = Arc::new(Coordinator::new(
            sot.clone(),
            ts.clone(),
            pyramid.clone(),
            ws_tx,
        ));

        Harness {
            sot,
            ts,
            engine,
            queue,
            pyramid,
            coordinator,
            clock,
            price,
            fill_rx: Mutex::new(fill_rx),
            resolved_rx: Mutex::new(resolved_rx),
        }
    }

    pub async fn default() -> Harness {
        Harness::new(ExecutionConfig::default()).await
    }

    /// Apply every queued fill event through the coordinator and route every
    /// pending resolution to the pyramid manager, until both channels are
    /// empty. This is what the coordinator task and the resolution listener
    /// do in production, made synchronous for tests.
    pub async fn drain(&self) {
        loop {
            let mut progressed = false;

            while let Ok(event) = self.fill_rx.lock().await.try_recv() {
                self.coordinator
                    .apply_fill(&event)
                    .await
                    .expect("fill fan-out");
                progressed = true;
            }
            while let Ok(event) = self.resolved_rx.lock().await.try_recv() {
                self.pyramid
                    .handle_resolved(&event)
                    .await
                    .expect("resolution hook");
                progressed = true;
            }

            if !progressed {
                break;
            }
        }
    }

    pub async fn queue_market(
        &self,
        symbol: &str,
        side: paperbot::models::Side,
        qty: Decimal,
        price: Decimal,
    ) -> PendingOrder {
        self.queue
            .queue(&OrderIntent::market(symbol, side, qty, price))
            .await
            .expect("queue intent")
    }

    pub async fn approve(
        &self,
        id: i64,
    ) -> Result<(PendingOrder, ExecutionOutcome), AppError> {
        self.queue.approve(id, "tester", None).await
    }

    /// Queue → approve → fan out, the happy path in one call.
    pub async fn execute_market(
        &self,
        symbol: &str,
        side: paperbot::models::Side,
        qty: Decimal,
        price: Decimal,
    ) -> (PendingOrder, ExecutionOutcome) {
        let pending = self.queue_market(symbol, side, qty, price).await;
        let result = self.approve(pending.id).await.expect("approve");
        self.drain().await;
        result
    }

    pub async fn position(&self, symbol: &str) -> Option<Position> {
        paperbot::db::position_repo::get_position(&self.ts, symbol)
            .await
            .expect("position lookup")
    }

    pub async fn realized_pnl(&self, symbol: &str) -> Decimal {
        self.position(symbol)
            .await
            .map(|p| p.realized_pnl)
            .unwrap_or(Decimal::ZERO)
    }
}

/// Assert the §8 store invariants that must hold after every operation.
#[allow(dead_code)]
pub async fn assert_store_invariants(h: &Harness) {
    use paperbot::db::order_repo;
    use paperbot::models::OrderStatus;

    let orders = sqlx::query_as::<_, paperbot::models::Order>("SELECT * FROM orders")
        .fetch_all(&h.sot)
        .await
        .expect("orders");

    for order in &orders {
        let fills = order_repo::list_fills(&h.sot, order.id).await.expect("fills");
        let filled: Decimal = fills.iter().map(|f| f.fill_qty).sum();

        // Invariant 1: remaining + Σ fills = qty.
        assert_eq!(
            order.remaining_qty + filled,
            order.qty,
            "order {} quantity accounting",
            order.id
        );

        // Invariant 2: terminal ⇒ fully filled XOR cancelled.
        if order.status == OrderStatus::Filled {
            assert_eq!(order.remaining_qty, Decimal::ZERO);
        }
        if order.status == OrderStatus::Cancelled {
            assert!(order.remaining_qty > Decimal::ZERO);
        }
    }

    // Invariant 3: positions never negative; flat ⇒ zero average.
    let positions = paperbot::db::position_repo::list_positions(&h.ts)
        .await
        .expect("positions");
    for pos in &positions {
        assert!(pos.quantity >= Decimal::ZERO, "{} qty negative", pos.symbol);
        assert!(pos.avg_entry_price >= Decimal::ZERO);
        if pos.quantity == Decimal::ZERO {
            assert_eq!(pos.avg_entry_price, Decimal::ZERO);
        }
    }

    // Invariant 4: net = gross − fees, exactly.
    let trades = sqlx::query_as::<_, paperbot::models::Trade>("SELECT * FROM trades")
        .fetch_all(&h.ts)
        .await
        .expect("trades");
    for trade in &trades {
        if let Some(pnl) = paperbot::db::trade_repo::get_trade_pnl(&h.ts, trade.id)
            .await
            .expect("trade pnl")
        {
            assert_eq!(pnl.net_pnl, pnl.gross_pnl - pnl.total_fees);
        }
    }
}
