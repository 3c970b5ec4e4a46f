mod common;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use common::{assert_store_invariants, Harness};
use paperbot::db::{order_repo, pending_repo, trade_repo};
use paperbot::errors::AppError;
use paperbot::execution::{ExecutionConfig, ExecutionOutcome};
use paperbot::models::trade::TradeStatus;
use paperbot::models::{EventType, OrderStatus, PendingStatus, Side};

/// Oversell rejection: a SELL beyond the held quantity is cancelled with an
/// ERROR event and leaves the position untouched.
#[tokio::test]
async fn test_oversell_is_cancelled_with_error_event() {
    let h = Harness::default().await;

    h.execute_market("BTC", Side::Buy, dec!(5), dec!(100)).await;
    let pos = h.position("BTC").await.expect("position");
    assert_eq!(pos.quantity, dec!(5));
    assert_eq!(pos.avg_entry_price, dec!(100));

    let sell = h.queue_market("BTC", Side::Sell, dec!(10), dec!(110)).await;
    let err = h.approve(sell.id).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::InsufficientPosition { requested, held, .. }
            if requested == dec!(10) && held == dec!(5)
    ));
    h.drain().await;

    // The handoff completed: the pending order is terminal.
    let pending = h.queue.get(sell.id).await.unwrap();
    assert_eq!(pending.status, PendingStatus::Executed);

    // The order exists, CANCELLED, with an ERROR event and no fills.
    let order = {
        let mut conn = h.sot.acquire().await.unwrap();
        order_repo::get_order_by_client_id(&mut conn, &format!("po-{}", sell.id))
            .await
            .unwrap()
            .expect("order")
    };
    assert_eq!(order.status, OrderStatus::Cancelled);
    let events = order_repo::list_events(&h.sot, order.id).await.unwrap();
    assert!(events.iter().any(|e| e.event_type == EventType::Error));
    assert!(order_repo::list_fills(&h.sot, order.id).await.unwrap().is_empty());

    // Position unchanged.
    let pos = h.position("BTC").await.expect("position");
    assert_eq!(pos.quantity, dec!(5));
    assert_eq!(pos.avg_entry_price, dec!(100));
    assert_eq!(pos.realized_pnl, Decimal::ZERO);

    assert_store_invariants(&h).await;
}

/// Three-step scale-out: realized PnL accumulates per exit and the trade
/// walks OPEN → PARTIAL → CLOSED.
#[tokio::test]
async fn test_scale_out_realizes_pnl_stepwise() {
    let h = Harness::default().await;

    h.execute_market("BTC", Side::Buy, dec!(10), dec!(100)).await;
    let trades = trade_repo::list_trades(&h.ts, &Default::default()).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].status, TradeStatus::Open);

    h.execute_market("BTC", Side::Sell, dec!(3), dec!(110)).await;
    assert_eq!(h.realized_pnl("BTC").await, dec!(30));
    let trade = trade_repo::get_trade(&h.ts, trades[0].id).await.unwrap().unwrap();
    assert_eq!(trade.status, TradeStatus::Partial);

    h.execute_market("BTC", Side::Sell, dec!(4), dec!(120)).await;
    assert_eq!(h.realized_pnl("BTC").await, dec!(110));

    h.execute_market("BTC", Side::Sell, dec!(2), dec!(130)).await;
    assert_eq!(h.realized_pnl("BTC").await, dec!(170));

    h.execute_market("BTC", Side::Sell, dec!(1), dec!(140)).await;
    assert_eq!(h.realized_pnl("BTC").await, dec!(210));

    let pos = h.position("BTC").await.expect("position");
    assert_eq!(pos.quantity, Decimal::ZERO);
    assert_eq!(pos.avg_entry_price, Decimal::ZERO);

    let trade = trade_repo::get_trade(&h.ts, trades[0].id).await.unwrap().unwrap();
    assert_eq!(trade.status, TradeStatus::Closed);
    assert_eq!(trade.current_qty, Decimal::ZERO);
    let pnl = trade_repo::get_trade_pnl(&h.ts, trade.id).await.unwrap().unwrap();
    assert_eq!(pnl.gross_pnl, dec!(210));
    assert_eq!(pnl.net_pnl, dec!(210));

    assert_store_invariants(&h).await;
}

/// PnL round trip: buy and sell the same quantity at the same price with no
/// costs nets to zero and a flat position.
#[tokio::test]
async fn test_flat_round_trip_is_pnl_neutral() {
    let h = Harness::default().await;

    h.execute_market("ETH", Side::Buy, dec!(2), dec!(3000)).await;
    h.execute_market("ETH", Side::Sell, dec!(2), dec!(3000)).await;

    let pos = h.position("ETH").await.expect("position");
    assert_eq!(pos.quantity, Decimal::ZERO);
    assert_eq!(pos.realized_pnl, Decimal::ZERO);

    assert_store_invariants(&h).await;
}

/// Partial fills converge to a fully filled order with exact quantity
/// accounting.
#[tokio::test]
async fn test_partial_fills_converge() {
    let h = Harness::new(ExecutionConfig {
        fill_pct: dec!(0.5),
        ..Default::default()
    })
    .await;

    let (_, outcome) = h.execute_market("BTC", Side::Buy, dec!(4), dec!(100)).await;
    let order = outcome.order();
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.remaining_qty, Decimal::ZERO);

    let fills = order_repo::list_fills(&h.sot, order.id).await.unwrap();
    assert!(fills.len() > 1, "expected multiple partial fills");
    let total: Decimal = fills.iter().map(|f| f.fill_qty).sum();
    assert_eq!(total, dec!(4));
    // First iteration fills half the order.
    assert_eq!(fills[0].fill_qty, dec!(2));

    let events = order_repo::list_events(&h.sot, order.id).await.unwrap();
    assert!(events.iter().any(|e| e.event_type == EventType::PartialFill));
    assert_eq!(
        events.iter().filter(|e| e.event_type == EventType::Fill).count(),
        1
    );

    let pos = h.position("BTC").await.expect("position");
    assert_eq!(pos.quantity, dec!(4));
    assert_eq!(pos.avg_entry_price, dec!(100));

    assert_store_invariants(&h).await;
}

/// Fees accrue on the effective notional; with a zero slippage draw the
/// effective price equals the reference price.
#[tokio::test]
async fn test_fees_and_zero_draw_slippage() {
    let h = Harness::new(ExecutionConfig {
        taker_fee: dec!(0.001),
        slippage_pct: dec!(2.0),
        ..Default::default()
    })
    .await;

    let (_, outcome) = h.execute_market("BTC", Side::Buy, dec!(5), dec!(100)).await;
    let order = outcome.order();

    let fills = order_repo::list_fills(&h.sot, order.id).await.unwrap();
    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].effective_price, dec!(100));
    assert_eq!(fills[0].slippage_amount, Decimal::ZERO);
    assert_eq!(fills[0].fees, dec!(0.5)); // 100 × 5 × 0.001

    let cost = order_repo::get_cost(&h.sot, order.id).await.unwrap().unwrap();
    assert_eq!(cost.total_fees, dec!(0.5));

    // Fees flow into the position's total cost.
    let pos = h.position("BTC").await.expect("position");
    assert_eq!(pos.total_cost, dec!(500.5));
}

/// Executing the same client order id twice yields one order and one set of
/// fills.
#[tokio::test]
async fn test_duplicate_client_order_id_is_idempotent() {
    let h = Harness::default().await;

    let mut intent = paperbot::models::OrderIntent::market("BTC", Side::Buy, dec!(1), dec!(100));
    intent.client_order_id = Some("dup-001".into());
    let first = h.queue.queue(&intent).await.unwrap();
    let (_, outcome1) = h.approve(first.id).await.unwrap();
    h.drain().await;

    // Same client id via a fresh pending row.
    let mut intent2 = intent.clone();
    intent2.note = Some("resubmission".into());
    let second = h.queue.queue(&intent2).await.unwrap();
    assert_ne!(first.id, second.id);
    let (_, outcome2) = h.approve(second.id).await.unwrap();
    h.drain().await;

    assert!(matches!(&outcome2, ExecutionOutcome::AlreadyExecuted(_)));
    assert_eq!(outcome1.order().id, outcome2.order().id);

    let fills = order_repo::list_fills(&h.sot, outcome1.order().id).await.unwrap();
    assert_eq!(fills.len(), 1);

    // Position reflects a single execution.
    let pos = h.position("BTC").await.expect("position");
    assert_eq!(pos.quantity, dec!(1));
}

/// Append-only check: the event rows observed after a busy sequence are a
/// strict superset of those observed earlier, ids and payloads untouched.
#[tokio::test]
async fn test_order_events_are_append_only() {
    let h = Harness::default().await;

    h.execute_market("BTC", Side::Buy, dec!(5), dec!(100)).await;
    let before: Vec<(i64, String)> =
        sqlx::query_as("SELECT id, event_type FROM order_events ORDER BY id")
            .fetch_all(&h.sot)
            .await
            .unwrap();

    h.execute_market("BTC", Side::Sell, dec!(2), dec!(110)).await;
    let after: Vec<(i64, String)> =
        sqlx::query_as("SELECT id, event_type FROM order_events ORDER BY id")
            .fetch_all(&h.sot)
            .await
            .unwrap();

    assert!(after.len() > before.len());
    assert_eq!(&after[..before.len()], &before[..]);
}

/// A queued intent with a known filter shape shows up in the listing.
#[tokio::test]
async fn test_pending_listing_filters() {
    let h = Harness::default().await;

    h.queue_market("BTC", Side::Buy, dec!(1), dec!(100)).await;
    h.queue_market("ETH", Side::Buy, dec!(1), dec!(3000)).await;

    let all = h.queue.list(&Default::default()).await.unwrap();
    assert_eq!(all.len(), 2);

    let btc_only = h
        .queue
        .list(&pending_repo::PendingFilter {
            symbol: Some("BTC".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(btc_only.len(), 1);
    assert_eq!(btc_only[0].symbol, "BTC");

    let pending_only = h
        .queue
        .list(&pending_repo::PendingFilter {
            status: Some(PendingStatus::Pending),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(pending_only.len(), 2);
}
