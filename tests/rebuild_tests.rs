mod common;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use common::Harness;
use paperbot::db::{position_repo, trade_repo};
use paperbot::models::Side;

async fn run_scale_out(h: &Harness) {
    h.execute_market("BTC", Side::Buy, dec!(10), dec!(100)).await;
    h.execute_market("BTC", Side::Sell, dec!(3), dec!(110)).await;
    h.execute_market("BTC", Side::Sell, dec!(4), dec!(120)).await;
    h.execute_market("ETH", Side::Buy, dec!(2), dec!(3000)).await;
    h.execute_market("BTC", Side::Sell, dec!(3), dec!(130)).await;
}

/// Rebuilding the TS store from SOT facts reproduces positions, trades and
/// PnL exactly.
#[tokio::test]
async fn test_rebuild_reproduces_ts_state() {
    let h = Harness::default().await;
    run_scale_out(&h).await;

    let positions_before = position_repo::list_positions(&h.ts).await.unwrap();
    let trades_before = trade_repo::list_trades(&h.ts, &Default::default()).await.unwrap();
    let total_before = trade_repo::total_realized_pnl(&h.ts).await.unwrap();
    assert!(!positions_before.is_empty());
    assert!(!trades_before.is_empty());

    let replayed = h.coordinator.rebuild_from_sot().await.unwrap();
    assert_eq!(replayed, 5);

    let positions_after = position_repo::list_positions(&h.ts).await.unwrap();
    assert_eq!(positions_before.len(), positions_after.len());
    for (before, after) in positions_before.iter().zip(&positions_after) {
        assert_eq!(before.symbol, after.symbol);
        assert_eq!(before.quantity, after.quantity);
        assert_eq!(before.avg_entry_price, after.avg_entry_price);
        assert_eq!(before.total_cost, after.total_cost);
        assert_eq!(before.realized_pnl, after.realized_pnl);
    }

    let trades_after = trade_repo::list_trades(&h.ts, &Default::default()).await.unwrap();
    assert_eq!(trades_before.len(), trades_after.len());
    // Row ids restart after the wipe; compare the content.
    let mut before_sorted = trades_before.clone();
    before_sorted.sort_by(|a, b| (&a.symbol, a.entry_time).cmp(&(&b.symbol, b.entry_time)));
    let mut after_sorted = trades_after.clone();
    after_sorted.sort_by(|a, b| (&a.symbol, a.entry_time).cmp(&(&b.symbol, b.entry_time)));
    for (before, after) in before_sorted.iter().zip(&after_sorted) {
        assert_eq!(before.symbol, after.symbol);
        assert_eq!(before.side, after.side);
        assert_eq!(before.status, after.status);
        assert_eq!(before.entry_qty, after.entry_qty);
        assert_eq!(before.entry_price, after.entry_price);
        assert_eq!(before.exit_qty, after.exit_qty);
        assert_eq!(before.exit_price, after.exit_price);
        assert_eq!(before.current_qty, after.current_qty);
    }

    let total_after = trade_repo::total_realized_pnl(&h.ts).await.unwrap();
    assert_eq!(total_before, total_after);
}

/// Deterministic replay: the same intent sequence against a fixed clock and
/// RNG produces identical SOT facts in two independent runs.
#[tokio::test]
async fn test_replay_is_deterministic() {
    let a = Harness::default().await;
    let b = Harness::default().await;
    run_scale_out(&a).await;
    run_scale_out(&b).await;

    let fills_a: Vec<(i64, i64, String, String, String, String)> = sqlx::query_as(
        "SELECT id, order_id, fill_qty, effective_price, fees, filled_at FROM order_fills ORDER BY id",
    )
    .fetch_all(&a.sot)
    .await
    .unwrap();
    let fills_b: Vec<(i64, i64, String, String, String, String)> = sqlx::query_as(
        "SELECT id, order_id, fill_qty, effective_price, fees, filled_at FROM order_fills ORDER BY id",
    )
    .fetch_all(&b.sot)
    .await
    .unwrap();
    assert_eq!(fills_a, fills_b);

    let orders_a: Vec<(i64, String, String, String, String)> = sqlx::query_as(
        "SELECT id, client_order_id, symbol, status, remaining_qty FROM orders ORDER BY id",
    )
    .fetch_all(&a.sot)
    .await
    .unwrap();
    let orders_b: Vec<(i64, String, String, String, String)> = sqlx::query_as(
        "SELECT id, client_order_id, symbol, status, remaining_qty FROM orders ORDER BY id",
    )
    .fetch_all(&b.sot)
    .await
    .unwrap();
    assert_eq!(orders_a, orders_b);

    let events_a: Vec<(i64, i64, String)> =
        sqlx::query_as("SELECT id, order_id, event_type FROM order_events ORDER BY id")
            .fetch_all(&a.sot)
            .await
            .unwrap();
    let events_b: Vec<(i64, i64, String)> =
        sqlx::query_as("SELECT id, order_id, event_type FROM order_events ORDER BY id")
            .fetch_all(&b.sot)
            .await
            .unwrap();
    assert_eq!(events_a, events_b);
}

/// An empty SOT rebuilds to an empty TS.
#[tokio::test]
async fn test_rebuild_of_empty_store() {
    let h = Harness::default().await;
    let replayed = h.coordinator.rebuild_from_sot().await.unwrap();
    assert_eq!(replayed, 0);
    assert!(position_repo::list_positions(&h.ts).await.unwrap().is_empty());
    assert_eq!(
        trade_repo::total_realized_pnl(&h.ts).await.unwrap(),
        Decimal::ZERO
    );
}
