mod common;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use common::{assert_store_invariants, Harness};
use paperbot::db::order_repo;
use paperbot::execution::stop_scanner::scan_once;
use paperbot::execution::ExecutionOutcome;
use paperbot::models::{EventType, OrderIntent, OrderStatus, OrderType, Side};

async fn arm_stop(h: &Harness, symbol: &str, qty: Decimal, stop: Decimal) -> i64 {
    let mut intent = OrderIntent::market(symbol, Side::Sell, qty, stop);
    intent.order_type = OrderType::StopLoss;
    intent.stop_price = Some(stop);

    let pending = h.queue.queue(&intent).await.unwrap();
    let (_, outcome) = h.approve(pending.id).await.unwrap();
    assert!(matches!(&outcome, ExecutionOutcome::Armed(_)));
    outcome.order().id
}

/// Stop-loss trigger through a feed outage: the scan skips (and records the
/// skip) while the price is unavailable, then triggers and fills at the
/// observed price, not the stop price.
#[tokio::test]
async fn test_stop_survives_feed_outage_then_triggers() {
    let h = Harness::default().await;

    h.execute_market("BTC", Side::Buy, dec!(5), dec!(100)).await;
    let order_id = arm_stop(&h, "BTC", dec!(5), dec!(90)).await;

    // Three scans with no price, then the feed returns 85.
    h.price
        .script_prices("BTC", vec![None, None, None, Some(dec!(85))])
        .await;

    for _ in 0..3 {
        let triggered = scan_once(&h.engine).await.unwrap();
        assert_eq!(triggered, 0);
    }
    let order = order_repo::fetch_order(&h.sot, order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::New, "stop must stay armed");

    let triggered = scan_once(&h.engine).await.unwrap();
    assert_eq!(triggered, 1);
    h.drain().await;

    let events = order_repo::list_events(&h.sot, order_id).await.unwrap();
    let skipped = events
        .iter()
        .filter(|e| e.event_type == EventType::StopScanSkipped)
        .count();
    assert_eq!(skipped, 3);
    assert!(events.iter().any(|e| e.event_type == EventType::Triggered));
    assert!(events.iter().any(|e| e.event_type == EventType::Fill));

    let fills = order_repo::list_fills(&h.sot, order_id).await.unwrap();
    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].effective_price, dec!(85));
    assert_eq!(fills[0].fill_qty, dec!(5));

    // realized = (85 − 100) × 5 = −75
    assert_eq!(h.realized_pnl("BTC").await, dec!(-75));
    let pos = h.position("BTC").await.unwrap();
    assert_eq!(pos.quantity, Decimal::ZERO);

    assert_store_invariants(&h).await;
}

/// A SELL stop does not trigger while the price sits above the stop.
#[tokio::test]
async fn test_stop_holds_above_stop_price() {
    let h = Harness::default().await;

    h.execute_market("BTC", Side::Buy, dec!(5), dec!(100)).await;
    let order_id = arm_stop(&h, "BTC", dec!(5), dec!(90)).await;

    h.price.set_price("BTC", dec!(95)).await;
    for _ in 0..5 {
        assert_eq!(scan_once(&h.engine).await.unwrap(), 0);
    }
    let order = order_repo::fetch_order(&h.sot, order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::New);

    // Price crosses; next tick fires.
    h.price.set_price("BTC", dec!(90)).await;
    assert_eq!(scan_once(&h.engine).await.unwrap(), 1);
    h.drain().await;

    assert_eq!(h.realized_pnl("BTC").await, dec!(-50));
}

/// BUY stops trigger when the price rises to the stop.
#[tokio::test]
async fn test_buy_stop_triggers_on_rise() {
    let h = Harness::default().await;

    let mut intent = OrderIntent::market("BTC", Side::Buy, dec!(1), dec!(110));
    intent.order_type = OrderType::StopLoss;
    intent.stop_price = Some(dec!(110));
    let pending = h.queue.queue(&intent).await.unwrap();
    let (_, outcome) = h.approve(pending.id).await.unwrap();
    let order_id = outcome.order().id;

    h.price.set_price("BTC", dec!(105)).await;
    assert_eq!(scan_once(&h.engine).await.unwrap(), 0);

    h.price.set_price("BTC", dec!(112)).await;
    assert_eq!(scan_once(&h.engine).await.unwrap(), 1);
    h.drain().await;

    let fills = order_repo::list_fills(&h.sot, order_id).await.unwrap();
    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].effective_price, dec!(112));

    let pos = h.position("BTC").await.unwrap();
    assert_eq!(pos.quantity, dec!(1));
    assert_eq!(pos.avg_entry_price, dec!(112));
}
