mod common;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use common::Harness;
use paperbot::errors::AppError;
use paperbot::intake::{rows_to_intents, OrderRow};
use paperbot::models::{OrderIntent, OrderSource, PendingStatus, Side};

/// Only one reviewer wins the PENDING → APPROVED race; the loser gets a
/// StaleState it can retry against fresh state.
#[tokio::test]
async fn test_approval_cas_single_winner() {
    let h = Harness::default().await;
    let pending = h.queue_market("BTC", Side::Buy, dec!(1), dec!(100)).await;

    h.approve(pending.id).await.unwrap();
    h.drain().await;

    let err = h.approve(pending.id).await.unwrap_err();
    assert!(matches!(err, AppError::StaleState(_)));

    let err = h.queue.reject(pending.id, "other", "late").await.unwrap_err();
    assert!(matches!(err, AppError::StaleState(_)));

    let row = h.queue.get(pending.id).await.unwrap();
    assert_eq!(row.status, PendingStatus::Executed);
    assert_eq!(row.reviewed_by.as_deref(), Some("tester"));
    assert!(row.reviewed_at.is_some());
}

#[tokio::test]
async fn test_reject_is_terminal() {
    let h = Harness::default().await;
    let pending = h.queue_market("BTC", Side::Buy, dec!(1), dec!(100)).await;

    let rejected = h.queue.reject(pending.id, "tester", "not today").await.unwrap();
    assert_eq!(rejected.status, PendingStatus::Rejected);
    assert_eq!(rejected.note.as_deref(), Some("not today"));

    let err = h.approve(pending.id).await.unwrap_err();
    assert!(matches!(err, AppError::StaleState(_)));
}

/// Queueing the same (source, source_ref) twice returns the same row.
#[tokio::test]
async fn test_queue_idempotent_on_source_ref() {
    let h = Harness::default().await;

    let mut intent = OrderIntent::market("BTC", Side::Buy, dec!(1), dec!(100));
    intent.source = OrderSource::Strategy;
    intent.source_ref = Some("signal:ma-cross:42".into());

    let first = h.queue.queue(&intent).await.unwrap();
    let second = h.queue.queue(&intent).await.unwrap();
    assert_eq!(first.id, second.id);

    let all = h.queue.list(&Default::default()).await.unwrap();
    assert_eq!(all.len(), 1);
}

/// Risk violations annotate the pending order instead of blocking it.
#[tokio::test]
async fn test_risk_violation_populates_note_but_queues() {
    let h = Harness::default().await;

    // 20 × 100 = 2000 notional on 10,000 equity = 20% > 10% max.
    let pending = h.queue_market("BTC", Side::Buy, dec!(20), dec!(100)).await;
    assert_eq!(pending.status, PendingStatus::Pending);
    let note = pending.risk_note.expect("risk note");
    assert!(note.contains("exceeds max"), "note: {note}");

    // Still approvable — the human is the final authority.
    h.approve(pending.id).await.unwrap();
    h.drain().await;
    assert_eq!(h.position("BTC").await.unwrap().quantity, dec!(20));
}

/// Pip-sized intents resolve through the exchange lot metadata.
#[tokio::test]
async fn test_pip_sized_intent_resolves_quantity() {
    let h = Harness::default().await;

    let mut intent = OrderIntent::market("BTC", Side::Buy, Decimal::ZERO, dec!(50000));
    intent.qty = None;
    intent.pips = Some(dec!(5));

    let pending = h.queue.queue(&intent).await.unwrap();
    // 5 pips × 2.0 multiplier × 0.00001 minQty = 0.0001
    assert_eq!(pending.quantity, dec!(0.0001));
    assert_eq!(pending.pips, Some(dec!(5)));
}

#[tokio::test]
async fn test_intent_without_qty_or_pips_is_rejected() {
    let h = Harness::default().await;

    let mut intent = OrderIntent::market("BTC", Side::Buy, Decimal::ZERO, dec!(100));
    intent.qty = None;
    let err = h.queue.queue(&intent).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

/// Spreadsheet rows flow through intake into the queue; bad rows are
/// reported without sinking the batch.
#[tokio::test]
async fn test_spreadsheet_rows_queue_with_row_errors() {
    let h = Harness::default().await;

    let rows = vec![
        OrderRow {
            client_order_id: "001".into(),
            symbol: "BTC".into(),
            side: None,
            qty: Some(dec!(1)),
            price: Some(dec!(50000)),
        },
        OrderRow {
            client_order_id: "002".into(),
            symbol: "ETH".into(),
            side: Some("BÁN".into()),
            qty: Some(dec!(2)),
            price: Some(dec!(3000)),
        },
        OrderRow {
            client_order_id: "003".into(),
            symbol: "SOL".into(),
            side: None,
            qty: None,
            price: Some(dec!(150)),
        },
    ];

    let (intents, errors) = rows_to_intents(&rows);
    assert_eq!(intents.len(), 2);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].row, 4);

    for intent in &intents {
        h.queue.queue(intent).await.unwrap();
    }
    let queued = h.queue.list(&Default::default()).await.unwrap();
    assert_eq!(queued.len(), 2);
    assert!(queued.iter().all(|p| p.source == OrderSource::Spreadsheet));
    assert!(queued.iter().any(|p| p.side == Side::Sell && p.symbol == "ETH"));
}
