mod common;

use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use common::{assert_store_invariants, Harness};
use paperbot::db::{pending_repo, pyramid_repo};
use paperbot::errors::AppError;
use paperbot::models::pyramid::{SessionStatus, WaveStatus};
use paperbot::models::{OrderSource, PendingOrder};
use paperbot::pyramid::CreateSession;

fn session_params(max_waves: i64, gap_min: i64) -> CreateSession {
    CreateSession {
        symbol: "BTC".into(),
        entry_price: dec!(50000),
        distance_pct: dec!(2),
        max_waves,
        isolated_fund: dec!(10),
        tp_pct: dec!(3),
        timeout_min: 30,
        gap_min,
        pip_multiplier: None,
    }
}

async fn pyramid_pending(h: &Harness, source_ref: &str) -> PendingOrder {
    pending_repo::find_by_source_ref(&h.sot, OrderSource::Pyramid, source_ref)
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("no pending order for {source_ref}"))
}

async fn approve_wave(h: &Harness, session_id: i64, wave_num: i64) {
    let pending = pyramid_pending(h, &format!("pyramid:{session_id}:wave:{wave_num}")).await;
    h.approve(pending.id).await.unwrap();
    h.drain().await;
}

/// Happy path: three waves fill down the ladder, TP fires above the
/// averaged entry, and the session completes with a profit.
#[tokio::test]
async fn test_pyramid_ladder_to_take_profit() {
    let h = Harness::default().await;
    h.price.set_price("BTC", dec!(47000)).await;

    let session = h.pyramid.create(session_params(3, 0)).await.unwrap();
    assert_eq!(session.status, SessionStatus::Pending);
    assert_eq!(session.estimated_cost, dec!(5.8412));
    assert!(!session.fund_flagged);

    let session = h.pyramid.start(session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Active);

    // Wave 0: qty 0.00002 @ 50000.
    let wave0 = pyramid_pending(&h, &format!("pyramid:{}:wave:0", session.id)).await;
    assert_eq!(wave0.quantity, dec!(0.00002));
    assert_eq!(wave0.price, dec!(50000));
    h.approve(wave0.id).await.unwrap();
    h.drain().await;

    // Wave 1 queued automatically: qty 0.00004 @ 49000.
    let wave1 = pyramid_pending(&h, &format!("pyramid:{}:wave:1", session.id)).await;
    assert_eq!(wave1.quantity, dec!(0.00004));
    assert_eq!(wave1.price, dec!(49000));
    h.approve(wave1.id).await.unwrap();
    h.drain().await;

    // Wave 2: qty 0.00006 @ 48020.
    let wave2 = pyramid_pending(&h, &format!("pyramid:{}:wave:2", session.id)).await;
    assert_eq!(wave2.quantity, dec!(0.00006));
    assert_eq!(wave2.price, dec!(48020));
    h.approve(wave2.id).await.unwrap();
    h.drain().await;

    let session = h.pyramid.get(session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.total_filled_qty, dec!(0.00012));
    assert_eq!(session.total_cost, dec!(5.8412));
    // avg ≈ 48676.67, so tp threshold ≈ 50137.
    assert!(session.avg_price > dec!(48676) && session.avg_price < dec!(48677));

    // Price moves above the threshold; TP fires and queues the exit.
    h.price.set_price("BTC", dec!(50500)).await;
    let fired = h.pyramid.check_tp(session.id, None).await.unwrap();
    assert!(fired);
    let session = h.pyramid.get(session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::TpTriggered);

    let tp = pyramid_pending(&h, &format!("pyramid:{}:tp", session.id)).await;
    assert_eq!(tp.quantity, dec!(0.00012));
    h.approve(tp.id).await.unwrap();
    h.drain().await;

    let session = h.pyramid.get(session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);

    // Zero fees: the exit above average nets a profit and flattens BTC.
    let pos = h.position("BTC").await.unwrap();
    assert_eq!(pos.quantity, Decimal::ZERO);
    assert!(pos.realized_pnl > Decimal::ZERO);

    // Every wave ended FILLED; never more than one wave in flight.
    let waves = pyramid_repo::list_waves(&h.sot, session.id).await.unwrap();
    assert_eq!(waves.len(), 3);
    assert!(waves.iter().all(|w| w.status == WaveStatus::Filled));

    assert_store_invariants(&h).await;
}

/// Rejecting a queued wave stops the session with the reviewer's reason.
#[tokio::test]
async fn test_wave_rejection_stops_session() {
    let h = Harness::default().await;

    let session = h.pyramid.create(session_params(3, 0)).await.unwrap();
    h.pyramid.start(session.id).await.unwrap();
    approve_wave(&h, session.id, 0).await;

    let wave1 = pyramid_pending(&h, &format!("pyramid:{}:wave:1", session.id)).await;
    h.queue.reject(wave1.id, "tester", "volatility").await.unwrap();
    h.drain().await;

    let session = h.pyramid.get(session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Stopped);
    assert_eq!(
        session.stop_reason.as_deref(),
        Some("rejected_by_user:volatility")
    );

    let wave = pyramid_repo::get_wave(&h.sot, session.id, 1).await.unwrap().unwrap();
    assert_eq!(wave.status, WaveStatus::Cancelled);

    // No further waves appear.
    assert!(
        pending_repo::find_by_source_ref(
            &h.sot,
            OrderSource::Pyramid,
            &format!("pyramid:{}:wave:2", session.id)
        )
        .await
        .unwrap()
        .is_none()
    );
}

/// A session with no fill activity past its timeout expires on the timer.
#[tokio::test]
async fn test_session_times_out_when_idle() {
    let h = Harness::default().await;

    let session = h.pyramid.create(session_params(1, 0)).await.unwrap();
    h.pyramid.start(session.id).await.unwrap();
    approve_wave(&h, session.id, 0).await;

    // Nothing due yet.
    h.pyramid.timer_tick().await.unwrap();
    assert_eq!(
        h.pyramid.get(session.id).await.unwrap().status,
        SessionStatus::Active
    );

    h.clock.advance(Duration::minutes(31));
    h.pyramid.timer_tick().await.unwrap();

    let session = h.pyramid.get(session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Timeout);
}

/// The wave gap defers the follow-up wave to the timer rather than queueing
/// it straight from the fill.
#[tokio::test]
async fn test_wave_gap_defers_next_wave_to_timer() {
    let h = Harness::default().await;

    let session = h.pyramid.create(session_params(2, 5)).await.unwrap();
    h.pyramid.start(session.id).await.unwrap();
    approve_wave(&h, session.id, 0).await;

    // Gap not elapsed: wave 1 must not be queued yet.
    assert!(pyramid_repo::find_queued_wave(&h.sot, session.id)
        .await
        .unwrap()
        .is_none());

    h.clock.advance(Duration::minutes(6));
    h.pyramid.timer_tick().await.unwrap();

    let queued = pyramid_repo::find_queued_wave(&h.sot, session.id)
        .await
        .unwrap()
        .expect("wave 1 queued by timer");
    assert_eq!(queued.wave_num, 1);
}

/// Session creation is flagged (not blocked) when the ladder estimate
/// exceeds the isolated fund; starting fails only when wave 0 itself does
/// not fit.
#[tokio::test]
async fn test_fund_flagging_and_wave0_gate() {
    let h = Harness::default().await;

    let mut params = session_params(3, 0);
    params.isolated_fund = dec!(2);
    let session = h.pyramid.create(params).await.unwrap();
    assert!(session.fund_flagged);

    // Wave 0 costs 1.0, fund 2 covers it: start succeeds.
    h.pyramid.start(session.id).await.unwrap();

    let mut params = session_params(1, 0);
    params.isolated_fund = dec!(0.5);
    let starved = h.pyramid.create(params).await.unwrap();
    let err = h.pyramid.start(starved.id).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

/// Adjustments apply to unfilled waves only and refuse shrinking below
/// reality.
#[tokio::test]
async fn test_adjust_limits() {
    let h = Harness::default().await;

    let session = h.pyramid.create(session_params(3, 0)).await.unwrap();
    h.pyramid.start(session.id).await.unwrap();
    approve_wave(&h, session.id, 0).await;

    // current_wave is 1 (wave 1 queued); max_waves below 2 is refused.
    let err = h
        .pyramid
        .adjust(
            session.id,
            pyramid_repo::SessionAdjustment {
                max_waves: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let adjusted = h
        .pyramid
        .adjust(
            session.id,
            pyramid_repo::SessionAdjustment {
                tp_pct: Some(dec!(5)),
                max_waves: Some(5),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(adjusted.tp_pct, dec!(5));
    assert_eq!(adjusted.max_waves, 5);
}
