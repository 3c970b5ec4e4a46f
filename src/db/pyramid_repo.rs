use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::SqlitePool;

use crate::errors::AppError;
use crate::models::pyramid::{SessionStatus, WaveStatus};
use crate::models::{PyramidSession, PyramidWave};

/// Arguments for creating a pyramid session row.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub symbol: String,
    pub entry_price: Decimal,
    pub distance_pct: Decimal,
    pub max_waves: i64,
    pub isolated_fund: Decimal,
    pub tp_pct: Decimal,
    pub timeout_min: i64,
    pub gap_min: i64,
    pub pip_multiplier: Decimal,
    pub estimated_cost: Decimal,
    pub fund_flagged: bool,
    pub created_at: DateTime<Utc>,
}

pub async fn insert_session(pool: &SqlitePool, new: &NewSession) -> Result<PyramidSession, AppError> {
    let session = sqlx::query_as::<_, PyramidSession>(
        r#"
        INSERT INTO pyramid_sessions (
            symbol, entry_price, distance_pct, max_waves, isolated_fund,
            tp_pct, timeout_min, gap_min, pip_multiplier, status,
            current_wave, total_filled_qty, total_cost, avg_price,
            estimated_cost, fund_flagged, created_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'PENDING', 0, '0', '0', '0', ?10, ?11, ?12)
        RETURNING *
        "#,
    )
    .bind(&new.symbol)
    .bind(new.entry_price.to_string())
    .bind(new.distance_pct.to_string())
    .bind(new.max_waves)
    .bind(new.isolated_fund.to_string())
    .bind(new.tp_pct.to_string())
    .bind(new.timeout_min)
    .bind(new.gap_min)
    .bind(new.pip_multiplier.to_string())
    .bind(new.estimated_cost.to_string())
    .bind(new.fund_flagged)
    .bind(new.created_at)
    .fetch_one(pool)
    .await?;
    Ok(session)
}

pub async fn get_session(pool: &SqlitePool, id: i64) -> Result<Option<PyramidSession>, AppError> {
    let session = sqlx::query_as::<_, PyramidSession>("SELECT * FROM pyramid_sessions WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(session)
}

pub async fn list_sessions(
    pool: &SqlitePool,
    status: Option<SessionStatus>,
    symbol: Option<&str>,
) -> Result<Vec<PyramidSession>, AppError> {
    let sessions = sqlx::query_as::<_, PyramidSession>(
        r#"
        SELECT * FROM pyramid_sessions
        WHERE (?1 IS NULL OR status = ?1)
          AND (?2 IS NULL OR symbol = ?2)
        ORDER BY created_at DESC, id DESC
        "#,
    )
    .bind(status.map(|s| s.as_str()))
    .bind(symbol)
    .fetch_all(pool)
    .await?;
    Ok(sessions)
}

pub async fn list_active_sessions(pool: &SqlitePool) -> Result<Vec<PyramidSession>, AppError> {
    list_sessions(pool, Some(SessionStatus::Active), None).await
}

/// Guarded status transition; returns `StaleState` if the session is no
/// longer in `from`.
pub async fn transition_status(
    pool: &SqlitePool,
    id: i64,
    from: SessionStatus,
    to: SessionStatus,
    reason: Option<&str>,
) -> Result<(), AppError> {
    let result = sqlx::query(
        r#"
        UPDATE pyramid_sessions
        SET status = ?1, stop_reason = COALESCE(?2, stop_reason)
        WHERE id = ?3 AND status = ?4
        "#,
    )
    .bind(to.as_str())
    .bind(reason)
    .bind(id)
    .bind(from.as_str())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::StaleState(format!(
            "pyramid session {id} is not {from}"
        )));
    }
    Ok(())
}

pub async fn mark_started(pool: &SqlitePool, id: i64, now: DateTime<Utc>) -> Result<(), AppError> {
    let result = sqlx::query(
        "UPDATE pyramid_sessions SET status = 'ACTIVE', started_at = ?1 WHERE id = ?2 AND status = 'PENDING'",
    )
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::StaleState(format!(
            "pyramid session {id} is not PENDING"
        )));
    }
    Ok(())
}

/// Persist fill-driven session aggregates.
pub async fn update_fill_state(
    pool: &SqlitePool,
    id: i64,
    total_filled_qty: Decimal,
    total_cost: Decimal,
    avg_price: Decimal,
    last_fill_at: DateTime<Utc>,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE pyramid_sessions
        SET total_filled_qty = ?1, total_cost = ?2, avg_price = ?3, last_fill_at = ?4
        WHERE id = ?5
        "#,
    )
    .bind(total_filled_qty.to_string())
    .bind(total_cost.to_string())
    .bind(avg_price.to_string())
    .bind(last_fill_at)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn update_wave_cursor(
    pool: &SqlitePool,
    id: i64,
    current_wave: i64,
    queued_at: DateTime<Utc>,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE pyramid_sessions SET current_wave = ?1, last_wave_queued_at = ?2 WHERE id = ?3",
    )
    .bind(current_wave)
    .bind(queued_at)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Adjustable session parameters; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct SessionAdjustment {
    pub max_waves: Option<i64>,
    pub isolated_fund: Option<Decimal>,
    pub tp_pct: Option<Decimal>,
    pub distance_pct: Option<Decimal>,
    pub timeout_min: Option<i64>,
    pub gap_min: Option<i64>,
}

pub async fn apply_adjustment(
    pool: &SqlitePool,
    id: i64,
    adjustment: &SessionAdjustment,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE pyramid_sessions
        SET max_waves = COALESCE(?1, max_waves),
            isolated_fund = COALESCE(?2, isolated_fund),
            tp_pct = COALESCE(?3, tp_pct),
            distance_pct = COALESCE(?4, distance_pct),
            timeout_min = COALESCE(?5, timeout_min),
            gap_min = COALESCE(?6, gap_min)
        WHERE id = ?7
        "#,
    )
    .bind(adjustment.max_waves)
    .bind(adjustment.isolated_fund.map(|v| v.to_string()))
    .bind(adjustment.tp_pct.map(|v| v.to_string()))
    .bind(adjustment.distance_pct.map(|v| v.to_string()))
    .bind(adjustment.timeout_min)
    .bind(adjustment.gap_min)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_session(pool: &SqlitePool, id: i64) -> Result<(), AppError> {
    sqlx::query("DELETE FROM pyramid_waves WHERE session_id = ?1")
        .bind(id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM pyramid_sessions WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Waves
// ---------------------------------------------------------------------------

pub async fn insert_wave(
    pool: &SqlitePool,
    session_id: i64,
    wave_num: i64,
    target_qty: Decimal,
    target_price: Decimal,
    pending_order_id: Option<i64>,
) -> Result<PyramidWave, AppError> {
    let wave = sqlx::query_as::<_, PyramidWave>(
        r#"
        INSERT INTO pyramid_waves (
            session_id, wave_num, target_qty, target_price, status,
            filled_qty, pending_order_id
        )
        VALUES (?1, ?2, ?3, ?4, 'QUEUED', '0', ?5)
        RETURNING *
        "#,
    )
    .bind(session_id)
    .bind(wave_num)
    .bind(target_qty.to_string())
    .bind(target_price.to_string())
    .bind(pending_order_id)
    .fetch_one(pool)
    .await?;
    Ok(wave)
}

pub async fn get_wave(
    pool: &SqlitePool,
    session_id: i64,
    wave_num: i64,
) -> Result<Option<PyramidWave>, AppError> {
    let wave = sqlx::query_as::<_, PyramidWave>(
        "SELECT * FROM pyramid_waves WHERE session_id = ?1 AND wave_num = ?2",
    )
    .bind(session_id)
    .bind(wave_num)
    .fetch_optional(pool)
    .await?;
    Ok(wave)
}

pub async fn list_waves(pool: &SqlitePool, session_id: i64) -> Result<Vec<PyramidWave>, AppError> {
    let waves = sqlx::query_as::<_, PyramidWave>(
        "SELECT * FROM pyramid_waves WHERE session_id = ?1 ORDER BY wave_num ASC",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?;
    Ok(waves)
}

/// The at-most-one wave currently awaiting its fill.
pub async fn find_queued_wave(
    pool: &SqlitePool,
    session_id: i64,
) -> Result<Option<PyramidWave>, AppError> {
    let wave = sqlx::query_as::<_, PyramidWave>(
        "SELECT * FROM pyramid_waves WHERE session_id = ?1 AND status = 'QUEUED' ORDER BY wave_num ASC LIMIT 1",
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await?;
    Ok(wave)
}

/// Accumulate a fill into a wave; it flips to FILLED once the target
/// quantity is reached (within one step of the grid).
pub async fn record_wave_fill(
    pool: &SqlitePool,
    wave: &PyramidWave,
    fill_qty: Decimal,
    fill_price: Decimal,
    step: Decimal,
    filled_at: DateTime<Utc>,
) -> Result<PyramidWave, AppError> {
    let new_filled = wave.filled_qty + fill_qty;
    let complete = new_filled >= wave.target_qty - step;
    let status = if complete {
        WaveStatus::Filled
    } else {
        wave.status
    };

    let updated = sqlx::query_as::<_, PyramidWave>(
        r#"
        UPDATE pyramid_waves
        SET filled_qty = ?1, filled_price = ?2, filled_at = ?3, status = ?4
        WHERE id = ?5
        RETURNING *
        "#,
    )
    .bind(new_filled.to_string())
    .bind(fill_price.to_string())
    .bind(filled_at)
    .bind(status.as_str())
    .bind(wave.id)
    .fetch_one(pool)
    .await?;
    Ok(updated)
}

pub async fn cancel_wave(pool: &SqlitePool, wave_id: i64) -> Result<(), AppError> {
    sqlx::query("UPDATE pyramid_waves SET status = 'CANCELLED' WHERE id = ?1 AND status IN ('PENDING', 'QUEUED')")
        .bind(wave_id)
        .execute(pool)
        .await?;
    Ok(())
}
