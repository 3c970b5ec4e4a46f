use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{SqliteConnection, SqlitePool};

use crate::errors::AppError;
use crate::models::{OrderSource, OrderType, PendingOrder, PendingStatus, Side};

/// Arguments for queueing an intent into the approval queue.
#[derive(Debug, Clone)]
pub struct NewPending {
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub pips: Option<Decimal>,
    pub price: Decimal,
    pub stop_price: Option<Decimal>,
    pub source: OrderSource,
    pub source_ref: Option<String>,
    pub strategy_name: Option<String>,
    pub confidence: Option<Decimal>,
    pub risk_note: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub async fn insert_pending(
    conn: &mut SqliteConnection,
    new: &NewPending,
) -> Result<PendingOrder, AppError> {
    let pending = sqlx::query_as::<_, PendingOrder>(
        r#"
        INSERT INTO pending_orders (
            client_order_id, symbol, side, order_type, quantity, pips,
            price, stop_price, source, source_ref, strategy_name,
            confidence, status, risk_note, note, created_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 'PENDING', ?13, ?14, ?15)
        RETURNING *
        "#,
    )
    .bind(new.client_order_id.as_deref())
    .bind(&new.symbol)
    .bind(new.side.as_str())
    .bind(new.order_type.as_str())
    .bind(new.quantity.to_string())
    .bind(new.pips.map(|p| p.to_string()))
    .bind(new.price.to_string())
    .bind(new.stop_price.map(|p| p.to_string()))
    .bind(new.source.as_str())
    .bind(new.source_ref.as_deref())
    .bind(new.strategy_name.as_deref())
    .bind(new.confidence.map(|c| c.to_string()))
    .bind(new.risk_note.as_deref())
    .bind(new.note.as_deref())
    .bind(new.created_at)
    .fetch_one(&mut *conn)
    .await?;
    Ok(pending)
}

pub async fn get_pending(pool: &SqlitePool, id: i64) -> Result<Option<PendingOrder>, AppError> {
    let pending = sqlx::query_as::<_, PendingOrder>("SELECT * FROM pending_orders WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(pending)
}

/// Idempotency lookup on `(source, source_ref)`.
pub async fn find_by_source_ref(
    pool: &SqlitePool,
    source: OrderSource,
    source_ref: &str,
) -> Result<Option<PendingOrder>, AppError> {
    let pending = sqlx::query_as::<_, PendingOrder>(
        "SELECT * FROM pending_orders WHERE source = ?1 AND source_ref = ?2",
    )
    .bind(source.as_str())
    .bind(source_ref)
    .fetch_optional(pool)
    .await?;
    Ok(pending)
}

/// Compare-and-set transition from PENDING to APPROVED or REJECTED.
///
/// Concurrent reviewers race on the status column; exactly one wins. The
/// losers receive `StaleState` and must re-read the row.
pub async fn mark_reviewed(
    pool: &SqlitePool,
    id: i64,
    to: PendingStatus,
    reviewed_by: &str,
    note: Option<&str>,
    now: DateTime<Utc>,
) -> Result<PendingOrder, AppError> {
    if !matches!(to, PendingStatus::Approved | PendingStatus::Rejected) {
        return Err(AppError::Internal(format!(
            "mark_reviewed cannot target status {to}"
        )));
    }

    let result = sqlx::query(
        r#"
        UPDATE pending_orders
        SET status = ?1, reviewed_by = ?2, reviewed_at = ?3,
            note = COALESCE(?4, note)
        WHERE id = ?5 AND status = 'PENDING'
        "#,
    )
    .bind(to.as_str())
    .bind(reviewed_by)
    .bind(now)
    .bind(note)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        let current = get_pending(pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("pending order {id}")))?;
        return Err(AppError::StaleState(format!(
            "pending order {id} is {}, not PENDING",
            current.status
        )));
    }

    get_pending(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("pending order {id}")))
}

/// Terminal transition APPROVED → EXECUTED after a successful engine handoff.
pub async fn mark_executed(pool: &SqlitePool, id: i64) -> Result<(), AppError> {
    let result =
        sqlx::query("UPDATE pending_orders SET status = 'EXECUTED' WHERE id = ?1 AND status = 'APPROVED'")
            .bind(id)
            .execute(pool)
            .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::StaleState(format!(
            "pending order {id} was not APPROVED"
        )));
    }
    Ok(())
}

/// Roll an APPROVED row back to PENDING after an engine failure, recording
/// the error and bumping the attempt counter so reviewers see the history.
pub async fn revert_to_pending(pool: &SqlitePool, id: i64, error_note: &str) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE pending_orders
        SET status = 'PENDING', reviewed_by = NULL, reviewed_at = NULL,
            note = ?1, attempt_count = attempt_count + 1
        WHERE id = ?2 AND status = 'APPROVED'
        "#,
    )
    .bind(error_note)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Filters for the pending-order listing.
#[derive(Debug, Clone, Default)]
pub struct PendingFilter {
    pub status: Option<PendingStatus>,
    pub symbol: Option<String>,
    pub source: Option<OrderSource>,
}

pub async fn list_pending(
    pool: &SqlitePool,
    filter: &PendingFilter,
) -> Result<Vec<PendingOrder>, AppError> {
    let rows = sqlx::query_as::<_, PendingOrder>(
        r#"
        SELECT * FROM pending_orders
        WHERE (?1 IS NULL OR status = ?1)
          AND (?2 IS NULL OR symbol = ?2)
          AND (?3 IS NULL OR source = ?3)
        ORDER BY created_at DESC, id DESC
        "#,
    )
    .bind(filter.status.map(|s| s.as_str()))
    .bind(filter.symbol.as_deref())
    .bind(filter.source.map(|s| s.as_str()))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn count_pending(pool: &SqlitePool) -> Result<i64, AppError> {
    let count: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM pending_orders WHERE status = 'PENDING'")
            .fetch_one(pool)
            .await?;
    Ok(count.0)
}
