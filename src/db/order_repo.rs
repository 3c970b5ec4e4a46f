use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{SqliteConnection, SqlitePool};

use crate::errors::AppError;
use crate::models::{EventType, Fill, Liquidity, Order, OrderCost, OrderEvent, OrderPnl, OrderStatus};

/// Arguments for appending a new order to the SOT store.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub client_order_id: String,
    pub pending_id: Option<i64>,
    pub symbol: String,
    pub side: crate::models::Side,
    pub order_type: crate::models::OrderType,
    pub qty: Decimal,
    pub price: Decimal,
    pub stop_price: Option<Decimal>,
    pub is_maker: bool,
    pub latency_ms: i64,
    pub maker_fee_rate: Decimal,
    pub taker_fee_rate: Decimal,
    pub source: crate::models::OrderSource,
    pub source_ref: Option<String>,
    pub strategy_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Append a new order (status NEW, remaining = qty).
///
/// The caller is responsible for the idempotency lookup on
/// `client_order_id` before inserting; the unique index backs it up.
pub async fn insert_order(conn: &mut SqliteConnection, new: &NewOrder) -> Result<Order, AppError> {
    let order = sqlx::query_as::<_, Order>(
        r#"
        INSERT INTO orders (
            client_order_id, pending_id, symbol, side, order_type,
            qty, remaining_qty, price, stop_price, status,
            is_maker, latency_ms, maker_fee_rate, taker_fee_rate,
            source, source_ref, strategy_name, created_at, updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7, ?8, 'NEW', ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16)
        RETURNING *
        "#,
    )
    .bind(&new.client_order_id)
    .bind(new.pending_id)
    .bind(&new.symbol)
    .bind(new.side.as_str())
    .bind(new.order_type.as_str())
    .bind(new.qty.to_string())
    .bind(new.price.to_string())
    .bind(new.stop_price.map(|p| p.to_string()))
    .bind(new.is_maker)
    .bind(new.latency_ms)
    .bind(new.maker_fee_rate.to_string())
    .bind(new.taker_fee_rate.to_string())
    .bind(new.source.as_str())
    .bind(new.source_ref.as_deref())
    .bind(new.strategy_name.as_deref())
    .bind(new.created_at)
    .fetch_one(&mut *conn)
    .await?;

    Ok(order)
}

pub async fn get_order(conn: &mut SqliteConnection, id: i64) -> Result<Option<Order>, AppError> {
    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(order)
}

pub async fn get_order_by_client_id(
    conn: &mut SqliteConnection,
    client_order_id: &str,
) -> Result<Option<Order>, AppError> {
    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE client_order_id = ?1")
        .bind(client_order_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(order)
}

/// Move an order along the status lattice.
///
/// The transition is validated against the lattice first — an illegal move
/// is a programming error, not a recoverable condition — and the UPDATE is
/// guarded on the expected current status so a concurrent writer cannot
/// sneak a row out from under us.
pub async fn transition_status(
    conn: &mut SqliteConnection,
    id: i64,
    from: OrderStatus,
    to: OrderStatus,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    if !from.can_transition(to) {
        return Err(AppError::Internal(format!(
            "illegal order status transition {from} -> {to} for order {id}"
        )));
    }

    let result = sqlx::query(
        "UPDATE orders SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
    )
    .bind(to.as_str())
    .bind(now)
    .bind(id)
    .bind(from.as_str())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::StaleState(format!(
            "order {id} was not in status {from}"
        )));
    }
    Ok(())
}

/// Record the result of a fill iteration: new remaining quantity, status,
/// and the execution timestamp once the order goes terminal.
pub async fn apply_fill_progress(
    conn: &mut SqliteConnection,
    id: i64,
    remaining_qty: Decimal,
    status: OrderStatus,
    executed_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE orders
        SET remaining_qty = ?1, status = ?2, executed_at = COALESCE(?3, executed_at), updated_at = ?4
        WHERE id = ?5
        "#,
    )
    .bind(remaining_qty.to_string())
    .bind(status.as_str())
    .bind(executed_at)
    .bind(now)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Mark an order as submitted into the latency queue.
pub async fn mark_submitted(
    conn: &mut SqliteConnection,
    id: i64,
    latency_ms: i64,
    submitted_at: DateTime<Utc>,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE orders
        SET status = 'PENDING', latency_ms = ?1, submitted_at = ?2, updated_at = ?2
        WHERE id = ?3 AND status = 'NEW'
        "#,
    )
    .bind(latency_ms)
    .bind(submitted_at)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Append a lifecycle event. Events are facts: never updated, never deleted.
pub async fn append_event(
    conn: &mut SqliteConnection,
    order_id: i64,
    event_type: EventType,
    event_time: DateTime<Utc>,
    payload: Option<&str>,
) -> Result<OrderEvent, AppError> {
    let event = sqlx::query_as::<_, OrderEvent>(
        r#"
        INSERT INTO order_events (order_id, event_type, event_time, payload)
        VALUES (?1, ?2, ?3, ?4)
        RETURNING *
        "#,
    )
    .bind(order_id)
    .bind(event_type.as_str())
    .bind(event_time)
    .bind(payload)
    .fetch_one(&mut *conn)
    .await?;
    Ok(event)
}

/// Arguments for appending a fill.
#[derive(Debug, Clone)]
pub struct NewFill {
    pub order_id: i64,
    pub fill_qty: Decimal,
    pub fill_price: Decimal,
    pub effective_price: Decimal,
    pub fees: Decimal,
    pub slippage_amount: Decimal,
    pub liquidity: Liquidity,
    pub filled_at: DateTime<Utc>,
}

/// Append a fill fact.
pub async fn append_fill(conn: &mut SqliteConnection, new: &NewFill) -> Result<Fill, AppError> {
    let fill = sqlx::query_as::<_, Fill>(
        r#"
        INSERT INTO order_fills (
            order_id, fill_qty, fill_price, effective_price,
            fees, slippage_amount, liquidity, filled_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        RETURNING *
        "#,
    )
    .bind(new.order_id)
    .bind(new.fill_qty.to_string())
    .bind(new.fill_price.to_string())
    .bind(new.effective_price.to_string())
    .bind(new.fees.to_string())
    .bind(new.slippage_amount.to_string())
    .bind(new.liquidity.as_str())
    .bind(new.filled_at)
    .fetch_one(&mut *conn)
    .await?;
    Ok(fill)
}

/// Accumulate execution fees for an order.
pub async fn upsert_cost(
    conn: &mut SqliteConnection,
    order_id: i64,
    add_fees: Decimal,
    fee_rate: Decimal,
    liquidity: Liquidity,
) -> Result<(), AppError> {
    let existing = sqlx::query_as::<_, OrderCost>("SELECT * FROM order_costs WHERE order_id = ?1")
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?;

    match existing {
        Some(cost) => {
            sqlx::query("UPDATE order_costs SET total_fees = ?1 WHERE order_id = ?2")
                .bind((cost.total_fees + add_fees).to_string())
                .bind(order_id)
                .execute(&mut *conn)
                .await?;
        }
        None => {
            sqlx::query(
                "INSERT INTO order_costs (order_id, total_fees, fee_rate, liquidity) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(order_id)
            .bind(add_fees.to_string())
            .bind(fee_rate.to_string())
            .bind(liquidity.as_str())
            .execute(&mut *conn)
            .await?;
        }
    }
    Ok(())
}

/// Accumulate realized PnL and cost basis for an order.
pub async fn upsert_pnl(
    conn: &mut SqliteConnection,
    order_id: i64,
    add_realized: Decimal,
    add_cost_basis: Decimal,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let existing = sqlx::query_as::<_, OrderPnl>("SELECT * FROM order_pnl WHERE order_id = ?1")
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?;

    match existing {
        Some(pnl) => {
            sqlx::query(
                "UPDATE order_pnl SET realized_pnl = ?1, cost_basis = ?2, calculated_at = ?3 WHERE order_id = ?4",
            )
            .bind((pnl.realized_pnl + add_realized).to_string())
            .bind((pnl.cost_basis + add_cost_basis).to_string())
            .bind(now)
            .bind(order_id)
            .execute(&mut *conn)
            .await?;
        }
        None => {
            sqlx::query(
                "INSERT INTO order_pnl (order_id, realized_pnl, cost_basis, calculated_at) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(order_id)
            .bind(add_realized.to_string())
            .bind(add_cost_basis.to_string())
            .bind(now)
            .execute(&mut *conn)
            .await?;
        }
    }
    Ok(())
}

/// Armed stop-loss orders awaiting a trigger.
pub async fn list_armed_stops(pool: &SqlitePool) -> Result<Vec<Order>, AppError> {
    let orders = sqlx::query_as::<_, Order>(
        "SELECT * FROM orders WHERE order_type = 'STOP_LOSS' AND status = 'NEW' ORDER BY id ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(orders)
}

/// Orders sitting in the latency queue (status PENDING), oldest first.
pub async fn list_latency_pending(pool: &SqlitePool) -> Result<Vec<Order>, AppError> {
    let orders = sqlx::query_as::<_, Order>(
        "SELECT * FROM orders WHERE status = 'PENDING' ORDER BY submitted_at ASC, id ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(orders)
}

pub async fn list_events(pool: &SqlitePool, order_id: i64) -> Result<Vec<OrderEvent>, AppError> {
    let events = sqlx::query_as::<_, OrderEvent>(
        "SELECT * FROM order_events WHERE order_id = ?1 ORDER BY id ASC",
    )
    .bind(order_id)
    .fetch_all(pool)
    .await?;
    Ok(events)
}

pub async fn list_fills(pool: &SqlitePool, order_id: i64) -> Result<Vec<Fill>, AppError> {
    let fills = sqlx::query_as::<_, Fill>(
        "SELECT * FROM order_fills WHERE order_id = ?1 ORDER BY id ASC",
    )
    .bind(order_id)
    .fetch_all(pool)
    .await?;
    Ok(fills)
}

/// Every fill in append order; the replay input for a TS rebuild.
pub async fn list_all_fills(pool: &SqlitePool) -> Result<Vec<Fill>, AppError> {
    let fills = sqlx::query_as::<_, Fill>("SELECT * FROM order_fills ORDER BY id ASC")
        .fetch_all(pool)
        .await?;
    Ok(fills)
}

pub async fn get_cost(pool: &SqlitePool, order_id: i64) -> Result<Option<OrderCost>, AppError> {
    let cost = sqlx::query_as::<_, OrderCost>("SELECT * FROM order_costs WHERE order_id = ?1")
        .bind(order_id)
        .fetch_optional(pool)
        .await?;
    Ok(cost)
}

pub async fn get_pnl(pool: &SqlitePool, order_id: i64) -> Result<Option<OrderPnl>, AppError> {
    let pnl = sqlx::query_as::<_, OrderPnl>("SELECT * FROM order_pnl WHERE order_id = ?1")
        .bind(order_id)
        .fetch_optional(pool)
        .await?;
    Ok(pnl)
}

/// Pool-level convenience wrapper for reads outside a transaction.
pub async fn fetch_order(pool: &SqlitePool, id: i64) -> Result<Option<Order>, AppError> {
    let mut conn = pool.acquire().await?;
    get_order(&mut conn, id).await
}
