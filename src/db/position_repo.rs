use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{SqliteConnection, SqlitePool};

use crate::errors::AppError;
use crate::models::Position;

pub async fn get_position(pool: &SqlitePool, symbol: &str) -> Result<Option<Position>, AppError> {
    let pos = sqlx::query_as::<_, Position>("SELECT * FROM positions WHERE symbol = ?1")
        .bind(symbol)
        .fetch_optional(pool)
        .await?;
    Ok(pos)
}

pub async fn list_positions(pool: &SqlitePool) -> Result<Vec<Position>, AppError> {
    let positions = sqlx::query_as::<_, Position>("SELECT * FROM positions ORDER BY symbol ASC")
        .fetch_all(pool)
        .await?;
    Ok(positions)
}

async fn load(conn: &mut SqliteConnection, symbol: &str) -> Result<Option<Position>, AppError> {
    let pos = sqlx::query_as::<_, Position>("SELECT * FROM positions WHERE symbol = ?1")
        .bind(symbol)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(pos)
}

async fn store(conn: &mut SqliteConnection, pos: &Position) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO positions (symbol, quantity, avg_entry_price, total_cost, realized_pnl, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(symbol) DO UPDATE SET
            quantity = excluded.quantity,
            avg_entry_price = excluded.avg_entry_price,
            total_cost = excluded.total_cost,
            realized_pnl = excluded.realized_pnl,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&pos.symbol)
    .bind(pos.quantity.to_string())
    .bind(pos.avg_entry_price.to_string())
    .bind(pos.total_cost.to_string())
    .bind(pos.realized_pnl.to_string())
    .bind(pos.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Apply a BUY fill: quantity grows, the entry price is cost-averaged over
/// the effective (post-slippage) price, and fees land in total cost.
pub async fn apply_buy(
    conn: &mut SqliteConnection,
    symbol: &str,
    fill_qty: Decimal,
    effective_price: Decimal,
    fees: Decimal,
    now: DateTime<Utc>,
) -> Result<Position, AppError> {
    let mut pos = load(conn, symbol)
        .await?
        .unwrap_or_else(|| Position::flat(symbol, now));

    let new_qty = pos.quantity + fill_qty;
    let new_avg = if new_qty > Decimal::ZERO {
        (pos.quantity * pos.avg_entry_price + fill_qty * effective_price) / new_qty
    } else {
        Decimal::ZERO
    };

    pos.quantity = new_qty;
    pos.avg_entry_price = new_avg;
    pos.total_cost += fill_qty * effective_price + fees;
    pos.updated_at = now;

    store(conn, &pos).await?;
    Ok(pos)
}

/// Apply a SELL fill: quantity shrinks, realized PnL accumulates against
/// the standing average entry price, which does not move. A flat position
/// resets its average so the next BUY starts a fresh cost basis.
///
/// The execution engine validates quantity before any SELL reaches this
/// point; seeing an oversell here means the stores have diverged (e.g. a
/// partial rebuild), so it is logged and the fill clamped rather than
/// driving the position negative.
pub async fn apply_sell(
    conn: &mut SqliteConnection,
    symbol: &str,
    fill_qty: Decimal,
    effective_price: Decimal,
    fees: Decimal,
    now: DateTime<Utc>,
) -> Result<Position, AppError> {
    let mut pos = load(conn, symbol)
        .await?
        .unwrap_or_else(|| Position::flat(symbol, now));

    let sell_qty = if pos.quantity < fill_qty {
        tracing::error!(
            symbol,
            held = %pos.quantity,
            requested = %fill_qty,
            "SELL fill exceeds held quantity; stores have diverged — clamping"
        );
        pos.quantity
    } else {
        fill_qty
    };

    pos.realized_pnl += (effective_price - pos.avg_entry_price) * sell_qty - fees;
    pos.quantity -= sell_qty;
    if pos.quantity == Decimal::ZERO {
        pos.avg_entry_price = Decimal::ZERO;
    }
    pos.updated_at = now;

    store(conn, &pos).await?;
    Ok(pos)
}

/// Wipe all positions. Only the TS rebuild path uses this.
pub async fn clear_all(conn: &mut SqliteConnection) -> Result<(), AppError> {
    sqlx::query("DELETE FROM positions").execute(&mut *conn).await?;
    Ok(())
}
