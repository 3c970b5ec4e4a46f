use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{SqliteConnection, SqlitePool};

use crate::errors::AppError;
use crate::models::trade::TradeStatus;
use crate::models::{Side, Trade, TradePnl};

/// The single open (OPEN or PARTIAL) trade for a symbol, if any.
pub async fn find_open_trade(
    conn: &mut SqliteConnection,
    symbol: &str,
) -> Result<Option<Trade>, AppError> {
    let trade = sqlx::query_as::<_, Trade>(
        "SELECT * FROM trades WHERE symbol = ?1 AND status IN ('OPEN', 'PARTIAL') ORDER BY id DESC LIMIT 1",
    )
    .bind(symbol)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(trade)
}

/// Open a trade from its first entry fill and seed the PnL snapshot.
#[allow(clippy::too_many_arguments)]
pub async fn open_trade(
    conn: &mut SqliteConnection,
    entry_order_id: i64,
    symbol: &str,
    side: Side,
    entry_qty: Decimal,
    entry_price: Decimal,
    entry_fees: Decimal,
    entry_time: DateTime<Utc>,
    strategy_code: Option<&str>,
) -> Result<Trade, AppError> {
    let trade = sqlx::query_as::<_, Trade>(
        r#"
        INSERT INTO trades (
            entry_order_id, symbol, side, status, entry_qty, entry_price,
            entry_time, current_qty, strategy_code
        )
        VALUES (?1, ?2, ?3, 'OPEN', ?4, ?5, ?6, ?4, ?7)
        RETURNING *
        "#,
    )
    .bind(entry_order_id)
    .bind(symbol)
    .bind(side.as_str())
    .bind(entry_qty.to_string())
    .bind(entry_price.to_string())
    .bind(entry_time)
    .bind(strategy_code)
    .fetch_one(&mut *conn)
    .await?;

    let pnl = build_pnl(&trade, Decimal::ZERO, entry_fees, entry_time);
    upsert_trade_pnl(conn, &pnl).await?;

    Ok(trade)
}

/// Fold a further entry fill into an open trade (cost-averaged entry).
pub async fn add_entry_fill(
    conn: &mut SqliteConnection,
    trade: &Trade,
    fill_qty: Decimal,
    effective_price: Decimal,
    fees: Decimal,
    now: DateTime<Utc>,
) -> Result<Trade, AppError> {
    let new_entry_qty = trade.entry_qty + fill_qty;
    let new_entry_price = if new_entry_qty > Decimal::ZERO {
        (trade.entry_qty * trade.entry_price + fill_qty * effective_price) / new_entry_qty
    } else {
        Decimal::ZERO
    };
    let new_current = trade.current_qty + fill_qty;

    let updated = sqlx::query_as::<_, Trade>(
        r#"
        UPDATE trades
        SET entry_qty = ?1, entry_price = ?2, current_qty = ?3
        WHERE id = ?4
        RETURNING *
        "#,
    )
    .bind(new_entry_qty.to_string())
    .bind(new_entry_price.to_string())
    .bind(new_current.to_string())
    .bind(trade.id)
    .fetch_one(&mut *conn)
    .await?;

    let prior = load_pnl(conn, trade.id).await?;
    let pnl = build_pnl(
        &updated,
        prior.as_ref().map(|p| p.gross_pnl).unwrap_or(Decimal::ZERO),
        prior.as_ref().map(|p| p.total_fees).unwrap_or(Decimal::ZERO) + fees,
        now,
    );
    upsert_trade_pnl(conn, &pnl).await?;

    Ok(updated)
}

/// Apply an exit fill: reduce the live quantity, fold the exit price into
/// the volume-weighted exit aggregate, and move OPEN → PARTIAL → CLOSED.
pub async fn apply_exit_fill(
    conn: &mut SqliteConnection,
    trade: &Trade,
    exit_order_id: i64,
    fill_qty: Decimal,
    effective_price: Decimal,
    fees: Decimal,
    now: DateTime<Utc>,
) -> Result<Trade, AppError> {
    let prior_exit_qty = trade.exit_qty.unwrap_or(Decimal::ZERO);
    let prior_exit_price = trade.exit_price.unwrap_or(Decimal::ZERO);

    let new_exit_qty = prior_exit_qty + fill_qty;
    let new_exit_price = if new_exit_qty > Decimal::ZERO {
        (prior_exit_qty * prior_exit_price + fill_qty * effective_price) / new_exit_qty
    } else {
        Decimal::ZERO
    };
    let new_current = (trade.current_qty - fill_qty).max(Decimal::ZERO);
    let status = if new_current == Decimal::ZERO {
        TradeStatus::Closed
    } else {
        TradeStatus::Partial
    };

    let updated = sqlx::query_as::<_, Trade>(
        r#"
        UPDATE trades
        SET exit_order_id = ?1, exit_qty = ?2, exit_price = ?3, exit_time = ?4,
            current_qty = ?5, status = ?6
        WHERE id = ?7
        RETURNING *
        "#,
    )
    .bind(exit_order_id)
    .bind(new_exit_qty.to_string())
    .bind(new_exit_price.to_string())
    .bind(now)
    .bind(new_current.to_string())
    .bind(status.as_str())
    .bind(trade.id)
    .fetch_one(&mut *conn)
    .await?;

    // Gross PnL accumulates per exit fill against the entry price. This is
    // equal to (weighted_exit − entry) × exit_qty but stays exact — no
    // division by the exit quantity ever happens.
    let increment = {
        let raw = (effective_price - trade.entry_price) * fill_qty;
        match trade.side {
            Side::Buy => raw,
            Side::Sell => -raw,
        }
    };

    let prior = load_pnl(conn, trade.id).await?;
    let pnl = build_pnl(
        &updated,
        prior.as_ref().map(|p| p.gross_pnl).unwrap_or(Decimal::ZERO) + increment,
        prior.as_ref().map(|p| p.total_fees).unwrap_or(Decimal::ZERO) + fees,
        now,
    );
    upsert_trade_pnl(conn, &pnl).await?;

    Ok(updated)
}

async fn load_pnl(conn: &mut SqliteConnection, trade_id: i64) -> Result<Option<TradePnl>, AppError> {
    let existing = sqlx::query_as::<_, TradePnl>("SELECT * FROM trade_pnl WHERE trade_id = ?1")
        .bind(trade_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(existing)
}

/// PnL snapshot from accumulated gross and fees:
///
/// ```text
/// cost_basis = entry_qty × entry_price
/// net_pnl    = gross_pnl − total_fees
/// return_pct = net_pnl / cost_basis × 100
/// ```
fn build_pnl(trade: &Trade, gross_pnl: Decimal, total_fees: Decimal, now: DateTime<Utc>) -> TradePnl {
    let cost_basis = trade.entry_qty * trade.entry_price;
    let net_pnl = gross_pnl - total_fees;
    let return_pct = if cost_basis != Decimal::ZERO {
        net_pnl / cost_basis * Decimal::ONE_HUNDRED
    } else {
        Decimal::ZERO
    };

    let duration_s = trade
        .exit_time
        .map(|exit| (exit - trade.entry_time).num_seconds());

    TradePnl {
        trade_id: trade.id,
        gross_pnl,
        total_fees,
        net_pnl,
        return_pct,
        cost_basis,
        realized_pnl: net_pnl,
        unrealized_pnl: Decimal::ZERO,
        duration_s,
        calculated_at: now,
    }
}

async fn upsert_trade_pnl(conn: &mut SqliteConnection, pnl: &TradePnl) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO trade_pnl (
            trade_id, gross_pnl, total_fees, net_pnl, return_pct,
            cost_basis, realized_pnl, unrealized_pnl, duration_s, calculated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(trade_id) DO UPDATE SET
            gross_pnl = excluded.gross_pnl,
            total_fees = excluded.total_fees,
            net_pnl = excluded.net_pnl,
            return_pct = excluded.return_pct,
            cost_basis = excluded.cost_basis,
            realized_pnl = excluded.realized_pnl,
            unrealized_pnl = excluded.unrealized_pnl,
            duration_s = excluded.duration_s,
            calculated_at = excluded.calculated_at
        "#,
    )
    .bind(pnl.trade_id)
    .bind(pnl.gross_pnl.to_string())
    .bind(pnl.total_fees.to_string())
    .bind(pnl.net_pnl.to_string())
    .bind(pnl.return_pct.to_string())
    .bind(pnl.cost_basis.to_string())
    .bind(pnl.realized_pnl.to_string())
    .bind(pnl.unrealized_pnl.to_string())
    .bind(pnl.duration_s)
    .bind(pnl.calculated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_trade(pool: &SqlitePool, id: i64) -> Result<Option<Trade>, AppError> {
    let trade = sqlx::query_as::<_, Trade>("SELECT * FROM trades WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(trade)
}

#[derive(Debug, Clone, Default)]
pub struct TradeFilter {
    pub symbol: Option<String>,
    pub status: Option<TradeStatus>,
}

pub async fn list_trades(pool: &SqlitePool, filter: &TradeFilter) -> Result<Vec<Trade>, AppError> {
    let trades = sqlx::query_as::<_, Trade>(
        r#"
        SELECT * FROM trades
        WHERE (?1 IS NULL OR symbol = ?1)
          AND (?2 IS NULL OR status = ?2)
        ORDER BY id DESC
        "#,
    )
    .bind(filter.symbol.as_deref())
    .bind(filter.status.map(|s| s.as_str()))
    .fetch_all(pool)
    .await?;
    Ok(trades)
}

pub async fn get_trade_pnl(pool: &SqlitePool, trade_id: i64) -> Result<Option<TradePnl>, AppError> {
    let pnl = sqlx::query_as::<_, TradePnl>("SELECT * FROM trade_pnl WHERE trade_id = ?1")
        .bind(trade_id)
        .fetch_optional(pool)
        .await?;
    Ok(pnl)
}

/// Total realized PnL across closed trades.
pub async fn total_realized_pnl(pool: &SqlitePool) -> Result<Decimal, AppError> {
    let trades = list_trades(
        pool,
        &TradeFilter {
            status: Some(TradeStatus::Closed),
            ..Default::default()
        },
    )
    .await?;

    let mut total = Decimal::ZERO;
    for trade in &trades {
        if let Some(pnl) = get_trade_pnl(pool, trade.id).await? {
            total += pnl.realized_pnl;
        }
    }
    Ok(total)
}

/// Net realized PnL of trades that closed inside the given UTC window.
/// The daily-loss risk check feeds today's window through here.
pub async fn realized_pnl_between(
    pool: &SqlitePool,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Decimal, AppError> {
    let trades = sqlx::query_as::<_, Trade>(
        "SELECT * FROM trades WHERE status = 'CLOSED' AND exit_time >= ?1 AND exit_time <= ?2",
    )
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    let mut total = Decimal::ZERO;
    for trade in &trades {
        if let Some(pnl) = get_trade_pnl(pool, trade.id).await? {
            total += pnl.realized_pnl;
        }
    }
    Ok(total)
}

/// Wipe trades and PnL snapshots. Only the TS rebuild path uses this.
pub async fn clear_all(conn: &mut SqliteConnection) -> Result<(), AppError> {
    sqlx::query("DELETE FROM trade_pnl").execute(&mut *conn).await?;
    sqlx::query("DELETE FROM trades").execute(&mut *conn).await?;
    Ok(())
}
