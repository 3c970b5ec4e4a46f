use axum::extract::{Path, Query, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::ApiResponse;
use crate::db::trade_repo::{self, TradeFilter};
use crate::db::position_repo;
use crate::errors::AppError;
use crate::models::trade::TradeStatus;
use crate::models::{Position, Trade, TradePnl};
use crate::AppState;

#[derive(Deserialize)]
pub struct TradeQuery {
    pub symbol: Option<String>,
    pub status: Option<String>,
}

#[derive(Serialize)]
pub struct TradeWithPnl {
    #[serde(flatten)]
    pub trade: Trade,
    pub pnl: Option<TradePnl>,
}

pub async fn list_trades(
    State(state): State<AppState>,
    Query(query): Query<TradeQuery>,
) -> Result<Json<ApiResponse<Vec<TradeWithPnl>>>, AppError> {
    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            TradeStatus::parse(&raw.to_uppercase())
                .ok_or_else(|| AppError::Validation(format!("unknown status '{raw}'")))?,
        ),
        None => None,
    };
    let filter = TradeFilter {
        symbol: query.symbol.filter(|s| !s.is_empty()),
        status,
    };

    let trades = trade_repo::list_trades(&state.ts, &filter).await?;
    let mut out = Vec::with_capacity(trades.len());
    for trade in trades {
        let pnl = trade_repo::get_trade_pnl(&state.ts, trade.id).await?;
        out.push(TradeWithPnl { trade, pnl });
    }
    Ok(ApiResponse::ok(out))
}

pub async fn get_trade(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<TradeWithPnl>>, AppError> {
    let trade = trade_repo::get_trade(&state.ts, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("trade {id}")))?;
    let pnl = trade_repo::get_trade_pnl(&state.ts, id).await?;
    Ok(ApiResponse::ok(TradeWithPnl { trade, pnl }))
}

#[derive(Serialize)]
pub struct PositionView {
    #[serde(flatten)]
    pub position: Position,
    /// Mark-to-market valuation when the price feed has a quote.
    pub current_price: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
}

pub async fn list_positions(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<PositionView>>>, AppError> {
    let positions = position_repo::list_positions(&state.ts).await?;

    let mut out = Vec::with_capacity(positions.len());
    for position in positions {
        let current_price = state
            .price_source
            .current_price(&position.symbol)
            .await
            .ok()
            .map(|q| q.price);
        let unrealized_pnl = current_price.and_then(|price| {
            (position.quantity > Decimal::ZERO)
                .then(|| (price - position.avg_entry_price) * position.quantity)
        });
        out.push(PositionView {
            position,
            current_price,
            unrealized_pnl,
        });
    }
    Ok(ApiResponse::ok(out))
}

pub async fn total_pnl(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let total = trade_repo::total_realized_pnl(&state.ts).await?;
    Ok(ApiResponse::ok(json!({ "total_realized_pnl": total })))
}

/// Rebuild the derived TS store from SOT facts.
pub async fn rebuild(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let replayed = state.coordinator.rebuild_from_sot().await?;
    Ok(ApiResponse::ok(json!({ "replayed_fills": replayed })))
}
