use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use super::ApiResponse;
use crate::db::order_repo;
use crate::errors::AppError;
use crate::execution::{dispatcher, PendingProgress};
use crate::models::{Fill, Order, OrderEvent};
use crate::AppState;

#[derive(Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub events: Vec<OrderEvent>,
    pub fills: Vec<Fill>,
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<OrderDetail>>, AppError> {
    let order = order_repo::fetch_order(&state.sot, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {id}")))?;
    let events = order_repo::list_events(&state.sot, id).await?;
    let fills = order_repo::list_fills(&state.sot, id).await?;

    Ok(ApiResponse::ok(OrderDetail {
        order,
        events,
        fills,
    }))
}

/// Progress view over orders waiting out simulated latency.
pub async fn pending_progress(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<PendingProgress>>>, AppError> {
    let view = dispatcher::pending_progress(&state.engine).await?;
    Ok(ApiResponse::ok(view))
}

/// Cancel a non-terminal order (including one parked in the latency queue).
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Order>>, AppError> {
    let order = state.engine.cancel_order(id).await?;
    Ok(ApiResponse::ok(order))
}
