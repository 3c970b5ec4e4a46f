use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use super::ApiResponse;
use crate::db::pending_repo::PendingFilter;
use crate::errors::AppError;
use crate::models::{OrderIntent, OrderSource, PendingOrder, PendingStatus};
use crate::AppState;

#[derive(Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub symbol: Option<String>,
    pub source: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<Vec<PendingOrder>>>, AppError> {
    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            PendingStatus::parse(&raw.to_uppercase())
                .ok_or_else(|| AppError::Validation(format!("unknown status '{raw}'")))?,
        ),
        None => None,
    };
    let source = match query.source.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            OrderSource::parse(raw)
                .ok_or_else(|| AppError::Validation(format!("unknown source '{raw}'")))?,
        ),
        None => None,
    };

    let filter = PendingFilter {
        status,
        symbol: query.symbol.filter(|s| !s.is_empty()),
        source,
    };
    let rows = state.queue.list(&filter).await?;
    Ok(ApiResponse::ok(rows))
}

/// Queue a raw intent directly (strategy/manual submissions).
pub async fn queue(
    State(state): State<AppState>,
    Json(intent): Json<OrderIntent>,
) -> Result<Json<ApiResponse<PendingOrder>>, AppError> {
    let pending = state.queue.queue(&intent).await?;
    Ok(ApiResponse::ok(pending))
}

#[derive(Deserialize, Default)]
pub struct ApproveBody {
    pub note: Option<String>,
    pub reviewed_by: Option<String>,
}

pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<ApproveBody>>,
) -> Result<Json<ApiResponse<PendingOrder>>, AppError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let reviewer = body.reviewed_by.as_deref().unwrap_or("user");

    let (pending, _outcome) = state
        .queue
        .approve(id, reviewer, body.note.as_deref())
        .await?;
    Ok(ApiResponse::ok(pending))
}

#[derive(Deserialize)]
pub struct RejectBody {
    pub reason: String,
    pub reviewed_by: Option<String>,
}

pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<RejectBody>,
) -> Result<Json<ApiResponse<PendingOrder>>, AppError> {
    if body.reason.trim().is_empty() {
        return Err(AppError::Validation("a rejection reason is required".into()));
    }
    let reviewer = body.reviewed_by.as_deref().unwrap_or("user");

    let pending = state.queue.reject(id, reviewer, body.reason.trim()).await?;
    Ok(ApiResponse::ok(pending))
}
