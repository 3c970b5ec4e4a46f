use axum::extract::{Path, Query, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};

use super::ApiResponse;
use crate::db::pyramid_repo::SessionAdjustment;
use crate::errors::AppError;
use crate::models::pyramid::SessionStatus;
use crate::models::PyramidSession;
use crate::pyramid::{CreateSession, SessionDetail};
use crate::AppState;

#[derive(Deserialize)]
pub struct CreateBody {
    pub symbol: String,
    pub entry_price: Decimal,
    pub distance_pct: Decimal,
    pub max_waves: i64,
    pub isolated_fund: Decimal,
    pub tp_pct: Decimal,
    pub timeout_min: i64,
    pub gap_min: i64,
    pub pip_multiplier: Option<Decimal>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateBody>,
) -> Result<Json<ApiResponse<PyramidSession>>, AppError> {
    let session = state
        .pyramid
        .create(CreateSession {
            symbol: body.symbol,
            entry_price: body.entry_price,
            distance_pct: body.distance_pct,
            max_waves: body.max_waves,
            isolated_fund: body.isolated_fund,
            tp_pct: body.tp_pct,
            timeout_min: body.timeout_min,
            gap_min: body.gap_min,
            pip_multiplier: body.pip_multiplier,
        })
        .await?;
    Ok(ApiResponse::ok(session))
}

pub async fn start(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<PyramidSession>>, AppError> {
    let session = state.pyramid.start(id).await?;
    Ok(ApiResponse::ok(session))
}

#[derive(Deserialize, Default)]
pub struct StopBody {
    pub reason: Option<String>,
}

pub async fn stop(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<StopBody>>,
) -> Result<Json<ApiResponse<PyramidSession>>, AppError> {
    let reason = body
        .and_then(|Json(b)| b.reason)
        .unwrap_or_else(|| "manual".into());
    let session = state.pyramid.stop(id, &reason).await?;
    Ok(ApiResponse::ok(session))
}

#[derive(Deserialize)]
pub struct AdjustBody {
    pub max_waves: Option<i64>,
    pub isolated_fund: Option<Decimal>,
    pub tp_pct: Option<Decimal>,
    pub distance_pct: Option<Decimal>,
    pub timeout_min: Option<i64>,
    pub gap_min: Option<i64>,
}

pub async fn adjust(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<AdjustBody>,
) -> Result<Json<ApiResponse<PyramidSession>>, AppError> {
    let session = state
        .pyramid
        .adjust(
            id,
            SessionAdjustment {
                max_waves: body.max_waves,
                isolated_fund: body.isolated_fund,
                tp_pct: body.tp_pct,
                distance_pct: body.distance_pct,
                timeout_min: body.timeout_min,
                gap_min: body.gap_min,
            },
        )
        .await?;
    Ok(ApiResponse::ok(session))
}

#[derive(Deserialize, Default)]
pub struct CheckTpBody {
    pub current_price: Option<Decimal>,
}

pub async fn check_tp(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<CheckTpBody>>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let price = body.and_then(|Json(b)| b.current_price);
    let triggered = state.pyramid.check_tp(id, price).await?;
    Ok(ApiResponse::ok(json!({ "tp_triggered": triggered })))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    state.pyramid.delete(id).await?;
    Ok(ApiResponse::ok(json!({ "deleted": id })))
}

pub async fn detail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<SessionDetail>>, AppError> {
    let detail = state.pyramid.detail(id).await?;
    Ok(ApiResponse::ok(detail))
}

#[derive(Deserialize)]
pub struct SummaryQuery {
    pub status: Option<String>,
    pub symbol: Option<String>,
}

pub async fn summary(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<ApiResponse<Vec<SessionDetail>>>, AppError> {
    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            SessionStatus::parse(&raw.to_uppercase())
                .ok_or_else(|| AppError::Validation(format!("unknown status '{raw}'")))?,
        ),
        None => None,
    };
    let details = state
        .pyramid
        .summary(status, query.symbol.as_deref().filter(|s| !s.is_empty()))
        .await?;
    Ok(ApiResponse::ok(details))
}
