use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::Serialize;

/// Application error taxonomy.
///
/// Risk violations are deliberately absent: they annotate the pending order
/// as a `risk_note` and never fail an operation.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Bad input caught at a boundary; no state change.
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency conflict or illegal pending-state transition.
    /// The caller may retry against fresh state.
    #[error("stale state: {0}")]
    StaleState(String),

    /// SELL exceeds the owned quantity. The order is cancelled with an
    /// ERROR event before this surfaces.
    #[error("insufficient position for {symbol}: requested {requested}, held {held}")]
    InsufficientPosition {
        symbol: String,
        requested: Decimal,
        held: Decimal,
    },

    /// Recoverable: the price feed had no usable quote this tick.
    #[error("price source unavailable: {0}")]
    PriceSourceUnavailable(String),

    /// Transaction or constraint failure; retryable idempotently.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Lattice violation, counter exhaustion or other programming error.
    /// Writes pause and an operator must intervene.
    #[error("internal: {0}")]
    Internal(String),
}

impl AppError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::Internal(_))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::StaleState(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::InsufficientPosition { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, self.to_string())
            }
            AppError::PriceSourceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, msg.clone())
            }
            AppError::Store(e) => {
                tracing::error!("Store error: {e:?}");
                (StatusCode::INTERNAL_SERVER_ERROR, "store error".into())
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
            }
        };

        (
            status,
            Json(ErrorBody {
                success: false,
                error: message,
            }),
        )
            .into_response()
    }
}
