pub mod health;
pub mod kss;
pub mod metrics;
pub mod orders;
pub mod pending;
pub mod trades;
pub mod ws;

use serde::Serialize;

/// Uniform success envelope for JSON endpoints. Failures go through
/// `AppError`'s `IntoResponse` with the proper status code.
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> axum::Json<Self> {
        axum::Json(ApiResponse {
            success: true,
            data,
        })
    }
}
