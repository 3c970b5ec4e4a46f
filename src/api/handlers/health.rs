use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let sot_ok = sqlx::query("SELECT 1").execute(&state.sot).await.is_ok();
    let ts_ok = sqlx::query("SELECT 1").execute(&state.ts).await.is_ok();

    Json(json!({
        "status": if sot_ok && ts_ok { "ok" } else { "degraded" },
        "sot": sot_ok,
        "ts": ts_ok,
    }))
}
