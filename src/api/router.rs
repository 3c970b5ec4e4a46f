use axum::routing::{delete, get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::render))
        // Approval queue
        .route("/api/pending", get(handlers::pending::list))
        .route("/api/pending", post(handlers::pending::queue))
        .route("/api/pending/approve/{id}", post(handlers::pending::approve))
        .route("/api/pending/reject/{id}", post(handlers::pending::reject))
        // Orders
        .route("/api/orders/{id}", get(handlers::orders::get))
        .route("/api/orders/{id}/cancel", post(handlers::orders::cancel))
        .route(
            "/api/orders/pending-progress",
            get(handlers::orders::pending_progress),
        )
        // Trade service
        .route("/api/trades", get(handlers::trades::list_trades))
        .route("/api/trades/{id}", get(handlers::trades::get_trade))
        .route("/api/positions", get(handlers::trades::list_positions))
        .route("/api/pnl/total", get(handlers::trades::total_pnl))
        .route("/api/ts/rebuild", post(handlers::trades::rebuild))
        // Pyramid sessions
        .route("/kss/sessions", post(handlers::kss::create))
        .route("/kss/sessions/{id}", get(handlers::kss::detail))
        .route("/kss/sessions/{id}", patch(handlers::kss::adjust))
        .route("/kss/sessions/{id}", delete(handlers::kss::delete))
        .route("/kss/sessions/{id}/start", post(handlers::kss::start))
        .route("/kss/sessions/{id}/stop", post(handlers::kss::stop))
        .route("/kss/sessions/{id}/check-tp", post(handlers::kss::check_tp))
        .route("/kss/summary", get(handlers::kss::summary))
        // Dashboard stream
        .route("/ws", get(handlers::ws::handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
