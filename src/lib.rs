pub mod api;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod errors;
pub mod execution;
pub mod intake;
pub mod metrics;
pub mod models;
pub mod money;
pub mod pricefeed;
pub mod pyramid;
pub mod queue;
pub mod risk;

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::api::ws_types::WsMessage;
use crate::config::CoreConfig;
use crate::coordinator::Coordinator;
use crate::execution::PaperEngine;
use crate::pricefeed::PriceSource;
use crate::pyramid::PyramidManager;
use crate::queue::ApprovalQueue;

#[derive(Clone)]
pub struct AppState {
    pub sot: sqlx::SqlitePool,
    pub ts: sqlx::SqlitePool,
    pub config: CoreConfig,
    pub engine: Arc<PaperEngine>,
    pub queue: Arc<ApprovalQueue>,
    pub pyramid: Arc<PyramidManager>,
    pub coordinator: Arc<Coordinator>,
    pub price_source: Arc<dyn PriceSource>,
    pub ws_tx: broadcast::Sender<WsMessage>,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}
