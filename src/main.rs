use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};

use paperbot::api::router::create_router;
use paperbot::api::ws_types::WsMessage;
use paperbot::config::CoreConfig;
use paperbot::coordinator::Coordinator;
use paperbot::execution::{
    run_latency_dispatcher, run_stop_scanner, ExecutionConfig, FillEvent, PaperEngine, SeededRng,
    SystemClock,
};
use paperbot::pricefeed::{CachedPriceSource, FixedPriceSource, PriceSource};
use paperbot::pyramid::{run_pyramid_timer, PyramidManager};
use paperbot::queue::{run_pending_resolved_listener, ApprovalQueue};
use paperbot::risk::RiskLimits;
use paperbot::{db, metrics, AppState};

/// How often the latency dispatcher checks for due orders.
const DISPATCHER_POLL_MS: u64 = 25;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = match CoreConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Configuration error");
            return ExitCode::from(2);
        }
    };

    // --- Prometheus metrics ---
    let metrics_handle = metrics::init_metrics();
    tracing::info!("Prometheus metrics initialized");

    // --- Stores ---
    tracing::info!(path = %config.sot_database_path, "Opening SOT store...");
    let sot = match db::init_sot_pool(&config.sot_database_path, config.pool_max_connections).await
    {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open SOT store");
            return ExitCode::from(3);
        }
    };
    tracing::info!(path = %config.ts_database_path, "Opening TS store...");
    let ts = match db::init_ts_pool(&config.ts_database_path, config.pool_max_connections).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open TS store");
            return ExitCode::from(3);
        }
    };
    tracing::info!("Stores opened and migrated");

    // --- Channels & shutdown signal ---
    let (fill_tx, fill_rx) = mpsc::channel::<FillEvent>(1024);
    let (ws_tx, _) = broadcast::channel::<WsMessage>(256);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // --- Price source ---
    // The external feed is a plug-in capability; without one the in-process
    // source serves whatever prices are pushed into it, and stop scanning /
    // mark-to-market degrade gracefully until then.
    let price_source: Arc<dyn PriceSource> = Arc::new(CachedPriceSource::new(
        FixedPriceSource::new(),
        config.price_cache_ttl_s,
        config.price_fetch_timeout_ms,
    ));

    // --- Execution engine ---
    let clock = Arc::new(SystemClock);
    let rng = Arc::new(SeededRng::new(config.rng_seed));
    let engine = Arc::new(PaperEngine::new(
        sot.clone(),
        ts.clone(),
        ExecutionConfig::from_core(&config),
        clock.clone(),
        rng,
        price_source.clone(),
        fill_tx,
    ));

    // --- Approval queue ---
    let limits = RiskLimits {
        max_position_size_pct: config.max_position_size_pct,
        max_daily_loss_pct: config.max_daily_loss_pct,
        account_equity: config.account_equity,
        pip_multiplier: config.pip_multiplier,
    };
    let queue = Arc::new(ApprovalQueue::new(
        sot.clone(),
        ts.clone(),
        engine.clone(),
        price_source.clone(),
        limits,
        clock.clone(),
    ));

    // --- Pyramid manager ---
    let pyramid = Arc::new(PyramidManager::new(
        sot.clone(),
        queue.clone(),
        engine.clone(),
        price_source.clone(),
        clock,
        config.pip_multiplier,
    ));

    // --- Coordinator: fill fan-out into TS, pyramid hooks, dashboard ---
    let coordinator = Arc::new(Coordinator::new(
        sot.clone(),
        ts.clone(),
        pyramid.clone(),
        ws_tx.clone(),
    ));
    tokio::spawn(Arc::clone(&coordinator).run(fill_rx, shutdown_rx.clone()));
    tracing::info!("Coordinator spawned");

    // --- Background tasks ---
    tokio::spawn(run_latency_dispatcher(
        engine.clone(),
        DISPATCHER_POLL_MS,
        shutdown_rx.clone(),
    ));
    tracing::info!(poll_ms = DISPATCHER_POLL_MS, "Latency dispatcher spawned");

    tokio::spawn(run_stop_scanner(
        engine.clone(),
        config.stop_scan_interval_ms,
        shutdown_rx.clone(),
    ));
    tracing::info!(
        interval_ms = config.stop_scan_interval_ms,
        "Stop-loss scanner spawned"
    );

    tokio::spawn(run_pyramid_timer(
        pyramid.clone(),
        config.pyramid_timer_interval_ms,
        shutdown_rx.clone(),
    ));
    tracing::info!(
        interval_ms = config.pyramid_timer_interval_ms,
        "Pyramid timer spawned"
    );

    tokio::spawn(run_pending_resolved_listener(
        pyramid.clone(),
        queue.subscribe(),
        shutdown_rx.clone(),
    ));
    tracing::info!("Pending-resolution listener spawned");

    // --- HTTP surface ---
    let state = AppState {
        sot,
        ts,
        config: config.clone(),
        engine,
        queue,
        pyramid,
        coordinator,
        price_source,
        ws_tx,
        metrics_handle,
    };
    let router = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, addr, "Failed to bind listener");
            return ExitCode::from(2);
        }
    };
    tracing::info!("Server listening on {addr}");

    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
        return ExitCode::FAILURE;
    }

    // Signal background tasks; in-flight transactions complete, new work is
    // refused, then tasks exit.
    let _ = shutdown_tx.send(true);
    tracing::info!("Shutting down gracefully...");

    ExitCode::from(130)
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");
    tracing::info!("Received SIGINT (Ctrl+C), starting graceful shutdown...");
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();
}
