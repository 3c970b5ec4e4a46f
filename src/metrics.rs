use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus exporter and register all application metrics.
/// Returns a `PrometheusHandle` whose `render()` method produces the
/// text/plain Prometheus scrape payload.
///
/// Safe to call multiple times (e.g. in tests) — subsequent calls return a
/// new handle but silently ignore the global recorder installation error.
pub fn init_metrics() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = match builder.install_recorder() {
        Ok(h) => h,
        Err(_) => {
            // Recorder already installed (happens in tests). Build a standalone
            // handle that still works for rendering.
            PrometheusBuilder::new().build_recorder().handle()
        }
    };

    // Pre-register counters so they appear even before the first increment.
    counter!("pending_queued_total").absolute(0);
    counter!("pending_approved_total").absolute(0);
    counter!("pending_rejected_total").absolute(0);
    counter!("orders_executed_total").absolute(0);
    counter!("orders_cancelled_total").absolute(0);
    counter!("fills_total").absolute(0);
    counter!("stop_triggers_total").absolute(0);
    counter!("stop_scans_skipped_total").absolute(0);
    counter!("pyramid_waves_filled_total").absolute(0);
    counter!("coordinator_errors_total").absolute(0);

    // Pre-register gauges at zero.
    gauge!("open_positions").set(0.0);
    gauge!("active_pyramid_sessions").set(0.0);
    gauge!("scheduled_orders").set(0.0);

    // Histogram is lazily created on first record; force creation.
    histogram!("fill_latency_seconds").record(0.0);

    handle
}
