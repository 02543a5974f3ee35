//! Observability initialization.
//!
//! ## Logging policy
//! - **stdout**: WARN only, compact, human-oriented. Hard-coded; ignores
//!   RUST_LOG so interactive sessions are never flooded.
//! - **file**: INFO for seismonet crates, WARN for dependencies, honoring
//!   RUST_LOG. Daily rotation under `logs/`, non-blocking writer.
//!
//! ## Metrics
//! A Prometheus recorder is installed process-wide; the HTTP server
//! renders the exposition from the returned handle at `/metrics`.

use std::fs;
use std::path::Path;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Guards that must live as long as the process; dropping them loses
/// buffered log lines.
pub struct TracingGuards {
    _file_guard: WorkerGuard,
}

fn ensure_logs_dir() {
    let dir = Path::new("logs");
    if !dir.exists() {
        // Best effort: stdout logging still works without the directory.
        let _ = fs::create_dir_all(dir);
    }
}

/// Initialize the two-layer tracing stack. Returns guards to hold for the
/// process lifetime.
pub fn init_tracing(service_name: &str) -> TracingGuards {
    ensure_logs_dir();

    let file_appender = tracing_appender::rolling::daily("logs", format!("{}.log", service_name));
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let stdout_filter = EnvFilter::new("warn");
    let file_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("seismonet=info,warn"));

    let stdout_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_ansi(true)
        .compact()
        .with_filter(stdout_filter);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_filter(file_filter);

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .init();

    tracing::info!(
        "observability initialized for {} (stdout=WARN, file=logs/{}.log)",
        service_name,
        service_name
    );

    TracingGuards {
        _file_guard: file_guard,
    }
}

/// Install the process-wide Prometheus recorder and return the render
/// handle for the `/metrics` route.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("install metrics recorder: {}", e))
}
