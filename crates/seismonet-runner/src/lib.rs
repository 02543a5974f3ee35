//! # Seismonet Runner
//!
//! Binary composition of the pipeline. Commands:
//! - `serve` - full real-time pipeline + HTTP API
//! - `fetch-catalog` - query the external catalog, validate, print JSONL
//! - `check-config` - load and validate a configuration file
//!
//! ## Exit codes
//! `0` normal shutdown, `1` configuration error, `2` unrecoverable store
//! corruption, `3` model load failure, `4` bind/listen failure.

pub mod ingest;
pub mod sinks;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use seismonet_core::config::{SubscriberEntry, SubscriberKind};
use seismonet_core::{init_metrics, init_tracing, AppConfig, Runtime};
use seismonet_models::{validate_catalog_event, SeismoError};
use seismonet_pipeline::{AlertDispatcher, AlertSink, DeadLetter, Pipeline, PipelineDeps};
use seismonet_server::{serve, ServerState};

pub const EXIT_OK: i32 = 0;
pub const EXIT_CONFIG: i32 = 1;
pub const EXIT_CORRUPTION: i32 = 2;
pub const EXIT_MODEL: i32 = 3;
pub const EXIT_BIND: i32 = 4;

#[derive(Parser, Debug)]
#[command(name = "seismonet")]
#[command(about = "Seismonet - real-time seismic event detection and classification")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the real-time pipeline and HTTP API
    Serve {
        /// Path to the configuration file
        #[arg(short, long, default_value = "configs/seismonet.toml")]
        config: PathBuf,
    },

    /// Query the external catalog and print validated events as JSONL
    FetchCatalog {
        #[arg(short, long, default_value = "configs/seismonet.toml")]
        config: PathBuf,

        /// Hours to look back
        #[arg(long, default_value_t = 24)]
        hours: i64,

        /// Minimum magnitude
        #[arg(long, default_value_t = 2.5)]
        min_magnitude: f64,
    },

    /// Load and validate a configuration file
    CheckConfig {
        #[arg(short, long, default_value = "configs/seismonet.toml")]
        config: PathBuf,
    },
}

/// Parse arguments, run, and map the outcome to an exit code.
pub fn run() -> i32 {
    let cli = Cli::parse();
    let _guards = init_tracing("seismonet");

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to build async runtime: {}", e);
            return EXIT_CONFIG;
        }
    };

    match runtime.block_on(dispatch(cli)) {
        Ok(()) => EXIT_OK,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {:#}", e);
            exit_code_for(&e)
        }
    }
}

/// Map the failure chain onto the documented exit codes.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(seismo) = cause.downcast_ref::<SeismoError>() {
            return match seismo {
                SeismoError::Corruption(_) => EXIT_CORRUPTION,
                // In startup context the only Validation failures past
                // config load are the model artifact's.
                SeismoError::Validation(_) => EXIT_MODEL,
                _ => EXIT_CONFIG,
            };
        }
        if cause.to_string().starts_with("bind ") {
            return EXIT_BIND;
        }
    }
    EXIT_CONFIG
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve { config } => run_serve(&config).await,
        Commands::FetchCatalog {
            config,
            hours,
            min_magnitude,
        } => run_fetch_catalog(&config, hours, min_magnitude).await,
        Commands::CheckConfig { config } => {
            let loaded = AppConfig::load(&config)?;
            println!(
                "ok: {} stations, {} alert rules, store at {:?}",
                loaded.stations.len(),
                loaded.alerts.rules.len(),
                loaded.store.dir
            );
            Ok(())
        }
    }
}

async fn run_serve(config_path: &std::path::Path) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path)?;
    let metrics = init_metrics()?;

    let runtime = Runtime::initialize(config.clone()).await?;
    let dead_letter = Arc::new(DeadLetter::open(&config.store.dir).await?);

    // Pipeline.
    let source = Arc::new(ingest::WaveformBackedSource::new(
        runtime.waveform.clone(),
        &config.stations,
    ));
    let pipeline = Pipeline::start(
        config.pipeline.clone(),
        PipelineDeps {
            store: runtime.store.clone(),
            artifact_slot: runtime.artifact_slot.clone(),
            source: source.clone(),
            registry: runtime.registry.clone(),
            dead_letter: dead_letter.clone(),
            detector: config.detector.clone(),
            processor: config.processor.clone(),
            extractor: config.features.extractor.clone(),
            schema_id: config.features.schema_id.clone(),
            locator: config.locator.clone(),
            magnitude_alpha: config.model.alpha,
        },
    )?;
    let pipeline = Arc::new(pipeline);

    // Shutdown plumbing.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // Alert dispatcher off the store tail.
    let subscribers = build_sinks(&config.alert_subscribers)?;
    let dispatcher = AlertDispatcher::new(config.alerts.clone(), subscribers, &config.store.dir);
    let dispatcher_handle = tokio::spawn(dispatcher.run(runtime.store.clone(), shutdown_rx.clone()));

    // Waveform ingestion poller.
    let ingest_handle = tokio::spawn(ingest::run_poller(
        runtime.waveform.clone(),
        config.stations.clone(),
        config.ingest.clone(),
        pipeline.clone(),
        shutdown_rx.clone(),
    ));

    // HTTP API.
    let server_state = Arc::new(ServerState {
        runtime: runtime.clone(),
        metrics,
    });
    let mut server_shutdown = shutdown_rx.clone();
    let bind = config.server.bind.clone();
    let mut server_handle = tokio::spawn(async move {
        serve(server_state, &bind, async move {
            let _ = server_shutdown.changed().await;
        })
        .await
    });

    runtime.mark_ready();
    info!("seismonet serving; press Ctrl+C to stop");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested, draining");
        }
        result = &mut server_handle => {
            // The server exiting on its own means a bind or serve failure;
            // tear the rest down and surface it.
            let _ = shutdown_tx.send(true);
            ingest_handle.await.ok();
            if let Ok(pipeline) = Arc::try_unwrap(pipeline) {
                pipeline.shutdown().await;
            }
            dispatcher_handle.await.ok();
            result??;
            anyhow::bail!("http server exited unexpectedly");
        }
    }
    let _ = shutdown_tx.send(true);

    ingest_handle.await.ok();
    match Arc::try_unwrap(pipeline) {
        Ok(pipeline) => pipeline.shutdown().await,
        Err(_) => error!("pipeline still referenced at shutdown"),
    }
    dispatcher_handle.await.ok();
    if let Ok(result) = server_handle.await {
        result?;
    }

    info!("shutdown complete");
    Ok(())
}

async fn run_fetch_catalog(
    config_path: &std::path::Path,
    hours: i64,
    min_magnitude: f64,
) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path)?;
    let client = seismonet_connectors_fdsn::CatalogClient::new(&config.catalog);

    let events = client.fetch_recent(hours, min_magnitude).await?;
    let now = Utc::now();
    let mut valid = 0usize;
    for event in &events {
        match validate_catalog_event(event, now) {
            Ok(()) => {
                println!("{}", serde_json::to_string(event)?);
                valid += 1;
            }
            Err(failure) => {
                tracing::warn!(id = %event.catalog_id, "rejected: {}", failure);
            }
        }
    }
    info!(total = events.len(), valid, "catalog fetch complete");
    Ok(())
}

fn build_sinks(entries: &[SubscriberEntry]) -> anyhow::Result<Vec<Arc<dyn AlertSink>>> {
    let mut sinks: Vec<Arc<dyn AlertSink>> = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry.kind {
            SubscriberKind::Log => {
                sinks.push(Arc::new(sinks::LogSink::new(&entry.name)));
            }
            SubscriberKind::Webhook => {
                if entry.url.is_empty() {
                    anyhow::bail!("webhook subscriber '{}' has no url", entry.name);
                }
                sinks.push(Arc::new(sinks::WebhookSink::new(&entry.name, &entry.url)));
            }
        }
    }
    Ok(sinks)
}
