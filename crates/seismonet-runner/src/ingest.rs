//! Live waveform ingestion: a poller that pulls fresh segments from the
//! waveform service and feeds the pipeline, and the `SegmentSource`
//! adapter the workers use to gather analysis windows.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use seismonet_connectors_fdsn::WaveformClient;
use seismonet_core::config::{IngestConfig, StationEntry};
use seismonet_models::{ChannelId, SeismoResult, TimeWindow, WaveformSegment};
use seismonet_pipeline::{Pipeline, SegmentSource};

fn channels_of(entry: &StationEntry) -> Vec<ChannelId> {
    let (network, station) = match entry.key.split_once('.') {
        Some(parts) => parts,
        None => return Vec::new(),
    };
    entry
        .channels
        .iter()
        .map(|code| ChannelId::new(network, station, "", code.clone()))
        .collect()
}

/// `SegmentSource` backed by the waveform client: maps station keys to
/// their configured channels and fetches the analysis window.
pub struct WaveformBackedSource {
    client: Arc<WaveformClient>,
    station_channels: HashMap<String, Vec<ChannelId>>,
}

impl WaveformBackedSource {
    pub fn new(client: Arc<WaveformClient>, stations: &[StationEntry]) -> Self {
        let station_channels = stations
            .iter()
            .map(|entry| (entry.key.clone(), channels_of(entry)))
            .collect();
        Self {
            client,
            station_channels,
        }
    }
}

#[async_trait]
impl SegmentSource for WaveformBackedSource {
    async fn fetch(
        &self,
        stations: &[String],
        window: TimeWindow,
    ) -> SeismoResult<Vec<WaveformSegment>> {
        let channels: Vec<ChannelId> = stations
            .iter()
            .filter_map(|key| self.station_channels.get(key))
            .flatten()
            .cloned()
            .collect();
        if channels.is_empty() {
            return Ok(Vec::new());
        }
        self.client
            .get_waveforms(&channels, window.start, window.end)
            .await
    }
}

/// Poll the waveform service for fresh data and drive the pipeline. Runs
/// until the shutdown flag flips. A slow pipeline backpressures here: the
/// poller's `ingest` blocks and the next poll simply starts late - data is
/// fetched further behind real time, never dropped.
pub async fn run_poller(
    client: Arc<WaveformClient>,
    stations: Vec<StationEntry>,
    config: IngestConfig,
    pipeline: Arc<Pipeline>,
    mut shutdown: watch::Receiver<bool>,
) {
    let channels: Vec<ChannelId> = stations.iter().flat_map(|s| channels_of(s)).collect();
    if channels.is_empty() {
        warn!("no channels configured, ingestion idle");
        let _ = shutdown.changed().await;
        return;
    }

    let interval = Duration::from_secs(config.poll_interval_s.max(1));
    // Trail real time by one interval so the data center has the data.
    let mut cursor: DateTime<Utc> = Utc::now() - chrono::Duration::from_std(interval).unwrap();
    info!(channels = channels.len(), "waveform ingestion started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("ingestion stopped");
                    return;
                }
            }
        }

        let now = Utc::now() - chrono::Duration::from_std(interval).unwrap();
        if now <= cursor {
            continue;
        }

        match client.get_waveforms(&channels, cursor, now).await {
            Ok(segments) => {
                let count = segments.len();
                for segment in segments {
                    if let Err(e) = pipeline.ingest(segment).await {
                        warn!("ingest failed: {}", e);
                    }
                }
                metrics::counter!("ingest_segments_total").increment(count as u64);
                cursor = now;
            }
            Err(e) => {
                // Transient upstream trouble: keep the cursor, retry the
                // same range next tick.
                warn!("waveform poll failed: {}", e);
            }
        }
    }
}
