//! Pipeline wiring: per-channel detector tasks, the bounded work queue,
//! the worker pool, and the ordered committer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use seismonet_detect::{DetectorConfig, DetectorOutput, TriggerDetector};
use seismonet_features::{ExtractorConfig, FeatureExtractor};
use seismonet_locate::{LocatorConfig, StationRegistry};
use seismonet_ml::ArtifactSlot;
use seismonet_models::{
    validate_segment, CandidateEvent, ChannelId, SeismoResult, TimeWindow, WaveformSegment,
};
use seismonet_store::EventStore;

use crate::commit::{run_committer, WorkOutcome};
use crate::dead_letter::DeadLetter;
use crate::worker::{analyze, WorkerContext};

/// Provider of raw waveform segments for an analysis window. Backed by the
/// waveform client in production and by synthetic sources in tests.
#[async_trait]
pub trait SegmentSource: Send + Sync {
    /// Segments covering `window` for every channel of the given stations.
    async fn fetch(
        &self,
        stations: &[String],
        window: TimeWindow,
    ) -> SeismoResult<Vec<WaveformSegment>>;
}

/// Conditioning settings applied by the workers (the `processor.*` keys).
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default)]
    pub bandpass: BandpassSection,
}

/// `processor.bandpass.*` keys.
#[derive(Debug, Clone, Deserialize)]
pub struct BandpassSection {
    #[serde(default = "default_bandpass_low_hz")]
    pub low_hz: f64,
    #[serde(default = "default_bandpass_high_hz")]
    pub high_hz: f64,
    #[serde(default = "default_bandpass_order")]
    pub order: usize,
}

fn default_bandpass_low_hz() -> f64 {
    1.0
}
fn default_bandpass_high_hz() -> f64 {
    10.0
}
fn default_bandpass_order() -> usize {
    4
}

impl Default for BandpassSection {
    fn default() -> Self {
        Self {
            low_hz: default_bandpass_low_hz(),
            high_hz: default_bandpass_high_hz(),
            order: default_bandpass_order(),
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            bandpass: BandpassSection::default(),
        }
    }
}

/// Orchestrator tuning (the `pipeline.*` keys).
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_reorder_window_ms")]
    pub reorder_window_ms: u64,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
}

fn default_queue_capacity() -> usize {
    64
}
fn default_reorder_window_ms() -> u64 {
    5_000
}
fn default_worker_count() -> usize {
    4
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            reorder_window_ms: default_reorder_window_ms(),
            worker_count: default_worker_count(),
        }
    }
}

/// Injected collaborators; dependencies only flow downward.
pub struct PipelineDeps {
    pub store: Arc<EventStore>,
    pub artifact_slot: Arc<ArtifactSlot>,
    pub source: Arc<dyn SegmentSource>,
    pub registry: StationRegistry,
    pub dead_letter: Arc<DeadLetter>,
    pub detector: DetectorConfig,
    pub processor: ProcessorConfig,
    pub extractor: ExtractorConfig,
    pub schema_id: String,
    pub locator: LocatorConfig,
    /// Significance level for the magnitude CI
    pub magnitude_alpha: f64,
}

type WorkItem = (u64, CandidateEvent);

/// The running pipeline. `ingest` feeds segments; `shutdown` drains
/// in-flight candidates to a terminal state before returning.
pub struct Pipeline {
    detector_config: DetectorConfig,
    channels: Mutex<HashMap<ChannelId, mpsc::Sender<WaveformSegment>>>,
    detector_handles: Mutex<Vec<JoinHandle<()>>>,
    work_tx: mpsc::Sender<WorkItem>,
    seq: Arc<AtomicU64>,
    queue_depth: Arc<AtomicI64>,
    dead_letter: Arc<DeadLetter>,
    worker_handles: Vec<JoinHandle<()>>,
    committer_handle: JoinHandle<()>,
}

impl Pipeline {
    /// Validate configuration, spin up the worker pool and committer, and
    /// return the running pipeline.
    pub fn start(config: PipelineConfig, deps: PipelineDeps) -> SeismoResult<Self> {
        deps.detector.validate()?;
        let extractor = FeatureExtractor::new(&deps.schema_id, deps.extractor.clone())?;

        let ctx = Arc::new(WorkerContext {
            source: deps.source,
            extractor,
            artifact_slot: deps.artifact_slot,
            registry: deps.registry,
            locator: deps.locator,
            processor: deps.processor,
            alpha: deps.magnitude_alpha,
        });

        let (work_tx, work_rx) = mpsc::channel::<WorkItem>(config.queue_capacity.max(1));
        let work_rx = Arc::new(Mutex::new(work_rx));
        let (result_tx, result_rx) = mpsc::channel(config.queue_capacity.max(1));
        let queue_depth = Arc::new(AtomicI64::new(0));

        let committer_handle = tokio::spawn(run_committer(
            result_rx,
            deps.store,
            deps.dead_letter.clone(),
            Duration::from_millis(config.reorder_window_ms),
        ));

        let mut worker_handles = Vec::with_capacity(config.worker_count.max(1));
        for worker_id in 0..config.worker_count.max(1) {
            worker_handles.push(tokio::spawn(worker_loop(
                worker_id,
                work_rx.clone(),
                result_tx.clone(),
                ctx.clone(),
                queue_depth.clone(),
            )));
        }
        drop(result_tx);

        info!(
            workers = config.worker_count,
            queue = config.queue_capacity,
            "pipeline started"
        );

        Ok(Self {
            detector_config: deps.detector,
            channels: Mutex::new(HashMap::new()),
            detector_handles: Mutex::new(Vec::new()),
            work_tx,
            seq: Arc::new(AtomicU64::new(0)),
            queue_depth,
            dead_letter: deps.dead_letter,
            worker_handles,
            committer_handle,
        })
    }

    /// Feed one segment. Routes to the channel's detector task, creating it
    /// on first sight. Blocks when that detector's input queue is full:
    /// backpressure reaches the caller, data is never dropped.
    pub async fn ingest(&self, segment: WaveformSegment) -> SeismoResult<()> {
        if let Err(failure) = validate_segment(&segment) {
            self.dead_letter
                .record(
                    "validate",
                    "invalid_segment",
                    format!("{}: {}", segment.channel, failure),
                    None,
                )
                .await;
            return Ok(());
        }

        let sender = {
            let mut channels = self.channels.lock().await;
            match channels.get(&segment.channel) {
                Some(tx) => tx.clone(),
                None => {
                    let (tx, rx) = mpsc::channel::<WaveformSegment>(8);
                    let handle = tokio::spawn(run_detector(
                        segment.channel.clone(),
                        rx,
                        self.detector_config.clone(),
                        self.work_tx.clone(),
                        self.seq.clone(),
                        self.queue_depth.clone(),
                        self.dead_letter.clone(),
                    ));
                    self.detector_handles.lock().await.push(handle);
                    channels.insert(segment.channel.clone(), tx.clone());
                    tx
                }
            }
        };

        sender
            .send(segment)
            .await
            .map_err(|_| seismonet_models::SeismoError::Internal("detector task gone".into()))
    }

    /// Graceful shutdown: stop accepting input, drain detectors, workers,
    /// and the committer. Every in-flight candidate ends committed or
    /// dead-lettered.
    pub async fn shutdown(self) {
        self.channels.lock().await.clear();
        let detector_handles = std::mem::take(&mut *self.detector_handles.lock().await);
        for handle in detector_handles {
            if let Err(e) = handle.await {
                error!("detector task join: {}", e);
            }
        }
        drop(self.work_tx);
        for handle in self.worker_handles {
            if let Err(e) = handle.await {
                error!("worker task join: {}", e);
            }
        }
        if let Err(e) = self.committer_handle.await {
            error!("committer join: {}", e);
        }
        info!("pipeline drained");
    }
}

async fn run_detector(
    channel: ChannelId,
    mut rx: mpsc::Receiver<WaveformSegment>,
    config: DetectorConfig,
    work_tx: mpsc::Sender<WorkItem>,
    seq: Arc<AtomicU64>,
    queue_depth: Arc<AtomicI64>,
    dead_letter: Arc<DeadLetter>,
) {
    let mut detector: Option<TriggerDetector> = None;

    while let Some(segment) = rx.recv().await {
        if detector.is_none() {
            match TriggerDetector::new(channel.clone(), segment.sample_rate_hz, config.clone()) {
                Ok(d) => detector = Some(d),
                Err(e) => {
                    error!(channel = %channel, "detector construction failed: {}", e);
                    return;
                }
            }
        }
        let det = detector.as_mut().expect("detector initialized above");

        for output in det.feed_segment(&segment) {
            match output {
                DetectorOutput::Provisional(candidate) => {
                    // Trigger-on announcement. The event window is still
                    // open, so nothing is queued for analysis yet.
                    metrics::counter!("detector_provisional_total").increment(1);
                    debug!(
                        channel = %channel,
                        ratio = candidate.trigger_ratio,
                        "trigger on at {}",
                        candidate.trigger_instant
                    );
                }
                DetectorOutput::Confirmed(candidate) => {
                    // Sequence numbers are assigned at emit time; the store
                    // commits in this order.
                    let s = seq.fetch_add(1, Ordering::SeqCst);
                    metrics::counter!("detector_confirmed_total").increment(1);
                    queue_depth.fetch_add(1, Ordering::SeqCst);
                    metrics::gauge!("pipeline_work_queue_depth")
                        .set(queue_depth.load(Ordering::SeqCst) as f64);
                    if work_tx.send((s, candidate)).await.is_err() {
                        warn!(channel = %channel, "work queue closed, stopping detector");
                        return;
                    }
                }
                DetectorOutput::Rejected { candidate, reason } => {
                    metrics::counter!("detector_rejected_total").increment(1);
                    dead_letter
                        .record(
                            "detect",
                            reason.as_str(),
                            format!(
                                "channel {} trigger at {} lasted {:.2} s",
                                channel,
                                candidate.trigger_instant,
                                candidate.duration_s()
                            ),
                            Some(candidate),
                        )
                        .await;
                }
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    work_rx: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    result_tx: mpsc::Sender<(u64, WorkOutcome)>,
    ctx: Arc<WorkerContext>,
    queue_depth: Arc<AtomicI64>,
) {
    loop {
        let item = { work_rx.lock().await.recv().await };
        match item {
            Some((seq, candidate)) => {
                queue_depth.fetch_sub(1, Ordering::SeqCst);
                metrics::gauge!("pipeline_work_queue_depth")
                    .set(queue_depth.load(Ordering::SeqCst) as f64);
                let outcome = analyze(&ctx, seq, candidate).await;
                if result_tx.send((seq, outcome)).await.is_err() {
                    error!(worker_id, "committer gone, worker exiting");
                    return;
                }
            }
            None => return,
        }
    }
}
