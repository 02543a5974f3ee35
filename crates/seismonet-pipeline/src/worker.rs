//! Worker stage: turn a confirmed candidate into a classified event.
//!
//! For each candidate the worker gathers raw segments over the analysis
//! window for the stations nearest the triggering channel, conditions the
//! triggering channel's segment, extracts features, runs classification and
//! magnitude estimation in parallel, picks arrivals on the other stations,
//! and attempts a location once enough picks exist.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use seismonet_features::FeatureExtractor;
use seismonet_locate::{locate, LocateError, LocatorConfig, Pick, StationRegistry};
use seismonet_ml::ArtifactSlot;
use seismonet_models::{
    validate_segment, CandidateEvent, ClassifiedEvent, PipelineTiming, SeismoError,
    WaveformSegment,
};
use seismonet_signal::{bandpass, detrend, DetrendMode};

use crate::commit::WorkOutcome;
use crate::orchestrator::{ProcessorConfig, SegmentSource};

/// Everything a worker needs, shared across the pool.
pub struct WorkerContext {
    pub source: Arc<dyn SegmentSource>,
    pub extractor: FeatureExtractor,
    pub artifact_slot: Arc<ArtifactSlot>,
    pub registry: StationRegistry,
    pub locator: LocatorConfig,
    pub processor: ProcessorConfig,
    pub alpha: f64,
}

/// Analyze one sequenced candidate to a terminal outcome. Failures are
/// outcomes too; the sequence number must always resolve.
pub async fn analyze(ctx: &WorkerContext, seq: u64, candidate: CandidateEvent) -> WorkOutcome {
    let detected_at = Utc::now();
    let window = candidate.analysis_window();

    // Stations participating in the location, by proximity to the
    // triggering channel's station.
    let origin = match ctx.registry.get(&candidate.channel.station_key()) {
        Some(coords) => *coords,
        None => {
            return WorkOutcome::Rejected {
                candidate,
                reason: "unknown_station",
                detail: "triggering channel not in the station registry".to_string(),
            }
        }
    };
    let stations: Vec<String> = ctx
        .registry
        .nearest(origin.latitude, origin.longitude)
        .into_iter()
        .take(ctx.locator.min_stations * 2)
        .map(|(key, _)| key.clone())
        .collect();

    let segments = match ctx.source.fetch(&stations, window).await {
        Ok(segments) => segments,
        Err(e) => {
            return WorkOutcome::Rejected {
                candidate,
                reason: "segment_fetch_failed",
                detail: e.to_string(),
            }
        }
    };

    // Validation is fatal per segment, not per event; the trigger channel
    // itself must survive.
    let mut usable: Vec<WaveformSegment> = Vec::with_capacity(segments.len());
    for seg in segments {
        match validate_segment(&seg) {
            Ok(()) => usable.push(seg),
            Err(failure) => {
                warn!(channel = %seg.channel, "segment failed validation: {}", failure);
            }
        }
    }
    let Some(trigger_segment) = usable
        .iter()
        .find(|s| s.channel == candidate.channel)
        .cloned()
    else {
        return WorkOutcome::Rejected {
            candidate,
            reason: "missing_trigger_segment",
            detail: "no valid segment for the triggering channel".to_string(),
        };
    };

    // Condition the triggering channel: detrend, then bandpass.
    let conditioned = match condition(&trigger_segment, &ctx.processor) {
        Ok(seg) => seg,
        Err(e) => {
            return WorkOutcome::Rejected {
                candidate,
                reason: "conditioning_failed",
                detail: e.to_string(),
            }
        }
    };

    let features = match ctx.extractor.extract(&conditioned) {
        Ok(fv) => fv,
        Err(e) => {
            return WorkOutcome::Rejected {
                candidate,
                reason: "feature_extraction_failed",
                detail: e.to_string(),
            }
        }
    };

    // Classification and magnitude run in parallel on blocking threads;
    // both read the same immutable artifact snapshot.
    let artifact = ctx.artifact_slot.current();
    let scale = artifact.magnitude.scale;
    let alpha = ctx.alpha;
    let (class_result, mag_result) = {
        let (a1, a2) = (artifact.clone(), artifact);
        let (f1, f2) = (features.clone(), features.clone());
        let classify = tokio::task::spawn_blocking(move || a1.classify(&f1));
        let estimate = tokio::task::spawn_blocking(move || a2.estimate(&f2, scale, alpha));
        match tokio::join!(classify, estimate) {
            (Ok(c), Ok(m)) => (c, m),
            _ => {
                return WorkOutcome::Rejected {
                    candidate,
                    reason: "inference_panicked",
                    detail: "classifier or estimator task aborted".to_string(),
                }
            }
        }
    };

    let classification = match class_result {
        Ok(c) => c,
        Err(e @ SeismoError::SchemaMismatch { .. }) => {
            return WorkOutcome::Rejected {
                candidate,
                reason: "schema_mismatch",
                detail: e.to_string(),
            }
        }
        Err(e) => {
            return WorkOutcome::Rejected {
                candidate,
                reason: "classification_failed",
                detail: e.to_string(),
            }
        }
    };
    let magnitude = match mag_result {
        Ok(m) => m,
        Err(e) => {
            return WorkOutcome::Rejected {
                candidate,
                reason: "magnitude_failed",
                detail: e.to_string(),
            }
        }
    };

    // Arrival picks across the gathered stations.
    let mut picks: Vec<Pick> = Vec::new();
    for seg in &usable {
        if let Some(pick) = pick_arrival(seg, &candidate, &ctx.processor) {
            // One pick per station; the first (nearest) channel wins.
            if !picks.iter().any(|p| p.station == pick.station) {
                picks.push(pick);
            }
        }
    }

    let mut confidence = classification.confidence;
    let location = if picks.len() >= ctx.locator.min_stations {
        match locate(&picks, &ctx.registry, &ctx.locator) {
            Ok(loc) => {
                // A poor fit downgrades confidence rather than the event.
                if loc.rms_residual_s > 1.0 {
                    confidence *= 0.8;
                }
                Some(loc)
            }
            Err(e @ (LocateError::NonConvergence(_) | LocateError::Singular)) => {
                return WorkOutcome::Rejected {
                    candidate,
                    reason: "locator_non_convergence",
                    detail: e.to_string(),
                };
            }
            Err(LocateError::InsufficientStations { .. }) => None,
        }
    } else {
        debug!(
            picks = picks.len(),
            required = ctx.locator.min_stations,
            "not enough picks for a location"
        );
        None
    };

    let stations: Vec<String> = picks.iter().map(|p| p.station.clone()).collect();
    WorkOutcome::Classified(Box::new(ClassifiedEvent {
        event_id: Uuid::new_v4(),
        seq,
        candidate,
        features,
        label: classification.label,
        confidence,
        magnitude,
        location,
        stations,
        timing: PipelineTiming {
            detected_at,
            analyzed_at: Utc::now(),
        },
    }))
}

fn condition(
    segment: &WaveformSegment,
    processor: &ProcessorConfig,
) -> seismonet_models::SeismoResult<WaveformSegment> {
    let detrended = detrend(segment, DetrendMode::Linear);
    bandpass(
        &detrended,
        processor.bandpass.low_hz,
        processor.bandpass.high_hz,
        processor.bandpass.order,
    )
}

/// Simple onset picker over the full analysis window (arrivals at other
/// stations land before or after the triggering channel's own window):
/// the first sample whose amplitude exceeds 4x the leading noise level and
/// stays above for a quarter second.
fn pick_arrival(
    segment: &WaveformSegment,
    candidate: &CandidateEvent,
    processor: &ProcessorConfig,
) -> Option<Pick> {
    let conditioned = condition(segment, processor).ok()?;
    let rate = conditioned.sample_rate_hz;

    let window = candidate.analysis_window();
    let window_start = index_of(&conditioned, window.start).unwrap_or(0);
    let window_end = index_of(&conditioned, window.end).unwrap_or(conditioned.len());
    if window_start >= window_end {
        return None;
    }

    // Noise level from the data ahead of the window, falling back to the
    // segment head when the window starts at the first sample.
    let noise_end = if window_start > rate as usize {
        window_start
    } else {
        (conditioned.len() / 10).max(1)
    };
    let noise_slice = &conditioned.samples[..noise_end];
    let noise = (noise_slice.iter().map(|v| v * v).sum::<f64>() / noise_slice.len() as f64).sqrt();
    if noise <= f64::EPSILON {
        return None;
    }

    let threshold = 4.0 * noise;
    let hold = ((0.25 * rate) as usize).max(1);
    let samples = &conditioned.samples;
    let mut i = window_start;
    while i < window_end {
        if samples[i].abs() > threshold {
            let run_end = (i + hold).min(samples.len());
            let sustained = samples[i..run_end]
                .iter()
                .filter(|v| v.abs() > threshold)
                .count()
                >= (run_end - i) / 2;
            if sustained {
                return Some(Pick {
                    station: conditioned.channel.station_key(),
                    arrival_time: conditioned.sample_instant(i),
                    sigma_s: 1.0 / rate + 0.05,
                });
            }
        }
        i += 1;
    }
    None
}

fn index_of(segment: &WaveformSegment, t: DateTime<Utc>) -> Option<usize> {
    let dt: Duration = t - segment.start;
    let idx = (dt.num_nanoseconds()? as f64 / 1e9 * segment.sample_rate_hz).round() as i64;
    if idx < 0 || idx as usize >= segment.len() {
        return None;
    }
    Some(idx as usize)
}
