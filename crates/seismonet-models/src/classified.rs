//! Classified event: the terminal, immutable record committed to the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::candidate::CandidateEvent;
use crate::catalog::MagnitudeScale;
use crate::feature::FeatureVector;

/// Classification label set served by every model artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLabel {
    Earthquake,
    Explosion,
    Volcanic,
    Noise,
}

impl EventLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earthquake => "earthquake",
            Self::Explosion => "explosion",
            Self::Volcanic => "volcanic",
            Self::Noise => "noise",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "earthquake" => Some(Self::Earthquake),
            "explosion" => Some(Self::Explosion),
            "volcanic" => Some(Self::Volcanic),
            "noise" => Some(Self::Noise),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Magnitude estimate with bootstrap confidence bounds.
/// Invariant: `low <= value <= high`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MagnitudeEstimate {
    pub value: f64,
    pub low: f64,
    pub high: f64,
    pub scale: MagnitudeScale,
}

impl MagnitudeEstimate {
    pub fn is_ordered(&self) -> bool {
        self.low <= self.value && self.value <= self.high
    }
}

/// Hypocenter estimate with 1-sigma uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationEstimate {
    pub latitude: f64,
    pub longitude: f64,
    pub depth_km: f64,
    /// Semi-major axis of the horizontal error ellipse, km
    pub horizontal_err_km: f64,
    pub depth_err_km: f64,
    /// Root-mean-square arrival-time residual, seconds
    pub rms_residual_s: f64,
}

/// Wall-clock stage instants recorded as the event moved through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipelineTiming {
    /// Detector emitted the confirmed candidate
    pub detected_at: DateTime<Utc>,
    /// Worker finished classification + magnitude + location
    pub analyzed_at: DateTime<Utc>,
}

impl PipelineTiming {
    /// Detection-to-analysis latency in milliseconds.
    pub fn analysis_latency_ms(&self) -> i64 {
        (self.analyzed_at - self.detected_at).num_milliseconds()
    }
}

/// The join of a confirmed candidate with its full analysis. Immutable once
/// appended to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedEvent {
    /// Store-assigned event identity
    pub event_id: Uuid,
    /// Detector-emit sequence number; the store commits in this order
    pub seq: u64,
    /// The originating detection
    pub candidate: CandidateEvent,
    /// Extracted features (fixed schema)
    pub features: FeatureVector,
    /// Classifier output
    pub label: EventLabel,
    /// Calibrated probability in [0, 1]
    pub confidence: f64,
    /// Magnitude estimate with CI
    pub magnitude: MagnitudeEstimate,
    /// Hypocenter estimate; absent when fewer than the locator minimum of
    /// stations produced usable picks
    pub location: Option<LocationEstimate>,
    /// Station keys that contributed picks
    pub stations: Vec<String>,
    /// Stage timing metadata
    pub timing: PipelineTiming,
}

impl ClassifiedEvent {
    /// Trigger instant, the store's primary ordering key.
    pub fn trigger_instant(&self) -> DateTime<Utc> {
        self.candidate.trigger_instant
    }
}
