//! Waveform segment and channel identity types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// SEED-style channel identity: `(network, station, location, channel)`.
///
/// Rendered as `NET.STA.LOC.CHN` (empty location code allowed, e.g.
/// `CI.PASC..BHZ`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId {
    /// Network code (e.g., "CI", "IU")
    pub network: String,
    /// Station code (e.g., "PASC")
    pub station: String,
    /// Location code, often empty ("" or "00")
    pub location: String,
    /// Channel code (e.g., "BHZ", "HHE")
    pub channel: String,
}

impl ChannelId {
    pub fn new(
        network: impl Into<String>,
        station: impl Into<String>,
        location: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            network: network.into(),
            station: station.into(),
            location: location.into(),
            channel: channel.into(),
        }
    }

    /// Station key used for locator lookups: `NET.STA`.
    pub fn station_key(&self) -> String {
        format!("{}.{}", self.network, self.station)
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.network, self.station, self.location, self.channel
        )
    }
}

/// Half-open absence interval `[start, end)` inside a segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GapInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl GapInterval {
    pub fn duration_s(&self) -> f64 {
        (self.end - self.start).num_nanoseconds().unwrap_or(0) as f64 / 1e9
    }
}

/// Producer-assigned quality flag carried with each segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    Good,
    Degraded,
    Suspect,
}

impl Default for QualityFlag {
    fn default() -> Self {
        QualityFlag::Good
    }
}

/// A finite contiguous sample sequence for one channel.
///
/// Invariant: `start + count / rate` equals the segment end; gap intervals
/// are disjoint and strictly inside `[start, end)`. Samples are physical
/// units after response correction. Downstream stages must not mutate
/// samples; processing returns new segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveformSegment {
    /// Channel identity
    pub channel: ChannelId,
    /// First sample instant (UTC, nanosecond resolution)
    pub start: DateTime<Utc>,
    /// Sample rate in Hz (positive)
    pub sample_rate_hz: f64,
    /// Sample values
    pub samples: Vec<f64>,
    /// Known absence intervals inside the segment
    #[serde(default)]
    pub gaps: Vec<GapInterval>,
    /// Producer quality flag
    #[serde(default)]
    pub quality: QualityFlag,
}

impl WaveformSegment {
    /// Construct a gap-free segment.
    pub fn new(
        channel: ChannelId,
        start: DateTime<Utc>,
        sample_rate_hz: f64,
        samples: Vec<f64>,
    ) -> Self {
        Self {
            channel,
            start,
            sample_rate_hz,
            samples,
            gaps: Vec::new(),
            quality: QualityFlag::Good,
        }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Segment end instant: `start + count / rate`.
    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::nanoseconds(self.duration_ns())
    }

    /// Segment duration in seconds.
    pub fn duration_s(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate_hz
    }

    fn duration_ns(&self) -> i64 {
        (self.samples.len() as f64 / self.sample_rate_hz * 1e9).round() as i64
    }

    /// Instant of sample `i` (may exceed the segment for `i >= len`).
    pub fn sample_instant(&self, i: usize) -> DateTime<Utc> {
        self.start + Duration::nanoseconds((i as f64 / self.sample_rate_hz * 1e9).round() as i64)
    }

    /// Fraction of the nominal duration covered by declared gaps, in [0, 1].
    pub fn gap_fraction(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let gap_s: f64 = self.gaps.iter().map(|g| g.duration_s()).sum();
        (gap_s / self.duration_s()).clamp(0.0, 1.0)
    }

    /// Clone header fields onto a new sample buffer, preserving channel,
    /// start, gaps, and quality. Used by processing stages that transform
    /// samples in place of the originals.
    pub fn with_samples(&self, samples: Vec<f64>) -> Self {
        Self {
            channel: self.channel.clone(),
            start: self.start,
            sample_rate_hz: self.sample_rate_hz,
            samples,
            gaps: self.gaps.clone(),
            quality: self.quality,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn segment_end_matches_count_over_rate() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let seg = WaveformSegment::new(
            ChannelId::new("CI", "PASC", "", "BHZ"),
            start,
            100.0,
            vec![0.0; 1000],
        );
        assert_eq!(seg.duration_s(), 10.0);
        assert_eq!((seg.end() - start).num_seconds(), 10);
    }

    #[test]
    fn channel_display_keeps_empty_location() {
        let id = ChannelId::new("CI", "PASC", "", "BHZ");
        assert_eq!(id.to_string(), "CI.PASC..BHZ");
        assert_eq!(id.station_key(), "CI.PASC");
    }

    #[test]
    fn gap_fraction_is_bounded() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let mut seg = WaveformSegment::new(
            ChannelId::new("CI", "PASC", "", "BHZ"),
            start,
            100.0,
            vec![0.0; 1000],
        );
        seg.gaps.push(GapInterval {
            start: start + chrono::Duration::seconds(2),
            end: start + chrono::Duration::seconds(3),
        });
        assert!((seg.gap_fraction() - 0.1).abs() < 1e-9);
    }
}
