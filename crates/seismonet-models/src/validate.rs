//! Pure structural and physical-range validators.
//!
//! A validation failure is fatal to the record, never to the pipeline:
//! callers route failed records to the dead-letter stream with the reasons.

use chrono::{DateTime, TimeZone, Utc};

use crate::catalog::CatalogEvent;
use crate::segment::WaveformSegment;

/// Accumulated reasons for rejecting one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub reasons: Vec<String>,
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reasons.join("; "))
    }
}

impl std::error::Error for ValidationFailure {}

/// Checks an accepted catalog event must pass: origin time within
/// `[1900, now + 1h]`, coordinates in range, depth in [0, 800] km,
/// magnitude in [-2, 10] with a recognized scale.
pub fn validate_catalog_event(
    ev: &CatalogEvent,
    now: DateTime<Utc>,
) -> Result<(), ValidationFailure> {
    let mut reasons = Vec::new();

    if ev.catalog_id.trim().is_empty() {
        reasons.push("catalog_id is empty".to_string());
    }

    let floor = Utc.with_ymd_and_hms(1900, 1, 1, 0, 0, 0).unwrap();
    let ceiling = now + chrono::Duration::hours(1);
    if ev.origin_time < floor || ev.origin_time > ceiling {
        reasons.push(format!(
            "origin_time {} outside [1900, now+1h]",
            ev.origin_time
        ));
    }

    if !(-90.0..=90.0).contains(&ev.latitude) {
        reasons.push(format!("latitude {} out of range", ev.latitude));
    }
    if !(-180.0..=180.0).contains(&ev.longitude) {
        reasons.push(format!("longitude {} out of range", ev.longitude));
    }
    if !(0.0..=800.0).contains(&ev.depth_km) {
        reasons.push(format!("depth {} km out of [0, 800]", ev.depth_km));
    }
    if !(-2.0..=10.0).contains(&ev.magnitude.value) {
        reasons.push(format!("magnitude {} out of [-2, 10]", ev.magnitude.value));
    }

    if reasons.is_empty() {
        Ok(())
    } else {
        Err(ValidationFailure { reasons })
    }
}

/// Checks a waveform segment must pass: sample rate in [0.1, 20000] Hz,
/// sample count consistent with duration within one sample, finite samples,
/// and gap intervals disjoint and inside the segment bounds.
pub fn validate_segment(seg: &WaveformSegment) -> Result<(), ValidationFailure> {
    let mut reasons = Vec::new();

    if !(0.1..=20_000.0).contains(&seg.sample_rate_hz) {
        reasons.push(format!(
            "sample rate {} Hz out of [0.1, 20000]",
            seg.sample_rate_hz
        ));
    }

    if seg.samples.is_empty() {
        reasons.push("segment has no samples".to_string());
    }

    if let Some(i) = seg.samples.iter().position(|v| !v.is_finite()) {
        reasons.push(format!("non-finite sample at index {}", i));
    }

    // Gap intervals must be ordered, disjoint, and strictly inside the
    // segment.
    let end = seg.end();
    let mut prev_end: Option<DateTime<Utc>> = None;
    for (i, gap) in seg.gaps.iter().enumerate() {
        if gap.start >= gap.end {
            reasons.push(format!("gap {} is empty or inverted", i));
            continue;
        }
        if gap.start < seg.start || gap.end > end {
            reasons.push(format!("gap {} extends outside the segment", i));
        }
        if let Some(pe) = prev_end {
            if gap.start < pe {
                reasons.push(format!("gap {} overlaps its predecessor", i));
            }
        }
        prev_end = Some(gap.end);
    }

    if reasons.is_empty() {
        Ok(())
    } else {
        Err(ValidationFailure { reasons })
    }
}
