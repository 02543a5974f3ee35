//! Cosine edge tapering.

use seismonet_models::WaveformSegment;

/// Apply a Hann taper to `fraction` of the samples at each edge, returning a
/// new segment. Applied before FFT-based analysis to suppress spectral
/// leakage from the segment boundaries.
pub fn taper_hann(segment: &WaveformSegment, fraction: f64) -> WaveformSegment {
    let n = segment.samples.len();
    let taper_len = ((n as f64) * fraction.clamp(0.0, 0.5)).floor() as usize;
    if taper_len == 0 {
        return segment.clone();
    }

    let mut out = segment.samples.clone();
    for i in 0..taper_len {
        let w = 0.5
            * (1.0
                - (std::f64::consts::PI * i as f64 / taper_len as f64).cos());
        out[i] *= w;
        out[n - 1 - i] *= w;
    }
    segment.with_samples(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use seismonet_models::ChannelId;

    #[test]
    fn edges_go_to_zero_and_middle_is_untouched() {
        let seg = WaveformSegment::new(
            ChannelId::new("SN", "TEST", "", "HHZ"),
            Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
            100.0,
            vec![1.0; 1000],
        );
        let out = taper_hann(&seg, 0.05);
        assert!(out.samples[0].abs() < 1e-12);
        assert!(out.samples[999].abs() < 1e-12);
        assert_eq!(out.samples[500], 1.0);
    }
}
