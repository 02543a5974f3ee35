//! Anti-aliased sample-rate conversion.

use seismonet_models::{SeismoError, SeismoResult, WaveformSegment};

use crate::filter::bandpass;

/// Resample a segment to `target_rate_hz` using windowed-sinc interpolation.
///
/// Downsampling applies an anti-alias lowpass at 0.45x the target rate
/// first. Raising the rate above the original requires `allow_upsample`,
/// since upsampling fabricates no new information and is almost always a
/// configuration mistake in a live pipeline.
pub fn resample(
    segment: &WaveformSegment,
    target_rate_hz: f64,
    allow_upsample: bool,
) -> SeismoResult<WaveformSegment> {
    if target_rate_hz <= 0.0 {
        return Err(SeismoError::Validation(format!(
            "target rate {} Hz must be positive",
            target_rate_hz
        )));
    }
    if target_rate_hz > segment.sample_rate_hz && !allow_upsample {
        return Err(SeismoError::Validation(format!(
            "upsampling {} -> {} Hz requires the explicit upsample flag",
            segment.sample_rate_hz, target_rate_hz
        )));
    }
    if (target_rate_hz - segment.sample_rate_hz).abs() < 1e-9 {
        return Ok(segment.clone());
    }

    // Anti-alias before decimation. The corner sits at 0.45x the target
    // rate, leaving transition band before the new Nyquist.
    let filtered;
    let source = if target_rate_hz < segment.sample_rate_hz {
        let cutoff = 0.45 * target_rate_hz;
        let low = (cutoff / 200.0).max(1e-3);
        filtered = bandpass(segment, low, cutoff, 4)?;
        &filtered
    } else {
        segment
    };

    let ratio = source.sample_rate_hz / target_rate_hz;
    let out_len = (source.samples.len() as f64 / ratio).floor() as usize;
    let half_width = 8usize;
    let mut out = Vec::with_capacity(out_len);

    for j in 0..out_len {
        let center = j as f64 * ratio;
        let i0 = center.floor() as i64;
        let mut acc = 0.0;
        let mut norm = 0.0;
        for i in (i0 - half_width as i64)..=(i0 + half_width as i64) {
            if i < 0 || i as usize >= source.samples.len() {
                continue;
            }
            let x = center - i as f64;
            let sinc = if x.abs() < 1e-12 {
                1.0
            } else {
                let px = std::f64::consts::PI * x;
                px.sin() / px
            };
            // Hann window over the kernel support.
            let w = 0.5
                * (1.0 + (std::f64::consts::PI * x / (half_width as f64 + 1.0)).cos());
            acc += source.samples[i as usize] * sinc * w;
            norm += sinc * w;
        }
        out.push(if norm.abs() > 1e-12 { acc / norm } else { 0.0 });
    }

    let mut result = source.with_samples(out);
    result.sample_rate_hz = target_rate_hz;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use seismonet_models::ChannelId;

    fn tone(freq: f64, fs: f64, secs: f64) -> WaveformSegment {
        let n = (fs * secs) as usize;
        let samples = (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / fs).sin())
            .collect();
        WaveformSegment::new(
            ChannelId::new("SN", "TEST", "", "HHZ"),
            Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
            fs,
            samples,
        )
    }

    #[test]
    fn downsample_halves_the_count() {
        let seg = tone(2.0, 100.0, 10.0);
        let out = resample(&seg, 50.0, false).unwrap();
        assert_eq!(out.sample_rate_hz, 50.0);
        assert_eq!(out.samples.len(), 500);
        // A 2 Hz tone survives a 50 Hz rate untouched in magnitude.
        let rms = (out.samples[100..400].iter().map(|v| v * v).sum::<f64>() / 300.0).sqrt();
        assert!((rms - 1.0 / 2f64.sqrt()).abs() < 0.1);
    }

    #[test]
    fn upsample_requires_flag() {
        let seg = tone(2.0, 50.0, 2.0);
        assert!(resample(&seg, 100.0, false).is_err());
        let out = resample(&seg, 100.0, true).unwrap();
        assert_eq!(out.samples.len(), 200);
    }

    #[test]
    fn identity_rate_is_a_clone() {
        let seg = tone(2.0, 100.0, 1.0);
        let out = resample(&seg, 100.0, false).unwrap();
        assert_eq!(out.samples, seg.samples);
    }
}
