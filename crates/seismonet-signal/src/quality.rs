//! SNR, noise-level estimation, and the composite quality score.

use seismonet_models::{SeismoError, SeismoResult, TimeWindow, WaveformSegment};

/// Noise-level estimation method over the leading window of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseMethod {
    /// Standard deviation
    Std,
    /// Median absolute deviation
    Mad,
    /// 90th percentile of absolute values
    Percentile,
}

fn window_slice<'a>(
    segment: &'a WaveformSegment,
    window: &TimeWindow,
) -> SeismoResult<&'a [f64]> {
    let rate = segment.sample_rate_hz;
    let to_index = |t: chrono::DateTime<chrono::Utc>| -> i64 {
        let dt = (t - segment.start).num_nanoseconds().unwrap_or(0) as f64 / 1e9;
        (dt * rate).round() as i64
    };
    let i0 = to_index(window.start);
    let i1 = to_index(window.end);
    if i0 < 0 || i1 <= i0 || i1 as usize > segment.samples.len() {
        return Err(SeismoError::Validation(format!(
            "window [{}, {}) outside segment bounds",
            window.start, window.end
        )));
    }
    Ok(&segment.samples[i0 as usize..i1 as usize])
}

fn variance(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mean = data.iter().sum::<f64>() / data.len() as f64;
    data.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / data.len() as f64
}

/// Signal-to-noise ratio in dB between two windows of the same segment:
/// `10 * log10(var(signal) / var(noise))`. A silent noise window yields
/// +inf-free saturation at 120 dB.
pub fn snr_db(
    segment: &WaveformSegment,
    signal_window: &TimeWindow,
    noise_window: &TimeWindow,
) -> SeismoResult<f64> {
    let signal = window_slice(segment, signal_window)?;
    let noise = window_slice(segment, noise_window)?;

    let noise_power = variance(noise);
    let signal_power = variance(signal);
    if noise_power <= f64::EPSILON {
        return Ok(120.0);
    }
    Ok(10.0 * (signal_power / noise_power).log10())
}

/// Estimate the noise level from the leading `window_fraction` of a segment.
pub fn estimate_noise_level(
    segment: &WaveformSegment,
    method: NoiseMethod,
    window_fraction: f64,
) -> f64 {
    let n = ((segment.samples.len() as f64) * window_fraction.clamp(0.01, 1.0)) as usize;
    let window = &segment.samples[..n.max(1).min(segment.samples.len())];

    match method {
        NoiseMethod::Std => variance(window).sqrt(),
        NoiseMethod::Mad => {
            let mut sorted: Vec<f64> = window.to_vec();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let median = sorted[sorted.len() / 2];
            let mut devs: Vec<f64> = window.iter().map(|v| (v - median).abs()).collect();
            devs.sort_by(|a, b| a.partial_cmp(b).unwrap());
            devs[devs.len() / 2]
        }
        NoiseMethod::Percentile => {
            let mut abs: Vec<f64> = window.iter().map(|v| v.abs()).collect();
            abs.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let idx = ((abs.len() as f64) * 0.9) as usize;
            abs[idx.min(abs.len() - 1)]
        }
    }
}

/// Fraction of samples sitting within 0.5% of the segment's absolute
/// maximum. A high value indicates sensor clipping.
fn saturation_fraction(segment: &WaveformSegment) -> f64 {
    let max_abs = segment
        .samples
        .iter()
        .fold(0.0f64, |acc, v| acc.max(v.abs()));
    if max_abs <= f64::EPSILON {
        return 0.0;
    }
    let threshold = max_abs * 0.995;
    let clipped = segment
        .samples
        .iter()
        .filter(|v| v.abs() >= threshold)
        .count();
    clipped as f64 / segment.samples.len() as f64
}

/// Composite quality score in [0, 1].
///
/// Weighting: 0.4 * (1 - gap fraction) + 0.3 * (1 - saturation fraction)
/// + 0.3 * snr term, where the snr term maps the ratio of overall signal
/// level to the leading-window noise level onto [0, 1] (20 dB and above
/// scores 1).
pub fn quality_score(segment: &WaveformSegment) -> f64 {
    if segment.samples.is_empty() {
        return 0.0;
    }

    let gap_term = 1.0 - segment.gap_fraction();
    let saturation_term = 1.0 - saturation_fraction(segment);

    let noise = estimate_noise_level(segment, NoiseMethod::Std, 0.1);
    let overall = variance(&segment.samples).sqrt();
    let snr_term = if noise <= f64::EPSILON {
        1.0
    } else {
        let db = 20.0 * (overall / noise).log10();
        (db / 20.0).clamp(0.0, 1.0)
    };

    (0.4 * gap_term + 0.3 * saturation_term + 0.3 * snr_term).clamp(0.0, 1.0)
}
