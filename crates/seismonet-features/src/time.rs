//! Time-domain feature producers.

/// Computed time-domain features for one segment.
#[derive(Debug, Clone)]
pub struct TimeDomain {
    pub peak_amplitude: f64,
    pub rms: f64,
    /// Sign changes per sample, in [0, 1]
    pub zero_crossing_rate: f64,
    pub envelope_mean: f64,
    pub envelope_variance: f64,
    pub envelope_skewness: f64,
    pub envelope_kurtosis: f64,
    pub envelope_rise_time_s: f64,
    pub envelope_decay_time_s: f64,
    pub duration_above_threshold_s: f64,
}

impl TimeDomain {
    pub fn compute(
        samples: &[f64],
        envelope: &[f64],
        rate_hz: f64,
        duration_threshold: f64,
        sentinel: f64,
    ) -> Self {
        let n = samples.len();
        let peak_amplitude = samples.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
        let rms = (samples.iter().map(|v| v * v).sum::<f64>() / n as f64).sqrt();

        let crossings = samples
            .windows(2)
            .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
            .count();
        let zero_crossing_rate = crossings as f64 / n as f64;

        let (env_mean, env_var, env_skew, env_kurt) = moments(envelope, sentinel);
        let (rise, decay) = rise_decay_times(envelope, rate_hz, sentinel);

        let duration_above_threshold_s = if peak_amplitude <= f64::EPSILON {
            sentinel
        } else {
            let threshold = duration_threshold * peak_amplitude;
            let above = samples.iter().filter(|v| v.abs() > threshold).count();
            above as f64 / rate_hz
        };

        Self {
            peak_amplitude,
            rms,
            zero_crossing_rate,
            envelope_mean: env_mean,
            envelope_variance: env_var,
            envelope_skewness: env_skew,
            envelope_kurtosis: env_kurt,
            envelope_rise_time_s: rise,
            envelope_decay_time_s: decay,
            duration_above_threshold_s,
        }
    }
}

/// First four standardized moments. Skewness/kurtosis of a constant signal
/// are undefined and yield the sentinel.
fn moments(data: &[f64], sentinel: f64) -> (f64, f64, f64, f64) {
    let n = data.len() as f64;
    let mean = data.iter().sum::<f64>() / n;
    let var = data.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    if var <= f64::EPSILON {
        return (mean, var, sentinel, sentinel);
    }
    let std = var.sqrt();
    let skew = data.iter().map(|v| ((v - mean) / std).powi(3)).sum::<f64>() / n;
    let kurt = data.iter().map(|v| ((v - mean) / std).powi(4)).sum::<f64>() / n;
    (mean, var, skew, kurt)
}

/// Envelope rise time (10% -> 90% of peak, before the peak) and decay time
/// (90% -> 10%, after the peak), in seconds. Sentinel when the crossing
/// points do not exist (e.g., a monotone or flat envelope).
fn rise_decay_times(envelope: &[f64], rate_hz: f64, sentinel: f64) -> (f64, f64) {
    let peak = envelope.iter().fold(0.0f64, |acc, v| acc.max(*v));
    if peak <= f64::EPSILON {
        return (sentinel, sentinel);
    }
    let peak_idx = envelope
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
        .map(|(i, _)| i)
        .unwrap_or(0);

    let t10 = 0.1 * peak;
    let t90 = 0.9 * peak;

    let rise = {
        let pre = &envelope[..peak_idx];
        let first_10 = pre.iter().position(|v| *v >= t10);
        let first_90 = pre.iter().position(|v| *v >= t90);
        match (first_10, first_90) {
            (Some(a), Some(b)) if b > a => (b - a) as f64 / rate_hz,
            _ => sentinel,
        }
    };

    let decay = {
        let post = &envelope[peak_idx..];
        let first_below_90 = post.iter().position(|v| *v <= t90);
        let first_below_10 = post.iter().position(|v| *v <= t10);
        match (first_below_90, first_below_10) {
            (Some(a), Some(b)) if b > a => (b - a) as f64 / rate_hz,
            _ => sentinel,
        }
    };

    (rise, decay)
}
