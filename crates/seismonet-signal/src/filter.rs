//! Butterworth bandpass filtering.
//!
//! The bandpass is realized as an order-N Butterworth highpass at the low
//! corner cascaded with an order-N Butterworth lowpass at the high corner,
//! each built from biquad (and, for odd N, one first-order) sections. When
//! the order is odd the cascade runs forward and backward over the buffer,
//! giving a zero-phase response at the cost of doubled effective order.

use seismonet_models::{SeismoError, SeismoResult, WaveformSegment};

/// One direct-form-I second-order section.
#[derive(Debug, Clone, Copy)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Biquad {
    fn lowpass(f_c: f64, fs: f64, q: f64) -> Self {
        let w0 = 2.0 * std::f64::consts::PI * f_c / fs;
        let alpha = w0.sin() / (2.0 * q);
        let cw = w0.cos();
        let a0 = 1.0 + alpha;
        Self {
            b0: (1.0 - cw) / 2.0 / a0,
            b1: (1.0 - cw) / a0,
            b2: (1.0 - cw) / 2.0 / a0,
            a1: -2.0 * cw / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    fn highpass(f_c: f64, fs: f64, q: f64) -> Self {
        let w0 = 2.0 * std::f64::consts::PI * f_c / fs;
        let alpha = w0.sin() / (2.0 * q);
        let cw = w0.cos();
        let a0 = 1.0 + alpha;
        Self {
            b0: (1.0 + cw) / 2.0 / a0,
            b1: -(1.0 + cw) / a0,
            b2: (1.0 + cw) / 2.0 / a0,
            a1: -2.0 * cw / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// First-order section folded into biquad form (b2 = a2 = 0).
    fn first_order_lowpass(f_c: f64, fs: f64) -> Self {
        let k = (std::f64::consts::PI * f_c / fs).tan();
        let norm = 1.0 / (k + 1.0);
        Self {
            b0: k * norm,
            b1: k * norm,
            b2: 0.0,
            a1: (k - 1.0) * norm,
            a2: 0.0,
        }
    }

    fn first_order_highpass(f_c: f64, fs: f64) -> Self {
        let k = (std::f64::consts::PI * f_c / fs).tan();
        let norm = 1.0 / (k + 1.0);
        Self {
            b0: norm,
            b1: -norm,
            b2: 0.0,
            a1: (k - 1.0) * norm,
            a2: 0.0,
        }
    }

    fn run(&self, data: &mut [f64]) {
        let (mut x1, mut x2, mut y1, mut y2) = (0.0, 0.0, 0.0, 0.0);
        for v in data.iter_mut() {
            let x0 = *v;
            let y0 = self.b0 * x0 + self.b1 * x1 + self.b2 * x2 - self.a1 * y1 - self.a2 * y2;
            x2 = x1;
            x1 = x0;
            y2 = y1;
            y1 = y0;
            *v = y0;
        }
    }
}

/// Butterworth pole Q values for an order-`n` cascade, plus whether a
/// trailing first-order section is needed (odd order).
fn butterworth_qs(n: usize) -> (Vec<f64>, bool) {
    let pairs = n / 2;
    let qs = (0..pairs)
        .map(|k| {
            let theta = std::f64::consts::PI * (2 * k + 1) as f64 / (2 * n) as f64;
            1.0 / (2.0 * theta.sin())
        })
        .collect();
    (qs, n % 2 == 1)
}

fn build_cascade(f_low: f64, f_high: f64, order: usize, fs: f64) -> Vec<Biquad> {
    let (qs, odd) = butterworth_qs(order);
    let mut cascade = Vec::with_capacity(order + 1);
    for &q in &qs {
        cascade.push(Biquad::highpass(f_low, fs, q));
    }
    if odd {
        cascade.push(Biquad::first_order_highpass(f_low, fs));
    }
    for &q in &qs {
        cascade.push(Biquad::lowpass(f_high, fs, q));
    }
    if odd {
        cascade.push(Biquad::first_order_lowpass(f_high, fs));
    }
    cascade
}

/// Bandpass-filter a segment with corner frequencies `(f_low, f_high)` and
/// the given Butterworth order. Requires `0 < f_low < f_high < f_nyquist`.
/// Odd orders run zero-phase (forward + backward).
pub fn bandpass(
    segment: &WaveformSegment,
    f_low: f64,
    f_high: f64,
    order: usize,
) -> SeismoResult<WaveformSegment> {
    let nyquist = segment.sample_rate_hz / 2.0;
    if order == 0 {
        return Err(SeismoError::Validation("filter order must be >= 1".into()));
    }
    if !(f_low > 0.0 && f_low < f_high && f_high < nyquist) {
        return Err(SeismoError::Validation(format!(
            "bandpass corners ({}, {}) must satisfy 0 < low < high < nyquist ({})",
            f_low, f_high, nyquist
        )));
    }

    let cascade = build_cascade(f_low, f_high, order, segment.sample_rate_hz);
    let mut data = segment.samples.clone();
    for bq in &cascade {
        bq.run(&mut data);
    }
    if order % 2 == 1 {
        data.reverse();
        for bq in &cascade {
            bq.run(&mut data);
        }
        data.reverse();
    }

    Ok(segment.with_samples(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use seismonet_models::ChannelId;

    fn tone(freq: f64, fs: f64, n: usize) -> WaveformSegment {
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

    fn rms(data: &[f64]) -> f64 {
        (data.iter().map(|v| v * v).sum::<f64>() / data.len() as f64).sqrt()
    }

    #[test]
    fn passband_tone_survives_stopband_tone_dies() {
        let in_band = tone(5.0, 100.0, 4000);
        let out_band = tone(30.0, 100.0, 4000);

        let kept = bandpass(&in_band, 1.0, 10.0, 4).unwrap();
        let killed = bandpass(&out_band, 1.0, 10.0, 4).unwrap();

        // Skip the transient at the head of the buffer.
        assert!(rms(&kept.samples[1000..]) > 0.6);
        assert!(rms(&killed.samples[1000..]) < 0.05);
    }

    #[test]
    fn corners_at_or_above_nyquist_rejected() {
        let seg = tone(5.0, 100.0, 1000);
        assert!(matches!(
            bandpass(&seg, 1.0, 50.0, 4),
            Err(SeismoError::Validation(_))
        ));
        assert!(matches!(
            bandpass(&seg, 10.0, 5.0, 4),
            Err(SeismoError::Validation(_))
        ));
        assert!(matches!(
            bandpass(&seg, 0.0, 10.0, 4),
            Err(SeismoError::Validation(_))
        ));
    }

    #[test]
    fn odd_order_runs_zero_phase() {
        // A zero-phase filter must not shift a symmetric pulse's peak.
        let fs = 100.0;
        let n = 2001;
        let samples: Vec<f64> = (0..n)
            .map(|i| {
                let t = (i as f64 - 1000.0) / fs;
                (-t * t * 8.0).exp() * (2.0 * std::f64::consts::PI * 5.0 * t).cos()
            })
            .collect();
        let seg = WaveformSegment::new(
            ChannelId::new("SN", "TEST", "", "HHZ"),
            Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
            fs,
            samples,
        );
        let out = bandpass(&seg, 1.0, 15.0, 3).unwrap();
        let peak_in = seg
            .samples
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().partial_cmp(&b.1.abs()).unwrap())
            .unwrap()
            .0;
        let peak_out = out
            .samples
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().partial_cmp(&b.1.abs()).unwrap())
            .unwrap()
            .0;
        assert!((peak_in as i64 - peak_out as i64).abs() <= 2);
    }
}
