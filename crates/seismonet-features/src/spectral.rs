//! Frequency-domain feature producers (FFT power spectrum).

use rustfft::{num_complex::Complex, FftPlanner};

/// Computed spectral features for one segment.
#[derive(Debug, Clone)]
pub struct SpectralFeatures {
    pub dominant_frequency_hz: f64,
    pub spectral_centroid_hz: f64,
    pub spectral_bandwidth_hz: f64,
    /// Normalized Shannon entropy of the power spectrum, in [0, 1]
    pub spectral_entropy: f64,
    /// Frequency below which 95% of the power lies
    pub spectral_rolloff_hz: f64,
    pub band_power_ratios: Vec<f64>,
}

/// One-sided power spectrum: `(frequencies, power)` for bins 1..n/2.
/// The DC bin is dropped so detrended and raw segments agree.
fn power_spectrum(samples: &[f64], rate_hz: f64) -> (Vec<f64>, Vec<f64>) {
    let n = samples.len();
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    let mut buf: Vec<Complex<f64>> = samples.iter().map(|v| Complex::new(*v, 0.0)).collect();
    fft.process(&mut buf);

    let half = n / 2;
    let df = rate_hz / n as f64;
    let freqs = (1..half).map(|i| i as f64 * df).collect();
    let power = (1..half).map(|i| buf[i].norm_sqr()).collect();
    (freqs, power)
}

impl SpectralFeatures {
    pub fn compute(
        samples: &[f64],
        rate_hz: f64,
        bands: &[(f64, f64)],
        sentinel: f64,
    ) -> Self {
        let (freqs, power) = power_spectrum(samples, rate_hz);
        let total: f64 = power.iter().sum();

        if total <= f64::EPSILON || freqs.is_empty() {
            return Self {
                dominant_frequency_hz: sentinel,
                spectral_centroid_hz: sentinel,
                spectral_bandwidth_hz: sentinel,
                spectral_entropy: sentinel,
                spectral_rolloff_hz: sentinel,
                band_power_ratios: vec![sentinel; bands.len()],
            };
        }

        let dominant_idx = power
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap_or(0);
        let dominant_frequency_hz = freqs[dominant_idx];

        let centroid = freqs
            .iter()
            .zip(&power)
            .map(|(f, p)| f * p)
            .sum::<f64>()
            / total;
        let bandwidth = (freqs
            .iter()
            .zip(&power)
            .map(|(f, p)| (f - centroid).powi(2) * p)
            .sum::<f64>()
            / total)
            .sqrt();

        let entropy = {
            let h: f64 = power
                .iter()
                .filter(|p| **p > 0.0)
                .map(|p| {
                    let q = p / total;
                    -q * q.log2()
                })
                .sum();
            h / (power.len() as f64).log2()
        };

        let rolloff = {
            let mut acc = 0.0;
            let mut f = *freqs.last().unwrap();
            for (freq, p) in freqs.iter().zip(&power) {
                acc += p;
                if acc >= 0.95 * total {
                    f = *freq;
                    break;
                }
            }
            f
        };

        let band_power_ratios = bands
            .iter()
            .map(|(lo, hi)| {
                let band: f64 = freqs
                    .iter()
                    .zip(&power)
                    .filter(|(f, _)| **f >= *lo && **f < *hi)
                    .map(|(_, p)| p)
                    .sum();
                band / total
            })
            .collect();

        Self {
            dominant_frequency_hz,
            spectral_centroid_hz: centroid,
            spectral_bandwidth_hz: bandwidth,
            spectral_entropy: entropy,
            spectral_rolloff_hz: rolloff,
            band_power_ratios,
        }
    }
}

/// Signal envelope via the analytic signal (FFT-based Hilbert transform).
pub fn hilbert_envelope(samples: &[f64]) -> Vec<f64> {
    let n = samples.len();
    if n == 0 {
        return Vec::new();
    }
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    let ifft = planner.plan_fft_inverse(n);

    let mut buf: Vec<Complex<f64>> = samples.iter().map(|v| Complex::new(*v, 0.0)).collect();
    fft.process(&mut buf);

    // Analytic-signal spectrum: double positive frequencies, zero negatives,
    // keep DC (and Nyquist for even n).
    let half = n / 2;
    for (i, v) in buf.iter_mut().enumerate() {
        if i == 0 || (n % 2 == 0 && i == half) {
            continue;
        } else if i < half || (n % 2 == 1 && i == half) {
            *v *= 2.0;
        } else {
            *v = Complex::new(0.0, 0.0);
        }
    }
    ifft.process(&mut buf);

    buf.iter().map(|c| c.norm() / n as f64).collect()
}
