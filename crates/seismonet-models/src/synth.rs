//! Deterministic synthetic waveform builders.
//!
//! Shared by detector, feature, and pipeline tests so end-to-end scenarios
//! (noise floor + windowed arrival) are reproducible bit-for-bit. Noise uses
//! a fixed xorshift generator rather than a seeded RNG crate so the sample
//! sequence is stable across dependency upgrades.

use chrono::{DateTime, Utc};

use crate::segment::{ChannelId, WaveformSegment};

/// Deterministic pseudo-Gaussian noise source (sum of 4 xorshift uniforms).
pub struct NoiseSource {
    state: u64,
}

impl NoiseSource {
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed.max(1),
        }
    }

    fn next_uniform(&mut self) -> f64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        (x.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Approximately N(0, sigma^2) by central-limit over 4 uniforms.
    pub fn next_gaussian(&mut self, sigma: f64) -> f64 {
        let sum: f64 = (0..4).map(|_| self.next_uniform()).sum();
        (sum - 2.0) * sigma * (12.0f64 / 4.0).sqrt()
    }
}

/// Builder for a single-channel synthetic segment: a noise floor with
/// optional windowed sinusoid bursts.
pub struct SyntheticSegment {
    channel: ChannelId,
    start: DateTime<Utc>,
    sample_rate_hz: f64,
    duration_s: f64,
    noise_sigma: f64,
    seed: u64,
    bursts: Vec<Burst>,
}

struct Burst {
    center_s: f64,
    duration_s: f64,
    amplitude: f64,
    frequency_hz: f64,
    /// Linear attack/release length; 0 selects a full Hann window
    ramp_s: f64,
}

impl SyntheticSegment {
    pub fn new(channel: ChannelId, start: DateTime<Utc>, sample_rate_hz: f64) -> Self {
        Self {
            channel,
            start,
            sample_rate_hz,
            duration_s: 60.0,
            noise_sigma: 1.0,
            seed: 42,
            bursts: Vec::new(),
        }
    }

    pub fn duration_s(mut self, d: f64) -> Self {
        self.duration_s = d;
        self
    }

    pub fn noise_sigma(mut self, sigma: f64) -> Self {
        self.noise_sigma = sigma;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Add a Hann-windowed sinusoid burst centered at `center_s`.
    pub fn burst(mut self, center_s: f64, duration_s: f64, amplitude: f64, frequency_hz: f64) -> Self {
        self.bursts.push(Burst {
            center_s,
            duration_s,
            amplitude,
            frequency_hz,
            ramp_s: 0.0,
        });
        self
    }

    /// Add a trapezoid-windowed burst with linear attack/release of
    /// `ramp_s`. Sharp onsets are what trigger detectors see from real
    /// arrivals; the Hann burst above rises too slowly for timing tests.
    pub fn burst_with_ramp(
        mut self,
        center_s: f64,
        duration_s: f64,
        amplitude: f64,
        frequency_hz: f64,
        ramp_s: f64,
    ) -> Self {
        self.bursts.push(Burst {
            center_s,
            duration_s,
            amplitude,
            frequency_hz,
            ramp_s: ramp_s.max(1e-6),
        });
        self
    }

    pub fn build(self) -> WaveformSegment {
        let n = (self.duration_s * self.sample_rate_hz).round() as usize;
        let mut noise = NoiseSource::new(self.seed);
        let mut samples: Vec<f64> = (0..n)
            .map(|_| noise.next_gaussian(self.noise_sigma))
            .collect();

        for b in &self.bursts {
            let start = ((b.center_s - b.duration_s / 2.0) * self.sample_rate_hz).round() as i64;
            let len = (b.duration_s * self.sample_rate_hz).round() as i64;
            for k in 0..len {
                let i = start + k;
                if i < 0 || i as usize >= n {
                    continue;
                }
                let window = if b.ramp_s > 0.0 {
                    let t_in = k as f64 / self.sample_rate_hz;
                    let t_out = (len - k) as f64 / self.sample_rate_hz;
                    (t_in / b.ramp_s).min(t_out / b.ramp_s).clamp(0.0, 1.0)
                } else {
                    0.5 * (1.0
                        - (2.0 * std::f64::consts::PI * k as f64 / (len.max(1)) as f64).cos())
                };
                let t = i as f64 / self.sample_rate_hz;
                samples[i as usize] += b.amplitude
                    * window
                    * (2.0 * std::f64::consts::PI * b.frequency_hz * t).sin();
            }
        }

        WaveformSegment::new(self.channel, self.start, self.sample_rate_hz, samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn builder_is_deterministic() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let mk = || {
            SyntheticSegment::new(ChannelId::new("SN", "TEST", "", "HHZ"), start, 100.0)
                .duration_s(10.0)
                .burst(5.0, 1.0, 20.0, 5.0)
                .build()
        };
        assert_eq!(mk().samples, mk().samples);
    }

    #[test]
    fn burst_raises_local_amplitude() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let seg = SyntheticSegment::new(ChannelId::new("SN", "TEST", "", "HHZ"), start, 100.0)
            .duration_s(10.0)
            .burst(5.0, 1.0, 20.0, 5.0)
            .build();
        let quiet_rms: f64 =
            (seg.samples[0..200].iter().map(|v| v * v).sum::<f64>() / 200.0).sqrt();
        let burst_rms: f64 =
            (seg.samples[480..520].iter().map(|v| v * v).sum::<f64>() / 40.0).sqrt();
        assert!(burst_rms > 5.0 * quiet_rms);
    }
}
