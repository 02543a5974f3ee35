//! Mean and linear-trend removal.

use seismonet_models::WaveformSegment;

/// Detrending mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetrendMode {
    /// Subtract the sample mean
    Constant,
    /// Subtract the least-squares line through the samples
    Linear,
}

/// Remove a constant or linear trend, returning a new segment.
pub fn detrend(segment: &WaveformSegment, mode: DetrendMode) -> WaveformSegment {
    let n = segment.samples.len();
    if n == 0 {
        return segment.clone();
    }

    let out = match mode {
        DetrendMode::Constant => {
            let mean = segment.samples.iter().sum::<f64>() / n as f64;
            segment.samples.iter().map(|v| v - mean).collect()
        }
        DetrendMode::Linear => {
            // Least-squares fit y = a + b*x over x = 0..n-1.
            let nf = n as f64;
            let sx = (nf - 1.0) * nf / 2.0;
            let sxx = (nf - 1.0) * nf * (2.0 * nf - 1.0) / 6.0;
            let sy: f64 = segment.samples.iter().sum();
            let sxy: f64 = segment
                .samples
                .iter()
                .enumerate()
                .map(|(i, v)| i as f64 * v)
                .sum();
            let denom = nf * sxx - sx * sx;
            if denom.abs() < f64::EPSILON {
                let mean = sy / nf;
                segment.samples.iter().map(|v| v - mean).collect()
            } else {
                let b = (nf * sxy - sx * sy) / denom;
                let a = (sy - b * sx) / nf;
                segment
                    .samples
                    .iter()
                    .enumerate()
                    .map(|(i, v)| v - (a + b * i as f64))
                    .collect()
            }
        }
    };

    segment.with_samples(out)
}
