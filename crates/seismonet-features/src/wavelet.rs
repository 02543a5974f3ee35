//! Discrete wavelet transform detail energies.
//!
//! A pyramid decomposition with Daubechies filters: at each level the
//! approximation is convolved with the low/high decomposition filters and
//! downsampled by two; the detail energy per level is the feature. Energies
//! are normalized by the total (details + final approximation) so the six
//! outputs sum to at most one.

/// Decomposition lowpass coefficients for the supported mother wavelets.
pub fn decomposition_filters(name: &str) -> Option<Vec<f64>> {
    match name {
        // Daubechies 2 (4 taps)
        "db2" => Some(vec![
            0.482_962_913_144_690_2,
            0.836_516_303_737_469,
            0.224_143_868_041_857_35,
            -0.129_409_522_550_921_45,
        ]),
        // Daubechies 4 (8 taps)
        "db4" => Some(vec![
            0.230_377_813_308_855_2,
            0.714_846_570_552_541_5,
            0.630_880_767_929_590_4,
            -0.027_983_769_416_983_85,
            -0.187_034_811_718_881_14,
            0.030_841_381_835_986_965,
            0.032_883_011_666_982_945,
            -0.010_597_401_784_997_278,
        ]),
        _ => None,
    }
}

/// Quadrature mirror: `g[k] = (-1)^k * h[L-1-k]`.
fn highpass_from(h: &[f64]) -> Vec<f64> {
    let l = h.len();
    (0..l)
        .map(|k| {
            let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
            sign * h[l - 1 - k]
        })
        .collect()
}

/// Convolve with zero-padding and downsample by two.
fn analyze(data: &[f64], filter: &[f64]) -> Vec<f64> {
    let n = data.len();
    let l = filter.len();
    let out_len = (n + l - 1) / 2;
    let mut out = Vec::with_capacity(out_len);
    let mut i = 1usize; // odd-indexed outputs of the full convolution
    while i < n + l - 1 {
        let mut acc = 0.0;
        for (k, h) in filter.iter().enumerate() {
            if i >= k && i - k < n {
                acc += data[i - k] * h;
            }
        }
        out.push(acc);
        i += 2;
    }
    out
}

/// Per-level detail energies, normalized by total energy. Levels the signal
/// is too short to reach emit the sentinel.
pub fn level_energies(samples: &[f64], wavelet: &str, levels: usize, sentinel: f64) -> Vec<f64> {
    let lowpass = match decomposition_filters(wavelet) {
        Some(f) => f,
        None => return vec![sentinel; levels],
    };
    let highpass = highpass_from(&lowpass);

    let mut detail_energy = vec![sentinel; levels];
    let mut approx: Vec<f64> = samples.to_vec();
    let mut reached = 0usize;

    for level in 0..levels {
        if approx.len() < lowpass.len() {
            break;
        }
        let detail = analyze(&approx, &highpass);
        approx = analyze(&approx, &lowpass);
        detail_energy[level] = detail.iter().map(|v| v * v).sum();
        reached = level + 1;
    }

    let approx_energy: f64 = approx.iter().map(|v| v * v).sum();
    let total: f64 = detail_energy[..reached].iter().sum::<f64>() + approx_energy;
    if total <= f64::EPSILON {
        // A flat (all-zero) signal has no defined energy distribution.
        return vec![sentinel; levels];
    }
    for e in detail_energy[..reached].iter_mut() {
        *e /= total;
    }
    detail_energy
}
