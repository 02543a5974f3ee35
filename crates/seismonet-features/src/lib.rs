//! # Seismonet Feature Extractor
//!
//! Produces the fixed-width feature vector a schema declares, from a
//! processed waveform segment. Three producer families:
//! - time domain: amplitudes, zero crossings, envelope moments and shape
//! - frequency domain: FFT power-spectrum statistics and band-power ratios
//! - time-frequency: discrete-wavelet detail energies per level
//!
//! Extraction is deterministic: the same segment and schema id always yield
//! the identical vector. Undefined outcomes (e.g., dominant frequency of a
//! flat segment) emit the schema's sentinel, never NaN.

pub mod spectral;
pub mod time;
pub mod wavelet;

use serde::{Deserialize, Serialize};

use seismonet_models::{
    FeatureSchema, FeatureVector, SeismoError, SeismoResult, WaveformSegment, FEATURE_SCHEMA_V1,
};
use seismonet_signal::taper_hann;

/// Extraction parameters. Band edges and wavelet choice are configuration;
/// the schema fixes only the names and order of the outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Frequency bands for the power-ratio features, Hz
    #[serde(default = "default_bands")]
    pub bands: Vec<(f64, f64)>,
    /// Mother wavelet ("db2" or "db4")
    #[serde(default = "default_wavelet")]
    pub wavelet: String,
    /// Decomposition depth
    #[serde(default = "default_wavelet_levels")]
    pub wavelet_levels: usize,
    /// Taper fraction applied before the FFT
    #[serde(default = "default_taper_fraction")]
    pub taper_fraction: f64,
    /// |x| threshold for duration-above-threshold, as a fraction of peak
    #[serde(default = "default_duration_threshold")]
    pub duration_threshold: f64,
}

fn default_bands() -> Vec<(f64, f64)> {
    vec![(1.0, 3.0), (3.0, 10.0), (10.0, 20.0)]
}
fn default_wavelet() -> String {
    "db4".to_string()
}
fn default_wavelet_levels() -> usize {
    6
}
fn default_taper_fraction() -> f64 {
    0.05
}
fn default_duration_threshold() -> f64 {
    0.2
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            bands: default_bands(),
            wavelet: default_wavelet(),
            wavelet_levels: default_wavelet_levels(),
            taper_fraction: default_taper_fraction(),
            duration_threshold: default_duration_threshold(),
        }
    }
}

/// Deterministic extractor bound to one schema.
pub struct FeatureExtractor {
    schema: FeatureSchema,
    config: ExtractorConfig,
}

impl FeatureExtractor {
    /// Build an extractor for a schema id. Only `seismonet.fv.v1` is known
    /// to this build; an unknown id is a validation error, not a fallback.
    pub fn new(schema_id: &str, config: ExtractorConfig) -> SeismoResult<Self> {
        if schema_id != FEATURE_SCHEMA_V1 {
            return Err(SeismoError::Validation(format!(
                "unknown feature schema '{}'",
                schema_id
            )));
        }
        if config.bands.len() != 3 {
            return Err(SeismoError::Validation(format!(
                "schema {} requires exactly 3 bands, got {}",
                schema_id,
                config.bands.len()
            )));
        }
        if config.wavelet_levels != 6 {
            return Err(SeismoError::Validation(format!(
                "schema {} requires 6 wavelet levels, got {}",
                schema_id, config.wavelet_levels
            )));
        }
        wavelet::decomposition_filters(&config.wavelet).ok_or_else(|| {
            SeismoError::Validation(format!("unknown mother wavelet '{}'", config.wavelet))
        })?;
        Ok(Self {
            schema: FeatureSchema::v1(),
            config,
        })
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Extract the full vector in schema order.
    pub fn extract(&self, segment: &WaveformSegment) -> SeismoResult<FeatureVector> {
        if segment.samples.is_empty() {
            return Err(SeismoError::Validation("empty segment".to_string()));
        }
        let sentinel = self.schema.sentinel;
        let rate = segment.sample_rate_hz;

        let envelope = spectral::hilbert_envelope(&segment.samples);
        let td = time::TimeDomain::compute(
            &segment.samples,
            &envelope,
            rate,
            self.config.duration_threshold,
            sentinel,
        );

        let tapered = taper_hann(segment, self.config.taper_fraction);
        let fd = spectral::SpectralFeatures::compute(
            &tapered.samples,
            rate,
            &self.config.bands,
            sentinel,
        );

        let dwt = wavelet::level_energies(
            &segment.samples,
            &self.config.wavelet,
            self.config.wavelet_levels,
            sentinel,
        );

        let mut values = Vec::with_capacity(self.schema.dimension());
        values.extend_from_slice(&[
            td.peak_amplitude,
            td.rms,
            td.zero_crossing_rate,
            td.envelope_mean,
            td.envelope_variance,
            td.envelope_skewness,
            td.envelope_kurtosis,
            td.envelope_rise_time_s,
            td.envelope_decay_time_s,
            td.duration_above_threshold_s,
            fd.dominant_frequency_hz,
            fd.spectral_centroid_hz,
            fd.spectral_bandwidth_hz,
            fd.spectral_entropy,
            fd.spectral_rolloff_hz,
        ]);
        values.extend_from_slice(&fd.band_power_ratios);
        values.extend_from_slice(&dwt);

        FeatureVector::new(&self.schema, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use seismonet_models::synth::SyntheticSegment;
    use seismonet_models::ChannelId;

    fn burst_segment() -> WaveformSegment {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        SyntheticSegment::new(ChannelId::new("SN", "TEST", "", "HHZ"), start, 100.0)
            .duration_s(30.0)
            .noise_sigma(0.5)
            .burst(15.0, 5.0, 20.0, 5.0)
            .build()
    }

    #[test]
    fn extraction_is_deterministic() {
        let seg = burst_segment();
        let ex = FeatureExtractor::new(FEATURE_SCHEMA_V1, ExtractorConfig::default()).unwrap();
        let a = ex.extract(&seg).unwrap();
        let b = ex.extract(&seg).unwrap();
        assert_eq!(a.values, b.values);
    }

    #[test]
    fn burst_dominant_frequency_is_near_five_hz() {
        let seg = burst_segment();
        let ex = FeatureExtractor::new(FEATURE_SCHEMA_V1, ExtractorConfig::default()).unwrap();
        let fv = ex.extract(&seg).unwrap();
        let idx = ex.schema().index_of("dominant_frequency_hz").unwrap();
        assert!(
            (fv.values[idx] - 5.0).abs() < 1.0,
            "dominant frequency {}",
            fv.values[idx]
        );
        // The 3-10 Hz band should carry most of the power.
        let mid = ex.schema().index_of("band_power_ratio_mid").unwrap();
        let low = ex.schema().index_of("band_power_ratio_low").unwrap();
        assert!(fv.values[mid] > fv.values[low]);
    }

    #[test]
    fn flat_segment_emits_sentinels_not_nan() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let seg = WaveformSegment::new(
            ChannelId::new("SN", "TEST", "", "HHZ"),
            start,
            100.0,
            vec![0.0; 2000],
        );
        let ex = FeatureExtractor::new(FEATURE_SCHEMA_V1, ExtractorConfig::default()).unwrap();
        let fv = ex.extract(&seg).unwrap();
        assert!(fv.values.iter().all(|v| v.is_finite()));
        let idx = ex.schema().index_of("dominant_frequency_hz").unwrap();
        assert_eq!(fv.values[idx], ex.schema().sentinel);
    }

    #[test]
    fn unknown_schema_is_rejected() {
        assert!(FeatureExtractor::new("bogus.v9", ExtractorConfig::default()).is_err());
    }
}
