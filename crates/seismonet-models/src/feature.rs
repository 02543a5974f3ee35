//! Versioned feature-vector schema.
//!
//! A schema fixes the ordered list of feature names and the sentinel value
//! used for undefined outcomes (e.g., dominant frequency of a flat segment).
//! Every extractor implementation must emit features in schema order;
//! `NaN` is forbidden in emitted vectors.

use serde::{Deserialize, Serialize};

use crate::error::SeismoError;

/// Identifier of the v1 production schema.
pub const FEATURE_SCHEMA_V1: &str = "seismonet.fv.v1";

/// Sentinel emitted for undefined feature outcomes.
pub const UNDEFINED_SENTINEL: f64 = -1.0;

/// Named, versioned feature layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    /// Schema identity, e.g. "seismonet.fv.v1"
    pub schema_id: String,
    /// Ordered feature names; the vector dimension is `names.len()`
    pub names: Vec<String>,
    /// Value encoding an undefined outcome (never NaN)
    pub sentinel: f64,
}

impl FeatureSchema {
    /// The v1 schema: 10 time-domain, 8 frequency-domain, 6 wavelet features.
    pub fn v1() -> Self {
        let names = [
            "peak_amplitude",
            "rms",
            "zero_crossing_rate",
            "envelope_mean",
            "envelope_variance",
            "envelope_skewness",
            "envelope_kurtosis",
            "envelope_rise_time_s",
            "envelope_decay_time_s",
            "duration_above_threshold_s",
            "dominant_frequency_hz",
            "spectral_centroid_hz",
            "spectral_bandwidth_hz",
            "spectral_entropy",
            "spectral_rolloff_hz",
            "band_power_ratio_low",
            "band_power_ratio_mid",
            "band_power_ratio_high",
            "dwt_energy_l1",
            "dwt_energy_l2",
            "dwt_energy_l3",
            "dwt_energy_l4",
            "dwt_energy_l5",
            "dwt_energy_l6",
        ];
        Self {
            schema_id: FEATURE_SCHEMA_V1.to_string(),
            names: names.iter().map(|s| s.to_string()).collect(),
            sentinel: UNDEFINED_SENTINEL,
        }
    }

    pub fn dimension(&self) -> usize {
        self.names.len()
    }

    /// Index of a named feature, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// Fixed-width real-valued feature vector bound to a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub schema_id: String,
    pub values: Vec<f64>,
}

impl FeatureVector {
    /// Bind values to a schema, rejecting dimension mismatches and NaN/Inf.
    pub fn new(schema: &FeatureSchema, values: Vec<f64>) -> Result<Self, SeismoError> {
        if values.len() != schema.dimension() {
            return Err(SeismoError::SchemaMismatch {
                expected: format!("{} (dim {})", schema.schema_id, schema.dimension()),
                got: format!("dim {}", values.len()),
            });
        }
        if let Some(i) = values.iter().position(|v| !v.is_finite()) {
            return Err(SeismoError::Validation(format!(
                "feature '{}' is non-finite",
                schema.names[i]
            )));
        }
        Ok(Self {
            schema_id: schema.schema_id.clone(),
            values,
        })
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_schema_has_fixed_dimension() {
        let schema = FeatureSchema::v1();
        assert_eq!(schema.dimension(), 24);
        assert_eq!(schema.index_of("rms"), Some(1));
        assert_eq!(schema.index_of("dwt_energy_l6"), Some(23));
    }

    #[test]
    fn vector_rejects_nan_and_wrong_dimension() {
        let schema = FeatureSchema::v1();
        assert!(FeatureVector::new(&schema, vec![0.0; 3]).is_err());
        let mut vals = vec![0.0; 24];
        vals[5] = f64::NAN;
        assert!(FeatureVector::new(&schema, vals).is_err());
    }
}
