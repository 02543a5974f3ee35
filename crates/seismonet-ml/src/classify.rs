//! Classification over the artifact's closed label set.

use seismonet_models::{EventLabel, FeatureVector, SeismoError, SeismoResult};

use crate::artifact::ModelArtifact;

/// Classifier output: the winning label and its calibrated probability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub label: EventLabel,
    pub confidence: f64,
}

impl ModelArtifact {
    /// Classify a feature vector. A schema mismatch is fatal to the call,
    /// not to the process; callers route it to the dead-letter stream and
    /// flag operators.
    pub fn classify(&self, features: &FeatureVector) -> SeismoResult<Classification> {
        self.check_schema(features)?;

        let scores: Vec<f64> = self
            .classifier
            .weights
            .iter()
            .zip(&self.classifier.bias)
            .map(|(row, b)| dot(row, &features.values) + b)
            .collect();

        // Softmax with max-shift for numeric stability.
        let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
        let sum: f64 = exps.iter().sum();

        let (best_idx, _) = exps
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .ok_or_else(|| SeismoError::Internal("empty score vector".into()))?;

        // The raw softmax probability is optimistic on out-of-distribution
        // input; the artifact's Platt parameters recalibrate the winning
        // class's logit margin.
        let p_raw = exps[best_idx] / sum;
        let margin = (p_raw / (1.0 - p_raw).max(1e-12)).ln();
        let confidence = self.classifier.calibration.apply(margin);

        Ok(Classification {
            label: self.labels[best_idx],
            confidence,
        })
    }

    pub(crate) fn check_schema(&self, features: &FeatureVector) -> SeismoResult<()> {
        if features.schema_id != self.schema_id || features.dimension() != self.dimension() {
            return Err(SeismoError::SchemaMismatch {
                expected: format!("{} (dim {})", self.schema_id, self.dimension()),
                got: format!("{} (dim {})", features.schema_id, features.dimension()),
            });
        }
        Ok(())
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::test_fixtures::tiny_artifact;
    use seismonet_models::FeatureSchema;

    fn vector_with(peak: f64) -> FeatureVector {
        let schema = FeatureSchema::v1();
        let mut values = vec![0.0; schema.dimension()];
        values[0] = peak;
        FeatureVector::new(&schema, values).unwrap()
    }

    #[test]
    fn strong_amplitude_classifies_as_earthquake() {
        let artifact = tiny_artifact();
        let result = artifact.classify(&vector_with(20.0)).unwrap();
        assert_eq!(result.label, EventLabel::Earthquake);
        assert!(result.confidence >= 0.8, "confidence {}", result.confidence);
    }

    #[test]
    fn quiet_vector_classifies_as_noise() {
        let artifact = tiny_artifact();
        let result = artifact.classify(&vector_with(0.0)).unwrap();
        assert_eq!(result.label, EventLabel::Noise);
        assert!((0.0..=1.0).contains(&result.confidence));
    }

    #[test]
    fn schema_mismatch_is_fatal_to_the_call() {
        let artifact = tiny_artifact();
        let bogus = FeatureVector {
            schema_id: "other.v2".to_string(),
            values: vec![0.0; 24],
        };
        assert!(matches!(
            artifact.classify(&bogus),
            Err(SeismoError::SchemaMismatch { .. })
        ));
    }
}
