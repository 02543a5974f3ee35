//! Magnitude regression with a bootstrap confidence interval.

use seismonet_models::{FeatureVector, MagnitudeEstimate, MagnitudeScale, SeismoError, SeismoResult};

use crate::artifact::ModelArtifact;

impl ModelArtifact {
    /// Estimate magnitude for one feature vector at significance `alpha`
    /// (default callers pass 0.05 for a 95% interval). The interval is the
    /// `[alpha/2, 1 - alpha/2]` quantile band of the artifact's held-out
    /// residuals, shifted to the point estimate and widened to always
    /// bracket it.
    pub fn estimate(
        &self,
        features: &FeatureVector,
        scale: MagnitudeScale,
        alpha: f64,
    ) -> SeismoResult<MagnitudeEstimate> {
        self.check_schema(features)?;
        if !(0.0..1.0).contains(&alpha) {
            return Err(SeismoError::Validation(format!(
                "alpha {} must lie in (0, 1)",
                alpha
            )));
        }
        if scale != self.magnitude.scale {
            return Err(SeismoError::Validation(format!(
                "artifact regresses {} magnitudes, {} requested",
                self.magnitude.scale, scale
            )));
        }

        let value = self
            .magnitude
            .weights
            .iter()
            .zip(&features.values)
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.magnitude.bias;

        let mut residuals = self.magnitude.residuals.clone();
        residuals.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let q_lo = quantile(&residuals, alpha / 2.0);
        let q_hi = quantile(&residuals, 1.0 - alpha / 2.0);

        // Residual bands not spanning zero would detach the interval from
        // the point estimate; clamp so low <= value <= high always holds.
        let low = value + q_lo.min(0.0);
        let high = value + q_hi.max(0.0);

        Ok(MagnitudeEstimate {
            value,
            low,
            high,
            scale,
        })
    }
}

/// Estimate magnitudes for a batch; each input is independent, a failure on
/// one does not affect the others.
pub fn batch_estimate(
    artifact: &ModelArtifact,
    batch: &[FeatureVector],
    scale: MagnitudeScale,
    alpha: f64,
) -> Vec<SeismoResult<MagnitudeEstimate>> {
    batch
        .iter()
        .map(|fv| artifact.estimate(fv, scale, alpha))
        .collect()
}

/// Linear-interpolated quantile over a sorted slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let i = pos.floor() as usize;
    let frac = pos - i as f64;
    if i + 1 < sorted.len() {
        sorted[i] * (1.0 - frac) + sorted[i + 1] * frac
    } else {
        sorted[sorted.len() - 1]
    }
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
    fn interval_brackets_the_point_estimate() {
        let artifact = tiny_artifact();
        let est = artifact
            .estimate(&vector_with(30.0), MagnitudeScale::Ml, 0.05)
            .unwrap();
        assert!(est.is_ordered(), "interval {:?} not ordered", est);
        assert!((est.value - 4.0).abs() < 1e-9); // 0.1 * 30 + 1.0
        assert!(est.high > est.low);
    }

    #[test]
    fn tighter_alpha_widens_the_interval() {
        let artifact = tiny_artifact();
        let wide = artifact
            .estimate(&vector_with(10.0), MagnitudeScale::Ml, 0.02)
            .unwrap();
        let narrow = artifact
            .estimate(&vector_with(10.0), MagnitudeScale::Ml, 0.5)
            .unwrap();
        assert!(wide.high - wide.low >= narrow.high - narrow.low);
    }

    #[test]
    fn scale_mismatch_rejected() {
        let artifact = tiny_artifact();
        assert!(artifact
            .estimate(&vector_with(10.0), MagnitudeScale::Mw, 0.05)
            .is_err());
    }

    #[test]
    fn batch_failures_are_independent() {
        let artifact = tiny_artifact();
        let good = vector_with(5.0);
        let bad = FeatureVector {
            schema_id: "other".to_string(),
            values: vec![0.0; 24],
        };
        let results = batch_estimate(&artifact, &[good, bad], MagnitudeScale::Ml, 0.05);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }
}
