//! Model artifact: a JSON document holding classifier weights, calibration,
//! magnitude regression weights, and the held-out residual distribution.

use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use seismonet_models::{EventLabel, MagnitudeScale, SeismoError, SeismoResult};

/// Platt scaling parameters mapping a raw score to a probability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlattCalibration {
    pub a: f64,
    pub b: f64,
}

impl PlattCalibration {
    pub fn apply(&self, score: f64) -> f64 {
        let p = 1.0 / (1.0 + (-(self.a * score + self.b)).exp());
        p.clamp(0.0, 1.0)
    }
}

/// Multinomial logistic classifier head.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierHead {
    /// Must be "logistic"; other kinds are rejected at load
    pub kind: String,
    /// One weight row per label, each of schema dimension
    pub weights: Vec<Vec<f64>>,
    /// One bias per label
    pub bias: Vec<f64>,
    pub calibration: PlattCalibration,
}

/// Linear magnitude regression head with bootstrap residuals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MagnitudeHead {
    /// One weight per schema feature
    pub weights: Vec<f64>,
    pub bias: f64,
    /// Held-out residuals (predicted - observed) used for the CI
    pub residuals: Vec<f64>,
    /// Scale the regression was trained against
    pub scale: MagnitudeScale,
}

/// Immutable, validated model artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: String,
    /// Feature schema the model expects; mismatching vectors are fatal to
    /// the call
    pub schema_id: String,
    /// Closed label set, in weight-row order
    pub labels: Vec<EventLabel>,
    pub classifier: ClassifierHead,
    pub magnitude: MagnitudeHead,
}

impl ModelArtifact {
    /// Parse and validate an artifact from JSON.
    pub fn from_json(data: &[u8]) -> SeismoResult<Self> {
        let artifact: ModelArtifact = serde_json::from_slice(data)
            .map_err(|e| SeismoError::Validation(format!("artifact parse: {}", e)))?;
        artifact.validate()?;
        Ok(artifact)
    }

    /// Load from disk, logging the content digest for reproducibility.
    pub fn load(path: &Path) -> SeismoResult<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| SeismoError::Validation(format!("artifact read {:?}: {}", path, e)))?;
        let digest = hex::encode(Sha256::digest(&bytes));
        let artifact = Self::from_json(&bytes)?;
        info!(
            version = %artifact.version,
            schema = %artifact.schema_id,
            %digest,
            "model artifact loaded"
        );
        Ok(artifact)
    }

    fn validate(&self) -> SeismoResult<()> {
        if self.classifier.kind != "logistic" {
            return Err(SeismoError::Validation(format!(
                "unsupported classifier kind '{}'",
                self.classifier.kind
            )));
        }
        if self.labels.is_empty() {
            return Err(SeismoError::Validation("artifact declares no labels".into()));
        }
        if self.classifier.weights.len() != self.labels.len()
            || self.classifier.bias.len() != self.labels.len()
        {
            return Err(SeismoError::Validation(
                "classifier weight/bias rows must match the label count".into(),
            ));
        }
        let dim = self.classifier.weights[0].len();
        if dim == 0 || self.classifier.weights.iter().any(|w| w.len() != dim) {
            return Err(SeismoError::Validation(
                "classifier weight rows have inconsistent dimensions".into(),
            ));
        }
        if self.magnitude.weights.len() != dim {
            return Err(SeismoError::Validation(format!(
                "magnitude weights ({}) do not match classifier dimension ({})",
                self.magnitude.weights.len(),
                dim
            )));
        }
        if self.magnitude.residuals.is_empty() {
            return Err(SeismoError::Validation(
                "magnitude head carries no bootstrap residuals".into(),
            ));
        }
        Ok(())
    }

    /// Feature dimension the model expects.
    pub fn dimension(&self) -> usize {
        self.classifier.weights[0].len()
    }
}

/// Process-wide slot holding the serving artifact. Readers take a cheap
/// `Arc` clone; a swap quiesces them via the write lock, replaces the
/// artifact, and resumes.
pub struct ArtifactSlot {
    inner: RwLock<Arc<ModelArtifact>>,
}

impl ArtifactSlot {
    pub fn new(artifact: ModelArtifact) -> Self {
        Self {
            inner: RwLock::new(Arc::new(artifact)),
        }
    }

    /// Current serving artifact.
    pub fn current(&self) -> Arc<ModelArtifact> {
        self.inner.read().expect("artifact slot poisoned").clone()
    }

    /// Swap in a new artifact loaded from `path`. The old artifact stays
    /// valid for in-flight calls holding its `Arc`.
    pub fn reload(&self, path: &Path) -> SeismoResult<String> {
        let fresh = ModelArtifact::load(path)?;
        let version = fresh.version.clone();
        let mut guard = self.inner.write().expect("artifact slot poisoned");
        *guard = Arc::new(fresh);
        info!(%version, "model artifact swapped");
        Ok(version)
    }
}


#[cfg(test)]
mod tests {
    use super::test_fixtures::tiny_artifact;
    use super::*;
    use std::io::Write;

    #[test]
    fn roundtrip_through_json() {
        let artifact = tiny_artifact();
        let bytes = serde_json::to_vec(&artifact).unwrap();
        let back = ModelArtifact::from_json(&bytes).unwrap();
        assert_eq!(back.version, "test-1");
        assert_eq!(back.dimension(), 24);
    }

    #[test]
    fn load_rejects_inconsistent_dimensions() {
        let mut artifact = tiny_artifact();
        artifact.magnitude.weights.pop();
        let bytes = serde_json::to_vec(&artifact).unwrap();
        assert!(ModelArtifact::from_json(&bytes).is_err());
    }

    #[test]
    fn slot_reload_swaps_the_artifact() {
        let slot = ArtifactSlot::new(tiny_artifact());
        assert_eq!(slot.current().version, "test-1");

        let mut updated = tiny_artifact();
        updated.version = "test-2".to_string();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&serde_json::to_vec(&updated).unwrap()).unwrap();

        let version = slot.reload(file.path()).unwrap();
        assert_eq!(version, "test-2");
        assert_eq!(slot.current().version, "test-2");
    }

    #[test]
    fn reload_failure_keeps_the_old_artifact() {
        let slot = ArtifactSlot::new(tiny_artifact());
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not json").unwrap();
        assert!(slot.reload(file.path()).is_err());
        assert_eq!(slot.current().version, "test-1");
    }
}
