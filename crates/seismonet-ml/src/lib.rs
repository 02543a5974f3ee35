//! # Seismonet Model Serving
//!
//! Loads a versioned model artifact once at startup and serves two
//! inference surfaces:
//! - `classify`: label + calibrated confidence over the closed label set
//! - `estimate`: magnitude with a bootstrap confidence interval
//!
//! The artifact is immutable after load. Hot swap goes through
//! `ArtifactSlot`, which quiesces readers, replaces the `Arc`, and
//! resumes. Training is out of scope; only serving lives here.

pub mod artifact;
pub mod classify;
pub mod magnitude;

pub use artifact::{ArtifactSlot, ModelArtifact};
pub use classify::Classification;
pub use magnitude::batch_estimate;
