//! # Seismonet Canonical Models
//!
//! Platform-wide type definitions shared by every stage of the pipeline.
//!
//! ## Contents
//! - `WaveformSegment` / `ChannelId` - finite sample sequences from the field
//! - `CatalogEvent` - external-origin earthquake records (immutable once accepted)
//! - `CandidateEvent` - internal detections with a provisional/confirmed/rejected lifecycle
//! - `FeatureSchema` / `FeatureVector` - versioned fixed-width feature layout
//! - `ClassifiedEvent` - the fully analyzed record committed to the catalog store
//! - `Alert` - deduplicated operator notifications
//! - `SeismoError` - the process-wide error taxonomy
//! - `validate` - pure structural + physical-range checks
//!
//! ## Ownership
//! Candidate events are owned by their detector until emitted; the pipeline
//! owns them until they become `ClassifiedEvent`s in the store. Waveform
//! samples are never mutated downstream of the producing client; processing
//! stages return new segments.

pub mod alert;
pub mod candidate;
pub mod catalog;
pub mod classified;
pub mod error;
pub mod feature;
pub mod segment;
pub mod synth;
pub mod validate;

pub use alert::{Alert, AlertLevel};
pub use candidate::{CandidateEvent, CandidateState, TimeWindow};
pub use catalog::{CatalogEvent, Magnitude, MagnitudeScale};
pub use classified::{ClassifiedEvent, EventLabel, LocationEstimate, MagnitudeEstimate, PipelineTiming};
pub use error::{SeismoError, SeismoResult};
pub use feature::{FeatureSchema, FeatureVector, FEATURE_SCHEMA_V1};
pub use segment::{ChannelId, GapInterval, QualityFlag, WaveformSegment};
pub use validate::{validate_catalog_event, validate_segment, ValidationFailure};
