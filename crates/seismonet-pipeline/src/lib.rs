//! # Seismonet Pipeline Orchestrator
//!
//! Composes detection, conditioning, feature extraction, classification,
//! magnitude estimation, and location into a concurrent streaming graph:
//!
//! ```text
//! segments --> per-channel detector task --+
//! segments --> per-channel detector task --+--> bounded work queue
//!                                               (block-on-full)
//!              worker pool: gather -> condition -> features
//!                           -> {classify, magnitude} -> locate
//!              --> sequencer: commit to the store in trigger order
//!                             within a bounded reorder window
//!              --> store tail --> alert dispatcher
//! ```
//!
//! Backpressure is blocking sends on bounded queues; seismic events are
//! never dropped silently. Per-event failures land in the dead-letter
//! stream with a machine-readable reason.

pub mod alerts;
pub mod commit;
pub mod dead_letter;
pub mod orchestrator;
pub mod worker;

pub use alerts::{AlertDispatcher, AlertRule, AlertSink, AlertsConfig};
pub use commit::WorkOutcome;
pub use dead_letter::{DeadLetter, DeadLetterRecord};
pub use orchestrator::{Pipeline, PipelineConfig, PipelineDeps, ProcessorConfig, SegmentSource};
