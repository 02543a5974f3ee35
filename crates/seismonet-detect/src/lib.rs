//! # Seismonet Event Detector
//!
//! One `TriggerDetector` per channel runs an STA/LTA state machine over
//! strictly time-ordered samples and emits candidate events:
//!
//! ```text
//! IDLE --(LTA window filled, gap-free)--> ARMED
//! ARMED --(STA/LTA >= r_on)--> TRIGGERED   (PROVISIONAL candidate emitted,
//!                                           LTA freezes)
//! TRIGGERED --(STA/LTA <= r_off, dur >= d_min)--> ARMED  confirm + emit
//! TRIGGERED --(dur > d_max)-----------------------> ARMED  confirm truncated
//! TRIGGERED --(STA/LTA <= r_off, dur < d_min)----> ARMED  reject
//! any gap: TRIGGERED -> ARMED (reject), ARMED -> IDLE
//! ```
//!
//! The provisional emission announces an open trigger; only the later
//! `Confirmed` output carries a closed event window and feeds analysis.
//!
//! After any finalization the detector is refractory for `refractory_s`:
//! no new trigger may fire, while the LTA resumes updating.

pub mod detector;

pub use detector::{DetectorConfig, DetectorOutput, DetectorState, RejectReason, TriggerDetector};
