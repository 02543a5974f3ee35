//! # Seismonet Signal Processor
//!
//! Pure conditioning operations over waveform segments: detrending,
//! Butterworth bandpass filtering, anti-aliased resampling, edge tapering,
//! SNR, and the composite quality score.
//!
//! Every operation takes a segment by reference and returns a new segment
//! (or scalar); inputs are never mutated. All operations are deterministic.

pub mod detrend;
pub mod filter;
pub mod quality;
pub mod resample;
pub mod taper;

pub use detrend::{detrend, DetrendMode};
pub use filter::bandpass;
pub use quality::{estimate_noise_level, quality_score, snr_db, NoiseMethod};
pub use resample::resample;
pub use taper::taper_hann;
