//! # Seismonet Locator
//!
//! Inverts multi-station arrival-time picks for a hypocenter:
//! 1. coarse grid search over a lat/lon/depth lattice around the station
//!    centroid, origin time fixed by the median (observed - predicted)
//! 2. Gauss-Newton refinement by weighted least squares against a 1-D
//!    constant-velocity travel-time model on a local flat-earth frame
//! 3. termination when the model step falls under `eps_km` or the
//!    iteration cap is hit
//! 4. horizontal error ellipse and depth error from the covariance of the
//!    final normal equations
//!
//! Callers treat a large `rms_residual_s` as a low-quality location and may
//! downgrade the event's confidence.

pub mod registry;
pub mod solver;
pub mod travel_time;

pub use registry::{StationCoords, StationRegistry};
pub use solver::{locate, LocateError, LocatorConfig, Pick};
pub use travel_time::TravelTimeModel;
