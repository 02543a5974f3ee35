//! 1-D constant-velocity travel-time model on a local flat-earth frame.

use serde::{Deserialize, Serialize};

use crate::registry::StationCoords;

/// Kilometers per degree of latitude.
pub const KM_PER_DEG: f64 = 111.19;

/// Horizontal distance in km between a point and a station, on a local
/// equirectangular projection (adequate for regional apertures).
pub fn horizontal_km(latitude: f64, longitude: f64, station: &StationCoords) -> f64 {
    let dlat = (station.latitude - latitude) * KM_PER_DEG;
    let mean_lat = 0.5 * (station.latitude + latitude);
    let dlon = (station.longitude - longitude) * KM_PER_DEG * mean_lat.to_radians().cos();
    (dlat * dlat + dlon * dlon).sqrt()
}

/// Straight-ray constant-velocity model. The velocity is configurable; the
/// table is bundled with the locator rather than read from an external
/// file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TravelTimeModel {
    /// P-wave velocity, km/s
    pub vp_km_s: f64,
}

impl Default for TravelTimeModel {
    fn default() -> Self {
        Self { vp_km_s: 6.0 }
    }
}

impl TravelTimeModel {
    /// Predicted P travel time in seconds from a hypocenter to a station.
    pub fn travel_time_s(
        &self,
        latitude: f64,
        longitude: f64,
        depth_km: f64,
        station: &StationCoords,
    ) -> f64 {
        let horizontal = horizontal_km(latitude, longitude, station);
        let vertical = depth_km + station.elevation_m / 1000.0;
        (horizontal * horizontal + vertical * vertical).sqrt() / self.vp_km_s
    }
}
