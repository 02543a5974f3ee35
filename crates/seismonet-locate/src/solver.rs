//! Grid-search + Gauss-Newton weighted least-squares inversion.

use chrono::{DateTime, Utc};
use nalgebra::{DMatrix, DVector, Matrix2, SymmetricEigen};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use seismonet_models::LocationEstimate;

use crate::registry::{StationCoords, StationRegistry};
use crate::travel_time::{TravelTimeModel, KM_PER_DEG};

/// One arrival-time pick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pick {
    /// Station key (`NET.STA`), resolved through the registry
    pub station: String,
    pub arrival_time: DateTime<Utc>,
    /// Assumed pick uncertainty (1 sigma), seconds
    pub sigma_s: f64,
}

/// Locator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatorConfig {
    /// Minimum contributing stations: three for (x, y, z), one for origin time
    #[serde(default = "default_min_stations")]
    pub min_stations: usize,
    /// Coarse lattice step, degrees
    #[serde(default = "default_grid_step_deg")]
    pub grid_step_deg: f64,
    /// Half-extent of the lattice around the station centroid, degrees
    #[serde(default = "default_grid_extent_deg")]
    pub grid_extent_deg: f64,
    /// Candidate depths for the coarse search, km
    #[serde(default = "default_grid_depths_km")]
    pub grid_depths_km: Vec<f64>,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    /// Convergence threshold on the model step, km
    #[serde(default = "default_eps_km")]
    pub eps_km: f64,
    #[serde(default)]
    pub model: TravelTimeModel,
}

fn default_min_stations() -> usize {
    4
}
fn default_grid_step_deg() -> f64 {
    0.25
}
fn default_grid_extent_deg() -> f64 {
    1.5
}
fn default_grid_depths_km() -> Vec<f64> {
    vec![2.0, 5.0, 10.0, 20.0, 40.0]
}
fn default_max_iter() -> usize {
    20
}
fn default_eps_km() -> f64 {
    0.05
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            min_stations: default_min_stations(),
            grid_step_deg: default_grid_step_deg(),
            grid_extent_deg: default_grid_extent_deg(),
            grid_depths_km: default_grid_depths_km(),
            max_iter: default_max_iter(),
            eps_km: default_eps_km(),
            model: TravelTimeModel::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LocateError {
    #[error("insufficient stations: {got} picks, {required} required")]
    InsufficientStations { required: usize, got: usize },
    #[error("inversion failed to converge after {0} iterations")]
    NonConvergence(usize),
    #[error("normal equations are singular")]
    Singular,
}

struct ResolvedPick {
    coords: StationCoords,
    /// Arrival relative to the earliest pick, seconds
    t_obs: f64,
    weight: f64,
}

/// Locate a hypocenter from arrival-time picks.
pub fn locate(
    picks: &[Pick],
    registry: &StationRegistry,
    config: &LocatorConfig,
) -> Result<LocationEstimate, LocateError> {
    let base = picks
        .iter()
        .map(|p| p.arrival_time)
        .min()
        .ok_or(LocateError::InsufficientStations {
            required: config.min_stations,
            got: 0,
        })?;

    let resolved: Vec<ResolvedPick> = picks
        .iter()
        .filter_map(|p| match registry.get(&p.station) {
            Some(coords) => Some(ResolvedPick {
                coords: *coords,
                t_obs: (p.arrival_time - base).num_nanoseconds().unwrap_or(0) as f64 / 1e9,
                weight: 1.0 / p.sigma_s.max(1e-3).powi(2),
            }),
            None => {
                warn!(station = %p.station, "pick references unknown station, dropped");
                None
            }
        })
        .collect();

    if resolved.len() < config.min_stations {
        return Err(LocateError::InsufficientStations {
            required: config.min_stations,
            got: resolved.len(),
        });
    }

    let (mut lat, mut lon, mut depth, mut t0) = grid_search(&resolved, config);
    debug!(lat, lon, depth, t0, "grid-search seed");

    // Gauss-Newton on (lat, lon, depth, t0).
    let n = resolved.len();
    let mut converged = false;
    let mut normal = DMatrix::zeros(4, 4);

    for _ in 0..config.max_iter {
        let mut jac = DMatrix::zeros(n, 4);
        let mut res = DVector::zeros(n);
        let mut w = DVector::zeros(n);

        for (i, p) in resolved.iter().enumerate() {
            let tt = config.model.travel_time_s(lat, lon, depth, &p.coords);
            res[i] = p.t_obs - t0 - tt;
            w[i] = p.weight;

            // Numeric partials of the residual; dr/dm = -dtt/dm.
            let h_deg = 1e-4;
            let h_km = 1e-3;
            let d_lat = (config.model.travel_time_s(lat + h_deg, lon, depth, &p.coords)
                - config.model.travel_time_s(lat - h_deg, lon, depth, &p.coords))
                / (2.0 * h_deg);
            let d_lon = (config.model.travel_time_s(lat, lon + h_deg, depth, &p.coords)
                - config.model.travel_time_s(lat, lon - h_deg, depth, &p.coords))
                / (2.0 * h_deg);
            let d_depth = (config
                .model
                .travel_time_s(lat, lon, depth + h_km, &p.coords)
                - config
                    .model
                    .travel_time_s(lat, lon, (depth - h_km).max(0.0), &p.coords))
                / (h_km + depth.min(h_km));
            jac[(i, 0)] = -d_lat;
            jac[(i, 1)] = -d_lon;
            jac[(i, 2)] = -d_depth;
            jac[(i, 3)] = -1.0;
        }

        let wjac = DMatrix::from_fn(n, 4, |i, j| jac[(i, j)] * w[i]);
        normal = jac.transpose() * &wjac;
        let rhs = jac.transpose() * DVector::from_fn(n, |i, _| res[i] * w[i]);

        let step = solve_damped(&normal, &rhs).ok_or(LocateError::Singular)?;

        lat += step[0];
        lon += step[1];
        depth = (depth + step[2]).clamp(0.0, 800.0);
        t0 += step[3];

        let step_km = ((step[0] * KM_PER_DEG).powi(2)
            + (step[1] * KM_PER_DEG * lat.to_radians().cos()).powi(2)
            + step[2].powi(2))
        .sqrt();
        if !step_km.is_finite() {
            return Err(LocateError::NonConvergence(config.max_iter));
        }
        if step_km < config.eps_km {
            converged = true;
            break;
        }
    }

    if !converged {
        return Err(LocateError::NonConvergence(config.max_iter));
    }

    // Final residuals.
    let rms = {
        let sum: f64 = resolved
            .iter()
            .map(|p| {
                let tt = config.model.travel_time_s(lat, lon, depth, &p.coords);
                (p.t_obs - t0 - tt).powi(2)
            })
            .sum();
        (sum / n as f64).sqrt()
    };

    // Covariance of the final normal equations, projected to horizontal km.
    let cov = normal
        .try_inverse()
        .ok_or(LocateError::Singular)?;
    let s_lat = KM_PER_DEG;
    let s_lon = KM_PER_DEG * lat.to_radians().cos();
    let horizontal = Matrix2::new(
        cov[(0, 0)] * s_lat * s_lat,
        cov[(0, 1)] * s_lat * s_lon,
        cov[(1, 0)] * s_lon * s_lat,
        cov[(1, 1)] * s_lon * s_lon,
    );
    let eigen = SymmetricEigen::new(horizontal);
    let semi_major_km = eigen
        .eigenvalues
        .iter()
        .cloned()
        .fold(0.0f64, f64::max)
        .max(0.0)
        .sqrt();
    let depth_err_km = cov[(2, 2)].max(0.0).sqrt();

    Ok(LocationEstimate {
        latitude: lat,
        longitude: lon,
        depth_km: depth,
        horizontal_err_km: semi_major_km,
        depth_err_km,
        rms_residual_s: rms,
    })
}

/// Coarse lattice search; returns `(lat, lon, depth, t0)` of the best node.
fn grid_search(picks: &[ResolvedPick], config: &LocatorConfig) -> (f64, f64, f64, f64) {
    let lat0 = picks.iter().map(|p| p.coords.latitude).sum::<f64>() / picks.len() as f64;
    let lon0 = picks.iter().map(|p| p.coords.longitude).sum::<f64>() / picks.len() as f64;

    let mut best = (lat0, lon0, config.grid_depths_km[0], 0.0);
    let mut best_misfit = f64::INFINITY;

    let steps = (config.grid_extent_deg / config.grid_step_deg).ceil() as i64;
    for i in -steps..=steps {
        for j in -steps..=steps {
            let lat = lat0 + i as f64 * config.grid_step_deg;
            let lon = lon0 + j as f64 * config.grid_step_deg;
            for &depth in &config.grid_depths_km {
                // Origin time from the median observed-minus-predicted.
                let mut offsets: Vec<f64> = picks
                    .iter()
                    .map(|p| p.t_obs - config.model.travel_time_s(lat, lon, depth, &p.coords))
                    .collect();
                offsets.sort_by(|a, b| a.partial_cmp(b).unwrap());
                let t0 = offsets[offsets.len() / 2];

                let misfit: f64 = picks
                    .iter()
                    .map(|p| {
                        let tt = config.model.travel_time_s(lat, lon, depth, &p.coords);
                        p.weight * (p.t_obs - t0 - tt).powi(2)
                    })
                    .sum();
                if misfit < best_misfit {
                    best_misfit = misfit;
                    best = (lat, lon, depth, t0);
                }
            }
        }
    }
    best
}

/// Solve the normal equations, falling back to Levenberg damping when the
/// plain system is singular (e.g., a degenerate station geometry).
fn solve_damped(normal: &DMatrix<f64>, rhs: &DVector<f64>) -> Option<DVector<f64>> {
    if let Some(step) = normal.clone().lu().solve(rhs) {
        if step.iter().all(|v| v.is_finite()) {
            return Some(step);
        }
    }
    let mut lambda = 1e-6;
    for _ in 0..8 {
        let damped = normal + DMatrix::identity(4, 4) * lambda;
        if let Some(step) = damped.lu().solve(rhs) {
            if step.iter().all(|v| v.is_finite()) {
                return Some(step);
            }
        }
        lambda *= 10.0;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_registry() -> StationRegistry {
        StationRegistry::from_entries([
            (
                "SN.NW".to_string(),
                StationCoords {
                    latitude: 35.3,
                    longitude: -118.3,
                    elevation_m: 0.0,
                },
            ),
            (
                "SN.NE".to_string(),
                StationCoords {
                    latitude: 35.3,
                    longitude: -117.7,
                    elevation_m: 0.0,
                },
            ),
            (
                "SN.SW".to_string(),
                StationCoords {
                    latitude: 34.7,
                    longitude: -118.3,
                    elevation_m: 0.0,
                },
            ),
            (
                "SN.SE".to_string(),
                StationCoords {
                    latitude: 34.6,
                    longitude: -117.6,
                    elevation_m: 0.0,
                },
            ),
        ])
    }

    /// Synthetic picks consistent with a known source, plus fixed
    /// perturbations standing in for sigma = 0.05 s pick noise.
    fn synthetic_picks(registry: &StationRegistry) -> Vec<Pick> {
        let model = TravelTimeModel::default();
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let noise = [0.03, -0.04, 0.05, -0.02];
        ["SN.NW", "SN.NE", "SN.SW", "SN.SE"]
            .iter()
            .zip(noise)
            .map(|(key, dt)| {
                let coords = registry.get(key).unwrap();
                let tt = model.travel_time_s(35.0, -118.0, 10.0, coords);
                Pick {
                    station: key.to_string(),
                    arrival_time: t0
                        + chrono::Duration::nanoseconds(((tt + dt) * 1e9).round() as i64),
                    sigma_s: 0.05,
                }
            })
            .collect()
    }

    #[test]
    fn four_station_inversion_recovers_the_source() {
        let registry = test_registry();
        let picks = synthetic_picks(&registry);

        let loc = locate(&picks, &registry, &LocatorConfig::default()).unwrap();

        let horizontal_km = crate::travel_time::horizontal_km(
            35.0,
            -118.0,
            &StationCoords {
                latitude: loc.latitude,
                longitude: loc.longitude,
                elevation_m: 0.0,
            },
        );
        assert!(horizontal_km < 5.0, "horizontal miss {} km", horizontal_km);
        assert!((loc.depth_km - 10.0).abs() < 8.0, "depth {}", loc.depth_km);
        assert!(loc.rms_residual_s < 0.1, "rms {}", loc.rms_residual_s);
        assert!(loc.horizontal_err_km > 0.0);
        assert!(loc.depth_err_km > 0.0);
    }

    #[test]
    fn below_minimum_stations_is_rejected() {
        let registry = test_registry();
        let picks: Vec<Pick> = synthetic_picks(&registry).into_iter().take(3).collect();
        assert!(matches!(
            locate(&picks, &registry, &LocatorConfig::default()),
            Err(LocateError::InsufficientStations { required: 4, got: 3 })
        ));
    }

    #[test]
    fn unknown_stations_are_dropped_before_the_count() {
        let registry = test_registry();
        let mut picks = synthetic_picks(&registry);
        picks[0].station = "XX.BOGUS".to_string();
        assert!(matches!(
            locate(&picks, &registry, &LocatorConfig::default()),
            Err(LocateError::InsufficientStations { .. })
        ));
    }

    #[test]
    fn noise_free_picks_give_tiny_residuals() {
        let registry = test_registry();
        let model = TravelTimeModel::default();
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let picks: Vec<Pick> = ["SN.NW", "SN.NE", "SN.SW", "SN.SE"]
            .iter()
            .map(|key| {
                let tt = model.travel_time_s(35.0, -118.0, 10.0, registry.get(key).unwrap());
                Pick {
                    station: key.to_string(),
                    arrival_time: t0
                        + chrono::Duration::nanoseconds((tt * 1e9).round() as i64),
                    sigma_s: 0.05,
                }
            })
            .collect();

        let loc = locate(&picks, &registry, &LocatorConfig::default()).unwrap();
        assert!(loc.rms_residual_s < 0.01);
        assert!((loc.latitude - 35.0).abs() < 0.02);
        assert!((loc.longitude + 118.0).abs() < 0.02);
    }
}
