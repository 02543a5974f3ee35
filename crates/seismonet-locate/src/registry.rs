//! Station coordinate registry.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Geographic coordinates of one station.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StationCoords {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub elevation_m: f64,
}

/// Registry mapping station keys (`NET.STA`) to coordinates. Loaded from
/// configuration at startup; the locator and the orchestrator's
/// station-proximity gathering both consult it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StationRegistry {
    stations: HashMap<String, StationCoords>,
}

impl StationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (String, StationCoords)>) -> Self {
        Self {
            stations: entries.into_iter().collect(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, coords: StationCoords) {
        self.stations.insert(key.into(), coords);
    }

    pub fn get(&self, key: &str) -> Option<&StationCoords> {
        self.stations.get(key)
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &StationCoords)> {
        self.stations.iter()
    }

    /// Stations sorted by great-circle-ish distance from a point, nearest
    /// first. Used to pick the channels that participate in a location.
    pub fn nearest(&self, latitude: f64, longitude: f64) -> Vec<(&String, &StationCoords)> {
        let mut all: Vec<_> = self.stations.iter().collect();
        all.sort_by(|a, b| {
            let da = crate::travel_time::horizontal_km(latitude, longitude, a.1);
            let db = crate::travel_time::horizontal_km(latitude, longitude, b.1);
            da.partial_cmp(&db).unwrap()
        });
        all
    }
}
