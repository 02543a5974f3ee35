//! Query filters and store statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use seismonet_models::{ClassifiedEvent, EventLabel};

/// Range-query filter. All clauses are conjunctive.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilter {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub min_latitude: Option<f64>,
    pub max_latitude: Option<f64>,
    pub min_longitude: Option<f64>,
    pub max_longitude: Option<f64>,
    pub label: Option<EventLabel>,
    pub min_magnitude: Option<f64>,
}

impl EventFilter {
    /// Whether an event passes the non-time clauses (time is handled by the
    /// index range scan).
    pub fn matches(&self, event: &ClassifiedEvent) -> bool {
        if let Some(label) = self.label {
            if event.label != label {
                return false;
            }
        }
        if let Some(min_mag) = self.min_magnitude {
            if event.magnitude.value < min_mag {
                return false;
            }
        }
        let has_bbox = self.min_latitude.is_some()
            || self.max_latitude.is_some()
            || self.min_longitude.is_some()
            || self.max_longitude.is_some();
        if has_bbox {
            // An event without a location cannot satisfy a spatial filter.
            let loc = match &event.location {
                Some(l) => l,
                None => return false,
            };
            if let Some(v) = self.min_latitude {
                if loc.latitude < v {
                    return false;
                }
            }
            if let Some(v) = self.max_latitude {
                if loc.latitude > v {
                    return false;
                }
            }
            if let Some(v) = self.min_longitude {
                if loc.longitude < v {
                    return false;
                }
            }
            if let Some(v) = self.max_longitude {
                if loc.longitude > v {
                    return false;
                }
            }
        }
        true
    }
}

/// Aggregate statistics over the catalog.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub events: u64,
    pub label_counts: std::collections::HashMap<String, u64>,
    pub first_trigger: Option<DateTime<Utc>>,
    pub last_trigger: Option<DateTime<Utc>>,
    pub log_bytes: u64,
}
