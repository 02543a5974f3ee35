//! Catalog service client (GeoJSON event feed).

use std::time::Instant;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use seismonet_models::{CatalogEvent, Magnitude, MagnitudeScale, SeismoError, SeismoResult};

use crate::cache::ResponseCache;
use crate::resilience::{ClientConfig, ResilientCaller};

/// Geographic bounding box filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl BoundingBox {
    fn validate(&self) -> SeismoResult<()> {
        if self.min_latitude >= self.max_latitude
            || self.min_longitude >= self.max_longitude
            || !(-90.0..=90.0).contains(&self.min_latitude)
            || !(-90.0..=90.0).contains(&self.max_latitude)
            || !(-180.0..=180.0).contains(&self.min_longitude)
            || !(-180.0..=180.0).contains(&self.max_longitude)
        {
            return Err(SeismoError::Validation("malformed bounding box".into()));
        }
        Ok(())
    }
}

/// Event search filters.
#[derive(Debug, Clone)]
pub struct EventQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub bbox: Option<BoundingBox>,
    pub min_magnitude: Option<f64>,
    pub max_magnitude: Option<f64>,
}

impl EventQuery {
    fn validate(&self) -> SeismoResult<()> {
        if self.start >= self.end {
            return Err(SeismoError::Validation(format!(
                "empty time range [{}, {})",
                self.start, self.end
            )));
        }
        if let Some(bbox) = &self.bbox {
            bbox.validate()?;
        }
        Ok(())
    }

    /// Canonical query string: sorted keys, fixed formatting. Doubles as
    /// the cache key and the outbound query.
    fn canonical_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("endtime".to_string(), self.end.to_rfc3339()),
            ("format".to_string(), "geojson".to_string()),
            ("starttime".to_string(), self.start.to_rfc3339()),
        ];
        if let Some(m) = self.min_magnitude {
            params.push(("minmagnitude".to_string(), format!("{}", m)));
        }
        if let Some(m) = self.max_magnitude {
            params.push(("maxmagnitude".to_string(), format!("{}", m)));
        }
        if let Some(b) = &self.bbox {
            params.push(("minlatitude".to_string(), format!("{}", b.min_latitude)));
            params.push(("maxlatitude".to_string(), format!("{}", b.max_latitude)));
            params.push(("minlongitude".to_string(), format!("{}", b.min_longitude)));
            params.push(("maxlongitude".to_string(), format!("{}", b.max_longitude)));
        }
        params.sort();
        params
    }
}

// GeoJSON response shape (the subset the pipeline consumes).
#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    id: String,
    properties: FeatureProperties,
    geometry: FeatureGeometry,
}

#[derive(Debug, Deserialize)]
struct FeatureProperties {
    /// Milliseconds since epoch
    time: i64,
    mag: Option<f64>,
    #[serde(rename = "magType")]
    mag_type: Option<String>,
    net: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FeatureGeometry {
    /// `[longitude, latitude, depth_km]`
    coordinates: Vec<f64>,
}

/// Client for the external event catalog.
pub struct CatalogClient {
    http: reqwest::Client,
    base_url: String,
    caller: ResilientCaller,
    cache: ResponseCache,
}

impl CatalogClient {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            caller: ResilientCaller::new("catalog", config),
            cache: ResponseCache::new(std::time::Duration::from_millis(config.cache_ttl_ms)),
        }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Fetch events matching the query, de-duplicated by catalog id and
    /// ordered by origin time ascending.
    pub async fn fetch_events(&self, query: &EventQuery) -> SeismoResult<Vec<CatalogEvent>> {
        self.fetch_events_with_deadline(query, self.caller.default_deadline())
            .await
    }

    pub async fn fetch_events_with_deadline(
        &self,
        query: &EventQuery,
        deadline: Instant,
    ) -> SeismoResult<Vec<CatalogEvent>> {
        query.validate()?;
        let params = query.canonical_params();
        let cache_key = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        // Cache before bucket: hits never consume tokens.
        let body = if let Some(cached) = self.cache.get(&cache_key) {
            cached
        } else {
            let bytes = self
                .caller
                .call(deadline, || self.get_query(&params))
                .await?;
            self.cache.put(cache_key, bytes.clone());
            bytes
        };

        let collection: FeatureCollection = serde_json::from_slice(&body)
            .map_err(|e| SeismoError::Validation(format!("catalog response parse: {}", e)))?;

        let mut events = Vec::with_capacity(collection.features.len());
        let mut seen = std::collections::HashSet::new();
        for feature in collection.features {
            match parse_feature(feature) {
                Ok(ev) => {
                    if seen.insert(ev.catalog_id.clone()) {
                        events.push(ev);
                    }
                }
                Err(e) => warn!("skipping malformed catalog feature: {}", e),
            }
        }
        events.sort_by_key(|e| e.origin_time);
        info!(count = events.len(), "catalog events fetched");
        Ok(events)
    }

    /// Fetch one event by catalog id. Missing ids surface as `NotFound`.
    pub async fn fetch_event(&self, id: &str) -> SeismoResult<CatalogEvent> {
        if id.trim().is_empty() {
            return Err(SeismoError::Validation("empty event id".into()));
        }
        let params = vec![
            ("eventid".to_string(), id.to_string()),
            ("format".to_string(), "geojson".to_string()),
        ];
        let deadline = self.caller.default_deadline();
        let body = self
            .caller
            .call(deadline, || self.get_query(&params))
            .await?;

        // Single-event queries return a bare Feature.
        let feature: Feature = serde_json::from_slice(&body)
            .map_err(|e| SeismoError::Validation(format!("catalog response parse: {}", e)))?;
        parse_feature(feature)
    }

    /// Events from the trailing `hours`, at or above `min_magnitude`.
    pub async fn fetch_recent(
        &self,
        hours: i64,
        min_magnitude: f64,
    ) -> SeismoResult<Vec<CatalogEvent>> {
        let end = Utc::now();
        self.fetch_events(&EventQuery {
            start: end - chrono::Duration::hours(hours),
            end,
            bbox: None,
            min_magnitude: Some(min_magnitude),
            max_magnitude: None,
        })
        .await
    }

    /// Significant events from the trailing `days`.
    pub async fn fetch_significant(
        &self,
        days: i64,
        min_magnitude: f64,
    ) -> SeismoResult<Vec<CatalogEvent>> {
        let end = Utc::now();
        self.fetch_events(&EventQuery {
            start: end - chrono::Duration::days(days),
            end,
            bbox: None,
            min_magnitude: Some(min_magnitude),
            max_magnitude: None,
        })
        .await
    }

    async fn get_query(&self, params: &[(String, String)]) -> SeismoResult<Vec<u8>> {
        let response = self
            .http
            .get(&self.base_url)
            .query(params)
            .send()
            .await
            .map_err(|e| SeismoError::Transient(format!("catalog request: {}", e)))?;
        classify_response(response).await
    }
}

/// Map an HTTP response onto the error taxonomy: 2xx passes, 429 becomes
/// `RateLimited` honoring Retry-After, other 4xx are permanent, 5xx are
/// transient.
pub(crate) async fn classify_response(response: reqwest::Response) -> SeismoResult<Vec<u8>> {
    let status = response.status();
    if status.is_success() {
        return response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| SeismoError::Transient(format!("body read: {}", e)));
    }

    if status.as_u16() == 429 {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(1);
        return Err(SeismoError::RateLimited {
            retry_after: std::time::Duration::from_secs(retry_after),
        });
    }

    let message = response.text().await.unwrap_or_default();
    if status.as_u16() == 404 {
        return Err(SeismoError::NotFound(
            message.chars().take(200).collect::<String>(),
        ));
    }
    if status.is_client_error() {
        Err(SeismoError::Validation(format!(
            "{}: {}",
            status,
            message.chars().take(200).collect::<String>()
        )))
    } else {
        Err(SeismoError::Transient(format!("{}", status)))
    }
}

fn parse_feature(feature: Feature) -> SeismoResult<CatalogEvent> {
    if feature.geometry.coordinates.len() < 3 {
        return Err(SeismoError::Validation(format!(
            "feature {} has {} coordinates, need 3",
            feature.id,
            feature.geometry.coordinates.len()
        )));
    }
    let longitude = feature.geometry.coordinates[0];
    let latitude = feature.geometry.coordinates[1];
    let depth_km = feature.geometry.coordinates[2];

    let origin_time = Utc
        .timestamp_millis_opt(feature.properties.time)
        .single()
        .ok_or_else(|| {
            SeismoError::Validation(format!(
                "feature {} has unrepresentable time {}",
                feature.id, feature.properties.time
            ))
        })?;

    let mag_value = feature
        .properties
        .mag
        .ok_or_else(|| SeismoError::Validation(format!("feature {} missing magnitude", feature.id)))?;
    let scale = feature
        .properties
        .mag_type
        .as_deref()
        .and_then(MagnitudeScale::parse)
        .unwrap_or(MagnitudeScale::Ml);

    // Agency: the `net` property, else the leading letters of the id.
    let agency = feature.properties.net.clone().unwrap_or_else(|| {
        feature
            .id
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect()
    });

    Ok(CatalogEvent {
        catalog_id: feature.id,
        origin_time,
        latitude,
        longitude,
        depth_km,
        magnitude: Magnitude {
            value: mag_value,
            scale,
        },
        agency,
        raw: serde_json::Value::Null,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "id": "ci40111",
                "type": "Feature",
                "properties": {"time": 1767225600000, "mag": 4.2, "magType": "ml", "net": "ci"},
                "geometry": {"coordinates": [-118.0, 35.0, 10.0]}
            },
            {
                "id": "us7000m",
                "type": "Feature",
                "properties": {"time": 1767225300000, "mag": 5.6, "magType": "mww", "net": "us"},
                "geometry": {"coordinates": [142.1, 38.2, 35.0]}
            },
            {
                "id": "ci40111",
                "type": "Feature",
                "properties": {"time": 1767225600000, "mag": 4.2, "magType": "ml", "net": "ci"},
                "geometry": {"coordinates": [-118.0, 35.0, 10.0]}
            }
        ]
    }"#;

    #[test]
    fn parse_deduplicates_and_orders_by_time() {
        let collection: FeatureCollection = serde_json::from_str(FIXTURE).unwrap();
        let mut events = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for f in collection.features {
            let ev = parse_feature(f).unwrap();
            if seen.insert(ev.catalog_id.clone()) {
                events.push(ev);
            }
        }
        events.sort_by_key(|e| e.origin_time);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].catalog_id, "us7000m");
        assert_eq!(events[0].magnitude.scale, MagnitudeScale::Mw);
        assert_eq!(events[1].catalog_id, "ci40111");
        assert_eq!(events[1].agency, "ci");
        assert_eq!(events[1].depth_km, 10.0);
    }

    #[test]
    fn empty_time_range_is_rejected() {
        let now = Utc::now();
        let query = EventQuery {
            start: now,
            end: now,
            bbox: None,
            min_magnitude: None,
            max_magnitude: None,
        };
        assert!(query.validate().is_err());
    }

    #[test]
    fn inverted_bbox_is_rejected() {
        let bbox = BoundingBox {
            min_latitude: 40.0,
            max_latitude: 30.0,
            min_longitude: -120.0,
            max_longitude: -110.0,
        };
        assert!(bbox.validate().is_err());
    }

    #[test]
    fn canonical_params_are_sorted_and_stable() {
        let now = Utc.timestamp_millis_opt(1767225600000).single().unwrap();
        let query = EventQuery {
            start: now - chrono::Duration::hours(1),
            end: now,
            bbox: None,
            min_magnitude: Some(2.5),
            max_magnitude: None,
        };
        let a = query.canonical_params();
        let b = query.canonical_params();
        assert_eq!(a, b);
        let keys: Vec<_> = a.iter().map(|(k, _)| k.clone()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}
