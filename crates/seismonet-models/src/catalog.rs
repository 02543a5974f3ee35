//! External catalog event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Magnitude scale recognized by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MagnitudeScale {
    /// Local (Richter) magnitude
    Ml,
    /// Moment magnitude
    Mw,
    /// Surface-wave magnitude
    Ms,
    /// Body-wave magnitude
    Mb,
}

impl MagnitudeScale {
    /// Parse the catalog service's `magType` field (case-insensitive,
    /// tolerates vendor spellings like "ml", "mwr", "mb_lg").
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.to_ascii_lowercase();
        match s.as_str() {
            "ml" | "mlr" => Some(Self::Ml),
            "ms" | "ms_20" => Some(Self::Ms),
            s if s.starts_with("mw") => Some(Self::Mw),
            s if s.starts_with("mb") => Some(Self::Mb),
            _ => None,
        }
    }
}

impl std::fmt::Display for MagnitudeScale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ml => "Ml",
            Self::Mw => "Mw",
            Self::Ms => "Ms",
            Self::Mb => "Mb",
        };
        f.write_str(s)
    }
}

/// Magnitude value with its scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Magnitude {
    pub value: f64,
    pub scale: MagnitudeScale,
}

/// External-origin earthquake record. Immutable once accepted by the
/// validator; the raw payload is retained verbatim for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEvent {
    /// Catalog identifier, unique within the source agency
    pub catalog_id: String,
    /// Origin time (UTC)
    pub origin_time: DateTime<Utc>,
    /// Hypocenter latitude, degrees in [-90, 90]
    pub latitude: f64,
    /// Hypocenter longitude, degrees in [-180, 180]
    pub longitude: f64,
    /// Hypocenter depth in km, >= 0
    pub depth_km: f64,
    /// Reported magnitude
    pub magnitude: Magnitude,
    /// Source agency (e.g., "us", "ci")
    pub agency: String,
    /// Raw upstream payload for audit
    #[serde(default)]
    pub raw: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_parsing_accepts_vendor_spellings() {
        assert_eq!(MagnitudeScale::parse("ml"), Some(MagnitudeScale::Ml));
        assert_eq!(MagnitudeScale::parse("Mwr"), Some(MagnitudeScale::Mw));
        assert_eq!(MagnitudeScale::parse("mb_lg"), Some(MagnitudeScale::Mb));
        assert_eq!(MagnitudeScale::parse("md"), None);
    }
}
