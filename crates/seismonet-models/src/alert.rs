//! Alert types emitted by the dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Alert severity. Rules map classified events onto one of three levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Info,
    Warn,
    Critical,
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// Outbound notification. At most one alert is issued per `dedup_key`
/// within the configured dedup window; later hits bump a counter instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Classified event that produced the alert
    pub event_id: Uuid,
    pub level: AlertLevel,
    pub issued_at: DateTime<Utc>,
    /// Subscriber-facing payload (rule-dependent)
    pub payload: serde_json::Value,
    /// Deduplication key rendered from the matching rule's template
    pub dedup_key: String,
}
