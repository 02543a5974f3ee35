//! Configuration surface: every recognized key, with per-key defaults so a
//! minimal file (service URLs and a model path) is enough to boot.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use seismonet_connectors_fdsn::ClientConfig;
use seismonet_detect::DetectorConfig;
use seismonet_features::ExtractorConfig;
use seismonet_locate::{LocatorConfig, StationCoords};
use seismonet_models::FEATURE_SCHEMA_V1;
use seismonet_pipeline::{AlertsConfig, PipelineConfig, ProcessorConfig};
use seismonet_store::StoreConfig;

/// `features.*` keys.
#[derive(Debug, Clone, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_schema_id")]
    pub schema_id: String,
    #[serde(flatten)]
    pub extractor: ExtractorConfig,
}

fn default_schema_id() -> String {
    FEATURE_SCHEMA_V1.to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            schema_id: default_schema_id(),
            extractor: ExtractorConfig::default(),
        }
    }
}

/// `model.*` keys.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub path: PathBuf,
    #[serde(default = "default_schema_id")]
    pub expected_schema_id: String,
    /// Significance level for the magnitude CI
    #[serde(default = "default_alpha")]
    pub alpha: f64,
}

fn default_alpha() -> f64 {
    0.05
}

/// One station entry for the registry, with the channels to ingest.
#[derive(Debug, Clone, Deserialize)]
pub struct StationEntry {
    /// Station key, `NET.STA`
    pub key: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub elevation_m: f64,
    /// Channel codes polled for this station (e.g. ["HHZ"])
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,
}

fn default_channels() -> Vec<String> {
    vec!["HHZ".to_string()]
}

impl StationEntry {
    pub fn coords(&self) -> StationCoords {
        StationCoords {
            latitude: self.latitude,
            longitude: self.longitude,
            elevation_m: self.elevation_m,
        }
    }
}

/// `server.*` keys.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub jwt: JwtConfig,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            jwt: JwtConfig::default(),
        }
    }
}

/// Bearer-token validation parameters. The secret is expected from the
/// `SEISMONET_JWT_SECRET` environment variable in production; the file
/// value is a development convenience.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default = "default_audience")]
    pub audience: String,
}

fn default_issuer() -> String {
    "seismonet".to_string()
}
fn default_audience() -> String {
    "seismonet-api".to_string()
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            issuer: default_issuer(),
            audience: default_audience(),
        }
    }
}

/// Ingestion poller settings.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_poll_interval_s")]
    pub poll_interval_s: u64,
}

fn default_poll_interval_s() -> u64 {
    10
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            poll_interval_s: default_poll_interval_s(),
        }
    }
}

/// One outbound alert subscriber.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriberEntry {
    pub name: String,
    pub kind: SubscriberKind,
    /// Endpoint for webhook subscribers
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriberKind {
    /// Emit through the process log (always available)
    Log,
    /// POST the alert JSON to a URL
    Webhook,
}

/// Root configuration schema.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub catalog: ClientConfig,
    pub waveform: ClientConfig,
    pub model: ModelConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub locator: LocatorConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub stations: Vec<StationEntry>,
    #[serde(default = "default_subscribers")]
    pub alert_subscribers: Vec<SubscriberEntry>,
}

fn default_subscribers() -> Vec<SubscriberEntry> {
    vec![SubscriberEntry {
        name: "log".to_string(),
        kind: SubscriberKind::Log,
        url: String::new(),
    }]
}

impl AppConfig {
    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("could not read config {:?}: {}", path, e))?;
        let mut config: AppConfig =
            toml::from_str(&raw).map_err(|e| anyhow::anyhow!("config parse: {}", e))?;

        if let Ok(secret) = std::env::var("SEISMONET_JWT_SECRET") {
            config.server.jwt.secret = secret;
        }
        if let Ok(url) = std::env::var("SEISMONET_CATALOG_URL") {
            config.catalog.base_url = url;
        }
        if let Ok(url) = std::env::var("SEISMONET_WAVEFORM_URL") {
            config.waveform.base_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.catalog.base_url.is_empty() || self.waveform.base_url.is_empty() {
            anyhow::bail!("catalog.base_url and waveform.base_url are required");
        }
        if self.features.schema_id != self.model.expected_schema_id {
            anyhow::bail!(
                "features.schema_id ({}) differs from model.expected_schema_id ({})",
                self.features.schema_id,
                self.model.expected_schema_id
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[catalog]
base_url = "https://catalog.example/fdsnws/event/1/query"

[waveform]
base_url = "https://waveform.example/fdsnws/dataselect/1/query"

[model]
path = "model/artifact.json"

[store]
dir = "data/store"

[[stations]]
key = "CI.PASC"
latitude = 34.17
longitude = -118.18
"#;

    #[test]
    fn minimal_config_loads_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.detector.sta_s, 1.0);
        assert_eq!(config.pipeline.worker_count, 4);
        assert_eq!(config.features.schema_id, FEATURE_SCHEMA_V1);
        assert_eq!(config.stations.len(), 1);
        assert_eq!(config.stations[0].channels, vec!["HHZ"]);
        assert_eq!(config.catalog.rate_limit_rps, 5.0);
    }

    #[test]
    fn schema_mismatch_between_features_and_model_is_rejected() {
        let bad = format!("{}\n[features]\nschema_id = \"other.v2\"\n", MINIMAL);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bad.as_bytes()).unwrap();
        assert!(AppConfig::load(file.path()).is_err());
    }

    #[test]
    fn detector_keys_override_defaults() {
        let tuned = format!(
            "{}\n[detector]\nsta_s = 0.5\nlta_s = 30.0\nr_on = 5.0\n",
            MINIMAL
        );
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(tuned.as_bytes()).unwrap();
        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.detector.sta_s, 0.5);
        assert_eq!(config.detector.lta_s, 30.0);
        assert_eq!(config.detector.r_off, 1.5); // untouched default
    }
}
