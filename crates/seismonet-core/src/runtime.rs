//! The process runtime context: everything long-lived, constructed once at
//! startup and injected downward into the pipeline and the HTTP server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use seismonet_connectors_fdsn::{CatalogClient, WaveformClient};
use seismonet_locate::StationRegistry;
use seismonet_ml::{ArtifactSlot, ModelArtifact};
use seismonet_models::{SeismoError, SeismoResult};
use seismonet_store::EventStore;

use crate::config::AppConfig;

/// Long-lived process state. Cheap to clone handles, immutable config.
pub struct Runtime {
    pub config: AppConfig,
    pub store: Arc<EventStore>,
    pub artifact_slot: Arc<ArtifactSlot>,
    pub catalog: Arc<CatalogClient>,
    pub waveform: Arc<WaveformClient>,
    pub registry: StationRegistry,
    ready: AtomicBool,
}

impl Runtime {
    /// Bring up the store, clients, and model artifact. Error kinds map to
    /// the documented exit codes: `Corruption` -> 2, a model `Validation`
    /// failure -> 3.
    pub async fn initialize(config: AppConfig) -> SeismoResult<Arc<Self>> {
        let store = Arc::new(
            EventStore::open(config.store.clone(), &config.features.schema_id).await?,
        );

        let artifact = ModelArtifact::load(&config.model.path)?;
        if artifact.schema_id != config.model.expected_schema_id {
            return Err(SeismoError::Validation(format!(
                "model artifact schema {} does not match expected {}",
                artifact.schema_id, config.model.expected_schema_id
            )));
        }
        let artifact_slot = Arc::new(ArtifactSlot::new(artifact));

        let catalog = Arc::new(CatalogClient::new(&config.catalog));
        let waveform = Arc::new(WaveformClient::new(&config.waveform));

        let registry = StationRegistry::from_entries(
            config
                .stations
                .iter()
                .map(|s| (s.key.clone(), s.coords())),
        );
        info!(stations = registry.len(), "runtime initialized");

        Ok(Arc::new(Self {
            config,
            store,
            artifact_slot,
            catalog,
            waveform,
            registry,
            ready: AtomicBool::new(false),
        }))
    }

    /// Flip once the pipeline and server are wired; `/ready` keys off this.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Purge both client caches; returns the number of entries dropped.
    pub fn purge_caches(&self) -> usize {
        self.catalog.cache().purge() + self.waveform.cache().purge()
    }
}
