//! Engine Facade
//!
//! The single process-wide handle every node instance shares: the backend
//! client, the schema and model-list caches, the current node settings, and
//! the event channel configuration broadcasts arrive on. Caches live here so
//! two nodes selecting the same model never trigger redundant fetches.

use crate::backend::{Backend, HttpBackend, ModelInfo, NodeSettings};
use crate::broadcast::EngineEvent;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::schema::{ModelListCache, SchemaCache};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 16;

pub struct Engine {
    backend: Arc<dyn Backend>,
    schema_cache: Arc<SchemaCache>,
    model_lists: Arc<ModelListCache>,
    settings: RwLock<NodeSettings>,
    events: broadcast::Sender<EngineEvent>,
}

impl Engine {
    pub fn new(backend: Arc<dyn Backend>, config: &EngineConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Engine {
            backend,
            schema_cache: Arc::new(SchemaCache::new(Duration::from_secs(config.schema_ttl_secs))),
            model_lists: Arc::new(ModelListCache::new()),
            settings: RwLock::new(NodeSettings::default()),
            events,
        }
    }

    /// Build an engine talking to the configured HTTP backend.
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        let backend = Arc::new(HttpBackend::new(&config.backend)?);
        Ok(Self::new(backend, config))
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn schema_cache(&self) -> &SchemaCache {
        &self.schema_cache
    }

    pub fn model_lists(&self) -> &ModelListCache {
        &self.model_lists
    }

    pub fn settings(&self) -> NodeSettings {
        self.settings.read().clone()
    }

    /// Category listing with the admin-configured ordering applied: ranked
    /// models first in configured order, unranked ones after in listing
    /// order.
    pub async fn models_in_order(
        &self,
        category: &str,
        force: bool,
    ) -> Result<Vec<ModelInfo>, EngineError> {
        let mut rest = self
            .model_lists
            .fetch(self.backend.as_ref(), category, force)
            .await?;
        let order = self.backend.get_model_order(category).await?;
        if order.is_empty() {
            return Ok(rest);
        }

        let mut ranked = Vec::with_capacity(rest.len());
        for name in &order {
            if let Some(at) = rest.iter().position(|m| &m.name == name) {
                ranked.push(rest.remove(at));
            }
        }
        ranked.extend(rest);
        Ok(ranked)
    }

    /// Re-pull node settings from the backend.
    pub async fn refresh_settings(&self) -> Result<(), EngineError> {
        let fresh = self.backend.get_node_settings().await?;
        *self.settings.write() = fresh;
        Ok(())
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Publish an engine event. Dropped silently when nobody listens.
    pub fn notify(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }
}
