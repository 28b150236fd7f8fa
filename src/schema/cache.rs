//! Schema and model-list caches.
//!
//! Both caches are process-wide: every open node instance shares one handle,
//! so the same model never triggers redundant fetches. Schema entries are
//! gated twice: a fixed TTL, and a server-supplied change token checked
//! before every read so a stale cache is never served across a configuration
//! edit even inside the TTL window.

use crate::backend::{Backend, ModelInfo};
use crate::error::EngineError;
use crate::schema::SchemaResponse;
use crate::types::{ChangeToken, ModelId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

struct CacheEntry {
    data: SchemaResponse,
    stamp: Instant,
}

#[derive(Default)]
struct SchemaCacheInner {
    entries: HashMap<ModelId, CacheEntry>,
    last_token: Option<ChangeToken>,
}

/// TTL- and change-token-gated cache from model id to parameter schema.
pub struct SchemaCache {
    inner: RwLock<SchemaCacheInner>,
    ttl: Duration,
}

impl SchemaCache {
    pub fn new(ttl: Duration) -> Self {
        SchemaCache {
            inner: RwLock::new(SchemaCacheInner::default()),
            ttl,
        }
    }

    /// Return a non-expired entry, pruning expired entries lazily.
    pub fn get(&self, model: &ModelId) -> Option<SchemaResponse> {
        let mut inner = self.inner.write();
        let ttl = self.ttl;
        inner.entries.retain(|_, entry| entry.stamp.elapsed() < ttl);
        inner.entries.get(model).map(|entry| entry.data.clone())
    }

    /// Store a schema with the current timestamp.
    pub fn set(&self, model: ModelId, data: SchemaResponse) {
        self.inner.write().entries.insert(
            model,
            CacheEntry {
                data,
                stamp: Instant::now(),
            },
        );
    }

    /// Drop every entry. The last-seen change token is kept.
    pub fn clear(&self) {
        self.inner.write().entries.clear();
    }

    pub fn last_token(&self) -> Option<ChangeToken> {
        self.inner.read().last_token
    }

    /// Record a server token. On mismatch with the last-seen value the whole
    /// cache is cleared; returns true when that happened.
    pub fn observe_token(&self, token: ChangeToken) -> bool {
        let mut inner = self.inner.write();
        let invalidated = match inner.last_token {
            Some(seen) if seen != token => {
                debug!(?seen, ?token, "configuration token changed, clearing schema cache");
                inner.entries.clear();
                true
            }
            _ => false,
        };
        inner.last_token = Some(token);
        invalidated
    }

    /// Fetch a schema through the cache.
    ///
    /// Polls the change token first so an edited configuration invalidates
    /// cached entries before they can be served; then serves from cache
    /// unless `force` is set; then falls through to the network.
    pub async fn fetch(
        &self,
        backend: &dyn Backend,
        model: &ModelId,
        force: bool,
    ) -> Result<SchemaResponse, EngineError> {
        match backend.poll_change_token(self.last_token()).await {
            Ok(poll) => {
                self.observe_token(poll.token);
            }
            // A failed poll must not block schema delivery; the TTL still
            // bounds staleness.
            Err(e) => warn!(error = %e, "change token poll failed"),
        }

        if !force {
            if let Some(hit) = self.get(model) {
                debug!(model = %model, "schema cache hit");
                return Ok(hit);
            }
        }

        let schema = backend.fetch_schema(model).await?;
        self.set(model.clone(), schema.clone());
        Ok(schema)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.read().entries.len()
    }
}

/// Process-wide cache of category -> model listings.
///
/// No TTL: listings change only on configuration edits, which arrive as
/// broadcast invalidations.
#[derive(Default)]
pub struct ModelListCache {
    inner: RwLock<HashMap<String, Vec<ModelInfo>>>,
}

impl ModelListCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, category: &str) -> Option<Vec<ModelInfo>> {
        self.inner.read().get(category).cloned()
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }

    /// Fetch a category listing through the cache.
    pub async fn fetch(
        &self,
        backend: &dyn Backend,
        category: &str,
        force: bool,
    ) -> Result<Vec<ModelInfo>, EngineError> {
        if !force {
            if let Some(hit) = self.get(category) {
                return Ok(hit);
            }
        }
        let models = backend.models_by_category(category).await?;
        self.inner
            .write()
            .insert(category.to_string(), models.clone());
        Ok(models)
    }
}
