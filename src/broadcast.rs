//! Configuration Change Broadcaster
//!
//! Reacts to the process-wide "configuration changed" and "node settings
//! changed" signals. A configuration edit invalidates every cache, then each
//! live node's model selection is re-validated: a deleted model falls back
//! deterministically to the first remaining model in its category (logged,
//! never surfaced as an error); a surviving selection gets a forced,
//! non-cached schema refresh so edited parameter definitions take effect
//! immediately. The whole pass is idempotent.

use crate::engine::Engine;
use crate::error::EngineError;
use crate::node::GenerationNode;
use crate::types::ModelId;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

/// Process-wide engine events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    ConfigChanged,
    NodeSettingsChanged,
}

pub struct ConfigChangeBroadcaster {
    engine: Arc<Engine>,
}

impl ConfigChangeBroadcaster {
    pub fn new(engine: Arc<Engine>) -> Self {
        ConfigChangeBroadcaster { engine }
    }

    /// Dispatch one received event against the live node set.
    pub async fn handle(
        &self,
        event: EngineEvent,
        nodes: &mut [GenerationNode],
    ) -> Result<(), EngineError> {
        match event {
            EngineEvent::ConfigChanged => self.on_config_changed(nodes).await,
            EngineEvent::NodeSettingsChanged => self.engine.refresh_settings().await,
        }
    }

    /// Full invalidation pass. Per-node failures are logged and skipped so
    /// one broken node cannot wedge the rest.
    pub async fn on_config_changed(
        &self,
        nodes: &mut [GenerationNode],
    ) -> Result<(), EngineError> {
        let engine = self.engine.as_ref();
        engine.schema_cache().clear();
        engine.model_lists().clear();
        info!(nodes = nodes.len(), "configuration changed, revalidating live nodes");

        // Nodes are independent; revalidate them concurrently.
        let passes = nodes
            .iter_mut()
            .map(|node| async move {
                let id = node.node.id;
                (id, self.revalidate(engine, node).await)
            })
            .collect::<Vec<_>>();
        for (id, outcome) in join_all(passes).await {
            if let Err(e) = outcome {
                warn!(node = %id, error = %e, "revalidation failed");
            }
        }
        Ok(())
    }

    async fn revalidate(
        &self,
        engine: &Engine,
        node: &mut GenerationNode,
    ) -> Result<(), EngineError> {
        let category = node.node.category.clone();
        let models = engine.models_in_order(&category, true).await?;
        let names: Vec<String> = models.into_iter().map(|m| m.name).collect();

        if let Some(widget) = node.node.widget_mut(crate::node::MODEL_WIDGET) {
            widget.options = names.clone();
        }

        let selected = node.selected_model_name();
        let survives = selected
            .as_deref()
            .map(|s| names.iter().any(|n| n == s))
            .unwrap_or(false);

        if survives {
            // Model still exists; a non-cached refresh picks up edited
            // parameter definitions.
            let model = ModelId::from(selected.as_deref().unwrap_or_default());
            node.select_model(engine, model, true).await
        } else {
            let Some(first) = names.first() else {
                warn!(node = %node.node.id, category = %category, "no models left in category");
                return Ok(());
            };
            info!(
                node = %node.node.id,
                old = selected.as_deref().unwrap_or("<none>"),
                new = %first,
                "selected model no longer exists, falling back"
            );
            node.select_model(engine, ModelId::from(first.as_str()), true)
                .await
        }
    }
}
