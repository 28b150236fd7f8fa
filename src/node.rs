//! Generation Node
//!
//! Bundles a host node instance with its synchronizer and dispatcher and
//! exposes the hooks the host wires up: model-selection callback, generate
//! button, and the serialize/deserialize overrides that carry the structured
//! dynamic-state payload alongside the host's own node state.

use crate::backend::GenerateResult;
use crate::dispatch::{ExecutionDispatcher, QueueDecision};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::gate::CacheAnnotation;
use crate::host::{GraphHost, NodeInstance, Widget};
use crate::restore::{self, DynamicState};
use crate::sync::ParameterWidgetSynchronizer;
use crate::types::{ModelId, NodeId};
use serde_json::{json, Value};
use tracing::debug;

/// Name of the model selector widget.
pub const MODEL_WIDGET: &str = "model";

/// Name of the node's own generate button.
pub const GENERATE_BUTTON: &str = "generate";

pub struct GenerationNode {
    pub node: NodeInstance,
    pub sync: ParameterWidgetSynchronizer,
    pub dispatcher: ExecutionDispatcher,
}

impl GenerationNode {
    /// Build a node with its base widget set. Dynamic widgets arrive on the
    /// first model selection.
    pub fn new(id: NodeId, category: impl Into<String>) -> Self {
        let mut node = NodeInstance::new(id, category);
        node.widgets
            .push(Widget::choice(MODEL_WIDGET, Value::Null, Vec::new()));
        node.widgets.push(Widget::text("prompt", json!("")));
        node.widgets.push(Widget::number("batch_count", json!(1)));
        node.widgets.push(Widget::number("seed", json!(0)));
        node.widgets.push(Widget::button(GENERATE_BUTTON));

        GenerationNode {
            node,
            sync: ParameterWidgetSynchronizer::new(),
            dispatcher: ExecutionDispatcher::new(),
        }
    }

    /// Fill the model selector from the category listing, in configured
    /// order, and pick the first model when none is selected yet.
    pub async fn populate_models(&mut self, engine: &Engine) -> Result<(), EngineError> {
        let models = engine.models_in_order(&self.node.category, false).await?;
        if models.is_empty() {
            return Err(EngineError::NoModelsInCategory(self.node.category.clone()));
        }
        let names: Vec<String> = models.into_iter().map(|m| m.name).collect();

        let current = self.selected_model_name();
        if let Some(widget) = self.node.widget_mut(MODEL_WIDGET) {
            widget.options = names.clone();
        }

        if current.is_none() {
            if let Some(first) = names.first() {
                let model = ModelId::from(first.as_str());
                self.select_model(engine, model, false).await?;
            }
        }
        Ok(())
    }

    pub fn selected_model_name(&self) -> Option<String> {
        self.node
            .widget_value(MODEL_WIDGET)
            .and_then(Value::as_str)
            .map(String::from)
    }

    /// Model-selection hook, wired to the model widget's callback.
    pub async fn select_model(
        &mut self,
        engine: &Engine,
        model: ModelId,
        force: bool,
    ) -> Result<(), EngineError> {
        if let Some(widget) = self.node.widget_mut(MODEL_WIDGET) {
            widget.value = Value::String(model.as_str().to_string());
        }
        self.sync
            .on_selection_change(
                &mut self.node,
                engine.schema_cache(),
                engine.backend(),
                model,
                force,
            )
            .await
    }

    /// Generate-button hook: independent submission past the host queue.
    pub async fn generate(
        &mut self,
        engine: &Engine,
        host: &dyn GraphHost,
    ) -> Result<Option<GenerateResult>, EngineError> {
        self.dispatcher
            .run_independent(&mut self.node, &self.sync, host, engine.backend())
            .await
    }

    /// Whole-graph submission decision for this node.
    pub fn queue_decision(&self, engine: &Engine) -> QueueDecision {
        self.dispatcher
            .queue_decision(&self.node, &engine.settings())
    }

    /// Annotation for a host-queued request this node participates in.
    pub fn annotation(&self, engine: &Engine, force: bool) -> CacheAnnotation {
        crate::gate::annotate(&self.node, force, &engine.settings())
    }

    /// Scoped submission: this node plus its upstream dependency closure.
    pub async fn submit_scoped(&self, host: &dyn GraphHost) -> Result<Vec<NodeId>, EngineError> {
        self.dispatcher.submit_scoped(&self.node, host).await
    }

    /// Serialize override: the structured payload appended alongside the
    /// host's positional widget state.
    pub fn serialize_dynamic_state(&self) -> DynamicState {
        let mut params = self.sync.collect_dynamic_params(&self.node);
        params.remove("endpoint_override");
        DynamicState {
            dynamic_params: params,
            endpoint_state: self.sync.endpoint_state(&self.node),
            collapsed_groups: self.sync.collapsed_groups(),
            image_selection: self.node.properties.image_selection,
        }
    }

    /// Deserialize override: stash the payload for the next construction
    /// pass. Widgets are not touched, they may not exist yet.
    pub fn deserialize_dynamic_state(&mut self, payload: &Value) -> Result<(), EngineError> {
        debug!(node = %self.node.id, "deserialize hook");
        restore::stash(&mut self.node, payload)
    }
}
