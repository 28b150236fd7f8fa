//! Host Boundary Model
//!
//! The visual-editor host owns the graph, the canvas, and widget primitives;
//! this module models the slice of it the engine manipulates: a node's widget
//! array, its input connections, its persisted property bag, and the handful
//! of host services the engine calls back into (asset store, prompt queue,
//! connection table). The host itself is out of scope; tests drive the engine
//! through these types directly.

use crate::error::EngineError;
use crate::restore::RestorePhase;
use crate::types::{NodeId, ParamsHash};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Semantic widget kind as understood by the host's canvas renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WidgetKind {
    Choice,
    Boolean,
    Number,
    Text,
    Slider,
    Button,
    Header,
}

/// An interactive control bound to one node parameter.
///
/// `serialized` controls participation in the host's positional serialization.
/// Engine-owned widgets always set it to false; their state travels in the
/// structured dynamic-state payload instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Widget {
    pub name: String,
    pub kind: WidgetKind,
    pub value: Value,
    pub hidden: bool,
    pub serialized: bool,
    pub options: Vec<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
}

impl Widget {
    fn base(name: impl Into<String>, kind: WidgetKind, value: Value) -> Self {
        Widget {
            name: name.into(),
            kind,
            value,
            hidden: false,
            serialized: true,
            options: Vec::new(),
            min: None,
            max: None,
            step: None,
        }
    }

    pub fn choice(name: impl Into<String>, value: Value, options: Vec<String>) -> Self {
        let mut w = Self::base(name, WidgetKind::Choice, value);
        w.options = options;
        w
    }

    pub fn boolean(name: impl Into<String>, value: bool) -> Self {
        Self::base(name, WidgetKind::Boolean, Value::Bool(value))
    }

    pub fn number(name: impl Into<String>, value: Value) -> Self {
        Self::base(name, WidgetKind::Number, value)
    }

    pub fn text(name: impl Into<String>, value: Value) -> Self {
        Self::base(name, WidgetKind::Text, value)
    }

    pub fn slider(name: impl Into<String>, value: Value) -> Self {
        Self::base(name, WidgetKind::Slider, value)
    }

    pub fn button(name: impl Into<String>) -> Self {
        let mut w = Self::base(name, WidgetKind::Button, Value::Null);
        w.serialized = false;
        w
    }

    pub fn header(name: impl Into<String>, label: impl Into<String>) -> Self {
        let mut w = Self::base(name, WidgetKind::Header, Value::String(label.into()));
        w.serialized = false;
        w
    }

    /// Mark the widget as excluded from positional serialization.
    pub fn unserialized(mut self) -> Self {
        self.serialized = false;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

/// A node input slot: either wired to an upstream node or disconnected.
///
/// `asset_id` is the host asset-store identifier recorded the last time an
/// image flowed through this slot, used as the final resolution fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSlot {
    pub name: String,
    pub link: Option<NodeId>,
    pub asset_id: Option<String>,
}

impl InputSlot {
    pub fn connected(name: impl Into<String>, upstream: NodeId) -> Self {
        InputSlot {
            name: name.into(),
            link: Some(upstream),
            asset_id: None,
        }
    }

    pub fn disconnected(name: impl Into<String>) -> Self {
        InputSlot {
            name: name.into(),
            link: None,
            asset_id: None,
        }
    }
}

/// Reference to a preview image in the host's temp/output store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_image_kind")]
    pub kind: String,
}

fn default_image_kind() -> String {
    "temp".to_string()
}

/// Persisted property bag attached to a node by the host's save format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeProperties {
    /// Last backend-computed params hash, mirrored verbatim.
    pub last_params_hash: Option<ParamsHash>,

    /// Preview references from the last successful generation.
    #[serde(default)]
    pub last_previews: Vec<ImageRef>,

    /// Which preview image the user has selected in the node's gallery.
    #[serde(default)]
    pub image_selection: usize,
}

/// A placed node in the visual graph.
///
/// Owned by the host in production; the engine only ever mutates a node it
/// was handed. The ordered widget list is the canvas layout.
#[derive(Debug)]
pub struct NodeInstance {
    pub id: NodeId,
    pub category: String,
    pub widgets: Vec<Widget>,
    pub inputs: Vec<InputSlot>,
    pub properties: NodeProperties,
    pub restore: RestorePhase,
}

impl NodeInstance {
    pub fn new(id: NodeId, category: impl Into<String>) -> Self {
        NodeInstance {
            id,
            category: category.into(),
            widgets: Vec::new(),
            inputs: Vec::new(),
            properties: NodeProperties::default(),
            restore: RestorePhase::Unrestored,
        }
    }

    pub fn widget(&self, name: &str) -> Option<&Widget> {
        self.widgets.iter().find(|w| w.name == name)
    }

    pub fn widget_mut(&mut self, name: &str) -> Option<&mut Widget> {
        self.widgets.iter_mut().find(|w| w.name == name)
    }

    pub fn widget_value(&self, name: &str) -> Option<&Value> {
        self.widget(name).map(|w| &w.value)
    }

    /// Upstream node ids reachable through connected inputs, in slot order.
    pub fn connected_upstream(&self) -> Vec<NodeId> {
        self.inputs.iter().filter_map(|slot| slot.link).collect()
    }

    /// Image input slots, in slot order.
    pub fn image_inputs(&self) -> impl Iterator<Item = &InputSlot> {
        self.inputs
            .iter()
            .filter(|slot| slot.name.starts_with("image"))
    }
}

/// Connection table for reachability walks: node -> upstream nodes wired
/// through connection-based inputs. Literal and disconnected inputs are
/// absent by construction.
pub type ConnectionTable = HashMap<NodeId, Vec<NodeId>>;

/// Host services the engine calls back into.
#[async_trait]
pub trait GraphHost: Send + Sync {
    /// Connection table of the whole graph.
    fn connections(&self) -> ConnectionTable;

    /// Base64 payload of an upstream node's already-loaded output image.
    async fn upstream_image(&self, node: NodeId) -> Option<String>;

    /// Base64 raster cached from a prior execution of the given node.
    async fn cached_raster(&self, node: NodeId) -> Option<String>;

    /// Fetch an image by identifier from the host's asset store.
    async fn fetch_asset(&self, identifier: &str) -> Result<String, EngineError>;

    /// The host's global "submit graph" primitive. `scope` restricts the
    /// submission to the given node set; `None` submits the whole graph.
    async fn queue_prompt(&self, scope: Option<Vec<NodeId>>) -> Result<(), EngineError>;
}
