//! State Restoration Broker
//!
//! Bridges the host's deserialize event with widget construction. When the
//! host restores a saved graph it hands each node its persisted payload
//! before any dynamic widgets exist; the broker stashes that payload on the
//! node and hands it out exactly once to the next widget-construction pass,
//! which resolves initial values before constructing widgets. A later
//! unrelated rebuild must never see the stale payload again.

use crate::error::EngineError;
use crate::host::NodeInstance;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Manual endpoint selector state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointState {
    #[serde(default)]
    pub manual: bool,
    #[serde(default)]
    pub selected: Option<String>,
}

/// The structured payload appended alongside the host's own node state at
/// serialize time. Dynamic widgets never enter the host's positional
/// serialization; everything they carry lives here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicState {
    #[serde(default)]
    pub dynamic_params: Map<String, Value>,

    #[serde(default)]
    pub endpoint_state: EndpointState,

    #[serde(default)]
    pub collapsed_groups: Vec<String>,

    #[serde(default)]
    pub image_selection: usize,
}

/// Per-node restoration lifecycle.
///
/// Unrestored: fresh node, nothing to apply. Pending: deserialize ran,
/// payload stashed, widgets not yet built. Applied: the payload was consumed
/// by a construction pass.
#[derive(Debug, Default)]
pub enum RestorePhase {
    #[default]
    Unrestored,
    Pending(DynamicState),
    Applied,
}

impl RestorePhase {
    pub fn is_pending(&self) -> bool {
        matches!(self, RestorePhase::Pending(_))
    }
}

/// Stash a deserialized payload on the node without touching widgets; they
/// may not exist yet in the host's restoration order.
///
/// Malformed payloads are a validation error, never silently dropped.
pub fn stash(node: &mut NodeInstance, payload: &Value) -> Result<(), EngineError> {
    let state: DynamicState = serde_json::from_value(payload.clone())
        .map_err(|e| EngineError::InvalidParams(format!("bad dynamic state payload: {}", e)))?;

    debug!(node = %node.id, params = state.dynamic_params.len(), "stashed pending restore state");
    node.properties.image_selection = state.image_selection;
    node.restore = RestorePhase::Pending(state);
    Ok(())
}

/// Take the pending payload, transitioning to Applied. Yields `Some` exactly
/// once per restoration.
pub fn consume(node: &mut NodeInstance) -> Option<DynamicState> {
    match std::mem::replace(&mut node.restore, RestorePhase::Applied) {
        RestorePhase::Pending(state) => Some(state),
        RestorePhase::Unrestored => {
            // A rebuild before any restore happened; stay out of Applied so a
            // late deserialize can still stash.
            node.restore = RestorePhase::Unrestored;
            None
        }
        RestorePhase::Applied => None,
    }
}
