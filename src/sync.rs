//! Parameter Widget Synchronizer
//!
//! Reconciles a node's live widget set against the schema fetched for its
//! selected model. The synchronizer owns every widget it creates; removal
//! works off that owned list, never by scanning the node's full widget array,
//! so host- and button-owned widgets are never destroyed. Initial values are
//! resolved before a widget is constructed (existing widget, then pending
//! restore state, then schema default), which is what makes restoration
//! flicker-free.

use crate::backend::Backend;
use crate::error::EngineError;
use crate::host::{NodeInstance, Widget, WidgetKind};
use crate::restore::{self, DynamicState, EndpointState};
use crate::schema::{
    validate_params, ParamKind, ParameterDefinition, SchemaCache, SchemaResponse, ADVANCED_GROUP,
    DEFAULT_GROUP,
};
use crate::types::ModelId;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Widget name of the host-owned seed control whose visibility the schema
/// toggles.
pub const SEED_WIDGET: &str = "seed";

/// Manual endpoint override toggle.
pub const ENDPOINT_MANUAL_WIDGET: &str = "endpoint_manual";

/// Endpoint choice, visible only while the manual toggle is on.
pub const ENDPOINT_CHOICE_WIDGET: &str = "endpoint_name";

fn header_name(group: &str) -> String {
    format!("group_header_{}", group)
}

fn header_label(group: &str, collapsed: bool) -> String {
    let arrow = if collapsed { "\u{25b6}" } else { "\u{25bc}" };
    format!("{} {}", arrow, group)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ManagedRole {
    Param,
    Header,
    EndpointToggle,
    EndpointChoice,
}

/// Bookkeeping for one widget created by the last synchronization pass.
#[derive(Debug, Clone)]
struct ManagedWidget {
    name: String,
    request_key: String,
    group: String,
    role: ManagedRole,
}

/// Per-node synchronizer state.
pub struct ParameterWidgetSynchronizer {
    managed: Vec<ManagedWidget>,
    collapsed: HashSet<String>,
    selected: Option<ModelId>,
    fetch_epoch: u64,
}

impl Default for ParameterWidgetSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterWidgetSynchronizer {
    pub fn new() -> Self {
        ParameterWidgetSynchronizer {
            managed: Vec::new(),
            collapsed: HashSet::new(),
            selected: None,
            fetch_epoch: 0,
        }
    }

    pub fn selected_model(&self) -> Option<&ModelId> {
        self.selected.as_ref()
    }

    /// Collapsed group names, sorted for deterministic serialization.
    pub fn collapsed_groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self.collapsed.iter().cloned().collect();
        groups.sort();
        groups
    }

    /// Start a schema fetch, superseding any in-flight one.
    pub fn begin_fetch(&mut self) -> u64 {
        self.fetch_epoch += 1;
        self.fetch_epoch
    }

    /// Whether a fetch started with [`begin_fetch`] is still the latest.
    pub fn is_current(&self, epoch: u64) -> bool {
        self.fetch_epoch == epoch
    }

    /// React to a model selection change.
    ///
    /// No-op when the selection is unchanged and `force` is unset. A failed
    /// schema fetch is logged and leaves the existing widgets untouched. A
    /// response that arrives after a newer fetch started is discarded.
    pub async fn on_selection_change(
        &mut self,
        node: &mut NodeInstance,
        cache: &SchemaCache,
        backend: &dyn Backend,
        model: ModelId,
        force: bool,
    ) -> Result<(), EngineError> {
        if !force && self.selected.as_ref() == Some(&model) {
            return Ok(());
        }

        let epoch = self.begin_fetch();
        let schema = match cache.fetch(backend, &model, force).await {
            Ok(schema) => schema,
            Err(e) => {
                warn!(node = %node.id, model = %model, error = %e, "schema fetch failed, keeping existing widgets");
                return Ok(());
            }
        };
        if !self.is_current(epoch) {
            debug!(node = %node.id, model = %model, "discarding superseded schema response");
            return Ok(());
        }

        let pending = restore::consume(node);
        self.selected = Some(model);

        if let Some(seed) = node.widget_mut(SEED_WIDGET) {
            seed.hidden = !schema.show_seed_widget;
        }

        // A hand-edited payload with off-schema values must not restore
        // silently. Widgets still come up, at schema defaults, and the
        // validation error surfaces to the caller.
        if let Some(state) = pending {
            if let Err(e) = validate_params(&schema, &state.dynamic_params) {
                warn!(node = %node.id, error = %e, "restored parameter payload failed validation, using defaults");
                self.rebuild(node, &schema, None);
                return Err(e);
            }
            self.rebuild(node, &schema, Some(state));
        } else {
            self.rebuild(node, &schema, None);
        }
        Ok(())
    }

    fn rebuild(&mut self, node: &mut NodeInstance, schema: &SchemaResponse, pending: Option<DynamicState>) {
        // Snapshot current values so a same-name widget keeps its value
        // across the rebuild.
        let old_values: HashMap<String, Value> = self
            .managed
            .iter()
            .filter_map(|m| {
                node.widget(&m.name)
                    .map(|w| (m.name.clone(), w.value.clone()))
            })
            .collect();

        // Remove exactly the widgets the previous pass created.
        let owned: HashSet<&str> = self.managed.iter().map(|m| m.name.as_str()).collect();
        node.widgets.retain(|w| !owned.contains(w.name.as_str()));

        self.collapsed = match &pending {
            Some(state) => state.collapsed_groups.iter().cloned().collect(),
            None => [ADVANCED_GROUP.to_string()].into_iter().collect(),
        };

        let pending_params = pending
            .as_ref()
            .map(|s| s.dynamic_params.clone())
            .unwrap_or_default();

        let mut created: Vec<Widget> = Vec::new();
        let mut managed: Vec<ManagedWidget> = Vec::new();

        for group in schema.groups() {
            let collapsed = self.collapsed.contains(group);
            if group != DEFAULT_GROUP {
                let name = header_name(group);
                created.push(Widget::header(&name, header_label(group, collapsed)));
                managed.push(ManagedWidget {
                    name,
                    request_key: String::new(),
                    group: group.to_string(),
                    role: ManagedRole::Header,
                });
            }
            for def in schema.flat_schema.iter().filter(|d| d.group == group) {
                let value = resolve_initial(def, &old_values, &pending_params);
                let mut widget = make_widget(def, value);
                widget.hidden = collapsed && group != DEFAULT_GROUP;
                created.push(widget);
                managed.push(ManagedWidget {
                    name: def.name.clone(),
                    request_key: def.request_key().to_string(),
                    group: group.to_string(),
                    role: ManagedRole::Param,
                });
            }
        }

        // Endpoint selector pair, only when there is a real choice to make.
        if schema.endpoint_options.len() >= 2 {
            let restored = pending
                .as_ref()
                .map(|s| s.endpoint_state.clone())
                .unwrap_or_else(|| self.endpoint_state_from(&old_values));

            let names: Vec<String> = schema
                .endpoint_options
                .iter()
                .map(|e| e.name.clone())
                .collect();
            let selected = restored
                .selected
                .filter(|s| names.contains(s))
                .unwrap_or_else(|| names[0].clone());

            created.push(Widget::boolean(ENDPOINT_MANUAL_WIDGET, restored.manual).unserialized());
            let mut choice = Widget::choice(
                ENDPOINT_CHOICE_WIDGET,
                Value::String(selected),
                names,
            )
            .unserialized();
            choice.hidden = !restored.manual;
            created.push(choice);

            managed.push(ManagedWidget {
                name: ENDPOINT_MANUAL_WIDGET.to_string(),
                request_key: String::new(),
                group: DEFAULT_GROUP.to_string(),
                role: ManagedRole::EndpointToggle,
            });
            managed.push(ManagedWidget {
                name: ENDPOINT_CHOICE_WIDGET.to_string(),
                request_key: String::new(),
                group: DEFAULT_GROUP.to_string(),
                role: ManagedRole::EndpointChoice,
            });
        }

        // Dynamic widgets sit between the base widgets and the node's own
        // button row; splice relative to our bookkeeping, not the host's raw
        // array order.
        let insert_at = node
            .widgets
            .iter()
            .position(|w| w.kind == WidgetKind::Button)
            .unwrap_or(node.widgets.len());
        node.widgets.splice(insert_at..insert_at, created);

        debug!(
            node = %node.id,
            widgets = managed.len(),
            "rebuilt dynamic widget set"
        );
        self.managed = managed;
    }

    fn endpoint_state_from(&self, old_values: &HashMap<String, Value>) -> EndpointState {
        EndpointState {
            manual: old_values
                .get(ENDPOINT_MANUAL_WIDGET)
                .and_then(Value::as_bool)
                .unwrap_or(false),
            selected: old_values
                .get(ENDPOINT_CHOICE_WIDGET)
                .and_then(Value::as_str)
                .map(String::from),
        }
    }

    /// Current endpoint selector state as read from the live widgets.
    pub fn endpoint_state(&self, node: &NodeInstance) -> EndpointState {
        EndpointState {
            manual: node
                .widget_value(ENDPOINT_MANUAL_WIDGET)
                .and_then(Value::as_bool)
                .unwrap_or(false),
            selected: node
                .widget_value(ENDPOINT_CHOICE_WIDGET)
                .and_then(Value::as_str)
                .map(String::from),
        }
    }

    /// Flip the manual endpoint toggle; the choice widget's visibility
    /// tracks it.
    pub fn set_manual_endpoint(&self, node: &mut NodeInstance, manual: bool) {
        if let Some(toggle) = node.widget_mut(ENDPOINT_MANUAL_WIDGET) {
            toggle.value = Value::Bool(manual);
        }
        if let Some(choice) = node.widget_mut(ENDPOINT_CHOICE_WIDGET) {
            choice.hidden = !manual;
        }
    }

    /// Toggle a group's collapsed state. Members only flip their `hidden`
    /// flag; nothing is destroyed.
    pub fn toggle_group(&mut self, node: &mut NodeInstance, group: &str) {
        let collapsed = if self.collapsed.contains(group) {
            self.collapsed.remove(group);
            false
        } else {
            self.collapsed.insert(group.to_string());
            true
        };

        for m in self.managed.iter().filter(|m| m.group == group) {
            match m.role {
                ManagedRole::Param => {
                    if let Some(w) = node.widget_mut(&m.name) {
                        w.hidden = collapsed;
                    }
                }
                ManagedRole::Header => {
                    if let Some(w) = node.widget_mut(&m.name) {
                        w.value = Value::String(header_label(group, collapsed));
                    }
                }
                _ => {}
            }
        }
    }

    /// Collect `{request_key -> value}` over all non-header managed widgets,
    /// plus `endpoint_override` when manual mode is on.
    pub fn collect_dynamic_params(&self, node: &NodeInstance) -> Map<String, Value> {
        let mut params = Map::new();
        for m in self.managed.iter().filter(|m| m.role == ManagedRole::Param) {
            if let Some(value) = node.widget_value(&m.name) {
                params.insert(m.request_key.clone(), value.clone());
            }
        }

        let endpoint = self.endpoint_state(node);
        if endpoint.manual {
            if let Some(selected) = endpoint.selected {
                params.insert("endpoint_override".to_string(), Value::String(selected));
            }
        }
        params
    }

    /// Names of the widgets owned by the last pass. Test and serialization
    /// hook support.
    pub fn managed_names(&self) -> Vec<&str> {
        self.managed.iter().map(|m| m.name.as_str()).collect()
    }
}

fn resolve_initial(
    def: &ParameterDefinition,
    old_values: &HashMap<String, Value>,
    pending: &Map<String, Value>,
) -> Value {
    if let Some(existing) = old_values.get(&def.name) {
        return existing.clone();
    }
    if let Some(restored) = pending.get(def.request_key()) {
        return restored.clone();
    }
    def.default.clone()
}

fn make_widget(def: &ParameterDefinition, value: Value) -> Widget {
    let mut widget = match def.kind {
        ParamKind::Choice => Widget::choice(&def.name, value, def.options.clone()),
        ParamKind::Boolean => Widget::boolean(&def.name, value.as_bool().unwrap_or(false)),
        ParamKind::Number => Widget::number(&def.name, value),
        ParamKind::Text => Widget::text(&def.name, value),
        ParamKind::Slider => Widget::slider(&def.name, value),
    }
    .unserialized();
    widget.min = def.min;
    widget.max = def.max;
    widget.step = def.step;
    widget
}
