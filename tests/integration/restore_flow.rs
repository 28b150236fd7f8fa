//! Save/load round trips: the structured payload a node serializes must
//! reproduce the exact widget state after a graph reload, with restored
//! values resolved before widgets are constructed.

use super::test_utils::{choice_param, number_param, schema, MockBackend};
use batchbox::config::EngineConfig;
use batchbox::engine::Engine;
use batchbox::node::GenerationNode;
use batchbox::schema::{EndpointOption, ParameterDefinition, SchemaResponse};
use batchbox::sync::ENDPOINT_CHOICE_WIDGET;
use batchbox::types::NodeId;
use serde_json::json;
use std::sync::Arc;

fn grouped_schema() -> SchemaResponse {
    SchemaResponse {
        flat_schema: vec![
            choice_param("resolution", None, &["auto", "16:9", "4:3"], "basic"),
            ParameterDefinition {
                api_name: Some("output_quality".to_string()),
                ..choice_param("quality", None, &["standard", "high"], "advanced")
            },
            number_param("steps", 20, "advanced"),
        ],
        show_seed_widget: true,
        endpoint_options: vec![
            EndpointOption {
                name: "stable".to_string(),
                priority: 1,
            },
            EndpointOption {
                name: "fast".to_string(),
                priority: 2,
            },
        ],
    }
}

fn engine_with_schema() -> Engine {
    Engine::new(
        Arc::new(
            MockBackend::new()
                .with_schema("banana_pro", grouped_schema())
                .with_models("image", &["banana_pro"]),
        ),
        &EngineConfig::default(),
    )
}

async fn loaded_node(engine: &Engine) -> GenerationNode {
    let mut node = GenerationNode::new(NodeId(1), "image");
    node.populate_models(engine).await.unwrap();
    node
}

#[tokio::test]
async fn full_round_trip_reproduces_widget_state() {
    let engine = engine_with_schema();
    let mut node = loaded_node(&engine).await;

    // User edits: expand the advanced group, change values, pick a manual
    // endpoint, browse to the second preview.
    node.sync.toggle_group(&mut node.node, "advanced");
    node.node.widget_mut("resolution").unwrap().value = json!("16:9");
    node.node.widget_mut("quality").unwrap().value = json!("high");
    node.node.widget_mut("steps").unwrap().value = json!(35);
    node.sync.set_manual_endpoint(&mut node.node, true);
    node.node.widget_mut(ENDPOINT_CHOICE_WIDGET).unwrap().value = json!("fast");
    node.node.properties.image_selection = 1;

    let payload = serde_json::to_value(node.serialize_dynamic_state()).unwrap();

    // Fresh session: deserialize lands before any dynamic widget exists.
    let mut restored = GenerationNode::new(NodeId(1), "image");
    restored.deserialize_dynamic_state(&payload).unwrap();
    restored.populate_models(&engine).await.unwrap();

    assert_eq!(restored.node.widget_value("resolution"), Some(&json!("16:9")));
    assert_eq!(restored.node.widget_value("quality"), Some(&json!("high")));
    assert_eq!(restored.node.widget_value("steps"), Some(&json!(35)));

    let endpoint = restored.sync.endpoint_state(&restored.node);
    assert!(endpoint.manual);
    assert_eq!(endpoint.selected.as_deref(), Some("fast"));
    assert!(!restored
        .node
        .widget(ENDPOINT_CHOICE_WIDGET)
        .unwrap()
        .hidden);

    // The advanced group was expanded at save time, so it comes back open.
    assert!(!restored.node.widget("quality").unwrap().hidden);
    assert!(restored.sync.collapsed_groups().is_empty());

    assert_eq!(restored.node.properties.image_selection, 1);
}

#[tokio::test]
async fn restored_values_never_flash_defaults() {
    let engine = engine_with_schema();
    let mut node = GenerationNode::new(NodeId(1), "image");

    let payload = json!({
        "dynamic_params": {"resolution": "4:3"},
        "endpoint_state": {},
        "collapsed_groups": ["advanced"],
        "image_selection": 0
    });
    node.deserialize_dynamic_state(&payload).unwrap();
    node.populate_models(&engine).await.unwrap();

    // The widget is created already holding the restored value; at no point
    // does it exist with the schema default.
    assert_eq!(node.node.widget_value("resolution"), Some(&json!("4:3")));
}

#[tokio::test]
async fn restore_applies_exactly_once() {
    let engine = engine_with_schema();
    let mut node = GenerationNode::new(NodeId(1), "image");

    let payload = json!({
        "dynamic_params": {"resolution": "16:9"},
        "endpoint_state": {},
        "collapsed_groups": [],
        "image_selection": 0
    });
    node.deserialize_dynamic_state(&payload).unwrap();
    node.populate_models(&engine).await.unwrap();
    assert_eq!(node.node.widget_value("resolution"), Some(&json!("16:9")));

    // The user moves on, then forces a rebuild of the same model. The stale
    // payload must not resurface; the live value carries over instead.
    node.node.widget_mut("resolution").unwrap().value = json!("auto");
    node.select_model(&engine, "banana_pro".into(), true)
        .await
        .unwrap();
    assert_eq!(node.node.widget_value("resolution"), Some(&json!("auto")));
}

#[tokio::test]
async fn api_name_keys_round_trip() {
    let engine = engine_with_schema();
    let mut node = loaded_node(&engine).await;

    node.node.widget_mut("quality").unwrap().value = json!("high");
    let state = node.serialize_dynamic_state();

    // The payload travels under the request key, not the display name.
    assert_eq!(state.dynamic_params.get("output_quality"), Some(&json!("high")));
    assert!(state.dynamic_params.get("quality").is_none());

    let payload = serde_json::to_value(state).unwrap();
    let mut restored = GenerationNode::new(NodeId(1), "image");
    restored.deserialize_dynamic_state(&payload).unwrap();
    restored.populate_models(&engine).await.unwrap();
    assert_eq!(restored.node.widget_value("quality"), Some(&json!("high")));
}

#[tokio::test]
async fn endpoint_override_stays_out_of_dynamic_params() {
    let engine = engine_with_schema();
    let mut node = loaded_node(&engine).await;

    node.sync.set_manual_endpoint(&mut node.node, true);
    let state = node.serialize_dynamic_state();

    assert!(state.dynamic_params.get("endpoint_override").is_none());
    assert!(state.endpoint_state.manual);
}

#[tokio::test]
async fn stale_endpoint_selection_falls_back_to_first_option() {
    let engine = engine_with_schema();

    let payload = json!({
        "dynamic_params": {},
        "endpoint_state": {"manual": true, "selected": "decommissioned"},
        "collapsed_groups": [],
        "image_selection": 0
    });
    let mut node = GenerationNode::new(NodeId(1), "image");
    node.deserialize_dynamic_state(&payload).unwrap();
    node.populate_models(&engine).await.unwrap();

    let endpoint = node.sync.endpoint_state(&node.node);
    assert!(endpoint.manual);
    assert_eq!(endpoint.selected.as_deref(), Some("stable"));
}

#[tokio::test]
async fn hand_edited_values_outside_the_schema_surface_an_error() {
    let engine = Engine::new(
        Arc::new(
            MockBackend::new()
                .with_schema(
                    "banana_pro",
                    schema(vec![ParameterDefinition {
                        max: Some(50.0),
                        ..number_param("steps", 20, "basic")
                    }]),
                )
                .with_models("image", &["banana_pro"]),
        ),
        &EngineConfig::default(),
    );

    let payload = json!({
        "dynamic_params": {"steps": 999999},
        "endpoint_state": {},
        "collapsed_groups": [],
        "image_selection": 0
    });
    let mut node = GenerationNode::new(NodeId(1), "image");
    node.deserialize_dynamic_state(&payload).unwrap();

    let err = node.populate_models(&engine).await.unwrap_err();
    assert!(err.to_string().contains("above the maximum"));

    // The bad value never reached the widget.
    assert_eq!(node.node.widget_value("steps"), Some(&json!(20)));
}

#[tokio::test]
async fn widget_manual_edit_of_payload_is_rejected() {
    let mut node = GenerationNode::new(NodeId(1), "image");
    let err = node
        .deserialize_dynamic_state(&json!({"dynamic_params": "oops"}))
        .unwrap_err();
    assert!(err.to_string().contains("Invalid parameter payload"));
}
