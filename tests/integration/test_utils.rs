//! Shared doubles for the integration scenarios.
//!
//! `MockBackend` stands in for the generation service. Its params hash is a
//! deterministic digest over the same inputs the real service hashes; the
//! engine under test still treats it as an opaque token. `QueueExecutor`
//! models the backend's handling of host-queued requests: cache-first unless
//! forced.

use async_trait::async_trait;
use batchbox::backend::{
    Backend, ChangeTokenPoll, GenerateRequest, GenerateResult, ModelInfo, NodeSettings,
};
use batchbox::error::EngineError;
use batchbox::gate::CacheAnnotation;
use batchbox::host::{ConnectionTable, GraphHost, ImageRef};
use batchbox::schema::{ParamKind, ParameterDefinition, SchemaResponse};
use batchbox::types::{ChangeToken, ModelId, NodeId, ParamsHash};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn choice_param(
    name: &str,
    api_name: Option<&str>,
    options: &[&str],
    group: &str,
) -> ParameterDefinition {
    ParameterDefinition {
        name: name.to_string(),
        api_name: api_name.map(String::from),
        kind: ParamKind::Choice,
        group: group.to_string(),
        default: json!(options.first().copied().unwrap_or("")),
        options: options.iter().map(|s| s.to_string()).collect(),
        min: None,
        max: None,
        step: None,
    }
}

pub fn number_param(name: &str, default: i64, group: &str) -> ParameterDefinition {
    ParameterDefinition {
        name: name.to_string(),
        api_name: None,
        kind: ParamKind::Number,
        group: group.to_string(),
        default: json!(default),
        options: vec![],
        min: None,
        max: None,
        step: None,
    }
}

pub fn schema(params: Vec<ParameterDefinition>) -> SchemaResponse {
    SchemaResponse {
        flat_schema: params,
        show_seed_widget: true,
        endpoint_options: vec![],
    }
}

/// Deterministic stand-in for the backend's digest.
pub fn fake_params_hash(request: &GenerateRequest) -> ParamsHash {
    let mut hasher = DefaultHasher::new();
    request.model.as_str().hash(&mut hasher);
    request.prompt.hash(&mut hasher);
    request.seed.hash(&mut hasher);
    request.batch_count.hash(&mut hasher);
    serde_json::to_string(&request.extra_params)
        .unwrap()
        .hash(&mut hasher);
    request.images_base64.hash(&mut hasher);
    request.endpoint_override.hash(&mut hasher);
    ParamsHash::from_backend(format!("{:016x}", hasher.finish()))
}

pub fn fresh_result(request: &GenerateRequest) -> GenerateResult {
    let previews = (0..request.batch_count.max(1))
        .map(|i| ImageRef {
            filename: format!("{}_{}.png", request.model, i),
            subfolder: String::new(),
            kind: "temp".to_string(),
        })
        .collect();
    GenerateResult {
        success: true,
        preview_images: previews,
        params_hash: Some(fake_params_hash(request)),
        response_info: Some("Success".to_string()),
        error: None,
        cached: false,
    }
}

#[derive(Default)]
pub struct MockBackend {
    pub schemas: Mutex<HashMap<ModelId, SchemaResponse>>,
    pub models: Mutex<HashMap<String, Vec<ModelInfo>>>,
    pub token: Mutex<f64>,
    pub schema_fetches: AtomicUsize,
    pub generate_calls: AtomicUsize,
    pub last_request: Mutex<Option<GenerateRequest>>,
    pub node_settings: Mutex<NodeSettings>,
    pub model_order: Mutex<HashMap<String, Vec<String>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            token: Mutex::new(1.0),
            ..Default::default()
        }
    }

    pub fn with_schema(self, model: &str, value: SchemaResponse) -> Self {
        self.schemas.lock().insert(ModelId::from(model), value);
        self
    }

    pub fn with_models(self, category: &str, names: &[&str]) -> Self {
        let infos = names
            .iter()
            .map(|n| ModelInfo {
                name: n.to_string(),
                display_name: n.to_string(),
                category: category.to_string(),
            })
            .collect();
        self.models.lock().insert(category.to_string(), infos);
        self
    }

    pub fn bump_token(&self) {
        *self.token.lock() += 1.0;
    }

    pub fn generate_count(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn schema_fetch_count(&self) -> usize {
        self.schema_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn fetch_schema(&self, model: &ModelId) -> Result<SchemaResponse, EngineError> {
        self.schema_fetches.fetch_add(1, Ordering::SeqCst);
        self.schemas
            .lock()
            .get(model)
            .cloned()
            .ok_or_else(|| EngineError::ModelNotFound(model.clone()))
    }

    async fn poll_change_token(
        &self,
        since: Option<ChangeToken>,
    ) -> Result<ChangeTokenPoll, EngineError> {
        let token = ChangeToken(*self.token.lock());
        Ok(ChangeTokenPoll {
            token,
            changed: since.map(|s| s != token).unwrap_or(false),
        })
    }

    async fn generate_independent(
        &self,
        request: &GenerateRequest,
    ) -> Result<GenerateResult, EngineError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock() = Some(request.clone());
        Ok(fresh_result(request))
    }

    async fn models_by_category(&self, category: &str) -> Result<Vec<ModelInfo>, EngineError> {
        Ok(self.models.lock().get(category).cloned().unwrap_or_default())
    }

    async fn get_model_order(&self, category: &str) -> Result<Vec<String>, EngineError> {
        Ok(self
            .model_order
            .lock()
            .get(category)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_model_order(&self, category: &str, order: &[String]) -> Result<(), EngineError> {
        self.model_order
            .lock()
            .insert(category.to_string(), order.to_vec());
        Ok(())
    }

    async fn get_node_settings(&self) -> Result<NodeSettings, EngineError> {
        Ok(self.node_settings.lock().clone())
    }

    async fn set_node_settings(&self, settings: &NodeSettings) -> Result<(), EngineError> {
        *self.node_settings.lock() = settings.clone();
        Ok(())
    }
}

#[derive(Default)]
pub struct MockHost {
    pub connections: ConnectionTable,
    pub upstream_images: HashMap<NodeId, String>,
    pub rasters: HashMap<NodeId, String>,
    pub assets: HashMap<String, String>,
    pub queued_scopes: Mutex<Vec<Option<Vec<NodeId>>>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link(&mut self, from: NodeId, to: NodeId) {
        self.connections.entry(to).or_default().push(from);
    }
}

#[async_trait]
impl GraphHost for MockHost {
    fn connections(&self) -> ConnectionTable {
        self.connections.clone()
    }

    async fn upstream_image(&self, node: NodeId) -> Option<String> {
        self.upstream_images.get(&node).cloned()
    }

    async fn cached_raster(&self, node: NodeId) -> Option<String> {
        self.rasters.get(&node).cloned()
    }

    async fn fetch_asset(&self, identifier: &str) -> Result<String, EngineError> {
        self.assets
            .get(identifier)
            .cloned()
            .ok_or_else(|| EngineError::Host(format!("asset '{}' not found", identifier)))
    }

    async fn queue_prompt(&self, scope: Option<Vec<NodeId>>) -> Result<(), EngineError> {
        self.queued_scopes.lock().push(scope);
        Ok(())
    }
}

/// Models the backend's host-queue handler: force bypasses the result cache,
/// a matching hash replays the stored preview without touching the provider.
#[derive(Default)]
pub struct QueueExecutor {
    pub provider_calls: AtomicUsize,
}

impl QueueExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider_call_count(&self) -> usize {
        self.provider_calls.load(Ordering::SeqCst)
    }

    pub fn execute(&self, annotation: &CacheAnnotation, request: &GenerateRequest) -> GenerateResult {
        let fresh = fake_params_hash(request);

        if !annotation.force {
            if let Some(last) = &annotation.last_params_hash {
                if *last == fresh && !annotation.last_previews.is_empty() {
                    return GenerateResult {
                        success: true,
                        preview_images: annotation.last_previews.clone(),
                        params_hash: Some(fresh),
                        response_info: Some("Cached".to_string()),
                        error: None,
                        cached: true,
                    };
                }
            }
        }

        self.provider_calls.fetch_add(1, Ordering::SeqCst);
        fresh_result(request)
    }
}
