//! Backend Client
//!
//! HTTP client for the generation service: schema delivery, configuration
//! change polling, independent generation, model listings and ordering, and
//! node settings. The `Backend` trait is the seam tests mock; `HttpBackend`
//! is the production implementation over `reqwest`.

use crate::config::BackendConfig;
use crate::error::EngineError;
use crate::host::ImageRef;
use crate::schema::SchemaResponse;
use crate::types::{ChangeToken, ModelId, ParamsHash};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// One model as listed by the backend for a category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub category: String,
}

/// Result of a configuration change-token poll.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeTokenPoll {
    #[serde(rename = "mtime")]
    pub token: ChangeToken,
    #[serde(default)]
    pub changed: bool,
}

/// Endpoint selection strategy when no manual override is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoEndpointMode {
    Priority,
    RoundRobin,
}

impl Default for AutoEndpointMode {
    fn default() -> Self {
        AutoEndpointMode::Priority
    }
}

/// Backend-persisted node behavior flags. Defaults mirror the service's own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Exclude these nodes from whole-graph queue submissions.
    #[serde(default = "default_true")]
    pub bypass_queue_prompt: bool,

    /// Annotate queued requests with the last params hash so the backend can
    /// replay cached previews.
    #[serde(default = "default_true")]
    pub smart_cache_hash_check: bool,

    #[serde(default)]
    pub auto_endpoint_mode: AutoEndpointMode,

    /// Preview rendering mode for the node's result area.
    #[serde(default = "default_preview_mode")]
    pub preview_mode: String,
}

fn default_true() -> bool {
    true
}

fn default_preview_mode() -> String {
    "gallery".to_string()
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            bypass_queue_prompt: true,
            smart_cache_hash_check: true,
            auto_endpoint_mode: AutoEndpointMode::default(),
            preview_mode: default_preview_mode(),
        }
    }
}

/// An independent generation request, sent straight to the backend and past
/// the host's execution queue.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub model: ModelId,
    pub prompt: String,
    pub seed: i64,
    pub batch_count: u32,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub extra_params: Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images_base64: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_override: Option<String>,
}

/// Generation outcome. `params_hash` is the backend's authoritative digest;
/// `cached` marks a replay served from the result cache instead of a fresh
/// provider invocation.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResult {
    pub success: bool,
    #[serde(default)]
    pub preview_images: Vec<ImageRef>,
    #[serde(default)]
    pub params_hash: Option<ParamsHash>,
    #[serde(default)]
    pub response_info: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub cached: bool,
}

/// Generation service client trait
#[async_trait]
pub trait Backend: Send + Sync {
    /// Fetch the parameter schema for a model.
    async fn fetch_schema(&self, model: &ModelId) -> Result<SchemaResponse, EngineError>;

    /// Poll the configuration change token.
    async fn poll_change_token(
        &self,
        since: Option<ChangeToken>,
    ) -> Result<ChangeTokenPoll, EngineError>;

    /// Run a generation outside the host's queue.
    async fn generate_independent(
        &self,
        request: &GenerateRequest,
    ) -> Result<GenerateResult, EngineError>;

    /// List models for a category, in configured order.
    async fn models_by_category(&self, category: &str) -> Result<Vec<ModelInfo>, EngineError>;

    async fn get_model_order(&self, category: &str) -> Result<Vec<String>, EngineError>;

    async fn set_model_order(&self, category: &str, order: &[String]) -> Result<(), EngineError>;

    async fn get_node_settings(&self) -> Result<NodeSettings, EngineError>;

    async fn set_node_settings(&self, settings: &NodeSettings) -> Result<(), EngineError>;
}

// Wire envelopes for the listing/settings endpoints.
#[derive(Deserialize)]
struct ModelsEnvelope {
    models: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct OrderEnvelope {
    #[serde(default)]
    order: Vec<String>,
}

#[derive(Serialize)]
struct OrderBody<'a> {
    order: &'a [String],
}

#[derive(Deserialize)]
struct NodeSettingsEnvelope {
    node_settings: NodeSettings,
}

/// HTTP implementation of [`Backend`].
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(HttpBackend {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/batchbox/{}", self.base_url, path)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch_schema(&self, model: &ModelId) -> Result<SchemaResponse, EngineError> {
        let response = self
            .client
            .get(self.url(&format!("schema/{}", model)))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EngineError::SchemaFetch(format!(
                "schema request for '{}' returned {}",
                model,
                response.status()
            )));
        }

        Ok(response.json().await?)
    }

    async fn poll_change_token(
        &self,
        since: Option<ChangeToken>,
    ) -> Result<ChangeTokenPoll, EngineError> {
        let mut request = self.client.get(self.url("config/mtime"));
        if let Some(token) = since {
            request = request.query(&[("since", token.0)]);
        }
        Ok(request.send().await?.error_for_status()?.json().await?)
    }

    async fn generate_independent(
        &self,
        request: &GenerateRequest,
    ) -> Result<GenerateResult, EngineError> {
        let response = self
            .client
            .post(self.url("generate-independent"))
            .json(request)
            .send()
            .await?;

        // The backend reports failures through the body, not the status line.
        Ok(response.json().await?)
    }

    async fn models_by_category(&self, category: &str) -> Result<Vec<ModelInfo>, EngineError> {
        let envelope: ModelsEnvelope = self
            .client
            .get(self.url("models"))
            .query(&[("category", category)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(envelope.models)
    }

    async fn get_model_order(&self, category: &str) -> Result<Vec<String>, EngineError> {
        let envelope: OrderEnvelope = self
            .client
            .get(self.url(&format!("model-order/{}", category)))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(envelope.order)
    }

    async fn set_model_order(&self, category: &str, order: &[String]) -> Result<(), EngineError> {
        self.client
            .post(self.url(&format!("model-order/{}", category)))
            .json(&OrderBody { order })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn get_node_settings(&self) -> Result<NodeSettings, EngineError> {
        let envelope: NodeSettingsEnvelope = self
            .client
            .get(self.url("node-settings"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(envelope.node_settings)
    }

    async fn set_node_settings(&self, settings: &NodeSettings) -> Result<(), EngineError> {
        self.client
            .post(self.url("node-settings"))
            .json(settings)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
