//! Error types for the Batchbox node engine.

use crate::types::{ModelId, NodeId};
use thiserror::Error;

/// Engine-level errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Schema fetch failed: {0}")]
    SchemaFetch(String),

    #[error("Model not found: {0}")]
    ModelNotFound(ModelId),

    #[error("No models configured for category '{0}'")]
    NoModelsInCategory(String),

    #[error("Cannot resolve image input from upstream node {node}: {reason}")]
    ImageResolution { node: NodeId, reason: String },

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Invalid parameter payload: {0}")]
    InvalidParams(String),

    #[error("Host error: {0}")]
    Host(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}
