//! Engine Configuration
//!
//! Local configuration for the engine itself: where the backend lives, how
//! long schema cache entries stay fresh, and how logging behaves. Loaded from
//! an optional TOML file with `BATCHBOX_`-prefixed environment variable
//! overrides. Everything else (node settings, model lists, schemas) is served
//! by the backend at runtime.

use crate::error::EngineError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Backend connection settings
    #[serde(default)]
    pub backend: BackendConfig,

    /// Schema cache entry lifetime in seconds
    #[serde(default = "default_schema_ttl_secs")]
    pub schema_ttl_secs: u64,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the generation service API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds (generation calls can be slow)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8188".to_string()
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_schema_ttl_secs() -> u64 {
    60
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            schema_ttl_secs: default_schema_ttl_secs(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration, layering sources: defaults, then an optional TOML
    /// file, then `BATCHBOX_`-prefixed environment variables.
    pub fn load(file: Option<&Path>) -> Result<Self, EngineError> {
        let mut builder = config::Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix("BATCHBOX").separator("__"))
            .build()?;

        let loaded: EngineConfig = settings.try_deserialize()?;
        Ok(loaded)
    }
}
