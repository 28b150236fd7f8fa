//! Parameter Schemas
//!
//! Server-declared descriptions of a model's configurable parameters, plus
//! the process-wide caches that gate how often they are fetched.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod cache;

pub use cache::{ModelListCache, SchemaCache};

/// Default group for parameters without an explicit one.
pub const DEFAULT_GROUP: &str = "basic";

/// Group name that starts collapsed on first build.
pub const ADVANCED_GROUP: &str = "advanced";

/// Parameter value kind, mapped onto host widget kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Choice,
    Boolean,
    Number,
    Text,
    Slider,
}

/// One entry of a model's flattened parameter schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,

    /// Request-side key override. The request key for a parameter is
    /// `api_name` if present, else `name`.
    #[serde(default)]
    pub api_name: Option<String>,

    #[serde(rename = "type")]
    pub kind: ParamKind,

    #[serde(default = "default_group")]
    pub group: String,

    #[serde(default)]
    pub default: Value,

    #[serde(default)]
    pub options: Vec<String>,

    #[serde(default)]
    pub min: Option<f64>,

    #[serde(default)]
    pub max: Option<f64>,

    #[serde(default)]
    pub step: Option<f64>,
}

fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

impl ParameterDefinition {
    /// Effective key under which this parameter travels in requests.
    pub fn request_key(&self) -> &str {
        self.api_name.as_deref().unwrap_or(&self.name)
    }
}

/// A named remote execution target for a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointOption {
    pub name: String,
    #[serde(default = "default_priority")]
    pub priority: u32,
}

fn default_priority() -> u32 {
    1
}

/// Schema served by the backend for one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaResponse {
    #[serde(rename = "flat_schema", default)]
    pub flat_schema: Vec<ParameterDefinition>,

    #[serde(default = "default_show_seed")]
    pub show_seed_widget: bool,

    #[serde(default)]
    pub endpoint_options: Vec<EndpointOption>,
}

fn default_show_seed() -> bool {
    true
}

impl SchemaResponse {
    /// Groups in order of first appearance in the flat schema.
    pub fn groups(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for def in &self.flat_schema {
            let group = def.group.as_str();
            if !seen.contains(&group) {
                seen.push(group);
            }
        }
        seen
    }

    pub fn definition(&self, name: &str) -> Option<&ParameterDefinition> {
        self.flat_schema.iter().find(|d| d.name == name)
    }

    fn definition_by_key(&self, key: &str) -> Option<&ParameterDefinition> {
        self.flat_schema.iter().find(|d| d.request_key() == key)
    }
}

/// Validate a manually-edited parameter payload against a schema.
///
/// Unknown keys, out-of-range numbers, and values outside a choice's option
/// list are reported, never silently dropped.
pub fn validate_params(schema: &SchemaResponse, params: &Map<String, Value>) -> Result<(), EngineError> {
    for (key, value) in params {
        let def = schema
            .definition_by_key(key)
            .ok_or_else(|| EngineError::InvalidParams(format!("unknown parameter '{}'", key)))?;

        match def.kind {
            ParamKind::Choice => {
                let text = value.as_str().ok_or_else(|| {
                    EngineError::InvalidParams(format!("'{}' must be a string", key))
                })?;
                if !def.options.is_empty() && !def.options.iter().any(|o| o == text) {
                    return Err(EngineError::InvalidParams(format!(
                        "'{}' is not a valid option for '{}'",
                        text, key
                    )));
                }
            }
            ParamKind::Boolean => {
                if !value.is_boolean() {
                    return Err(EngineError::InvalidParams(format!(
                        "'{}' must be a boolean",
                        key
                    )));
                }
            }
            ParamKind::Number | ParamKind::Slider => {
                let number = value.as_f64().ok_or_else(|| {
                    EngineError::InvalidParams(format!("'{}' must be a number", key))
                })?;
                if let Some(min) = def.min {
                    if number < min {
                        return Err(EngineError::InvalidParams(format!(
                            "'{}' is below the minimum {}",
                            key, min
                        )));
                    }
                }
                if let Some(max) = def.max {
                    if number > max {
                        return Err(EngineError::InvalidParams(format!(
                            "'{}' is above the maximum {}",
                            key, max
                        )));
                    }
                }
            }
            ParamKind::Text => {
                if !value.is_string() {
                    return Err(EngineError::InvalidParams(format!(
                        "'{}' must be a string",
                        key
                    )));
                }
            }
        }
    }
    Ok(())
}
