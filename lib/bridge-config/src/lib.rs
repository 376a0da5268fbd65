//! Declarative configuration for span-bridge subscriptions.
//!
//! Configuration is validated at load time: pattern selectors must compile
//! before a registry is built from them, so a typo fails bootstrap instead of
//! silently matching nothing at dispatch time.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to parse bridge configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid channel pattern `{pattern}`: {message}")]
    InvalidPattern { pattern: String, message: String },
}

#[derive(Debug, Deserialize, Serialize, JsonSchema, Clone)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Logical name of the instrumented service, used as the tracer scope
    /// name when wiring the OpenTelemetry backend.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// The subscriptions to install on the host notification bus.
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,
}

fn default_service_name() -> String {
    "span-bridge".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            subscriptions: Default::default(),
        }
    }
}

impl BridgeConfig {
    /// Parses and validates configuration from a JSON document.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks everything that cannot be expressed in the schema, currently
    /// that pattern selectors compile.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for subscription in &self.subscriptions {
            if let ChannelSelector::Pattern { pattern } = &subscription.channel {
                regex_automata::meta::Regex::new(pattern).map_err(|e| {
                    ConfigError::InvalidPattern {
                        pattern: pattern.clone(),
                        message: e.to_string(),
                    }
                })?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize, JsonSchema, Clone)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionConfig {
    /// Channel to observe: an exact name, or `{"pattern": "..."}` to match
    /// any channel whose name matches the regex.
    pub channel: ChannelSelector,

    /// Kind recorded on the spans this subscription produces.
    #[serde(default)]
    pub kind: SpanKindConfig,

    /// Payload keys never copied to span attributes, whatever their value.
    #[serde(default)]
    pub denylist: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema, Clone)]
#[serde(untagged)]
pub enum ChannelSelector {
    Exact(String),
    Pattern { pattern: String },
}

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SpanKindConfig {
    #[default]
    Internal,
    Client,
    Server,
    Producer,
    Consumer,
}
