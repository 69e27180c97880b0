//! Backend configuration and validation.

use crate::broker::Discipline;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a backend computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Chat,
    Embedding,
}

/// Wire dialect of the HTTP API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ApiType {
    #[default]
    #[serde(rename = "openai")]
    OpenAI,
    #[serde(rename = "azure")]
    Azure,
}

/// One configured backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,

    #[serde(default)]
    pub api_type: ApiType,

    /// Model name, or deployment name for Azure
    pub model: String,

    /// Falls back to `OPENAI_API_KEY` / `AZURE_OPENAI_API_KEY`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,

    /// Required for Azure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Minimum spacing between successive calls
    #[serde(default = "default_min_interval")]
    pub min_interval_secs: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub discipline: Discipline,

    /// Shown to agents choosing a backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_min_interval() -> f64 {
    1.0
}

impl BackendConfig {
    pub fn new(kind: BackendKind, model: impl Into<String>) -> Self {
        Self {
            kind,
            api_type: ApiType::default(),
            model: model.into(),
            api_key: None,
            api_base: None,
            api_version: None,
            min_interval_secs: default_min_interval(),
            temperature: None,
            discipline: Discipline::default(),
            description: None,
        }
    }

    fn endpoint_has_scheme(endpoint: &str) -> bool {
        endpoint.starts_with("http://") || endpoint.starts_with("https://")
    }

    /// Accepts `http(s)://host[:port][/path]` where host is `localhost`, a
    /// dotted name or an IP address.
    pub fn endpoint_url_is_valid(endpoint: &str) -> bool {
        let endpoint = endpoint.trim();
        if !Self::endpoint_has_scheme(endpoint) {
            return false;
        }
        let Some((_, rest)) = endpoint.split_once("://") else {
            return false;
        };
        if rest.is_empty() || rest.chars().any(char::is_whitespace) {
            return false;
        }
        let authority = rest.split('/').next().unwrap_or_default();
        let host_port = authority.rsplit('@').next().unwrap_or(authority);
        let host = if host_port.starts_with('[') {
            let Some(end) = host_port.find(']') else {
                return false;
            };
            &host_port[1..end]
        } else {
            host_port.split(':').next().unwrap_or_default()
        };
        if host.is_empty() {
            return false;
        }
        host == "localhost" || host.contains('.') || host.parse::<std::net::IpAddr>().is_ok()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("Model name cannot be empty".to_string());
        }
        if let Some(api_base) = &self.api_base {
            if !Self::endpoint_url_is_valid(api_base) {
                return Err(format!("Invalid api_base URL: {}", api_base));
            }
        }
        if self.api_type == ApiType::Azure {
            if self.api_base.is_none() {
                return Err("Azure backends need api_base".to_string());
            }
            if self.api_version.is_none() {
                return Err("Azure backends need api_version".to_string());
            }
        }
        if !self.min_interval_secs.is_finite() || self.min_interval_secs < 0.0 {
            return Err(format!(
                "min_interval_secs must be a non-negative number, got {}",
                self.min_interval_secs
            ));
        }
        if let Some(temp) = self.temperature {
            if !(0.0..=2.0).contains(&temp) {
                return Err(format!(
                    "Temperature must be between 0.0 and 2.0, got {}",
                    temp
                ));
            }
        }
        Ok(())
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_secs_f64(self.min_interval_secs.max(0.0))
    }

    /// The configured key, else the conventional environment variable.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| match self.api_type {
            ApiType::OpenAI => std::env::var("OPENAI_API_KEY").ok(),
            ApiType::Azure => std::env::var("AZURE_OPENAI_API_KEY").ok(),
        })
    }

    pub fn description(&self) -> String {
        self.description.clone().unwrap_or_else(|| match self.kind {
            BackendKind::Chat => format!("chat completion with {}", self.model),
            BackendKind::Embedding => format!("text embedding with {}", self.model),
        })
    }
}
