//! Configuration
//!
//! Layered configuration loaded through the `config` crate. Precedence, lowest
//! first: built-in defaults, the global file under the XDG config home, an
//! explicit `--config` file, then `LLMUX__*` environment variables.

pub mod facade;
pub mod merge;
pub mod paths;
pub mod sources;

pub use facade::ConfigLoader;

use crate::logging::LoggingConfig;
use crate::provider::profile::BackendConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmuxConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub system: SystemSettings,

    /// Backends by name
    #[serde(default)]
    pub backends: BTreeMap<String, BackendConfig>,
}

/// Where the runtime writes and what it tells agents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemSettings {
    /// Chat transcripts and mailbox logs; defaults to `$XDG_DATA_HOME/llmux/output`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,

    /// Device state; defaults to `$XDG_DATA_HOME/llmux/storage`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<PathBuf>,

    /// Replaces the built-in standing prompt for agents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl SystemSettings {
    pub fn resolved_output_dir(&self) -> Option<PathBuf> {
        self.output_dir
            .clone()
            .or_else(|| paths::xdg_root::data_dir().map(|dir| dir.join("output")))
    }

    pub fn resolved_storage_dir(&self) -> Option<PathBuf> {
        self.storage_dir
            .clone()
            .or_else(|| paths::xdg_root::data_dir().map(|dir| dir.join("storage")))
    }
}

impl LlmuxConfig {
    /// Validate every backend, naming the first one that fails.
    pub fn validate(&self) -> Result<(), String> {
        for (name, backend) in &self.backends {
            backend
                .validate()
                .map_err(|e| format!("Backend '{}': {}", name, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::profile::BackendKind;

    #[test]
    fn test_parse_toml() {
        let text = r#"
            [logging]
            level = "debug"

            [system]
            output_dir = "/tmp/llmux-out"

            [backends.gpt4]
            model = "gpt-4"
            min_interval_secs = 2.5

            [backends.embedder]
            kind = "embedding"
            model = "text-embedding-ada-002"
        "#;
        let config: LlmuxConfig = toml::from_str(text).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.system.resolved_output_dir(), Some(PathBuf::from("/tmp/llmux-out")));
        assert_eq!(config.backends["gpt4"].min_interval_secs, 2.5);
        assert_eq!(config.backends["embedder"].kind, BackendKind::Embedding);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_names_backend() {
        let text = r#"
            [backends.broken]
            model = ""
        "#;
        let config: LlmuxConfig = toml::from_str(text).unwrap();
        let error = config.validate().unwrap_err();
        assert!(error.starts_with("Backend 'broken'"));
    }
}
