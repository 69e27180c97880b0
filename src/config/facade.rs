//! ConfigLoader facade delegating to the merge service.

use super::merge::service::MergeService;
use super::LlmuxConfig;
use config::ConfigError;
use std::path::Path;

/// Configuration loader facade.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load defaults, the global file, `explicit` if given, then environment.
    pub fn load(explicit: Option<&Path>) -> Result<LlmuxConfig, ConfigError> {
        MergeService::load(explicit)
    }

    /// Load a single file with environment overlay, skipping the global file.
    pub fn load_from_file(path: &Path) -> Result<LlmuxConfig, ConfigError> {
        MergeService::load_from_file(path)
    }
}
