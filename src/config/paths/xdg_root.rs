//! XDG Base Directory locations for llmux.

use std::path::PathBuf;

/// `$XDG_DATA_HOME`, falling back to `$HOME/.local/share`.
pub fn data_home() -> Option<PathBuf> {
    if let Ok(xdg_data_home) = std::env::var("XDG_DATA_HOME") {
        if !xdg_data_home.is_empty() {
            return Some(PathBuf::from(xdg_data_home));
        }
    }
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".local").join("share"))
}

/// `$XDG_CONFIG_HOME`, falling back to `$HOME/.config`.
pub fn config_home() -> Option<PathBuf> {
    if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg_config_home.is_empty() {
            return Some(PathBuf::from(xdg_config_home));
        }
    }
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".config"))
}

/// `$XDG_DATA_HOME/llmux`
pub fn data_dir() -> Option<PathBuf> {
    data_home().map(|home| home.join("llmux"))
}

/// `$XDG_CONFIG_HOME/llmux/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    config_home().map(|home| home.join("llmux").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_namespaced() {
        if let Some(path) = config_file_path() {
            assert!(path.ends_with("llmux/config.toml"));
        }
        if let Some(dir) = data_dir() {
            assert!(dir.ends_with("llmux"));
        }
    }
}
