//! Environment variable source: LLMUX__ prefix with __ separator

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::Environment;

/// Add environment variable overlay to builder, e.g.
/// `LLMUX__BACKENDS__GPT4__API_KEY`.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Ok(builder.add_source(
        Environment::with_prefix("LLMUX")
            .separator("__")
            .try_parsing(true),
    ))
}
