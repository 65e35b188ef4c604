//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section; every field carries a serde default so an absent file still
//! yields a usable configuration.

pub mod logging;
pub mod plugin;
pub mod verification;

use serde::{Deserialize, Serialize};

use self::logging::LoggingConfig;
use self::plugin::PluginConfig;
use self::verification::VerificationConfig;

use crate::error::AppError;

/// Environment variable selecting the overlay file (`config/{env}.toml`).
pub const ENV_SELECTOR: &str = "PLUGHOST_ENV";

/// Prefix of environment variables overriding individual keys,
/// e.g. `PLUGHOST__PLUGINS__DIRECTORY=/opt/plugins`.
pub const ENV_PREFIX: &str = "PLUGHOST";

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Plugin discovery and loading settings.
    pub plugins: PluginConfig,
    /// Isolated verification settings.
    pub verification: VerificationConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    ///
    /// Merges the given file with an optional environment overlay
    /// (`config/{PLUGHOST_ENV}.toml`) and environment variables prefixed
    /// with `PLUGHOST__`. Missing files are not an error.
    pub fn load(path: &str) -> Result<Self, AppError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name(path).required(false));

        if let Ok(env) = std::env::var(ENV_SELECTOR) {
            builder = builder
                .add_source(config::File::with_name(&format!("config/{env}")).required(false));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("plugins.search_paths")
                    .with_list_parse_key("verification.probe_command"),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))
    }

    /// Parse configuration from an in-memory TOML string.
    pub fn from_toml(source: &str) -> Result<Self, AppError> {
        config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
            .map_err(AppError::from)
    }
}
