//! Plugin discovery and loading configuration.

use serde::{Deserialize, Serialize};

/// Plugin system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Directory containing plugin shared libraries.
    #[serde(default = "default_plugin_directory")]
    pub directory: String,
    /// Additional directories searched, in order, when resolving a module by name.
    #[serde(default)]
    pub search_paths: Vec<String>,
    /// Whether the executable directory, the working directory and
    /// `PLUGHOST_PLUGIN_PATH` entries are appended to the search path.
    #[serde(default = "default_true")]
    pub include_default_paths: bool,
    /// File extensions considered when scanning a directory for modules.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Whether to automatically load every module in `directory` on startup.
    #[serde(default = "default_true")]
    pub auto_load: bool,
    /// Whether a candidate is probed in the verification context before it
    /// is committed to the module cache.
    #[serde(default = "default_true")]
    pub verify_before_load: bool,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            directory: default_plugin_directory(),
            search_paths: Vec::new(),
            include_default_paths: true,
            extensions: default_extensions(),
            auto_load: true,
            verify_before_load: true,
        }
    }
}

fn default_plugin_directory() -> String {
    "./plugins".to_string()
}

fn default_extensions() -> Vec<String> {
    vec![std::env::consts::DLL_EXTENSION.to_string()]
}

fn default_true() -> bool {
    true
}
