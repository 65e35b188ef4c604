//! Resolution of plugin paths and logical module names.

use std::env;
use std::path::{Path, PathBuf};

use plughost_core::config::plugin::PluginConfig;
use tracing::{debug, trace};

use crate::error::{PluginError, PluginResult};

/// Environment variable holding extra search directories, separated like
/// `PATH`.
pub const PLUGIN_PATH_ENV: &str = "PLUGHOST_PLUGIN_PATH";

/// Ordered, deduplicated list of directories searched for modules.
#[derive(Debug, Clone, Default)]
pub struct PathResolver {
    directories: Vec<PathBuf>,
}

impl PathResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plugin directory first, then configured search paths, then the
    /// platform defaults when enabled.
    pub fn from_config(config: &PluginConfig) -> Self {
        let mut resolver = Self::new();
        resolver.push(&config.directory);
        for path in &config.search_paths {
            resolver.push(path);
        }
        if config.include_default_paths {
            resolver.push_default_paths();
        }
        resolver
    }

    /// Appends the executable's directory, the working directory and the
    /// entries of [`PLUGIN_PATH_ENV`].
    pub fn push_default_paths(&mut self) {
        if let Some(dir) = env::current_exe().ok().and_then(|exe| exe.parent().map(Path::to_path_buf)) {
            self.push(dir);
        }
        if let Ok(cwd) = env::current_dir() {
            self.push(cwd);
        }
        if let Some(extra) = env::var_os(PLUGIN_PATH_ENV) {
            for dir in env::split_paths(&extra) {
                self.push(dir);
            }
        }
    }

    /// Appends a directory unless an equivalent one is present. Returns
    /// whether it was added.
    pub fn push(&mut self, dir: impl AsRef<Path>) -> bool {
        let dir = dir.as_ref();
        if dir.as_os_str().is_empty() {
            return false;
        }

        let normalized = normalize(dir);
        if self.directories.iter().any(|existing| normalize(existing) == normalized) {
            return false;
        }
        self.directories.push(dir.to_path_buf());
        true
    }

    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    /// File names tried for a logical name in each directory.
    pub fn candidate_file_names(name: &str) -> Vec<String> {
        let mut names = vec![name.to_string()];
        if Path::new(name).extension().is_none() {
            let prefix = env::consts::DLL_PREFIX;
            let extension = env::consts::DLL_EXTENSION;
            if !prefix.is_empty() {
                names.push(format!("{prefix}{name}.{extension}"));
            }
            names.push(format!("{name}.{extension}"));
        }
        names
    }

    /// Resolves an explicit path or a logical module name to a file.
    ///
    /// An existing file path wins. A bare name is tried in each directory
    /// in order, first as given, then with the platform's library prefix
    /// and extension.
    pub fn resolve(&self, path_or_name: &str) -> PluginResult<PathBuf> {
        let request = path_or_name.trim();
        if request.is_empty() {
            return Err(PluginError::InvalidArgument(
                "plugin path or name must not be empty".to_string(),
            ));
        }

        let direct = Path::new(request);
        if direct.is_file() {
            trace!(path = %direct.display(), "Resolved explicit path");
            return Ok(direct.to_path_buf());
        }

        if direct.components().count() > 1 {
            return Err(PluginError::NotFound(request.to_string()));
        }

        let candidates = Self::candidate_file_names(request);
        for dir in &self.directories {
            for candidate in &candidates {
                let path = dir.join(candidate);
                if path.is_file() {
                    debug!(name = %request, path = %path.display(), "Resolved module name");
                    return Ok(path);
                }
            }
        }

        Err(PluginError::NotFound(format!(
            "{request} (searched {} directories)",
            self.directories.len()
        )))
    }
}

fn normalize(dir: &Path) -> PathBuf {
    let path = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    if cfg!(windows) {
        PathBuf::from(path.to_string_lossy().to_lowercase())
    } else {
        path
    }
}
