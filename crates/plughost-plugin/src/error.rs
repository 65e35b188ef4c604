//! Error taxonomy of the plugin subsystem.
//!
//! Most variants describe recoverable conditions that surface inside a
//! [`LoadReport`](crate::report::LoadReport) rather than as an `Err`. Only
//! programming errors (empty identity) and failures to create the isolation
//! mechanism are returned as hard errors from public operations.

use std::path::PathBuf;

use plughost_core::error::{AppError, ErrorKind};
use serde::Serialize;
use thiserror::Error;

/// Errors raised while resolving, verifying, loading or registering plugins.
///
/// The type is `Clone` because a single in-flight module load shares its
/// outcome with every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum PluginError {
    /// A caller passed an empty or malformed argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The path or logical name did not resolve to a file.
    #[error("Module not found: {0}")]
    NotFound(String),

    /// The file is not a loadable module for this host.
    #[error("Invalid module format '{path}': {reason}")]
    InvalidFormat {
        /// Candidate file.
        path: PathBuf,
        /// Why the file was rejected.
        reason: String,
    },

    /// The module loaded but exports no concrete plugin type.
    #[error("Module '{module}' exports no plugin types")]
    NotAPluginModule {
        /// Qualified module name.
        module: String,
    },

    /// One exported type could not be resolved.
    #[error("Type '{type_name}' in module '{module}' could not be resolved: {reason}")]
    TypeLoadPartial {
        /// Qualified module name.
        module: String,
        /// Unresolved type name.
        type_name: String,
        /// Resolution failure reported by the module.
        reason: String,
    },

    /// Two distinct concrete types claimed the same plugin name.
    #[error(
        "Plugin name '{name}' is already registered by module '{existing_module}' (rejected from '{incoming_module}')"
    )]
    NameConflict {
        /// Contested plugin name.
        name: String,
        /// Module owning the registered instance.
        existing_module: String,
        /// Module whose instance was rejected.
        incoming_module: String,
    },

    /// A different build of an already cached module was requested.
    #[error(
        "Module '{module}' is already loaded from '{cached_origin}' ({cached_hash}); refusing '{incoming_origin}' ({incoming_hash})"
    )]
    ModuleConflict {
        /// Qualified module name.
        module: String,
        /// File the cached module came from.
        cached_origin: PathBuf,
        /// Version or hash of the cached module.
        cached_hash: String,
        /// File that was requested.
        incoming_origin: PathBuf,
        /// Version or hash of the requested file.
        incoming_hash: String,
    },

    /// A discovered type failed its no-argument construction.
    #[error("Plugin type '{type_name}' could not be constructed: {reason}")]
    ConstructionFailure {
        /// Type that failed.
        type_name: String,
        /// Error or panic message.
        reason: String,
    },

    /// Every concrete type in a module failed to construct.
    #[error("All {count} plugin types in module '{module}' failed to construct")]
    AllConstructionsFailed {
        /// Qualified module name.
        module: String,
        /// Number of attempted constructions.
        count: usize,
    },

    /// A verification probe exceeded its time budget.
    #[error("Verification of '{module}' timed out after {timeout_ms}ms")]
    VerificationTimeout {
        /// Qualified module name.
        module: String,
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// The isolation mechanism could not be created or failed internally.
    #[error("Isolation mechanism failure: {0}")]
    Isolation(String),

    /// The loader could not map the module into the host.
    #[error("Failed to load module '{module}': {reason}")]
    LoadFailed {
        /// Qualified module name.
        module: String,
        /// Loader error message.
        reason: String,
    },

    /// Filesystem error while reading a candidate.
    #[error("I/O error: {0}")]
    Io(String),
}

impl PluginError {
    /// Returns `true` for conditions that only affect the current request.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::InvalidArgument(_) | Self::Isolation(_))
    }
}

impl From<std::io::Error> for PluginError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<PluginError> for AppError {
    fn from(err: PluginError) -> Self {
        let kind = match &err {
            PluginError::InvalidArgument(_) => ErrorKind::Validation,
            PluginError::NotFound(_) => ErrorKind::NotFound,
            PluginError::NameConflict { .. } | PluginError::ModuleConflict { .. } => ErrorKind::Conflict,
            PluginError::VerificationTimeout { .. } => ErrorKind::Timeout,
            PluginError::Io(_) => ErrorKind::Io,
            PluginError::Isolation(_) => ErrorKind::Internal,
            _ => ErrorKind::Plugin,
        };
        AppError::with_source(kind, err.to_string(), err)
    }
}

/// Result type for plugin subsystem operations.
pub type PluginResult<T> = Result<T, PluginError>;
