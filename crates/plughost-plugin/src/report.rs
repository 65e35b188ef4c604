//! Structured results of plugin loading operations.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::PluginError;
use crate::format::BinaryFormat;
use crate::identity::ModuleIdentity;

/// Step of [`PluginManager::load`](crate::manager::PluginManager::load).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStage {
    Resolving,
    Verifying,
    Loading,
    Classifying,
    Instantiating,
    Registering,
    Done,
}

impl std::fmt::Display for LoadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Resolving => "resolving",
            Self::Verifying => "verifying",
            Self::Loading => "loading",
            Self::Classifying => "classifying",
            Self::Instantiating => "instantiating",
            Self::Registering => "registering",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Why a load request was declined without a hard failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    NotFound,
    NotAPluginModule,
    /// Every constructed instance lost a name conflict.
    NameConflict,
    /// Every constructed instance reported itself unavailable.
    Unavailable,
}

/// Final state of a load request.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoadState {
    /// At least one plugin is registered (newly or previously).
    Registered { plugins: Vec<String> },
    Rejected { reason: RejectReason, detail: String },
    Failed { error: PluginError },
}

/// Outcome of loading one module.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    /// Path or logical name as requested.
    pub request: String,
    pub identity: Option<ModuleIdentity>,
    pub state: LoadState,
    /// Per-type problems that did not stop the request.
    pub failures: Vec<PluginError>,
    /// Plugins constructed but disabled during this request.
    pub disabled: Vec<String>,
    /// Whether this request performed the module load.
    pub newly_loaded: bool,
    /// Last stage reached.
    pub stage: LoadStage,
}

impl LoadReport {
    pub(crate) fn new(request: &str) -> Self {
        Self {
            request: request.to_string(),
            identity: None,
            state: LoadState::Rejected {
                reason: RejectReason::NotFound,
                detail: String::new(),
            },
            failures: Vec::new(),
            disabled: Vec::new(),
            newly_loaded: false,
            stage: LoadStage::Resolving,
        }
    }

    pub fn is_registered(&self) -> bool {
        matches!(self.state, LoadState::Registered { .. })
    }

    /// Names registered for this module, empty unless registered.
    pub fn registered(&self) -> &[String] {
        match &self.state {
            LoadState::Registered { plugins } => plugins,
            _ => &[],
        }
    }

    pub fn rejection(&self) -> Option<RejectReason> {
        match &self.state {
            LoadState::Rejected { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&PluginError> {
        match &self.state {
            LoadState::Failed { error } => Some(error),
            _ => None,
        }
    }

    /// One-line summary for logs and tables.
    pub fn summary(&self) -> String {
        match &self.state {
            LoadState::Registered { plugins } => format!("registered {}", plugins.join(", ")),
            LoadState::Rejected { reason, detail } if detail.is_empty() => format!("rejected: {reason:?}"),
            LoadState::Rejected { reason, detail } => format!("rejected: {reason:?} ({detail})"),
            LoadState::Failed { error } => format!("failed: {error}"),
        }
    }
}

/// Why a plugin was disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisabledReason {
    /// Construction failed or panicked.
    ConstructionError,
    /// The plugin reported itself unavailable.
    Unavailable,
}

/// A plugin type that was found but is not running.
#[derive(Debug, Clone, Serialize)]
pub struct DisabledPlugin {
    pub name: String,
    pub module: String,
    pub path: PathBuf,
    pub reason: DisabledReason,
    pub details: Vec<String>,
}

/// Result of [`PluginManager::unload_all`](crate::manager::PluginManager::unload_all).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnloadSummary {
    pub plugins: usize,
    pub modules: usize,
}

/// Scan result for one candidate file.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleRecord {
    pub path: PathBuf,
    pub identity: Option<ModuleIdentity>,
    pub format: Option<BinaryFormat>,
    pub plugin_types: Vec<String>,
    pub is_plugin_module: bool,
    /// Why the candidate is not a plugin module, when it is not.
    pub problem: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_accessors() {
        let mut report = LoadReport::new("codecs");
        assert_eq!(report.rejection(), Some(RejectReason::NotFound));
        assert!(report.registered().is_empty());

        report.state = LoadState::Registered {
            plugins: vec!["Vendor.PngCodec".into()],
        };
        assert!(report.is_registered());
        assert_eq!(report.summary(), "registered Vendor.PngCodec");

        report.state = LoadState::Failed {
            error: PluginError::NotFound("x".into()),
        };
        assert!(report.error().is_some());
    }

    #[test]
    fn test_state_serializes_with_tag() {
        let state = LoadState::Rejected {
            reason: RejectReason::NotAPluginModule,
            detail: String::new(),
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["state"], "rejected");
        assert_eq!(json["reason"], "not_a_plugin_module");
    }
}
