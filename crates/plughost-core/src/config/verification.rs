//! Isolated verification configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Mechanism used to inspect candidate modules without committing them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationMode {
    /// Load into a disposable in-process scratch context.
    Scratch,
    /// Spawn a probe process per candidate.
    Subprocess,
}

/// Verification context configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Isolation mechanism.
    #[serde(default = "default_mode")]
    pub mode: VerificationMode,
    /// Per-probe timeout in milliseconds. `0` disables the timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Program and leading arguments of the probe command; the candidate
    /// path is appended as the last argument.
    #[serde(default = "default_probe_command")]
    pub probe_command: Vec<String>,
}

impl VerificationConfig {
    /// Returns the per-probe timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            timeout_ms: default_timeout_ms(),
            probe_command: default_probe_command(),
        }
    }
}

fn default_mode() -> VerificationMode {
    VerificationMode::Scratch
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_probe_command() -> Vec<String> {
    vec!["plughost-cli".to_string(), "probe".to_string()]
}
