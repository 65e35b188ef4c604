//! Out-of-process isolation.
//!
//! Each probe runs a helper command with the candidate path appended. The
//! helper loads the module in its own process and prints a JSON
//! [`ProbeReport`] on stdout. Exit code [`EXIT_NOT_LOADABLE`] means the
//! candidate could not be loaded; any other failure is an isolation error.
//! A crashing module takes down only the helper.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{IsolationMechanism, ProbeError, ProbeReport, ProbeSession};
use crate::error::{PluginError, PluginResult};
use crate::identity::ModuleIdentity;

/// Exit code of the helper when the candidate cannot be loaded.
pub const EXIT_NOT_LOADABLE: i32 = 2;

const STDERR_EXCERPT: usize = 2000;

/// Isolation through a helper process per probe.
#[derive(Debug, Clone)]
pub struct SubprocessIsolation {
    program: PathBuf,
    args: Vec<String>,
}

impl SubprocessIsolation {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Builds from a command line such as `["plughost-cli", "probe"]`.
    pub fn from_command(command: &[String]) -> PluginResult<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| PluginError::Isolation("probe command is empty".to_string()))?;
        Ok(Self::new(program, args.to_vec()))
    }
}

impl IsolationMechanism for SubprocessIsolation {
    fn name(&self) -> &'static str {
        "subprocess"
    }

    fn supports_concurrent_probes(&self) -> bool {
        true
    }

    fn create_session(&self) -> PluginResult<Arc<dyn ProbeSession>> {
        // A bare program name is looked up on PATH at spawn time.
        let explicit = self.program.components().count() > 1;
        if explicit && !self.program.is_file() {
            return Err(PluginError::Isolation(format!(
                "probe helper '{}' does not exist",
                self.program.display()
            )));
        }

        Ok(Arc::new(SubprocessSession {
            program: self.program.clone(),
            args: self.args.clone(),
        }))
    }
}

#[derive(Debug)]
struct SubprocessSession {
    program: PathBuf,
    args: Vec<String>,
}

#[async_trait]
impl ProbeSession for SubprocessSession {
    async fn probe(&self, identity: &ModuleIdentity) -> Result<ProbeReport, ProbeError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(identity.origin_path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            module = %identity,
            program = %self.program.display(),
            "Spawning probe helper"
        );

        let output = cmd.output().await.map_err(|e| {
            ProbeError::Isolation(format!(
                "failed to run probe helper '{}': {e}",
                self.program.display()
            ))
        })?;

        let stderr: String = String::from_utf8_lossy(&output.stderr)
            .chars()
            .take(STDERR_EXCERPT)
            .collect();

        if !output.status.success() {
            return match output.status.code() {
                Some(EXIT_NOT_LOADABLE) => Err(ProbeError::NotLoadable(stderr.trim().to_string())),
                code => {
                    warn!(module = %identity, exit_code = ?code, stderr = %stderr, "Probe helper failed");
                    Err(ProbeError::Isolation(format!(
                        "probe helper exited with {code:?}: {}",
                        stderr.trim()
                    )))
                }
            };
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| ProbeError::Isolation(format!("malformed probe report: {e}")))
    }
}
