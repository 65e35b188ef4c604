//! Isolated verification of candidate modules.
//!
//! A [`VerificationContext`] inspects candidates without adding them to the
//! main module cache. Probes run inside a [`ProbeSession`] created lazily
//! by an [`IsolationMechanism`]; [`VerificationContext::purge`] discards the
//! session and everything it loaded.

pub mod scratch;
pub mod subprocess;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::error::{PluginError, PluginResult};
use crate::identity::ModuleIdentity;
use crate::module::{TypeCatalog, TypeLoadFailure};

pub use scratch::ScratchIsolation;
pub use subprocess::SubprocessIsolation;

/// What a probe learned about a candidate module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    /// Concrete plugin type names, in declaration order.
    pub type_names: Vec<String>,
    /// Exported types that could not be resolved.
    #[serde(default)]
    pub failures: Vec<TypeLoadFailure>,
}

impl ProbeReport {
    pub fn from_catalog(catalog: &TypeCatalog) -> Self {
        Self {
            type_names: catalog.plugin_type_names(),
            failures: catalog.failures().to_vec(),
        }
    }

    pub fn has_plugin_types(&self) -> bool {
        !self.type_names.is_empty()
    }
}

/// Failure of a single probe.
#[derive(Debug, Clone, Error)]
pub enum ProbeError {
    /// The candidate could not be loaded at all.
    #[error("{0}")]
    NotLoadable(String),
    /// The isolation mechanism itself failed.
    #[error("isolation failure: {0}")]
    Isolation(String),
}

/// One isolated context in which candidates are probed.
#[async_trait]
pub trait ProbeSession: Send + Sync + fmt::Debug {
    async fn probe(&self, identity: &ModuleIdentity) -> Result<ProbeReport, ProbeError>;
}

/// Creates probe sessions.
pub trait IsolationMechanism: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Whether one session may run several probes at the same time.
    fn supports_concurrent_probes(&self) -> bool;

    fn create_session(&self) -> PluginResult<Arc<dyn ProbeSession>>;
}

/// Outcome of [`VerificationContext::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Verified(ProbeReport),
    NotLoadable(String),
    TimedOut,
}

/// Names yielded by [`VerificationContext::enumerate_plugin_type_names`].
///
/// A one-shot sequence; resolution failures for types that were skipped
/// are kept alongside.
#[derive(Debug)]
pub struct TypeNames {
    names: std::vec::IntoIter<String>,
    failures: Vec<TypeLoadFailure>,
}

impl TypeNames {
    pub fn failures(&self) -> &[TypeLoadFailure] {
        &self.failures
    }
}

impl From<ProbeReport> for TypeNames {
    fn from(report: ProbeReport) -> Self {
        Self {
            names: report.type_names.into_iter(),
            failures: report.failures,
        }
    }
}

impl Iterator for TypeNames {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        self.names.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.names.size_hint()
    }
}

impl ExactSizeIterator for TypeNames {}

/// Lazily-created isolated context for inspecting candidates.
pub struct VerificationContext {
    isolation: Arc<dyn IsolationMechanism>,
    session: Mutex<Option<Arc<dyn ProbeSession>>>,
    serial: Option<tokio::sync::Mutex<()>>,
    timeout: Option<Duration>,
    sessions_created: AtomicU64,
}

impl VerificationContext {
    pub fn new(isolation: Arc<dyn IsolationMechanism>) -> Self {
        let serial = (!isolation.supports_concurrent_probes()).then(|| tokio::sync::Mutex::new(()));
        Self {
            isolation,
            session: Mutex::new(None),
            serial,
            timeout: None,
            sessions_created: AtomicU64::new(0),
        }
    }

    /// Bounds each verification, including time spent queued behind other
    /// probes on a serialized session. `None` waits indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn session(&self) -> PluginResult<Arc<dyn ProbeSession>> {
        let mut guard = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = guard.as_ref() {
            return Ok(Arc::clone(session));
        }

        let session = self.isolation.create_session().inspect_err(|e| {
            error!(isolation = self.isolation.name(), error = %e, "Failed to create verification session");
        })?;
        self.sessions_created.fetch_add(1, Ordering::SeqCst);
        info!(isolation = self.isolation.name(), "Verification session created");
        *guard = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Probes a candidate. Only failure to create the isolation mechanism
    /// is returned as `Err`.
    pub async fn verify(&self, identity: &ModuleIdentity) -> PluginResult<VerificationOutcome> {
        let session = self.session()?;

        let attempt = async {
            let _permit = match &self.serial {
                Some(gate) => Some(gate.lock().await),
                None => None,
            };
            session.probe(identity).await
        };

        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        module = %identity,
                        timeout_ms = limit.as_millis() as u64,
                        "Verification probe timed out"
                    );
                    return Ok(VerificationOutcome::TimedOut);
                }
            },
            None => attempt.await,
        };

        match result {
            Ok(report) => {
                debug!(
                    module = %identity,
                    plugin_types = report.type_names.len(),
                    failures = report.failures.len(),
                    "Candidate verified"
                );
                Ok(VerificationOutcome::Verified(report))
            }
            Err(ProbeError::NotLoadable(reason)) => {
                debug!(module = %identity, %reason, "Candidate is not loadable");
                Ok(VerificationOutcome::NotLoadable(reason))
            }
            Err(ProbeError::Isolation(reason)) => {
                warn!(module = %identity, %reason, "Verification session failed; discarding it");
                self.purge();
                Err(PluginError::Isolation(reason))
            }
        }
    }

    /// Whether the candidate is a loadable module exporting at least one
    /// concrete plugin type. Every failure answers `false`.
    pub async fn is_plugin_module(&self, identity: &ModuleIdentity) -> bool {
        match self.verify(identity).await {
            Ok(VerificationOutcome::Verified(report)) => report.has_plugin_types(),
            Ok(_) => false,
            Err(e) => {
                error!(module = %identity, error = %e, "Could not verify candidate");
                false
            }
        }
    }

    /// Concrete plugin type names exported by the candidate.
    ///
    /// Partially resolvable modules yield the names that resolved; the rest
    /// are listed in [`TypeNames::failures`].
    pub async fn enumerate_plugin_type_names(&self, identity: &ModuleIdentity) -> PluginResult<TypeNames> {
        match self.verify(identity).await? {
            VerificationOutcome::Verified(report) => {
                for failure in &report.failures {
                    warn!(
                        module = %identity,
                        type_name = %failure.type_name,
                        reason = %failure.reason,
                        "Type could not be resolved"
                    );
                }
                Ok(report.into())
            }
            VerificationOutcome::NotLoadable(reason) => Err(PluginError::InvalidFormat {
                path: identity.origin_path().to_path_buf(),
                reason,
            }),
            VerificationOutcome::TimedOut => Err(PluginError::VerificationTimeout {
                module: identity.qualified_name().to_string(),
                timeout_ms: self.timeout.map_or(0, |t| t.as_millis() as u64),
            }),
        }
    }

    /// Discards the current session. Idempotent; the next probe creates a
    /// fresh one. Probes already running keep their session until they end.
    pub fn purge(&self) {
        let previous = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if previous.is_some() {
            info!(isolation = self.isolation.name(), "Verification session purged");
        }
    }

    /// Whether a session currently exists.
    pub fn is_active(&self) -> bool {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn sessions_created(&self) -> u64 {
        self.sessions_created.load(Ordering::SeqCst)
    }

    pub fn isolation_name(&self) -> &'static str {
        self.isolation.name()
    }
}

impl fmt::Debug for VerificationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationContext")
            .field("isolation", &self.isolation.name())
            .field("serialized", &self.serial.is_some())
            .field("timeout", &self.timeout)
            .field("active", &self.is_active())
            .finish()
    }
}
