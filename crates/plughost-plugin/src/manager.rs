//! Plugin manager: the public entry point for discovering, loading and
//! unloading plugins.
//!
//! A load request moves through resolving, optional verification, the
//! single-flight module cache, classification, instantiation and
//! registration. Per-type problems are collected into the [`LoadReport`];
//! they never abort the whole request.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use plughost_core::config::AppConfig;
use plughost_core::config::verification::VerificationMode;
use tracing::{debug, info, warn};

use crate::cache::{CacheLookup, ModuleCache};
use crate::error::{PluginError, PluginResult};
use crate::format::BinaryFormat;
use crate::identity::ModuleIdentity;
use crate::instance::{PluginInstance, PluginTypeKey};
use crate::loader::{ModuleLoader, NativeModuleLoader};
use crate::module::Module;
use crate::registry::PluginRegistry;
use crate::report::{
    DisabledPlugin, DisabledReason, LoadReport, LoadStage, LoadState, ModuleRecord, RejectReason,
    UnloadSummary,
};
use crate::resolver::PathResolver;
use crate::verification::{
    IsolationMechanism, ScratchIsolation, SubprocessIsolation, VerificationContext,
    VerificationOutcome,
};

/// Builder for [`PluginManager`].
#[derive(Debug)]
pub struct PluginManagerBuilder {
    loader: Arc<dyn ModuleLoader>,
    isolation: Option<Arc<dyn IsolationMechanism>>,
    resolver: PathResolver,
    verify_before_load: bool,
    timeout: Option<Duration>,
    extensions: Vec<String>,
}

impl PluginManagerBuilder {
    /// Isolation used by the verification context. Defaults to a scratch
    /// session over the main loader.
    pub fn isolation(mut self, isolation: Arc<dyn IsolationMechanism>) -> Self {
        self.isolation = Some(isolation);
        self
    }

    pub fn resolver(mut self, resolver: PathResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn verify_before_load(mut self, verify: bool) -> Self {
        self.verify_before_load = verify;
        self
    }

    pub fn verification_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// File extensions considered by directory operations.
    pub fn extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    /// Applies the plugin and verification sections of `config`.
    pub fn configure(self, config: &AppConfig) -> Self {
        self.resolver(PathResolver::from_config(&config.plugins))
            .verify_before_load(config.plugins.verify_before_load)
            .verification_timeout(config.verification.timeout())
            .extensions(config.plugins.extensions.clone())
    }

    pub fn build(self) -> PluginManager {
        let isolation = self
            .isolation
            .unwrap_or_else(|| Arc::new(ScratchIsolation::new(Arc::clone(&self.loader))));
        let verification = Arc::new(VerificationContext::new(isolation).with_timeout(self.timeout));

        PluginManager {
            resolver: RwLock::new(self.resolver),
            cache: Arc::new(ModuleCache::new(self.loader)),
            registry: Arc::new(PluginRegistry::new(Arc::clone(&verification))),
            verification,
            disabled: tokio::sync::RwLock::new(HashMap::new()),
            admissions: DashMap::new(),
            lifecycle: tokio::sync::RwLock::new(()),
            verify_before_load: self.verify_before_load,
            extensions: self.extensions,
        }
    }
}

/// Facade over resolution, verification, the module cache and the registry.
#[derive(Debug)]
pub struct PluginManager {
    resolver: RwLock<PathResolver>,
    cache: Arc<ModuleCache>,
    verification: Arc<VerificationContext>,
    registry: Arc<PluginRegistry>,
    /// Lowercased plugin name → why it is not running.
    disabled: tokio::sync::RwLock<HashMap<String, DisabledPlugin>>,
    /// Per-module gate: one request at a time instantiates and registers.
    admissions: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    /// Held shared by every load request and exclusively by `unload_all`.
    lifecycle: tokio::sync::RwLock<()>,
    verify_before_load: bool,
    extensions: Vec<String>,
}

impl PluginManager {
    pub fn builder(loader: Arc<dyn ModuleLoader>) -> PluginManagerBuilder {
        PluginManagerBuilder {
            loader,
            isolation: None,
            resolver: PathResolver::new(),
            verify_before_load: true,
            timeout: None,
            extensions: vec![std::env::consts::DLL_EXTENSION.to_string()],
        }
    }

    /// Manager over native shared libraries, configured from `config`.
    pub fn from_config(config: &AppConfig) -> PluginResult<Self> {
        let isolation: Arc<dyn IsolationMechanism> = match config.verification.mode {
            VerificationMode::Scratch => {
                Arc::new(ScratchIsolation::new(Arc::new(NativeModuleLoader::scratch())))
            }
            VerificationMode::Subprocess => Arc::new(SubprocessIsolation::from_command(
                &config.verification.probe_command,
            )?),
        };

        let manager = Self::builder(Arc::new(NativeModuleLoader::resident()))
            .isolation(isolation)
            .configure(config)
            .build();

        info!(
            mode = ?config.verification.mode,
            search_dirs = manager.search_directories().len(),
            verify_before_load = manager.verify_before_load,
            "Plugin manager initialized"
        );
        Ok(manager)
    }

    // ── Resolution ──────────────────────────────────────────────────

    /// Resolves a path or logical name and derives its identity.
    pub async fn resolve_identity(&self, path_or_name: &str) -> PluginResult<ModuleIdentity> {
        let path = self
            .resolver
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .resolve(path_or_name)?;

        tokio::task::spawn_blocking(move || ModuleIdentity::from_path(&path))
            .await
            .map_err(|e| PluginError::Io(format!("identity task failed: {e}")))?
    }

    /// Appends a search directory. Returns whether it was new.
    pub fn add_search_path(&self, dir: impl AsRef<Path>) -> bool {
        self.resolver
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(dir)
    }

    pub fn search_directories(&self) -> Vec<PathBuf> {
        self.resolver
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .directories()
            .to_vec()
    }

    // ── Discovery ───────────────────────────────────────────────────

    /// Whether the target is a loadable module exporting at least one
    /// concrete plugin type. Never loads into the main cache.
    pub async fn is_plugin_module(&self, path_or_name: &str) -> bool {
        let identity = match self.resolve_identity(path_or_name).await {
            Ok(identity) => identity,
            Err(e) => {
                debug!(request = %path_or_name, error = %e, "Candidate not resolvable");
                return false;
            }
        };

        if self.cache.contains(&identity) {
            return true;
        }
        self.verification.is_plugin_module(&identity).await
    }

    /// Names of the concrete plugin types in the target, without
    /// instantiating anything.
    pub async fn enumerate_plugins(&self, path_or_name: &str) -> PluginResult<Vec<String>> {
        let identity = self.resolve_identity(path_or_name).await?;

        if let Some(module) = self.cache.get(&identity) {
            return Ok(module.catalog().plugin_type_names());
        }

        let names = self.verification.enumerate_plugin_type_names(&identity).await?;
        Ok(names.collect())
    }

    // ── Loading ─────────────────────────────────────────────────────

    /// Loads a module by path or logical name and registers its plugins.
    pub async fn load(&self, path_or_name: &str) -> LoadReport {
        let mut report = LoadReport::new(path_or_name);

        let identity = match self.resolve_identity(path_or_name).await {
            Ok(identity) => identity,
            Err(PluginError::NotFound(detail)) => {
                report.state = LoadState::Rejected {
                    reason: RejectReason::NotFound,
                    detail,
                };
                return finish(report);
            }
            Err(error) => {
                report.state = LoadState::Failed { error };
                return finish(report);
            }
        };

        self.load_resolved(report, identity).await
    }

    /// Loads a module whose identity is already known (for example a
    /// built-in module), skipping resolution.
    pub async fn load_identity(&self, identity: ModuleIdentity) -> LoadReport {
        let report = LoadReport::new(identity.qualified_name());
        self.load_resolved(report, identity).await
    }

    async fn load_resolved(&self, mut report: LoadReport, identity: ModuleIdentity) -> LoadReport {
        let _lifecycle = self.lifecycle.read().await;
        report.identity = Some(identity.clone());

        if self.verify_before_load && !self.cache.contains(&identity) {
            report.stage = LoadStage::Verifying;
            debug!(module = %identity, stage = %report.stage, "Load stage");

            match self.verification.verify(&identity).await {
                Ok(VerificationOutcome::Verified(probe)) if !probe.has_plugin_types() => {
                    report.state = LoadState::Rejected {
                        reason: RejectReason::NotAPluginModule,
                        detail: "verification found no plugin types".to_string(),
                    };
                    return finish(report);
                }
                Ok(VerificationOutcome::Verified(_)) => {}
                Ok(VerificationOutcome::NotLoadable(reason)) => {
                    report.state = LoadState::Failed {
                        error: PluginError::InvalidFormat {
                            path: identity.origin_path().to_path_buf(),
                            reason,
                        },
                    };
                    return finish(report);
                }
                Ok(VerificationOutcome::TimedOut) => {
                    report.state = LoadState::Failed {
                        error: PluginError::VerificationTimeout {
                            module: identity.qualified_name().to_string(),
                            timeout_ms: self
                                .verification
                                .timeout()
                                .map_or(0, |t| t.as_millis() as u64),
                        },
                    };
                    return finish(report);
                }
                Err(error) => {
                    report.state = LoadState::Failed { error };
                    return finish(report);
                }
            }
        }

        report.stage = LoadStage::Loading;
        debug!(module = %identity, stage = %report.stage, "Load stage");

        let module = match self.cache.try_get_or_load(&identity).await {
            Ok(CacheLookup::Loaded {
                module,
                newly_loaded,
            }) => {
                report.newly_loaded = newly_loaded;
                module
            }
            Ok(CacheLookup::NoPlugins) => {
                report.state = LoadState::Rejected {
                    reason: RejectReason::NotAPluginModule,
                    detail: String::new(),
                };
                return finish(report);
            }
            Err(error) => {
                report.state = LoadState::Failed { error };
                return finish(report);
            }
        };

        report.stage = LoadStage::Classifying;
        for failure in module.catalog().failures() {
            warn!(
                module = %identity,
                type_name = %failure.type_name,
                reason = %failure.reason,
                "Type could not be resolved"
            );
            report.failures.push(PluginError::TypeLoadPartial {
                module: identity.qualified_name().to_string(),
                type_name: failure.type_name.clone(),
                reason: failure.reason.clone(),
            });
        }

        let gate = Arc::clone(&*self.admissions.entry(identity.cache_key()).or_default());
        let _admitted = gate.lock().await;

        report.stage = LoadStage::Instantiating;
        debug!(module = %identity, stage = %report.stage, "Load stage");
        let batch = self.instantiate(&module, &mut report).await;

        if batch.attempted > 0 && batch.construction_failures == batch.attempted && batch.registered.is_empty() {
            report.state = LoadState::Failed {
                error: PluginError::AllConstructionsFailed {
                    module: identity.qualified_name().to_string(),
                    count: batch.attempted,
                },
            };
            return finish(report);
        }

        report.stage = LoadStage::Registering;
        debug!(module = %identity, stage = %report.stage, "Load stage");

        let mut registered = batch.registered;
        let mut conflicts = batch.conflicts;
        for (name, result) in self.registry.register_group(batch.instances).await {
            match result {
                Ok(_) => {
                    self.disabled.write().await.remove(&name.to_lowercase());
                    registered.push(name);
                }
                Err(conflict) => {
                    conflicts += 1;
                    report.failures.push(conflict);
                }
            }
        }

        let order = module.catalog().plugin_type_names();
        registered.sort_by_key(|name| order.iter().position(|declared| declared == name));

        report.stage = LoadStage::Done;
        report.state = if !registered.is_empty() {
            LoadState::Registered { plugins: registered }
        } else if conflicts > 0 {
            LoadState::Rejected {
                reason: RejectReason::NameConflict,
                detail: format!("{conflicts} plugin name(s) already registered by other modules"),
            }
        } else if !report.disabled.is_empty() {
            LoadState::Rejected {
                reason: RejectReason::Unavailable,
                detail: report.disabled.join(", "),
            }
        } else {
            LoadState::Rejected {
                reason: RejectReason::NotAPluginModule,
                detail: String::new(),
            }
        };

        finish(report)
    }

    /// Constructs one instance per concrete type not yet registered.
    async fn instantiate(&self, module: &Arc<Module>, report: &mut LoadReport) -> Instantiation {
        let identity = module.identity();
        let mut batch = Instantiation::default();

        for entry in module.catalog().concrete() {
            let name = entry.name();

            if let Some(existing) = self.registry.get(name).await {
                if *existing.type_key() == PluginTypeKey::new(identity, name) {
                    batch.registered.push(name.to_string());
                } else {
                    batch.conflicts += 1;
                    report.failures.push(PluginError::NameConflict {
                        name: name.to_string(),
                        existing_module: existing.owner_identity().qualified_name().to_string(),
                        incoming_module: identity.qualified_name().to_string(),
                    });
                }
                continue;
            }

            batch.attempted += 1;
            let plugin = match entry.construct() {
                Ok(plugin) => plugin,
                Err(reason) => {
                    warn!(module = %identity, plugin = %name, %reason, "Plugin construction failed");
                    batch.construction_failures += 1;
                    self.disable(module, name, DisabledReason::ConstructionError, vec![reason.clone()])
                        .await;
                    report.failures.push(PluginError::ConstructionFailure {
                        type_name: name.to_string(),
                        reason,
                    });
                    continue;
                }
            };

            let reasons = plugin.unavailable_reasons();
            let instance = PluginInstance::new(name, module, plugin);
            if !reasons.is_empty() {
                info!(module = %identity, plugin = %name, reasons = ?reasons, "Plugin unavailable; disabled");
                instance.dispose();
                self.disable(module, name, DisabledReason::Unavailable, reasons).await;
                report.disabled.push(name.to_string());
                continue;
            }

            batch.instances.push(instance);
        }

        batch
    }

    async fn disable(&self, module: &Module, name: &str, reason: DisabledReason, details: Vec<String>) {
        let record = DisabledPlugin {
            name: name.to_string(),
            module: module.identity().qualified_name().to_string(),
            path: module.identity().origin_path().to_path_buf(),
            reason,
            details,
        };
        self.disabled.write().await.insert(name.to_lowercase(), record);
    }

    /// Loads every candidate file in `dir` concurrently.
    pub async fn load_directory(&self, dir: &Path) -> PluginResult<Vec<LoadReport>> {
        let candidates = self.candidates(dir).await?;
        info!(dir = %dir.display(), candidates = candidates.len(), "Loading plugin directory");

        let requests: Vec<String> = candidates
            .iter()
            .map(|path| path.to_string_lossy().into_owned())
            .collect();
        Ok(join_all(requests.iter().map(|request| self.load(request))).await)
    }

    /// Verifies every candidate file in `dir` without loading anything
    /// into the main cache.
    pub async fn scan_directory(&self, dir: &Path) -> PluginResult<Vec<ModuleRecord>> {
        let candidates = self.candidates(dir).await?;
        let mut records = Vec::with_capacity(candidates.len());

        for path in candidates {
            let sniff_path = path.clone();
            let (format, identity) = tokio::task::spawn_blocking(move || {
                (
                    BinaryFormat::sniff(&sniff_path).ok(),
                    ModuleIdentity::from_path(&sniff_path),
                )
            })
            .await
            .map_err(|e| PluginError::Io(format!("scan task failed: {e}")))?;

            let mut record = ModuleRecord {
                path,
                identity: None,
                format,
                plugin_types: Vec::new(),
                is_plugin_module: false,
                problem: None,
            };

            match identity {
                Ok(identity) => {
                    match self.verification.verify(&identity).await? {
                        VerificationOutcome::Verified(probe) => {
                            record.is_plugin_module = probe.has_plugin_types();
                            if !record.is_plugin_module {
                                record.problem = Some("exports no plugin types".to_string());
                            }
                            record.plugin_types = probe.type_names;
                        }
                        VerificationOutcome::NotLoadable(reason) => record.problem = Some(reason),
                        VerificationOutcome::TimedOut => {
                            record.problem = Some("verification timed out".to_string());
                        }
                    }
                    record.identity = Some(identity);
                }
                Err(e) => record.problem = Some(e.to_string()),
            }

            records.push(record);
        }

        Ok(records)
    }

    /// Candidate files in `dir` with a configured extension, sorted.
    async fn candidates(&self, dir: &Path) -> PluginResult<Vec<PathBuf>> {
        if !tokio::fs::metadata(dir).await.is_ok_and(|m| m.is_dir()) {
            return Err(PluginError::NotFound(format!(
                "plugin directory '{}'",
                dir.display()
            )));
        }

        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut candidates = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let matches_extension = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| self.extensions.iter().any(|wanted| wanted.eq_ignore_ascii_case(ext)));
            if matches_extension && entry.file_type().await?.is_file() {
                candidates.push(path);
            }
        }

        candidates.sort();
        Ok(candidates)
    }

    // ── Unloading ───────────────────────────────────────────────────

    /// Disposes and removes one plugin. Its module stays cached.
    pub async fn unload(&self, name: &str) -> bool {
        self.registry.unload(name).await.is_some()
    }

    /// Disposes every plugin, purges verification and empties the module
    /// cache. The next load of any module performs a real load.
    ///
    /// Waits for load requests already past resolution to finish, so none
    /// of them can register a plugin after the reset.
    pub async fn unload_all(&self) -> UnloadSummary {
        let _lifecycle = self.lifecycle.write().await;
        let plugins = self.registry.unload_all().await;
        let modules = self.cache.unload_all();
        self.admissions.clear();
        self.disabled.write().await.clear();

        info!(plugins, modules, "Plugin system reset");
        UnloadSummary { plugins, modules }
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub async fn get(&self, name: &str) -> Option<PluginInstance> {
        self.registry.get(name).await
    }

    pub async fn plugins(&self) -> Vec<PluginInstance> {
        self.registry.all().await
    }

    /// Plugins found but not running, sorted by name.
    pub async fn disabled_plugins(&self) -> Vec<DisabledPlugin> {
        let disabled = self.disabled.read().await;
        let mut records: Vec<_> = disabled.values().cloned().collect();
        records.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        records
    }

    pub fn cache(&self) -> &Arc<ModuleCache> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn verification(&self) -> &Arc<VerificationContext> {
        &self.verification
    }
}

/// Per-request instantiation results.
#[derive(Default)]
struct Instantiation {
    instances: Vec<PluginInstance>,
    /// Names already registered by this module's types.
    registered: Vec<String>,
    conflicts: usize,
    attempted: usize,
    construction_failures: usize,
}

fn finish(report: LoadReport) -> LoadReport {
    match &report.state {
        LoadState::Registered { plugins } => info!(
            request = %report.request,
            plugins = ?plugins,
            newly_loaded = report.newly_loaded,
            failures = report.failures.len(),
            "Plugin module loaded"
        ),
        LoadState::Rejected { reason, detail } => info!(
            request = %report.request,
            reason = ?reason,
            %detail,
            "Plugin module rejected"
        ),
        LoadState::Failed { error } => warn!(
            request = %report.request,
            stage = %report.stage,
            error = %error,
            "Plugin module failed to load"
        ),
    }
    report
}
