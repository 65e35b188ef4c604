//! Single-flight cache of loaded modules.
//!
//! Each identity maps to either a `Loading` placeholder holding a shared
//! future, or a `Ready` module. The first caller installs the placeholder
//! while holding the map entry; every later caller for the same identity
//! clones the shared future instead of starting another load. No map guard
//! is held while a load runs.
//!
//! Slots are keyed by qualified name, so only one build of a module can be
//! cached at a time. A request for the same name with a different hash is
//! refused with [`PluginError::ModuleConflict`] instead of being served the
//! cached build.
//!
//! A module that exports no plugin types is never cached, and failed loads
//! are not cached either, so a later request retries.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::{debug, info, trace, warn};

use crate::error::{PluginError, PluginResult};
use crate::identity::ModuleIdentity;
use crate::loader::ModuleLoader;
use crate::module::Module;

/// Result of [`ModuleCache::try_get_or_load`].
#[derive(Debug, Clone)]
pub enum CacheLookup {
    /// The module is cached; `newly_loaded` is true only for the caller
    /// whose request performed the load.
    Loaded {
        module: Arc<Module>,
        newly_loaded: bool,
    },
    /// The module loaded but exports no concrete plugin type.
    NoPlugins,
}

#[derive(Debug, Clone)]
enum LoadOutcome {
    Loaded(Arc<Module>),
    NoPlugins,
}

type SharedLoad = Shared<BoxFuture<'static, PluginResult<LoadOutcome>>>;

enum Slot {
    Loading {
        ticket: u64,
        identity: ModuleIdentity,
        load: SharedLoad,
    },
    Ready(Arc<Module>),
}

impl Slot {
    fn ticket(&self) -> Option<u64> {
        match self {
            Self::Loading { ticket, .. } => Some(*ticket),
            Self::Ready(_) => None,
        }
    }

    fn identity(&self) -> &ModuleIdentity {
        match self {
            Self::Loading { identity, .. } => identity,
            Self::Ready(module) => module.identity(),
        }
    }
}

fn conflict(cached: &ModuleIdentity, incoming: &ModuleIdentity) -> PluginError {
    PluginError::ModuleConflict {
        module: incoming.qualified_name().to_string(),
        cached_origin: cached.origin_path().to_path_buf(),
        cached_hash: cached.version_or_hash().to_string(),
        incoming_origin: incoming.origin_path().to_path_buf(),
        incoming_hash: incoming.version_or_hash().to_string(),
    }
}

/// Process-wide map from module identity to loaded module.
pub struct ModuleCache {
    loader: Arc<dyn ModuleLoader>,
    slots: Arc<DashMap<String, Slot>>,
    next_ticket: AtomicU64,
    load_count: Arc<AtomicUsize>,
}

impl ModuleCache {
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            loader,
            slots: Arc::new(DashMap::new()),
            next_ticket: AtomicU64::new(0),
            load_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns the cached module, loading it at most once across
    /// concurrent callers. Fails with `ModuleConflict` if another build
    /// of the same module is cached or loading.
    pub async fn try_get_or_load(&self, identity: &ModuleIdentity) -> PluginResult<CacheLookup> {
        let key = identity.cache_key();

        let (load, leader) = match self.slots.entry(key.clone()) {
            Entry::Occupied(entry) if identity.conflicts_with(entry.get().identity()) => {
                let err = conflict(entry.get().identity(), identity);
                warn!(module = %identity, error = %err, "Refusing conflicting module build");
                return Err(err);
            }
            Entry::Occupied(entry) => match entry.get() {
                Slot::Ready(module) => {
                    trace!(module = %identity, "Module cache hit");
                    return Ok(CacheLookup::Loaded {
                        module: Arc::clone(module),
                        newly_loaded: false,
                    });
                }
                Slot::Loading { load, .. } => {
                    debug!(module = %identity, "Joining in-flight module load");
                    (load.clone(), false)
                }
            },
            Entry::Vacant(entry) => {
                let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
                let load = self.start_load(key, ticket, identity.clone());
                entry.insert(Slot::Loading {
                    ticket,
                    identity: identity.clone(),
                    load: load.clone(),
                });
                (load, true)
            }
        };

        match load.await? {
            LoadOutcome::Loaded(module) => Ok(CacheLookup::Loaded {
                module,
                newly_loaded: leader,
            }),
            LoadOutcome::NoPlugins => Ok(CacheLookup::NoPlugins),
        }
    }

    /// Builds the shared load future. It settles its own slot: promotion to
    /// `Ready` on success, removal otherwise. A slot replaced by
    /// [`unload_all`](Self::unload_all) in the meantime is left untouched.
    fn start_load(&self, key: String, ticket: u64, identity: ModuleIdentity) -> SharedLoad {
        let loader = Arc::clone(&self.loader);
        let slots = Arc::clone(&self.slots);
        let load_count = Arc::clone(&self.load_count);

        async move {
            let outcome = load_module(loader, identity, load_count).await;
            settle(&slots, &key, ticket, &outcome);
            outcome
        }
        .boxed()
        .shared()
    }

    /// Returns a ready module without loading. A cached build with a
    /// different hash does not match.
    pub fn get(&self, identity: &ModuleIdentity) -> Option<Arc<Module>> {
        match self.slots.get(&identity.cache_key())?.value() {
            Slot::Ready(module) if module.identity() == identity => Some(Arc::clone(module)),
            _ => None,
        }
    }

    pub fn contains(&self, identity: &ModuleIdentity) -> bool {
        self.get(identity).is_some()
    }

    /// Whether a load for `identity` is in flight.
    pub fn is_loading(&self, identity: &ModuleIdentity) -> bool {
        self.slots
            .get(&identity.cache_key())
            .is_some_and(|slot| {
                matches!(slot.value(), Slot::Loading { .. }) && slot.identity() == identity
            })
    }

    /// Snapshot of all ready modules.
    pub fn loaded_modules(&self) -> Vec<Arc<Module>> {
        let mut modules: Vec<_> = self
            .slots
            .iter()
            .filter_map(|slot| match slot.value() {
                Slot::Ready(module) => Some(Arc::clone(module)),
                Slot::Loading { .. } => None,
            })
            .collect();
        modules.sort_by_key(|module| module.identity().cache_key());
        modules
    }

    /// Number of ready modules.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of raw loads started since creation.
    pub fn load_count(&self) -> usize {
        self.load_count.load(Ordering::SeqCst)
    }

    /// Drops every entry, ready or in flight. Loads still running complete
    /// for their waiters but are not cached.
    pub fn unload_all(&self) -> usize {
        let ready = self.len();
        self.slots.clear();
        info!(modules = ready, "Module cache cleared");
        ready
    }
}

impl std::fmt::Debug for ModuleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCache")
            .field("loader", &self.loader.name())
            .field("entries", &self.slots.len())
            .field("load_count", &self.load_count())
            .finish()
    }
}

async fn load_module(
    loader: Arc<dyn ModuleLoader>,
    identity: ModuleIdentity,
    load_count: Arc<AtomicUsize>,
) -> PluginResult<LoadOutcome> {
    load_count.fetch_add(1, Ordering::SeqCst);
    let started = Instant::now();

    let target = identity.clone();
    let image = tokio::task::spawn_blocking(move || loader.load(&target))
        .await
        .map_err(|e| PluginError::LoadFailed {
            module: identity.qualified_name().to_string(),
            reason: format!("loader task failed: {e}"),
        })?
        .inspect_err(|e| warn!(module = %identity, error = %e, "Module load failed"))?;

    let module = Module::new(identity.clone(), image);
    let elapsed_ms = started.elapsed().as_millis() as u64;

    if !module.has_plugin_types() {
        info!(module = %identity, elapsed_ms, "Module exports no plugin types; not cached");
        return Ok(LoadOutcome::NoPlugins);
    }

    info!(
        module = %identity,
        plugin_types = module.catalog().concrete().count(),
        elapsed_ms,
        "Module loaded"
    );
    Ok(LoadOutcome::Loaded(Arc::new(module)))
}

fn settle(
    slots: &DashMap<String, Slot>,
    key: &str,
    ticket: u64,
    outcome: &PluginResult<LoadOutcome>,
) {
    match outcome {
        Ok(LoadOutcome::Loaded(module)) => {
            if let Some(mut slot) = slots.get_mut(key) {
                if slot.ticket() == Some(ticket) {
                    *slot = Slot::Ready(Arc::clone(module));
                }
            }
        }
        _ => {
            slots.remove_if(key, |_, slot| slot.ticket() == Some(ticket));
        }
    }
}
