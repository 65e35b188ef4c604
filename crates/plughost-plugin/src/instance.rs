//! Constructed plugin instances.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use serde::Serialize;
use tracing::{debug, error};

use crate::contract::Plugin;
use crate::identity::ModuleIdentity;
use crate::module::{Module, panic_message};

/// Identifies a concrete type across modules: owning module plus type name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PluginTypeKey {
    module: String,
    type_name: String,
}

impl PluginTypeKey {
    pub fn new(owner: &ModuleIdentity, type_name: &str) -> Self {
        Self {
            module: owner.cache_key(),
            type_name: type_name.to_string(),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}

impl fmt::Display for PluginTypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.module, self.type_name)
    }
}

/// A live plugin object registered under its type's full name.
///
/// Holds only a weak reference to its module; the cache owns modules.
#[derive(Clone)]
pub struct PluginInstance {
    name: String,
    type_key: PluginTypeKey,
    owner: Weak<Module>,
    owner_identity: ModuleIdentity,
    description: Option<String>,
    plugin: Arc<dyn Plugin>,
}

impl PluginInstance {
    pub fn new(type_name: &str, module: &Arc<Module>, plugin: Box<dyn Plugin>) -> Self {
        let owner_identity = module.identity().clone();
        Self {
            name: type_name.to_string(),
            type_key: PluginTypeKey::new(&owner_identity, type_name),
            owner: Arc::downgrade(module),
            owner_identity,
            description: plugin.description().map(str::to_string),
            plugin: Arc::from(plugin),
        }
    }

    /// Plugin name; equal to the type's full name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Case-folded registry key.
    pub fn key(&self) -> String {
        self.name.to_lowercase()
    }

    pub fn type_key(&self) -> &PluginTypeKey {
        &self.type_key
    }

    pub fn owner_identity(&self) -> &ModuleIdentity {
        &self.owner_identity
    }

    /// The owning module, if still cached or otherwise referenced.
    pub fn owner(&self) -> Option<Arc<Module>> {
        self.owner.upgrade()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn plugin(&self) -> &Arc<dyn Plugin> {
        &self.plugin
    }

    /// Downcasts the plugin object to a concrete type.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.plugin.as_any().downcast_ref::<T>()
    }

    pub fn is_disposable(&self) -> bool {
        self.plugin.as_disposable().is_some()
    }

    /// Runs the plugin's disposal hook, if any. A panicking hook is logged.
    pub fn dispose(&self) {
        let Some(disposable) = self.plugin.as_disposable() else {
            return;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| disposable.dispose())) {
            Ok(()) => debug!(plugin = %self.name, "Plugin disposed"),
            Err(payload) => error!(
                plugin = %self.name,
                panic = %panic_message(&*payload),
                "Plugin disposal panicked"
            ),
        }
    }
}

impl fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInstance")
            .field("name", &self.name)
            .field("module", &self.owner_identity.qualified_name())
            .field("plugin", &self.plugin)
            .finish()
    }
}

/// Serializable view of an instance for listings.
#[derive(Debug, Clone, Serialize)]
pub struct PluginSummary {
    pub name: String,
    pub module: String,
    pub description: Option<String>,
    pub disposable: bool,
}

impl From<&PluginInstance> for PluginSummary {
    fn from(instance: &PluginInstance) -> Self {
        Self {
            name: instance.name.clone(),
            module: instance.owner_identity.qualified_name().to_string(),
            description: instance.description.clone(),
            disposable: instance.is_disposable(),
        }
    }
}
