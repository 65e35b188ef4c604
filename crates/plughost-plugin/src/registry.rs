//! Plugin registry: the set of live plugin instances, keyed by name.
//!
//! Names are unique ignoring case. Re-registering the same concrete type
//! is idempotent; a different type claiming a taken name is rejected.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{PluginError, PluginResult};
use crate::identity::ModuleIdentity;
use crate::instance::{PluginInstance, PluginTypeKey};
use crate::verification::VerificationContext;

/// Outcome of a successful registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Inserted,
    /// The same concrete type was already registered under this name.
    AlreadyRegistered,
}

/// Registry of all live plugin instances.
#[derive(Debug)]
pub struct PluginRegistry {
    /// Lowercased plugin name → instance.
    plugins: RwLock<HashMap<String, PluginInstance>>,
    verification: Arc<VerificationContext>,
}

impl PluginRegistry {
    pub fn new(verification: Arc<VerificationContext>) -> Self {
        Self {
            plugins: RwLock::new(HashMap::new()),
            verification,
        }
    }

    /// Registers one instance.
    ///
    /// Instances that are not inserted are disposed before being dropped.
    pub async fn register(&self, instance: PluginInstance) -> PluginResult<RegisterOutcome> {
        let mut plugins = self.plugins.write().await;
        insert_locked(&mut plugins, instance)
    }

    /// Registers a module's instances under a single write lock, so no
    /// reader observes a partially registered module.
    pub async fn register_group(
        &self,
        instances: Vec<PluginInstance>,
    ) -> Vec<(String, PluginResult<RegisterOutcome>)> {
        let mut plugins = self.plugins.write().await;
        instances
            .into_iter()
            .map(|instance| {
                let name = instance.name().to_string();
                (name, insert_locked(&mut plugins, instance))
            })
            .collect()
    }

    /// Disposes and removes the instance registered under `name`.
    pub async fn unload(&self, name: &str) -> Option<PluginInstance> {
        let key = name.to_lowercase();
        let mut plugins = self.plugins.write().await;
        plugins.get(&key)?.dispose();
        let removed = plugins.remove(&key);
        if let Some(instance) = &removed {
            info!(plugin = %instance.name(), module = %instance.owner_identity(), "Plugin unloaded");
        }
        removed
    }

    /// Removes `instance` only if it is still the registered instance for
    /// its name. Returns whether it was removed.
    pub async fn unload_instance(&self, instance: &PluginInstance) -> bool {
        let key = instance.key();
        let mut plugins = self.plugins.write().await;
        match plugins.get(&key) {
            Some(current) if current.type_key() == instance.type_key() => {
                current.dispose();
                plugins.remove(&key);
                info!(plugin = %instance.name(), "Plugin unloaded");
                true
            }
            _ => false,
        }
    }

    /// Disposes and removes every instance, then purges the verification
    /// context. Returns the number of instances removed.
    pub async fn unload_all(&self) -> usize {
        let count = {
            let mut plugins = self.plugins.write().await;
            for instance in plugins.values() {
                instance.dispose();
            }
            let count = plugins.len();
            plugins.clear();
            count
        };

        self.verification.purge();
        info!(plugins = count, "All plugins unloaded");
        count
    }

    pub async fn get(&self, name: &str) -> Option<PluginInstance> {
        let plugins = self.plugins.read().await;
        plugins.get(&name.to_lowercase()).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        let plugins = self.plugins.read().await;
        plugins.contains_key(&name.to_lowercase())
    }

    /// Type registered under `name`, if any.
    pub async fn registered_type(&self, name: &str) -> Option<PluginTypeKey> {
        let plugins = self.plugins.read().await;
        plugins
            .get(&name.to_lowercase())
            .map(|instance| instance.type_key().clone())
    }

    /// Snapshot of the instances owned by `module`, sorted by name.
    pub async fn enumerate_by_module(&self, module: &ModuleIdentity) -> Vec<PluginInstance> {
        let plugins = self.plugins.read().await;
        let mut owned: Vec<_> = plugins
            .values()
            .filter(|instance| instance.owner_identity() == module)
            .cloned()
            .collect();
        owned.sort_by(|a, b| a.key().cmp(&b.key()));
        owned
    }

    /// Snapshot of every instance, sorted by name.
    pub async fn all(&self) -> Vec<PluginInstance> {
        let plugins = self.plugins.read().await;
        let mut all: Vec<_> = plugins.values().cloned().collect();
        all.sort_by(|a, b| a.key().cmp(&b.key()));
        all
    }

    /// Registered names as declared, sorted ignoring case.
    pub async fn names(&self) -> Vec<String> {
        self.all()
            .await
            .into_iter()
            .map(|instance| instance.name().to_string())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.plugins.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.plugins.read().await.is_empty()
    }

    pub fn verification(&self) -> &Arc<VerificationContext> {
        &self.verification
    }
}

fn insert_locked(
    plugins: &mut HashMap<String, PluginInstance>,
    instance: PluginInstance,
) -> PluginResult<RegisterOutcome> {
    let key = instance.key();
    match plugins.get(&key) {
        Some(existing) if existing.type_key() == instance.type_key() => {
            instance.dispose();
            Ok(RegisterOutcome::AlreadyRegistered)
        }
        Some(existing) => {
            warn!(
                plugin = %instance.name(),
                existing_module = %existing.owner_identity().qualified_name(),
                incoming_module = %instance.owner_identity().qualified_name(),
                "Plugin name conflict"
            );
            let err = PluginError::NameConflict {
                name: instance.name().to_string(),
                existing_module: existing.owner_identity().qualified_name().to_string(),
                incoming_module: instance.owner_identity().qualified_name().to_string(),
            };
            instance.dispose();
            Err(err)
        }
        None => {
            info!(plugin = %instance.name(), module = %instance.owner_identity(), "Plugin registered");
            plugins.insert(key, instance);
            Ok(RegisterOutcome::Inserted)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::abi::{ModuleDeclaration, TypeRegistrar};
    use crate::contract::{Disposable, Plugin};
    use crate::loader::{BuiltinModuleLoader, LoadedImage};
    use crate::module::{Module, TypeCatalog};
    use crate::verification::ScratchIsolation;

    static DISPOSED: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug, Default)]
    struct Foo;

    impl Plugin for Foo {
        fn as_disposable(&self) -> Option<&dyn Disposable> {
            Some(self)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    impl Disposable for Foo {
        fn dispose(&self) {
            DISPOSED.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Debug, Default)]
    struct Plain;

    impl Plugin for Plain {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn register_nothing(_: &mut dyn TypeRegistrar) {}

    fn module(name: &str) -> Arc<Module> {
        let identity = BuiltinModuleLoader::identity(name).unwrap();
        let catalog = TypeCatalog::from_declaration(&ModuleDeclaration::new(register_nothing)).unwrap();
        Arc::new(Module::new(identity, LoadedImage::new(catalog)))
    }

    fn registry() -> PluginRegistry {
        let isolation = ScratchIsolation::new(Arc::new(BuiltinModuleLoader::new()));
        PluginRegistry::new(Arc::new(VerificationContext::new(Arc::new(isolation))))
    }

    fn instance(name: &str, module: &Arc<Module>) -> PluginInstance {
        PluginInstance::new(name, module, Box::new(Plain))
    }

    fn disposable(name: &str, module: &Arc<Module>) -> PluginInstance {
        PluginInstance::new(name, module, Box::new(Foo))
    }

    // `DISPOSED` is process-wide, so only this test uses `Foo`.
    #[tokio::test]
    async fn test_registration_and_disposal() {
        let registry = registry();
        let alpha = module("alpha");
        let beta = module("beta");
        let before = DISPOSED.load(Ordering::SeqCst);

        assert_eq!(
            registry.register(disposable("Foo", &alpha)).await.unwrap(),
            RegisterOutcome::Inserted
        );
        assert_eq!(
            registry.register(disposable("FOO", &alpha)).await.unwrap(),
            RegisterOutcome::AlreadyRegistered
        );
        let err = registry.register(disposable("foo", &beta)).await.unwrap_err();
        assert!(matches!(err, PluginError::NameConflict { ref existing_module, .. } if existing_module == "alpha"));
        // Rejected duplicates are disposed; the registered one is untouched.
        assert_eq!(DISPOSED.load(Ordering::SeqCst) - before, 2);

        assert_eq!(registry.len().await, 1);
        let registered = registry.get("fOo").await.unwrap();
        assert_eq!(registered.owner_identity().qualified_name(), "alpha");
        assert!(registered.downcast_ref::<Foo>().is_some());

        assert!(registry.unload("foo").await.is_some());
        assert!(registry.unload("foo").await.is_none());
        assert_eq!(DISPOSED.load(Ordering::SeqCst) - before, 3);

        registry.register(disposable("Bar", &beta)).await.unwrap();
        registry.register(disposable("Baz", &beta)).await.unwrap();
        assert_eq!(registry.unload_all().await, 2);
        assert_eq!(DISPOSED.load(Ordering::SeqCst) - before, 5);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_register_group_and_enumerate_by_module() {
        let registry = registry();
        let alpha = module("alpha");
        let beta = module("beta");

        let results = registry
            .register_group(vec![instance("Zeta", &alpha), instance("Alpha", &alpha)])
            .await;
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        registry.register(instance("Other", &beta)).await.unwrap();

        let names: Vec<_> = registry
            .enumerate_by_module(alpha.identity())
            .await
            .iter()
            .map(|i| i.name().to_string())
            .collect();
        assert_eq!(names, vec!["Alpha", "Zeta"]);
        assert_eq!(registry.names().await, vec!["Alpha", "Other", "Zeta"]);
    }

    #[tokio::test]
    async fn test_unload_instance_checks_identity() {
        let registry = registry();
        let alpha = module("alpha");
        let beta = module("beta");
        registry.register(instance("Foo", &alpha)).await.unwrap();

        assert!(!registry.unload_instance(&instance("Foo", &beta)).await);
        assert!(registry.unload_instance(&instance("Foo", &alpha)).await);
        assert!(!registry.contains("Foo").await);
    }

    #[tokio::test]
    async fn test_instances_hold_weak_module_references() {
        let registry = registry();
        let alpha = module("alpha");
        registry.register(instance("Foo", &alpha)).await.unwrap();

        let registered = registry.get("Foo").await.unwrap();
        assert!(registered.owner().is_some());
        drop(alpha);
        assert!(registered.owner().is_none());
    }

    #[tokio::test]
    async fn test_unload_all_purges_verification() {
        let registry = registry();
        let identity = BuiltinModuleLoader::identity("missing").unwrap();
        registry.verification().is_plugin_module(&identity).await;
        assert!(registry.verification().is_active());

        registry.unload_all().await;
        assert!(!registry.verification().is_active());
    }
}
