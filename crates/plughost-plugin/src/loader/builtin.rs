//! Loader for modules compiled into the host binary.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use tracing::debug;

use crate::abi::{API_VERSION, ModuleDeclaration};
use crate::error::{PluginError, PluginResult};
use crate::identity::ModuleIdentity;
use crate::loader::{LoadedImage, ModuleLoader};
use crate::module::TypeCatalog;

/// Origin prefix used for identities of built-in modules.
pub const BUILTIN_ORIGIN: &str = "builtin:";

/// Serves module declarations linked statically into the host.
///
/// Modules are looked up by qualified name, ignoring case.
#[derive(Debug, Default)]
pub struct BuiltinModuleLoader {
    modules: RwLock<HashMap<String, ModuleDeclaration>>,
}

impl BuiltinModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module and returns `self` for chaining.
    pub fn with_module(self, name: &str, declaration: ModuleDeclaration) -> Self {
        self.register(name, declaration);
        self
    }

    /// Adds or replaces a module. Returns `true` if the name was new.
    pub fn register(&self, name: &str, declaration: ModuleDeclaration) -> bool {
        let mut modules = self
            .modules
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        modules.insert(name.to_lowercase(), declaration).is_none()
    }

    /// Identity under which a built-in module is loaded.
    pub fn identity(name: &str) -> PluginResult<ModuleIdentity> {
        ModuleIdentity::new(
            name,
            PathBuf::from(format!("{BUILTIN_ORIGIN}{name}")),
            API_VERSION,
        )
    }

    pub fn module_names(&self) -> Vec<String> {
        let modules = self
            .modules
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut names: Vec<_> = modules.keys().cloned().collect();
        names.sort();
        names
    }
}

impl ModuleLoader for BuiltinModuleLoader {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn load(&self, identity: &ModuleIdentity) -> PluginResult<LoadedImage> {
        let declaration = {
            let modules = self
                .modules
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            modules.get(&identity.cache_key()).copied()
        };

        let declaration = declaration.ok_or_else(|| PluginError::InvalidFormat {
            path: identity.origin_path().to_path_buf(),
            reason: format!("'{}' is not a built-in module", identity.qualified_name()),
        })?;

        declaration
            .check_compatible()
            .map_err(|reason| PluginError::InvalidFormat {
                path: identity.origin_path().to_path_buf(),
                reason,
            })?;

        let catalog = TypeCatalog::from_declaration(&declaration).map_err(|reason| {
            PluginError::LoadFailed {
                module: identity.qualified_name().to_string(),
                reason,
            }
        })?;

        debug!(module = %identity, types = catalog.entries().len(), "Built-in module loaded");
        Ok(LoadedImage::new(catalog))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::TypeRegistrar;

    fn register(registrar: &mut dyn TypeRegistrar) {
        registrar.abstract_type("Vendor.Base");
    }

    #[test]
    fn test_lookup_ignores_case() {
        let loader = BuiltinModuleLoader::new().with_module("Vendor.Codecs", ModuleDeclaration::new(register));
        let identity = BuiltinModuleLoader::identity("VENDOR.CODECS").unwrap();
        let image = loader.load(&identity).unwrap();
        assert_eq!(image.catalog().entries().len(), 1);
        assert_eq!(loader.module_names(), vec!["vendor.codecs"]);
    }

    #[test]
    fn test_unknown_module_is_invalid_format() {
        let loader = BuiltinModuleLoader::new();
        let identity = BuiltinModuleLoader::identity("missing").unwrap();
        assert!(matches!(
            loader.load(&identity),
            Err(PluginError::InvalidFormat { .. })
        ));
    }
}
