//! Helpers for unit-testing a module's registration function without a
//! host.

use plughost_plugin::abi::ModuleDeclaration;
use plughost_plugin::contract::Plugin;
use plughost_plugin::module::TypeCatalog;

/// What a registration function exported.
#[derive(Debug)]
pub struct RegisteredTypes {
    catalog: TypeCatalog,
}

impl RegisteredTypes {
    /// Runs the declaration's registration function.
    pub fn collect(declaration: &ModuleDeclaration) -> Result<Self, String> {
        declaration.check_compatible()?;
        TypeCatalog::from_declaration(declaration).map(|catalog| Self { catalog })
    }

    /// Concrete type names, in declaration order.
    pub fn plugin_names(&self) -> Vec<String> {
        self.catalog.plugin_type_names()
    }

    /// Abstract type names, in declaration order.
    pub fn abstract_names(&self) -> Vec<String> {
        self.catalog
            .entries()
            .iter()
            .filter(|entry| entry.is_abstract())
            .map(|entry| entry.name().to_string())
            .collect()
    }

    /// Names reported as unresolved by the module.
    pub fn unresolved_names(&self) -> Vec<String> {
        self.catalog
            .failures()
            .iter()
            .map(|failure| failure.type_name.clone())
            .collect()
    }

    /// Constructs the named concrete type the way the host would.
    pub fn construct(&self, type_name: &str) -> Result<Box<dyn Plugin>, String> {
        self.catalog
            .concrete()
            .find(|entry| entry.name() == type_name)
            .ok_or_else(|| format!("no concrete type '{type_name}'"))?
            .construct()
    }

    /// Constructs every concrete type, returning `(name, result)` pairs.
    pub fn construct_all(&self) -> Vec<(String, Result<Box<dyn Plugin>, String>)> {
        self.catalog
            .concrete()
            .map(|entry| (entry.name().to_string(), entry.construct()))
            .collect()
    }
}
