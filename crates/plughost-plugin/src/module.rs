//! Loaded modules and their type catalogs.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::abi::{ModuleDeclaration, TypeRegistrar};
use crate::contract::{Plugin, PluginFactory};
use crate::identity::ModuleIdentity;
use crate::loader::LoadedImage;

/// An exported type that could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeLoadFailure {
    pub type_name: String,
    pub reason: String,
}

/// How a catalog entry can be used.
#[derive(Debug, Clone, Copy)]
pub enum TypeKind {
    /// Constructible through its factory.
    Concrete(PluginFactory),
    /// Discoverable only.
    Abstract,
}

/// One exported type.
#[derive(Debug, Clone)]
pub struct PluginTypeEntry {
    name: String,
    kind: TypeKind,
}

impl PluginTypeEntry {
    /// Full type name, which is also the plugin name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_abstract(&self) -> bool {
        matches!(self.kind, TypeKind::Abstract)
    }

    /// Runs the factory, converting a panic into an error message.
    pub fn construct(&self) -> Result<Box<dyn Plugin>, String> {
        let TypeKind::Concrete(factory) = self.kind else {
            return Err(format!("type '{}' is abstract", self.name));
        };

        match panic::catch_unwind(AssertUnwindSafe(factory)) {
            Ok(result) => result,
            Err(payload) => Err(format!("constructor panicked: {}", panic_message(&*payload))),
        }
    }
}

/// Everything a module exported, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct TypeCatalog {
    entries: Vec<PluginTypeEntry>,
    failures: Vec<TypeLoadFailure>,
}

impl TypeCatalog {
    /// Builds a catalog by running a module's registration function.
    ///
    /// A panic inside registration is reported as `Err`.
    pub fn from_declaration(declaration: &ModuleDeclaration) -> Result<Self, String> {
        let mut catalog = Self::default();
        let register = declaration.register;
        panic::catch_unwind(AssertUnwindSafe(|| register(&mut catalog)))
            .map_err(|payload| format!("module registration panicked: {}", panic_message(&*payload)))?;
        Ok(catalog)
    }

    pub fn entries(&self) -> &[PluginTypeEntry] {
        &self.entries
    }

    /// Concrete entries, in declaration order.
    pub fn concrete(&self) -> impl Iterator<Item = &PluginTypeEntry> {
        self.entries.iter().filter(|entry| !entry.is_abstract())
    }

    /// Names of the concrete plugin types.
    pub fn plugin_type_names(&self) -> Vec<String> {
        self.concrete().map(|entry| entry.name.clone()).collect()
    }

    /// Whether at least one concrete plugin type resolved.
    pub fn has_plugin_types(&self) -> bool {
        self.concrete().next().is_some()
    }

    /// Types that failed to resolve.
    pub fn failures(&self) -> &[TypeLoadFailure] {
        &self.failures
    }

    fn contains(&self, type_name: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.name.eq_ignore_ascii_case(type_name))
    }

    fn push(&mut self, type_name: &str, kind: TypeKind) {
        if type_name.trim().is_empty() {
            self.failures.push(TypeLoadFailure {
                type_name: String::new(),
                reason: "type name is empty".to_string(),
            });
        } else if self.contains(type_name) {
            self.failures.push(TypeLoadFailure {
                type_name: type_name.to_string(),
                reason: "type is declared more than once in the module".to_string(),
            });
        } else {
            self.entries.push(PluginTypeEntry {
                name: type_name.to_string(),
                kind,
            });
        }
    }
}

impl TypeRegistrar for TypeCatalog {
    fn plugin(&mut self, type_name: &str, factory: PluginFactory) {
        self.push(type_name, TypeKind::Concrete(factory));
    }

    fn abstract_type(&mut self, type_name: &str) {
        self.push(type_name, TypeKind::Abstract);
    }

    fn unresolved(&mut self, type_name: &str, reason: &str) {
        self.failures.push(TypeLoadFailure {
            type_name: type_name.to_string(),
            reason: reason.to_string(),
        });
    }
}

/// Discovered type as exposed to callers.
#[derive(Debug, Clone, Serialize)]
pub struct PluginDescriptor {
    pub type_name: String,
    pub owner: ModuleIdentity,
    pub is_abstract: bool,
}

/// A module mapped into the host.
///
/// Held by the module cache; plugin instances keep only a weak reference.
/// Dropping the last strong reference drops the loader anchor.
pub struct Module {
    identity: ModuleIdentity,
    catalog: TypeCatalog,
    loaded_at: DateTime<Utc>,
    _anchor: Option<Box<dyn Any + Send + Sync>>,
}

impl Module {
    pub fn new(identity: ModuleIdentity, image: LoadedImage) -> Self {
        let (catalog, anchor) = image.into_parts();
        Self {
            identity,
            catalog,
            loaded_at: Utc::now(),
            _anchor: anchor,
        }
    }

    pub fn identity(&self) -> &ModuleIdentity {
        &self.identity
    }

    pub fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    pub fn has_plugin_types(&self) -> bool {
        self.catalog.has_plugin_types()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Every exported type, abstract ones included.
    pub fn descriptors(&self) -> Vec<PluginDescriptor> {
        self.catalog
            .entries()
            .iter()
            .map(|entry| PluginDescriptor {
                type_name: entry.name.clone(),
                owner: self.identity.clone(),
                is_abstract: entry.is_abstract(),
            })
            .collect()
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("identity", &self.identity)
            .field("types", &self.catalog.entries.len())
            .field("failures", &self.catalog.failures.len())
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
