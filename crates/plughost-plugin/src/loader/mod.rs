//! Module loaders: the raw "map a module and read its types" step.
//!
//! Loaders are synchronous and may block; the cache and the verification
//! sessions call them through `spawn_blocking`.

pub mod builtin;
pub mod native;

use std::any::Any;
use std::fmt;

use crate::error::PluginResult;
use crate::identity::ModuleIdentity;
use crate::module::TypeCatalog;

pub use builtin::BuiltinModuleLoader;
pub use native::{NativeModuleLoader, Retention};

/// A freshly loaded module image.
pub struct LoadedImage {
    catalog: TypeCatalog,
    anchor: Option<Box<dyn Any + Send + Sync>>,
}

impl LoadedImage {
    /// Image with no backing resource (in-process modules).
    pub fn new(catalog: TypeCatalog) -> Self {
        Self {
            catalog,
            anchor: None,
        }
    }

    /// Image whose factories live inside `anchor`; the anchor is kept alive
    /// as long as the image or the module built from it.
    pub fn with_anchor(catalog: TypeCatalog, anchor: impl Any + Send + Sync) -> Self {
        Self {
            catalog,
            anchor: Some(Box::new(anchor)),
        }
    }

    pub fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    pub(crate) fn into_parts(self) -> (TypeCatalog, Option<Box<dyn Any + Send + Sync>>) {
        (self.catalog, self.anchor)
    }
}

impl fmt::Debug for LoadedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedImage")
            .field("types", &self.catalog.entries().len())
            .field("anchored", &self.anchor.is_some())
            .finish()
    }
}

/// Maps a module into the process and reads its exported types.
pub trait ModuleLoader: Send + Sync + fmt::Debug + 'static {
    /// Short loader name for logs.
    fn name(&self) -> &'static str;

    /// Loads the module named by `identity`. Blocking.
    fn load(&self, identity: &ModuleIdentity) -> PluginResult<LoadedImage>;
}
