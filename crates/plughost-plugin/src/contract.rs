//! The contract between the host and plugin types.
//!
//! A plugin type is constructed through a [`PluginFactory`], a plain
//! no-argument function registered by its module. The host never discovers
//! constructors reflectively; a type without a factory is abstract.

use std::any::Any;
use std::fmt;

/// Trait implemented by every concrete plugin type.
pub trait Plugin: Send + Sync + fmt::Debug + 'static {
    /// Optional human-readable description.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Reasons this plugin cannot run in the current environment.
    ///
    /// A non-empty list disables the plugin after construction: it is
    /// disposed and reported instead of being registered.
    fn unavailable_reasons(&self) -> Vec<String> {
        Vec::new()
    }

    /// Returns the disposal capability if the plugin holds resources that
    /// must be released when it is unloaded.
    fn as_disposable(&self) -> Option<&dyn Disposable> {
        None
    }

    /// Exposes the concrete object for downcasting by application code.
    fn as_any(&self) -> &dyn Any;
}

/// Explicit disposal capability.
///
/// Called exactly once by the registry before an instance is removed.
pub trait Disposable: Send + Sync {
    /// Releases resources held by the plugin.
    fn dispose(&self);
}

/// No-argument construction contract of a plugin type.
pub type PluginFactory = fn() -> Result<Box<dyn Plugin>, String>;

/// Factory for any `Default` plugin type.
///
/// ```rust,ignore
/// registrar.plugin("Vendor.PngCodec", construct::<PngCodec>);
/// ```
pub fn construct<T: Plugin + Default>() -> Result<Box<dyn Plugin>, String> {
    Ok(Box::new(T::default()))
}
