//! Prelude for convenient imports.

pub use crate::abi::{ModuleDeclaration, TypeRegistrar};
pub use crate::contract::{Disposable, Plugin, PluginFactory, construct};
pub use crate::error::{PluginError, PluginResult};
pub use crate::identity::ModuleIdentity;
pub use crate::instance::PluginInstance;
pub use crate::manager::PluginManager;
pub use crate::report::{LoadReport, LoadState, RejectReason};

pub use crate::{declare_plugin_module, register_plugins};
