//! # plughost-plugin
//!
//! Plugin subsystem for PlugHost. Provides:
//!
//! - Path and logical-name resolution over ordered search directories
//! - Isolated verification of candidate modules (scratch or subprocess)
//! - A single-flight module cache: each module is loaded at most once
//! - A registry of plugin instances with case-insensitive unique names
//! - [`PluginManager`], the facade tying the above together
//! - Native shared-library loading via `libloading` (feature `dynamic`)

pub mod abi;
pub mod cache;
pub mod contract;
pub mod error;
pub mod format;
pub mod identity;
pub mod instance;
pub mod loader;
pub mod macros;
pub mod manager;
pub mod module;
pub mod prelude;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod verification;

pub use cache::{CacheLookup, ModuleCache};
pub use contract::{Disposable, Plugin, PluginFactory};
pub use error::{PluginError, PluginResult};
pub use identity::ModuleIdentity;
pub use instance::PluginInstance;
pub use manager::{PluginManager, PluginManagerBuilder};
pub use registry::PluginRegistry;
pub use report::{LoadReport, LoadStage, LoadState, RejectReason, UnloadSummary};
pub use resolver::PathResolver;
pub use verification::VerificationContext;
