//! # plughost-plugin-sdk
//!
//! SDK for developing PlugHost plugin modules.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use plughost_plugin_sdk::prelude::*;
//!
//! #[derive(Debug, Default)]
//! struct PngCodec;
//!
//! impl Plugin for PngCodec {
//!     fn description(&self) -> Option<&str> { Some("PNG codec") }
//!     fn as_any(&self) -> &dyn std::any::Any { self }
//! }
//!
//! fn register(registrar: &mut dyn TypeRegistrar) {
//!     registrar.plugin("Vendor.PngCodec", construct::<PngCodec>);
//!     registrar.abstract_type("Vendor.PngCodecHelper");
//! }
//!
//! declare_plugin_module!(register);
//! ```
//!
//! Build the crate as a `cdylib` with the same toolchain as the host.

pub mod testing;

/// Prelude for convenient imports.
pub mod prelude {
    pub use plughost_plugin::abi::{ModuleDeclaration, TypeRegistrar};
    pub use plughost_plugin::contract::{Disposable, Plugin, PluginFactory, construct};

    pub use plughost_plugin::{declare_plugin_module, register_plugins};
}

pub use plughost_plugin::abi::{ABI_VERSION, API_VERSION};
