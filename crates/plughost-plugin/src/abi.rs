//! Module declaration ABI.
//!
//! A module exports a single static named [`DECLARATION_SYMBOL`] of type
//! [`ModuleDeclaration`]. The host reads it, checks the versions, then calls
//! `register` with a [`TypeRegistrar`] to build the module's type catalog.
//!
//! The declaration uses the Rust ABI, so host and module must be built
//! with the same toolchain and the same `plughost-plugin` version; both
//! are checked before `register` is invoked.

use crate::contract::PluginFactory;

/// Bumped whenever [`ModuleDeclaration`] or [`TypeRegistrar`] change shape.
pub const ABI_VERSION: u32 = 1;

/// Version of the plugin contract crate the module was compiled against.
pub const API_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the exported declaration symbol (NUL-terminated for lookup).
pub const DECLARATION_SYMBOL: &[u8] = b"plughost_module_declaration\0";

/// Static declaration exported by every module.
#[derive(Debug, Clone, Copy)]
pub struct ModuleDeclaration {
    /// [`ABI_VERSION`] at compile time of the module.
    pub abi_version: u32,
    /// [`API_VERSION`] at compile time of the module.
    pub api_version: &'static str,
    /// Registers every exported type.
    pub register: fn(&mut dyn TypeRegistrar),
}

impl ModuleDeclaration {
    /// Declares a module with the current ABI and API versions.
    pub const fn new(register: fn(&mut dyn TypeRegistrar)) -> Self {
        Self {
            abi_version: ABI_VERSION,
            api_version: API_VERSION,
            register,
        }
    }

    /// Checks that the module was built against a compatible host contract.
    pub fn check_compatible(&self) -> Result<(), String> {
        if self.abi_version != ABI_VERSION {
            return Err(format!(
                "module ABI version {} does not match host ABI version {}",
                self.abi_version, ABI_VERSION
            ));
        }

        if self.api_version != API_VERSION {
            return Err(format!(
                "module built against plughost-plugin {} but host uses {}",
                self.api_version, API_VERSION
            ));
        }

        Ok(())
    }
}

/// Receives the types exported by a module.
pub trait TypeRegistrar {
    /// Registers a concrete plugin type with its construction contract.
    fn plugin(&mut self, type_name: &str, factory: PluginFactory);

    /// Registers an abstract type: visible to discovery, never instantiated.
    fn abstract_type(&mut self, type_name: &str);

    /// Records a type that the module could not resolve (for example a
    /// missing runtime dependency).
    fn unresolved(&mut self, type_name: &str, reason: &str);
}
