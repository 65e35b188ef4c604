//! Sample PlugHost module exporting image codecs.
//!
//! Built as a `cdylib`, the library can be dropped into a plugin directory.
//! The `rlib` build exposes [`declaration`] so a host can register the same
//! types as a built-in module.

pub mod codec;

use plughost_plugin_sdk::prelude::*;

pub use codec::{HeifCodec, ImageCodec, JpegCodec, PngCodec};

/// Logical name used when the module is registered as a built-in.
pub const MODULE_NAME: &str = "vendor_codecs";

fn register(registrar: &mut dyn TypeRegistrar) {
    register_plugins!(registrar, {
        "Vendor.PngCodec" => PngCodec,
        "Vendor.JpegCodec" => JpegCodec,
        "Vendor.HeifCodec" => HeifCodec,
    });
    // Shared PNG filter tables; never instantiated on its own.
    registrar.abstract_type("Vendor.PngCodecHelper");
}

declare_plugin_module!(register);

/// The exported declaration, for hosts linking this crate directly.
pub fn declaration() -> ModuleDeclaration {
    plughost_module_declaration
}
