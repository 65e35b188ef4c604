//! Convenience macros for module authors.

/// Exports the module declaration from a `cdylib` plugin crate.
///
/// # Example
/// ```rust,ignore
/// fn register(registrar: &mut dyn TypeRegistrar) {
///     registrar.plugin("Vendor.PngCodec", construct::<PngCodec>);
///     registrar.abstract_type("Vendor.PngCodecHelper");
/// }
///
/// declare_plugin_module!(register);
/// ```
#[macro_export]
macro_rules! declare_plugin_module {
    ($register:path) => {
        #[allow(non_upper_case_globals)]
        #[unsafe(no_mangle)]
        pub static plughost_module_declaration: $crate::abi::ModuleDeclaration =
            $crate::abi::ModuleDeclaration::new($register);
    };
}

/// Registers several `Default` plugin types at once.
///
/// # Example
/// ```rust,ignore
/// register_plugins!(registrar, {
///     "Vendor.PngCodec" => PngCodec,
///     "Vendor.JpegCodec" => JpegCodec,
/// });
/// ```
#[macro_export]
macro_rules! register_plugins {
    ($registrar:expr, { $($name:expr => $ty:ty),* $(,)? }) => {{
        $(
            $registrar.plugin($name, $crate::contract::construct::<$ty>);
        )*
    }};
}
