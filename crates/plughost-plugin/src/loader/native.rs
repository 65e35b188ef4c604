//! Native shared-library loader using `libloading` (feature-gated).

#[cfg(feature = "dynamic")]
mod dynamic_loader {
    use std::mem::ManuallyDrop;

    use tracing::{debug, info};

    use crate::abi::{DECLARATION_SYMBOL, ModuleDeclaration};
    use crate::error::{PluginError, PluginResult};
    use crate::format::BinaryFormat;
    use crate::identity::ModuleIdentity;
    use crate::loader::{LoadedImage, ModuleLoader};
    use crate::module::TypeCatalog;

    /// What happens to a library handle when its module is dropped.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Retention {
        /// Never unmapped. Code and statics may still be referenced by
        /// plugin objects or vtables after the module is evicted.
        Resident,
        /// Unmapped when the image is dropped. Only for verification
        /// sessions, which never hand out plugin objects.
        Scratch,
    }

    /// Keeps a library mapped for as long as the owning image lives.
    struct LibraryAnchor {
        library: ManuallyDrop<libloading::Library>,
        retention: Retention,
    }

    impl Drop for LibraryAnchor {
        fn drop(&mut self) {
            if self.retention == Retention::Scratch {
                // SAFETY: scratch images never expose factories or plugin
                // objects beyond the probe that created them.
                unsafe { ManuallyDrop::drop(&mut self.library) };
            }
        }
    }

    /// Loads modules from `.so` / `.dll` / `.dylib` files.
    #[derive(Debug, Clone, Copy)]
    pub struct NativeModuleLoader {
        retention: Retention,
    }

    impl NativeModuleLoader {
        /// Loader for the main module cache.
        pub fn resident() -> Self {
            Self {
                retention: Retention::Resident,
            }
        }

        /// Loader for verification sessions.
        pub fn scratch() -> Self {
            Self {
                retention: Retention::Scratch,
            }
        }

        pub fn retention(&self) -> Retention {
            self.retention
        }
    }

    impl ModuleLoader for NativeModuleLoader {
        fn name(&self) -> &'static str {
            match self.retention {
                Retention::Resident => "native",
                Retention::Scratch => "native-scratch",
            }
        }

        fn load(&self, identity: &ModuleIdentity) -> PluginResult<LoadedImage> {
            let path = identity.origin_path();
            let invalid = |reason: String| PluginError::InvalidFormat {
                path: path.to_path_buf(),
                reason,
            };

            let format = BinaryFormat::sniff(path).map_err(invalid)?;
            format.check_host_compatible().map_err(invalid)?;
            debug!(module = %identity, format = %format, "Module header accepted");

            // SAFETY: loading a library runs its initializers. Only trusted
            // module directories should be configured.
            let library = unsafe { libloading::Library::new(path) }
                .map_err(|e| invalid(format!("system loader rejected the file: {e}")))?;

            // SAFETY: the symbol is a `ModuleDeclaration` static exported by
            // `declare_plugin_module!`; it is copied out while the library is
            // mapped.
            let declaration: ModuleDeclaration = unsafe {
                let symbol = library
                    .get::<*const ModuleDeclaration>(DECLARATION_SYMBOL)
                    .map_err(|e| invalid(format!("missing module declaration: {e}")))?;
                (*symbol).read()
            };

            declaration.check_compatible().map_err(invalid)?;

            let catalog = TypeCatalog::from_declaration(&declaration).map_err(|reason| {
                PluginError::LoadFailed {
                    module: identity.qualified_name().to_string(),
                    reason,
                }
            })?;

            info!(
                module = %identity,
                path = %path.display(),
                retention = ?self.retention,
                types = catalog.entries().len(),
                "Native module mapped"
            );

            Ok(LoadedImage::with_anchor(
                catalog,
                LibraryAnchor {
                    library: ManuallyDrop::new(library),
                    retention: self.retention,
                },
            ))
        }
    }
}

/// Stub loader when the dynamic feature is not enabled.
#[cfg(not(feature = "dynamic"))]
mod dynamic_loader {
    use crate::error::{PluginError, PluginResult};
    use crate::identity::ModuleIdentity;
    use crate::loader::{LoadedImage, ModuleLoader};

    /// Library retention policy (unused without the dynamic feature).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Retention {
        Resident,
        Scratch,
    }

    /// Stub native loader; every load fails.
    #[derive(Debug, Clone, Copy)]
    pub struct NativeModuleLoader {
        retention: Retention,
    }

    impl NativeModuleLoader {
        pub fn resident() -> Self {
            Self {
                retention: Retention::Resident,
            }
        }

        pub fn scratch() -> Self {
            Self {
                retention: Retention::Scratch,
            }
        }

        pub fn retention(&self) -> Retention {
            self.retention
        }
    }

    impl ModuleLoader for NativeModuleLoader {
        fn name(&self) -> &'static str {
            "native-disabled"
        }

        fn load(&self, identity: &ModuleIdentity) -> PluginResult<LoadedImage> {
            Err(PluginError::LoadFailed {
                module: identity.qualified_name().to_string(),
                reason: "native module loading requires the 'dynamic' feature".to_string(),
            })
        }
    }
}

pub use dynamic_loader::{NativeModuleLoader, Retention};
