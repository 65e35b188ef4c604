//! Shared fixtures for plugin subsystem integration tests.
//!
//! Module files are written into a temp directory so resolution and
//! identity hashing run for real; the fixture loader then maps each file's
//! qualified name to an in-memory module declaration.

#![allow(dead_code)]

use std::any::Any;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use plughost_plugin::abi::{ModuleDeclaration, TypeRegistrar};
use plughost_plugin::contract::{Disposable, Plugin, construct};
use plughost_plugin::error::{PluginError, PluginResult};
use plughost_plugin::identity::ModuleIdentity;
use plughost_plugin::loader::{LoadedImage, ModuleLoader};
use plughost_plugin::module::TypeCatalog;
use plughost_plugin::{PathResolver, PluginManager};
use tempfile::TempDir;

// ── Plugin types ─────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct PngCodec;

impl Plugin for PngCodec {
    fn description(&self) -> Option<&str> {
        Some("PNG image codec")
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Default)]
pub struct AlphaFoo;

impl Plugin for AlphaFoo {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Default)]
pub struct BetaFoo;

impl Plugin for BetaFoo {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Default)]
pub struct Simple;

impl Plugin for Simple {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Default)]
pub struct NeedsGpu;

impl Plugin for NeedsGpu {
    fn unavailable_reasons(&self) -> Vec<String> {
        vec!["no GPU device found".to_string()]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Counts disposals process-wide. Only one test binary uses it.
pub static DISPOSALS: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Default)]
pub struct Tracked;

impl Plugin for Tracked {
    fn as_disposable(&self) -> Option<&dyn Disposable> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Disposable for Tracked {
    fn dispose(&self) {
        DISPOSALS.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct TrackedUnavailable;

impl Plugin for TrackedUnavailable {
    fn unavailable_reasons(&self) -> Vec<String> {
        vec!["license server unreachable".to_string()]
    }

    fn as_disposable(&self) -> Option<&dyn Disposable> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Disposable for TrackedUnavailable {
    fn dispose(&self) {
        DISPOSALS.fetch_add(1, Ordering::SeqCst);
    }
}

/// Counts constructions of [`Counted`] process-wide. Only one test uses it.
pub static CONSTRUCTIONS: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug)]
pub struct Counted;

impl Default for Counted {
    fn default() -> Self {
        CONSTRUCTIONS.fetch_add(1, Ordering::SeqCst);
        Self
    }
}

impl Plugin for Counted {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn failing() -> Result<Box<dyn Plugin>, String> {
    Err("required configuration missing".to_string())
}

fn panicking() -> Result<Box<dyn Plugin>, String> {
    panic!("constructor exploded")
}

// ── Module declarations ──────────────────────────────────────────────

fn register_codecs(registrar: &mut dyn TypeRegistrar) {
    registrar.plugin("Vendor.PngCodec", construct::<PngCodec>);
    registrar.abstract_type("Vendor.PngCodecHelper");
}

fn register_alpha(registrar: &mut dyn TypeRegistrar) {
    registrar.plugin("Foo", construct::<AlphaFoo>);
}

fn register_beta(registrar: &mut dyn TypeRegistrar) {
    registrar.plugin("Foo", construct::<BetaFoo>);
    registrar.plugin("Beta.Extra", construct::<Simple>);
}

fn register_gamma(registrar: &mut dyn TypeRegistrar) {
    registrar.plugin("FOO", construct::<Simple>);
}

fn register_mixed(registrar: &mut dyn TypeRegistrar) {
    registrar.plugin("Mixed.One", construct::<Simple>);
    registrar.plugin("Mixed.Broken", failing);
    registrar.plugin("Mixed.Two", construct::<Simple>);
    registrar.unresolved("Mixed.Exotic", "dependency libexotic not found");
}

fn register_all_broken(registrar: &mut dyn TypeRegistrar) {
    registrar.plugin("Broken.First", failing);
    registrar.plugin("Broken.Second", panicking);
}

fn register_abstract_only(registrar: &mut dyn TypeRegistrar) {
    registrar.abstract_type("Vendor.CodecBase");
}

fn register_unavailable(registrar: &mut dyn TypeRegistrar) {
    registrar.plugin("Gpu.Renderer", construct::<NeedsGpu>);
}

fn register_tracked(registrar: &mut dyn TypeRegistrar) {
    registrar.plugin("Tracked.One", construct::<Tracked>);
    registrar.plugin("Tracked.Two", construct::<Tracked>);
    registrar.plugin("Tracked.Unavailable", construct::<TrackedUnavailable>);
}

fn register_counted(registrar: &mut dyn TypeRegistrar) {
    registrar.plugin("Counted.Pool", construct::<Counted>);
}

/// Every fixture module, by qualified name.
pub fn fixture_modules() -> Vec<(&'static str, ModuleDeclaration)> {
    vec![
        ("vendor_codecs", ModuleDeclaration::new(register_codecs)),
        ("alpha", ModuleDeclaration::new(register_alpha)),
        ("beta", ModuleDeclaration::new(register_beta)),
        ("gamma", ModuleDeclaration::new(register_gamma)),
        ("mixed", ModuleDeclaration::new(register_mixed)),
        ("all_broken", ModuleDeclaration::new(register_all_broken)),
        ("abstract_only", ModuleDeclaration::new(register_abstract_only)),
        ("unavailable", ModuleDeclaration::new(register_unavailable)),
        ("tracked", ModuleDeclaration::new(register_tracked)),
        ("counted", ModuleDeclaration::new(register_counted)),
    ]
}

// ── Loader ───────────────────────────────────────────────────────────

/// Loader serving fixture declarations for files that exist on disk.
#[derive(Debug)]
pub struct FixtureLoader {
    modules: HashMap<String, ModuleDeclaration>,
    delay: Duration,
    loads: AtomicUsize,
}

impl FixtureLoader {
    pub fn new(delay: Duration) -> Self {
        Self {
            modules: fixture_modules()
                .into_iter()
                .map(|(name, declaration)| (name.to_string(), declaration))
                .collect(),
            delay,
            loads: AtomicUsize::new(0),
        }
    }

    /// Raw loads performed, verification included.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ModuleLoader for FixtureLoader {
    fn name(&self) -> &'static str {
        "fixture"
    }

    fn load(&self, identity: &ModuleIdentity) -> PluginResult<LoadedImage> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let path = identity.origin_path();
        if !path.is_file() {
            return Err(PluginError::NotFound(path.display().to_string()));
        }

        std::thread::sleep(self.delay);

        let declaration = self
            .modules
            .get(&identity.cache_key())
            .ok_or_else(|| PluginError::InvalidFormat {
                path: path.to_path_buf(),
                reason: "unrecognized module header".to_string(),
            })?;

        TypeCatalog::from_declaration(declaration)
            .map(LoadedImage::new)
            .map_err(|reason| PluginError::LoadFailed {
                module: identity.qualified_name().to_string(),
                reason,
            })
    }
}

// ── Host ─────────────────────────────────────────────────────────────

/// File name a module is stored under, as the resolver expects it.
pub fn library_file_name(name: &str) -> String {
    format!(
        "{}{name}.{}",
        std::env::consts::DLL_PREFIX,
        std::env::consts::DLL_EXTENSION
    )
}

/// A plugin directory populated with fixture modules plus a manager over it.
pub struct TestHost {
    pub dir: TempDir,
    pub loader: Arc<FixtureLoader>,
    pub manager: PluginManager,
}

impl TestHost {
    pub fn new() -> Self {
        Self::build(Duration::ZERO, true)
    }

    /// Host whose raw loads sleep for `delay`.
    pub fn with_delay(delay: Duration) -> Self {
        Self::build(delay, true)
    }

    /// Host that skips verification before loading.
    pub fn without_verification() -> Self {
        Self::build(Duration::ZERO, false)
    }

    fn build(delay: Duration, verify: bool) -> Self {
        let dir = tempfile::tempdir().expect("create plugin dir");

        for (name, _) in fixture_modules() {
            std::fs::write(dir.path().join(library_file_name(name)), name.as_bytes())
                .expect("write module file");
        }
        std::fs::write(dir.path().join(library_file_name("garbage")), b"\x00\x01not a module")
            .expect("write garbage file");
        std::fs::write(dir.path().join("README.txt"), b"ignored by scans").expect("write readme");

        let mut resolver = PathResolver::new();
        resolver.push(dir.path());

        let loader = Arc::new(FixtureLoader::new(delay));
        let manager = PluginManager::builder(loader.clone())
            .resolver(resolver)
            .verify_before_load(verify)
            .verification_timeout(Some(Duration::from_secs(5)))
            .build();

        Self {
            dir,
            loader,
            manager,
        }
    }

    pub fn module_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(library_file_name(name))
    }
}
