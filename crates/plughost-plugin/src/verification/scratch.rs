//! In-process scratch isolation.
//!
//! Each probe loads the candidate with a dedicated loader, builds its
//! report and drops the image before returning, which for a scratch native
//! loader unmaps the library. A session only remembers reports, so repeated
//! probes of the same build skip the load until the session is purged. The
//! main module cache is never touched.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use super::{IsolationMechanism, ProbeError, ProbeReport, ProbeSession};
use crate::error::{PluginError, PluginResult};
use crate::identity::ModuleIdentity;
use crate::loader::ModuleLoader;

/// Isolation backed by a dedicated loader whose images never outlive a probe.
#[derive(Debug, Clone)]
pub struct ScratchIsolation {
    loader: Arc<dyn ModuleLoader>,
    concurrent: bool,
}

impl ScratchIsolation {
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            loader,
            concurrent: true,
        }
    }

    /// Forces probes to run one at a time.
    pub fn serialized(mut self) -> Self {
        self.concurrent = false;
        self
    }
}

impl IsolationMechanism for ScratchIsolation {
    fn name(&self) -> &'static str {
        "scratch"
    }

    fn supports_concurrent_probes(&self) -> bool {
        self.concurrent
    }

    fn create_session(&self) -> PluginResult<Arc<dyn ProbeSession>> {
        Ok(Arc::new(ScratchSession {
            loader: Arc::clone(&self.loader),
            probed: Arc::new(Mutex::new(HashMap::new())),
        }))
    }
}

#[derive(Debug)]
struct Probed {
    identity: ModuleIdentity,
    report: ProbeReport,
}

#[derive(Debug)]
struct ScratchSession {
    loader: Arc<dyn ModuleLoader>,
    probed: Arc<Mutex<HashMap<String, Probed>>>,
}

#[async_trait]
impl ProbeSession for ScratchSession {
    async fn probe(&self, identity: &ModuleIdentity) -> Result<ProbeReport, ProbeError> {
        let key = identity.cache_key();
        {
            let probed = self.probed.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = probed.get(&key).filter(|entry| entry.identity == *identity) {
                return Ok(entry.report.clone());
            }
        }

        let loader = Arc::clone(&self.loader);
        let probed = Arc::clone(&self.probed);
        let target = identity.clone();

        tokio::task::spawn_blocking(move || -> Result<ProbeReport, ProbeError> {
            let image = loader.load(&target).map_err(not_loadable)?;
            let report = ProbeReport::from_catalog(image.catalog());
            drop(image);

            probed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(
                    target.cache_key(),
                    Probed {
                        identity: target,
                        report: report.clone(),
                    },
                );
            Ok(report)
        })
        .await
        .map_err(|e| ProbeError::Isolation(format!("probe task failed: {e}")))?
    }
}

impl Drop for ScratchSession {
    fn drop(&mut self) {
        let count = self
            .probed
            .lock()
            .map(|probed| probed.len())
            .unwrap_or_default();
        debug!(reports = count, "Scratch verification session released");
    }
}

fn not_loadable(err: PluginError) -> ProbeError {
    match err {
        PluginError::InvalidFormat { reason, .. } => ProbeError::NotLoadable(reason),
        other => ProbeError::NotLoadable(other.to_string()),
    }
}

/// Probes a file directly with `loader`, outside any session.
///
/// Used by the out-of-process probe helper; the image is dropped before
/// returning.
pub fn probe_path(loader: &dyn ModuleLoader, path: &Path) -> Result<ProbeReport, ProbeError> {
    let identity = ModuleIdentity::from_path(path).map_err(not_loadable)?;
    let image = loader.load(&identity).map_err(not_loadable)?;
    Ok(ProbeReport::from_catalog(image.catalog()))
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::sync::Weak;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::abi::{ModuleDeclaration, TypeRegistrar};
    use crate::contract::{Plugin, construct};
    use crate::loader::{BuiltinModuleLoader, LoadedImage};
    use crate::module::TypeCatalog;
    use crate::verification::{VerificationContext, VerificationOutcome};

    #[derive(Debug, Default)]
    struct Codec;

    impl Plugin for Codec {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn register(registrar: &mut dyn TypeRegistrar) {
        registrar.plugin("Vendor.PngCodec", construct::<Codec>);
    }

    fn image(anchor: Arc<()>) -> LoadedImage {
        let catalog = TypeCatalog::from_declaration(&ModuleDeclaration::new(register)).unwrap();
        LoadedImage::with_anchor(catalog, anchor)
    }

    /// Loader whose images carry an anchor we can observe.
    #[derive(Debug, Default)]
    struct TrackingLoader {
        anchors: Mutex<Vec<Weak<()>>>,
    }

    impl ModuleLoader for TrackingLoader {
        fn name(&self) -> &'static str {
            "tracking"
        }

        fn load(&self, _identity: &ModuleIdentity) -> PluginResult<LoadedImage> {
            let anchor = Arc::new(());
            self.anchors.lock().unwrap().push(Arc::downgrade(&anchor));
            Ok(image(anchor))
        }
    }

    /// Loader that records how many loads overlapped.
    #[derive(Debug, Default)]
    struct OverlapLoader {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ModuleLoader for OverlapLoader {
        fn name(&self) -> &'static str {
            "overlap"
        }

        fn load(&self, _identity: &ModuleIdentity) -> PluginResult<LoadedImage> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(image(Arc::new(())))
        }
    }

    async fn verify_distinct(context: Arc<VerificationContext>, count: usize) {
        let handles: Vec<_> = (0..count)
            .map(|i| {
                let context = Arc::clone(&context);
                tokio::spawn(async move {
                    let identity = BuiltinModuleLoader::identity(&format!("codecs_{i}")).unwrap();
                    context.verify(&identity).await
                })
            })
            .collect();
        for handle in handles {
            assert!(matches!(
                handle.await.unwrap().unwrap(),
                VerificationOutcome::Verified(_)
            ));
        }
    }

    #[tokio::test]
    async fn test_scratch_images_released_after_each_check() {
        let loader = Arc::new(TrackingLoader::default());
        let context = VerificationContext::new(Arc::new(ScratchIsolation::new(loader.clone())));
        let identity = BuiltinModuleLoader::identity("codecs").unwrap();

        assert!(context.is_plugin_module(&identity).await);
        assert!(loader.anchors.lock().unwrap()[0].upgrade().is_none());

        assert!(context.is_plugin_module(&identity).await);
        assert_eq!(
            loader.anchors.lock().unwrap().len(),
            1,
            "repeated checks reuse the session report"
        );

        context.purge();
        assert!(context.is_plugin_module(&identity).await);
        let anchors = loader.anchors.lock().unwrap();
        assert_eq!(anchors.len(), 2);
        assert!(anchors.iter().all(|anchor| anchor.upgrade().is_none()));
    }

    #[tokio::test]
    async fn test_new_build_of_checked_module_is_reloaded() {
        let loader = Arc::new(TrackingLoader::default());
        let context = VerificationContext::new(Arc::new(ScratchIsolation::new(loader.clone())));
        let first = ModuleIdentity::new("codecs", "/plugins/codecs.so", "aaaa").unwrap();
        let rebuilt = ModuleIdentity::new("codecs", "/plugins/codecs.so", "bbbb").unwrap();

        assert!(context.is_plugin_module(&first).await);
        assert!(context.is_plugin_module(&rebuilt).await);
        assert_eq!(loader.anchors.lock().unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_serialized_session_checks_one_at_a_time() {
        let loader = Arc::new(OverlapLoader::default());
        let isolation = ScratchIsolation::new(loader.clone()).serialized();
        verify_distinct(Arc::new(VerificationContext::new(Arc::new(isolation))), 4).await;
        assert_eq!(loader.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_session_checks_overlap() {
        let loader = Arc::new(OverlapLoader::default());
        let isolation = ScratchIsolation::new(loader.clone());
        verify_distinct(Arc::new(VerificationContext::new(Arc::new(isolation))), 4).await;
        assert!(loader.peak.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_unknown_module_is_not_loadable() {
        let isolation = ScratchIsolation::new(Arc::new(BuiltinModuleLoader::new())).serialized();
        assert!(!isolation.supports_concurrent_probes());

        let context = VerificationContext::new(Arc::new(isolation));
        let identity = BuiltinModuleLoader::identity("missing").unwrap();
        assert!(matches!(
            context.verify(&identity).await.unwrap(),
            VerificationOutcome::NotLoadable(_)
        ));
    }
}
