//! Integration tests for the plugin manager facade.

mod helpers;

use plughost_plugin::error::PluginError;
use plughost_plugin::report::DisabledReason;
use plughost_plugin::{LoadState, RejectReason};

use helpers::{PngCodec, TestHost};

#[tokio::test]
async fn test_png_codec_module() {
    let host = TestHost::new();

    assert!(host.manager.is_plugin_module("vendor_codecs").await);
    assert_eq!(
        host.manager.enumerate_plugins("vendor_codecs").await.unwrap(),
        vec!["Vendor.PngCodec"]
    );

    let report = host.manager.load("vendor_codecs").await;
    assert_eq!(report.registered(), ["Vendor.PngCodec"]);
    assert!(report.newly_loaded);
    assert!(report.failures.is_empty());

    let instance = host.manager.get("vendor.pngcodec").await.unwrap();
    assert_eq!(instance.name(), "Vendor.PngCodec");
    assert_eq!(instance.description(), Some("PNG image codec"));
    assert!(instance.downcast_ref::<PngCodec>().is_some());
    assert!(host.manager.get("Vendor.PngCodecHelper").await.is_none());
}

#[tokio::test]
async fn test_enumerated_names_match_registered_names() {
    let host = TestHost::new();
    let path = host.module_path("mixed");
    let request = path.to_str().unwrap();

    let mut enumerated = host.manager.enumerate_plugins(request).await.unwrap();
    let report = host.manager.load(request).await;
    assert!(report.is_registered());

    let identity = report.identity.clone().unwrap();
    let mut registered: Vec<_> = host
        .manager
        .registry()
        .enumerate_by_module(&identity)
        .await
        .iter()
        .map(|instance| instance.name().to_string())
        .collect();

    // The broken type is enumerable but never registered.
    enumerated.retain(|name| name != "Mixed.Broken");
    enumerated.sort();
    registered.sort();
    assert_eq!(enumerated, registered);

    // Once cached, enumeration is served from the loaded module.
    assert_eq!(
        host.manager.enumerate_plugins(request).await.unwrap(),
        vec!["Mixed.One", "Mixed.Broken", "Mixed.Two"]
    );
}

#[tokio::test]
async fn test_plugin_names_are_unique_across_modules() {
    let host = TestHost::new();

    let alpha = host.manager.load("alpha").await;
    assert_eq!(alpha.registered(), ["Foo"]);

    let beta = host.manager.load("beta").await;
    assert_eq!(beta.registered(), ["Beta.Extra"]);
    assert!(matches!(
        beta.failures.as_slice(),
        [PluginError::NameConflict { name, existing_module, incoming_module }]
            if name == "Foo" && existing_module == "alpha" && incoming_module == "beta"
    ));

    let gamma = host.manager.load("gamma").await;
    assert_eq!(gamma.rejection(), Some(RejectReason::NameConflict));

    let foo = host.manager.get("foo").await.unwrap();
    assert_eq!(foo.owner_identity().qualified_name(), "alpha");
    assert_eq!(host.manager.plugins().await.len(), 2);
}

#[tokio::test]
async fn test_partial_construction_failure() {
    let host = TestHost::new();

    let report = host.manager.load("mixed").await;
    assert_eq!(report.registered(), ["Mixed.One", "Mixed.Two"]);

    let construction: Vec<_> = report
        .failures
        .iter()
        .filter(|f| matches!(f, PluginError::ConstructionFailure { .. }))
        .collect();
    assert_eq!(construction.len(), 1);
    assert!(report.failures.iter().any(|f| matches!(
        f,
        PluginError::TypeLoadPartial { type_name, .. } if type_name == "Mixed.Exotic"
    )));

    let disabled = host.manager.disabled_plugins().await;
    assert_eq!(disabled.len(), 1);
    assert_eq!(disabled[0].name, "Mixed.Broken");
    assert_eq!(disabled[0].reason, DisabledReason::ConstructionError);
}

#[tokio::test]
async fn test_all_constructions_failed() {
    let host = TestHost::new();

    let report = host.manager.load("all_broken").await;
    assert!(matches!(
        report.error(),
        Some(PluginError::AllConstructionsFailed { count: 2, .. })
    ));
    assert!(host.manager.plugins().await.is_empty());
    assert_eq!(host.manager.disabled_plugins().await.len(), 2);
}

#[tokio::test]
async fn test_module_without_plugin_types_is_rejected() {
    let host = TestHost::new();

    assert!(!host.manager.is_plugin_module("abstract_only").await);
    assert!(host.manager.enumerate_plugins("abstract_only").await.unwrap().is_empty());

    let report = host.manager.load("abstract_only").await;
    assert_eq!(report.rejection(), Some(RejectReason::NotAPluginModule));
    assert!(host.manager.cache().is_empty());
}

#[tokio::test]
async fn test_module_without_plugin_types_is_rejected_by_cache() {
    let host = TestHost::without_verification();

    let report = host.manager.load("abstract_only").await;
    assert_eq!(report.rejection(), Some(RejectReason::NotAPluginModule));
    assert!(host.manager.cache().is_empty());

    // Not negatively cached: the next request loads again.
    host.manager.load("abstract_only").await;
    assert_eq!(host.manager.cache().load_count(), 2);
}

#[tokio::test]
async fn test_missing_and_invalid_modules() {
    let host = TestHost::new();

    let missing = host.manager.load("does_not_exist").await;
    assert_eq!(missing.rejection(), Some(RejectReason::NotFound));
    assert!(missing.identity.is_none());
    assert!(!host.manager.is_plugin_module("does_not_exist").await);

    let garbage = host.manager.load("garbage").await;
    assert!(matches!(garbage.error(), Some(PluginError::InvalidFormat { .. })));
    assert!(!host.manager.is_plugin_module("garbage").await);
    assert!(matches!(
        host.manager.enumerate_plugins("garbage").await,
        Err(PluginError::InvalidFormat { .. })
    ));

    let empty = host.manager.load("").await;
    assert!(matches!(empty.error(), Some(PluginError::InvalidArgument(_))));
}

#[tokio::test]
async fn test_invalid_module_fails_in_cache_without_verification() {
    let host = TestHost::without_verification();

    let report = host.manager.load("garbage").await;
    assert!(matches!(report.error(), Some(PluginError::InvalidFormat { .. })));
    assert!(host.manager.cache().is_empty());
}

#[tokio::test]
async fn test_unavailable_plugin_is_disabled() {
    let host = TestHost::new();

    let report = host.manager.load("unavailable").await;
    assert_eq!(report.rejection(), Some(RejectReason::Unavailable));
    assert_eq!(report.disabled, vec!["Gpu.Renderer"]);

    let disabled = host.manager.disabled_plugins().await;
    assert_eq!(disabled[0].reason, DisabledReason::Unavailable);
    assert_eq!(disabled[0].details, vec!["no GPU device found"]);
}

#[tokio::test]
async fn test_repeated_load_is_idempotent() {
    let host = TestHost::new();

    let first = host.manager.load("vendor_codecs").await;
    // Same module requested by explicit path.
    let path = host.module_path("vendor_codecs");
    let second = host.manager.load(path.to_str().unwrap()).await;

    assert!(first.newly_loaded);
    assert!(!second.newly_loaded);
    assert_eq!(first.registered(), second.registered());
    assert_eq!(host.manager.plugins().await.len(), 1);
    assert_eq!(host.manager.cache().load_count(), 1);
}

#[tokio::test]
async fn test_other_build_of_loaded_module_is_refused() {
    let host = TestHost::new();
    assert!(host.manager.load("vendor_codecs").await.is_registered());

    let rebuilt = tempfile::tempdir().unwrap();
    let rebuilt_path = rebuilt.path().join(helpers::library_file_name("vendor_codecs"));
    std::fs::write(&rebuilt_path, b"vendor_codecs v2").unwrap();

    let report = host.manager.load(rebuilt_path.to_str().unwrap()).await;
    match &report.state {
        LoadState::Failed {
            error: PluginError::ModuleConflict { cached_origin, incoming_origin, .. },
        } => {
            assert_eq!(cached_origin, &host.module_path("vendor_codecs"));
            assert_eq!(incoming_origin, &rebuilt_path);
        }
        other => panic!("expected a module conflict, got {other:?}"),
    }
    assert_eq!(host.manager.cache().load_count(), 1);
    assert_eq!(host.manager.plugins().await.len(), 1);

    // An identical copy elsewhere is the same module.
    let copy = tempfile::tempdir().unwrap();
    let copy_path = copy.path().join(helpers::library_file_name("vendor_codecs"));
    std::fs::copy(host.module_path("vendor_codecs"), &copy_path).unwrap();

    let report = host.manager.load(copy_path.to_str().unwrap()).await;
    assert_eq!(report.registered(), ["Vendor.PngCodec"]);
    assert!(!report.newly_loaded);
    assert_eq!(host.manager.cache().load_count(), 1);
}

#[tokio::test]
async fn test_unload_all_resets_everything() {
    let host = TestHost::new();

    host.manager.load("vendor_codecs").await;
    host.manager.load("mixed").await;
    assert_eq!(host.manager.cache().load_count(), 2);

    let summary = host.manager.unload_all().await;
    assert_eq!(summary.plugins, 3);
    assert_eq!(summary.modules, 2);
    assert!(host.manager.plugins().await.is_empty());
    assert!(host.manager.cache().is_empty());
    assert!(host.manager.disabled_plugins().await.is_empty());
    assert!(!host.manager.verification().is_active());

    let report = host.manager.load("vendor_codecs").await;
    assert!(report.newly_loaded);
    assert_eq!(host.manager.cache().load_count(), 3);
}

#[tokio::test]
async fn test_unload_single_plugin_keeps_module_cached() {
    let host = TestHost::new();
    host.manager.load("mixed").await;

    assert!(host.manager.unload("mixed.one").await);
    assert!(!host.manager.unload("mixed.one").await);
    assert!(host.manager.get("Mixed.Two").await.is_some());
    assert_eq!(host.manager.cache().len(), 1);

    // Reloading re-registers the missing plugin without a second module load.
    let report = host.manager.load("mixed").await;
    assert_eq!(report.registered(), ["Mixed.One", "Mixed.Two"]);
    assert_eq!(host.manager.cache().load_count(), 1);
}

#[tokio::test]
async fn test_verification_never_touches_module_cache() {
    let host = TestHost::new();

    assert!(host.manager.is_plugin_module("vendor_codecs").await);
    host.manager.enumerate_plugins("mixed").await.unwrap();
    host.manager.scan_directory(host.dir.path()).await.unwrap();

    assert!(host.manager.cache().is_empty());
    assert_eq!(host.manager.cache().load_count(), 0);
    assert!(host.loader.loads() > 0);
}

#[tokio::test]
async fn test_verification_survives_purge() {
    let host = TestHost::new();

    assert!(host.manager.is_plugin_module("vendor_codecs").await);
    host.manager.verification().purge();
    host.manager.verification().purge();
    assert!(host.manager.is_plugin_module("vendor_codecs").await);
    assert_eq!(host.manager.verification().sessions_created(), 2);
}

#[tokio::test]
async fn test_load_directory() {
    let host = TestHost::new();

    let reports = host.manager.load_directory(host.dir.path()).await.unwrap();
    // Every fixture module plus the garbage file; README.txt is skipped.
    assert_eq!(reports.len(), helpers::fixture_modules().len() + 1);

    let registered: usize = reports.iter().map(|r| r.registered().len()).sum();
    assert_eq!(registered, host.manager.plugins().await.len());
    assert!(host.manager.get("Vendor.PngCodec").await.is_some());
    assert!(host.manager.get("Foo").await.is_some());

    let failed = reports
        .iter()
        .filter(|r| matches!(r.state, LoadState::Failed { .. }))
        .count();
    assert_eq!(failed, 2, "garbage and all_broken fail");
}

#[tokio::test]
async fn test_load_directory_missing() {
    let host = TestHost::new();
    let missing = host.dir.path().join("nope");
    assert!(matches!(
        host.manager.load_directory(&missing).await,
        Err(PluginError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_scan_directory_reports_each_candidate() {
    let host = TestHost::new();

    let records = host.manager.scan_directory(host.dir.path()).await.unwrap();
    assert_eq!(records.len(), helpers::fixture_modules().len() + 1);

    let codecs = records
        .iter()
        .find(|r| r.path == host.module_path("vendor_codecs"))
        .unwrap();
    assert!(codecs.is_plugin_module);
    assert_eq!(codecs.plugin_types, vec!["Vendor.PngCodec"]);
    // Fixture files are not real binaries.
    assert!(codecs.format.is_none());

    let garbage = records
        .iter()
        .find(|r| r.path == host.module_path("garbage"))
        .unwrap();
    assert!(!garbage.is_plugin_module);
    assert!(garbage.problem.is_some());

    let abstract_only = records
        .iter()
        .find(|r| r.path == host.module_path("abstract_only"))
        .unwrap();
    assert_eq!(abstract_only.problem.as_deref(), Some("exports no plugin types"));
}

#[tokio::test]
async fn test_search_paths_can_be_extended() {
    let host = TestHost::new();
    let extra = tempfile::tempdir().unwrap();

    assert!(host.manager.add_search_path(extra.path()));
    assert!(!host.manager.add_search_path(host.dir.path()));
    assert_eq!(host.manager.search_directories().len(), 2);
}
