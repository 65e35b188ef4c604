//! PlugHost: a host process for natively loaded plugin modules.
//!
//! Loads configuration, discovers and loads the plugin directory, then
//! keeps the plugins registered until interrupted.

use std::path::Path;

use tracing_subscriber::{EnvFilter, fmt};

use plughost_core::config::AppConfig;
use plughost_core::error::AppError;
use plughost_plugin::instance::PluginSummary;
use plughost_plugin::{LoadState, PluginManager};

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Host error: {e}");
        std::process::exit(1);
    }
}

/// Load configuration from file and environment
fn load_configuration() -> Result<AppConfig, AppError> {
    let config_path =
        std::env::var("PLUGHOST_CONFIG").unwrap_or_else(|_| "config/default".to_string());
    AppConfig::load(&config_path)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting PlugHost v{}", env!("CARGO_PKG_VERSION"));

    let manager = PluginManager::from_config(&config)?;

    if config.plugins.auto_load {
        load_plugin_directory(&manager, Path::new(&config.plugins.directory)).await;
    }

    let plugins = manager.plugins().await;
    for plugin in plugins.iter().map(PluginSummary::from) {
        tracing::info!(
            plugin = %plugin.name,
            module = %plugin.module,
            disposable = plugin.disposable,
            "Plugin ready"
        );
    }
    for disabled in manager.disabled_plugins().await {
        tracing::warn!(
            plugin = %disabled.name,
            module = %disabled.module,
            reason = ?disabled.reason,
            details = ?disabled.details,
            "Plugin disabled"
        );
    }
    tracing::info!(plugins = plugins.len(), "PlugHost ready, press Ctrl+C to stop");
    drop(plugins);

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| AppError::internal(format!("Failed to listen for shutdown signal: {e}")))?;

    tracing::info!("Shutdown signal received");
    let summary = manager.unload_all().await;
    tracing::info!(
        plugins = summary.plugins,
        modules = summary.modules,
        "PlugHost stopped"
    );
    Ok(())
}

/// Loads every module in `dir`. A missing directory is not fatal.
async fn load_plugin_directory(manager: &PluginManager, dir: &Path) {
    let reports = match manager.load_directory(dir).await {
        Ok(reports) => reports,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Plugin directory not loaded");
            return;
        }
    };

    for report in &reports {
        match &report.state {
            LoadState::Registered { .. } => {
                tracing::info!(request = %report.request, "{}", report.summary());
            }
            LoadState::Rejected { .. } => {
                tracing::debug!(request = %report.request, "{}", report.summary());
            }
            LoadState::Failed { .. } => {
                tracing::warn!(request = %report.request, "{}", report.summary());
            }
        }
        for failure in &report.failures {
            tracing::warn!(request = %report.request, "{failure}");
        }
    }
}
