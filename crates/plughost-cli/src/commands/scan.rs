//! Verify every candidate module in a directory.

use std::path::PathBuf;

use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use crate::output::{self, OutputFormat};
use plughost_core::error::AppError;
use plughost_plugin::report::ModuleRecord;

/// Arguments for `scan`
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Directory to scan; defaults to the configured plugin directory
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Serialize, Tabled)]
struct RecordRow {
    #[tabled(rename = "File")]
    file: String,
    #[tabled(rename = "Format")]
    format: String,
    #[tabled(rename = "Plugin")]
    plugin: String,
    #[tabled(rename = "Types / Problem")]
    detail: String,
}

impl From<&ModuleRecord> for RecordRow {
    fn from(record: &ModuleRecord) -> Self {
        let file = record
            .path
            .file_name()
            .map_or_else(|| record.path.display().to_string(), |name| name.to_string_lossy().into_owned());
        let detail = match &record.problem {
            Some(problem) => problem.clone(),
            None => output::join_or_dash(&record.plugin_types),
        };

        Self {
            file,
            format: record
                .format
                .as_ref()
                .map_or_else(|| "-".to_string(), ToString::to_string),
            plugin: if record.is_plugin_module { "yes" } else { "no" }.to_string(),
            detail,
        }
    }
}

/// Execute `scan`
pub async fn execute(args: &ScanArgs, config_path: &str, format: OutputFormat) -> Result<(), AppError> {
    let config = super::load_config(config_path)?;
    let directory = args
        .directory
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.plugins.directory));

    let manager = plughost_plugin::PluginManager::from_config(&config)?;
    let records = manager.scan_directory(&directory).await?;

    match format {
        OutputFormat::Json => output::print_item(&records, format),
        OutputFormat::Table => {
            let rows: Vec<RecordRow> = records.iter().map(RecordRow::from).collect();
            output::print_list(&rows, format);
            let plugins = records.iter().filter(|r| r.is_plugin_module).count();
            output::print_kv("Plugin modules", &format!("{plugins} of {}", records.len()));
        }
    }
    Ok(())
}
