//! Load modules into a one-shot host and report what registered.

use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use crate::output::{self, OutputFormat};
use plughost_core::error::AppError;
use plughost_plugin::LoadReport;
use plughost_plugin::instance::PluginSummary;
use plughost_plugin::report::DisabledPlugin;

/// Arguments for `load`
#[derive(Debug, Args)]
pub struct LoadArgs {
    /// Module paths or logical names
    #[arg(required = true)]
    pub modules: Vec<String>,
}

#[derive(Debug, Serialize, Tabled)]
struct ReportRow {
    #[tabled(rename = "Request")]
    request: String,
    #[tabled(rename = "Module")]
    module: String,
    #[tabled(rename = "Result")]
    result: String,
    #[tabled(rename = "Problems")]
    problems: usize,
}

impl From<&LoadReport> for ReportRow {
    fn from(report: &LoadReport) -> Self {
        Self {
            request: report.request.clone(),
            module: report
                .identity
                .as_ref()
                .map_or_else(|| "-".to_string(), ToString::to_string),
            result: report.summary(),
            problems: report.failures.len(),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct PluginRow {
    #[tabled(rename = "Plugin")]
    name: String,
    #[tabled(rename = "Module")]
    module: String,
    #[tabled(rename = "Description")]
    description: String,
}

impl From<PluginSummary> for PluginRow {
    fn from(summary: PluginSummary) -> Self {
        Self {
            name: summary.name,
            module: summary.module,
            description: summary.description.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct LoadOutput {
    reports: Vec<LoadReport>,
    plugins: Vec<PluginSummary>,
    disabled: Vec<DisabledPlugin>,
}

/// Execute `load`
pub async fn execute(args: &LoadArgs, config_path: &str, format: OutputFormat) -> Result<(), AppError> {
    let manager = super::create_manager(config_path)?;

    let mut reports = Vec::with_capacity(args.modules.len());
    for module in &args.modules {
        reports.push(manager.load(module).await);
    }

    let plugins: Vec<PluginSummary> = manager.plugins().await.iter().map(PluginSummary::from).collect();
    let disabled = manager.disabled_plugins().await;

    match format {
        OutputFormat::Json => output::print_item(
            &LoadOutput {
                reports,
                plugins,
                disabled,
            },
            format,
        ),
        OutputFormat::Table => {
            let rows: Vec<ReportRow> = reports.iter().map(ReportRow::from).collect();
            output::print_list(&rows, format);

            for report in &reports {
                for failure in &report.failures {
                    output::print_warning(&format!("{}: {failure}", report.request));
                }
            }
            for plugin in &disabled {
                output::print_warning(&format!(
                    "{} disabled ({:?}): {}",
                    plugin.name,
                    plugin.reason,
                    plugin.details.join("; ")
                ));
            }

            println!();
            let rows: Vec<PluginRow> = plugins.into_iter().map(PluginRow::from).collect();
            output::print_list(&rows, format);
        }
    }

    manager.unload_all().await;
    Ok(())
}
