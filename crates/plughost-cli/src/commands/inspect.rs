//! Read-only inspection of a single module.

use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use crate::output::{self, OutputFormat};
use plughost_core::error::AppError;

/// Arguments for `verify`
#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Module path or logical name
    pub module: String,
}

/// Arguments for `list`
#[derive(Debug, Args)]
pub struct ListArgs {
    /// Module path or logical name
    pub module: String,
}

#[derive(Debug, Serialize)]
struct Verdict<'a> {
    module: &'a str,
    is_plugin_module: bool,
}

#[derive(Debug, Serialize, Tabled)]
struct TypeRow {
    #[tabled(rename = "Plugin Type")]
    name: String,
}

/// Execute `verify`
pub async fn verify(args: &VerifyArgs, config_path: &str, format: OutputFormat) -> Result<(), AppError> {
    let manager = super::create_manager(config_path)?;
    let is_plugin_module = manager.is_plugin_module(&args.module).await;

    match format {
        OutputFormat::Json => output::print_item(
            &Verdict {
                module: &args.module,
                is_plugin_module,
            },
            format,
        ),
        OutputFormat::Table if is_plugin_module => {
            output::print_success(&format!("'{}' is a plugin module", args.module));
        }
        OutputFormat::Table => {
            output::print_warning(&format!("'{}' is not a plugin module", args.module));
        }
    }
    Ok(())
}

/// Execute `list`
pub async fn list(args: &ListArgs, config_path: &str, format: OutputFormat) -> Result<(), AppError> {
    let manager = super::create_manager(config_path)?;
    let rows: Vec<TypeRow> = manager
        .enumerate_plugins(&args.module)
        .await?
        .into_iter()
        .map(|name| TypeRow { name })
        .collect();

    output::print_list(&rows, format);
    Ok(())
}
