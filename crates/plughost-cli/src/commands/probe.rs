//! Out-of-process probe helper.
//!
//! Loads one module into this short-lived process, prints its
//! [`ProbeReport`](plughost_plugin::verification::ProbeReport) as a JSON
//! line and exits. The host reads the report and discards the process
//! together with everything it loaded.

use std::path::PathBuf;

use clap::Args;

use crate::output;
use plughost_core::error::AppError;
use plughost_plugin::loader::NativeModuleLoader;
use plughost_plugin::verification::ProbeError;
use plughost_plugin::verification::scratch::probe_path;
use plughost_plugin::verification::subprocess::EXIT_NOT_LOADABLE;

/// Arguments for `probe`
#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Module file to probe
    pub path: PathBuf,
}

/// Execute `probe`
pub async fn execute(args: &ProbeArgs) -> Result<(), AppError> {
    let path = args.path.clone();
    let result = tokio::task::spawn_blocking(move || {
        probe_path(&NativeModuleLoader::scratch(), &path)
    })
    .await
    .map_err(|e| AppError::internal(format!("probe task failed: {e}")))?;

    match result {
        Ok(report) => {
            output::print_json_line(&report);
            Ok(())
        }
        Err(ProbeError::NotLoadable(reason)) => {
            eprintln!("{reason}");
            std::process::exit(EXIT_NOT_LOADABLE);
        }
        Err(ProbeError::Isolation(reason)) => Err(AppError::plugin(reason)),
    }
}
