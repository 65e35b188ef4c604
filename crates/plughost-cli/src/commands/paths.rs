//! Show the module search directories.

use serde::Serialize;
use tabled::Tabled;

use crate::output::{self, OutputFormat};
use plughost_core::error::AppError;

#[derive(Debug, Serialize, Tabled)]
struct PathRow {
    #[tabled(rename = "#")]
    order: usize,
    #[tabled(rename = "Directory")]
    directory: String,
}

/// Execute `paths`
pub async fn execute(config_path: &str, format: OutputFormat) -> Result<(), AppError> {
    let manager = super::create_manager(config_path)?;
    let rows: Vec<PathRow> = manager
        .search_directories()
        .iter()
        .enumerate()
        .map(|(index, dir)| PathRow {
            order: index + 1,
            directory: dir.display().to_string(),
        })
        .collect();

    output::print_list(&rows, format);
    Ok(())
}
