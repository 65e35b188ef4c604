//! CLI command definitions and dispatch.

pub mod config;
pub mod inspect;
pub mod load;
pub mod paths;
pub mod probe;
pub mod scan;

use clap::{Parser, Subcommand};

use crate::output::OutputFormat;
use plughost_core::config::AppConfig;
use plughost_core::error::AppError;
use plughost_plugin::PluginManager;

/// PlugHost: discover, verify and load plugin modules
#[derive(Debug, Parser)]
#[command(name = "plughost-cli", version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default")]
    pub config: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Check whether a module exports plugin types, without loading it
    Verify(inspect::VerifyArgs),
    /// List the plugin types a module exports, without instantiating them
    List(inspect::ListArgs),
    /// Load modules and show the plugins they register
    Load(load::LoadArgs),
    /// Verify every candidate module in a directory
    Scan(scan::ScanArgs),
    /// Show the module search directories
    Paths,
    /// Configuration management
    Config(config::ConfigArgs),
    /// Probe one module and print its report as JSON (used by subprocess
    /// verification)
    #[command(hide = true)]
    Probe(probe::ProbeArgs),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self) -> Result<(), AppError> {
        match &self.command {
            Commands::Verify(args) => inspect::verify(args, &self.config, self.format).await,
            Commands::List(args) => inspect::list(args, &self.config, self.format).await,
            Commands::Load(args) => load::execute(args, &self.config, self.format).await,
            Commands::Scan(args) => scan::execute(args, &self.config, self.format).await,
            Commands::Paths => paths::execute(&self.config, self.format).await,
            Commands::Config(args) => config::execute(args, &self.config, self.format).await,
            Commands::Probe(args) => probe::execute(args).await,
        }
    }
}

/// Helper: load configuration from file
pub fn load_config(config_path: &str) -> Result<AppConfig, AppError> {
    AppConfig::load(config_path)
}

/// Helper: build a plugin manager from the configuration file
pub fn create_manager(config_path: &str) -> Result<PluginManager, AppError> {
    let config = load_config(config_path)?;
    Ok(PluginManager::from_config(&config)?)
}
