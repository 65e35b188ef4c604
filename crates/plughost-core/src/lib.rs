//! # plughost-core
//!
//! Core crate for PlugHost. Contains the configuration schemas and the
//! unified error system shared by the plugin subsystem, the CLI and the
//! host binary.
//!
//! This crate has **no** internal dependencies on other PlugHost crates.

pub mod config;
pub mod error;
pub mod result;

pub use error::AppError;
pub use result::AppResult;
