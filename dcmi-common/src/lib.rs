//! # DCMI Common Library
//!
//! Shared code for the dcmi crawler and its command-line front end:
//! - Error and result types
//! - TOML configuration loading, resolution and atomic write-back

pub mod config;
pub mod error;

pub use config::{CrawlSettings, IndexSettings, LoggingConfig, TomlConfig};
pub use error::{Error, Result};
