//! Configuration loading and setting resolution
//!
//! Settings are resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "DCMI_CONFIG";

/// Environment variable overriding the classification worker count
pub const WORKERS_ENV_VAR: &str = "DCMI_WORKERS";

/// Environment variable overriding the index directory
pub const INDEX_DIR_ENV_VAR: &str = "DCMI_INDEX_DIR";

/// Default name of the index directory created inside the crawl root
pub const DEFAULT_INDEX_DIR_NAME: &str = ".dcmi";

/// Complete TOML configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// File discovery and classification settings
    #[serde(default)]
    pub crawl: CrawlSettings,

    /// Persisted index location
    #[serde(default)]
    pub index: IndexSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[crawl]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlSettings {
    /// Classification worker count (None = available cores)
    pub workers: Option<usize>,

    /// File extensions to consider. An empty string matches files without
    /// an extension; an empty list accepts every file.
    pub extensions: Vec<String>,

    /// Require the `DICM` magic at byte offset 128
    pub check_header: bool,

    /// File or directory names skipped during traversal
    pub ignore_patterns: Vec<String>,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            workers: None,
            extensions: vec!["dcm".to_string()],
            check_header: false,
            ignore_patterns: vec![
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                ".git".to_string(),
                DEFAULT_INDEX_DIR_NAME.to_string(),
            ],
        }
    }
}

/// `[index]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    /// Directory holding persisted indexes (None = `<crawl root>/.dcmi`)
    pub dir: Option<PathBuf>,

    /// Dataset name used as the index sub-directory (None = crawl root name)
    pub dataset_name: Option<String>,
}

/// `[logging]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Load and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Write a TOML config file atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

/// Locate the config file to use, if any
///
/// Priority: CLI argument → `DCMI_CONFIG` → `<config dir>/dcmi/config.toml`.
/// An explicitly named file that does not exist is an error; a missing
/// platform default is not.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = cli_arg {
        return existing(path.to_path_buf()).map(Some);
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return existing(PathBuf::from(path)).map(Some);
        }
    }

    Ok(default_config_path().filter(|p| p.exists()))
}

/// Load the resolved config file, or defaults when none is present
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    match resolve_config_path(cli_arg)? {
        Some(path) => {
            info!("Loading config from {}", path.display());
            load_toml_config(&path)
        }
        None => {
            debug!("No config file found, using defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Platform config file location (`~/.config/dcmi/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("dcmi").join("config.toml"))
}

fn existing(path: PathBuf) -> Result<PathBuf> {
    if path.exists() {
        Ok(path)
    } else {
        Err(Error::Config(format!("Config file not found: {:?}", path)))
    }
}

/// Resolve one setting: CLI → environment → TOML → default
///
/// Unparseable environment values are ignored with a warning.
pub fn resolve_setting<T>(
    name: &str,
    cli_arg: Option<T>,
    env_var_name: &str,
    toml_value: Option<T>,
    default: T,
) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    if let Some(value) = cli_arg {
        debug!("{} = {} (command line)", name, value);
        return value;
    }

    if let Ok(raw) = std::env::var(env_var_name) {
        match raw.trim().parse::<T>() {
            Ok(value) => {
                debug!("{} = {} (environment {})", name, value, env_var_name);
                return value;
            }
            Err(e) => {
                warn!("Ignoring {}={:?}: {}", env_var_name, raw, e);
            }
        }
    }

    if let Some(value) = toml_value {
        debug!("{} = {} (TOML)", name, value);
        return value;
    }

    debug!("{} = {} (default)", name, default);
    default
}

/// Resolve the index directory for a crawl root
pub fn resolve_index_dir(cli_arg: Option<&Path>, settings: &IndexSettings, crawl_root: &Path) -> PathBuf {
    let default = crawl_root.join(DEFAULT_INDEX_DIR_NAME);
    let resolved = resolve_setting(
        "index_dir",
        cli_arg.map(|p| p.display().to_string()),
        INDEX_DIR_ENV_VAR,
        settings.dir.as_ref().map(|p| p.display().to_string()),
        default.display().to_string(),
    );
    PathBuf::from(resolved)
}

/// Resolve the dataset name: explicit value, else the crawl root's final component
pub fn resolve_dataset_name(cli_arg: Option<&str>, settings: &IndexSettings, crawl_root: &Path) -> String {
    cli_arg
        .map(str::to_string)
        .or_else(|| settings.dataset_name.clone())
        .or_else(|| {
            crawl_root
                .canonicalize()
                .ok()
                .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        })
        .unwrap_or_else(|| "dataset".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_crawl_settings() {
        let settings = CrawlSettings::default();
        assert_eq!(settings.extensions, vec!["dcm".to_string()]);
        assert!(!settings.check_header);
        assert!(settings.ignore_patterns.contains(&".dcmi".to_string()));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: TomlConfig = toml::from_str("[crawl]\nworkers = 3\n").unwrap();
        assert_eq!(config.crawl.workers, Some(3));
        assert_eq!(config.crawl.extensions, vec!["dcm".to_string()]);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.index, IndexSettings::default());
    }

    #[test]
    fn test_dataset_name_explicit_wins() {
        let settings = IndexSettings {
            dir: None,
            dataset_name: Some("from_toml".to_string()),
        };
        let name = resolve_dataset_name(Some("cli"), &settings, Path::new("/nonexistent"));
        assert_eq!(name, "cli");
        let name = resolve_dataset_name(None, &settings, Path::new("/nonexistent"));
        assert_eq!(name, "from_toml");
    }

    #[test]
    fn test_dataset_name_fallback() {
        let name = resolve_dataset_name(None, &IndexSettings::default(), Path::new("/nonexistent/x"));
        assert_eq!(name, "dataset");
    }
}
