//! Integration tests for configuration loading and resolution
//!
//! Tests touching process environment variables run serially.

use dcmi_common::config::{
    load_config, load_toml_config, resolve_config_path, resolve_index_dir, resolve_setting,
    write_toml_config, CONFIG_ENV_VAR, INDEX_DIR_ENV_VAR, WORKERS_ENV_VAR,
};
use dcmi_common::{CrawlSettings, IndexSettings, LoggingConfig, TomlConfig};
use serial_test::serial;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn sample_config() -> TomlConfig {
    TomlConfig {
        crawl: CrawlSettings {
            workers: Some(4),
            extensions: vec!["dcm".to_string(), "".to_string()],
            check_header: true,
            ignore_patterns: vec![".git".to_string()],
        },
        index: IndexSettings {
            dir: Some(PathBuf::from("/data/indexes")),
            dataset_name: Some("HNSCC".to_string()),
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
        },
    }
}

#[test]
fn test_write_then_load_preserves_all_fields() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("nested").join("config.toml");

    let config = sample_config();
    write_toml_config(&config, &target).unwrap();

    assert!(target.exists());
    assert!(!temp_dir.path().join("nested").join("config.toml.tmp").exists());

    let loaded = load_toml_config(&target).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_load_invalid_toml_is_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("broken.toml");
    std::fs::write(&target, "[crawl\nworkers = ").unwrap();

    let err = load_toml_config(&target).unwrap_err();
    assert!(err.to_string().contains("Parse"));
}

#[test]
#[serial]
fn test_explicit_missing_config_is_error() {
    std::env::remove_var(CONFIG_ENV_VAR);
    let result = resolve_config_path(Some(Path::new("/nonexistent/dcmi.toml")));
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_env_config_path_used_when_no_cli_arg() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("env.toml");
    write_toml_config(&sample_config(), &target).unwrap();

    std::env::set_var(CONFIG_ENV_VAR, &target);
    let resolved = resolve_config_path(None).unwrap();
    let loaded = load_config(None).unwrap();
    std::env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(resolved, Some(target));
    assert_eq!(loaded.crawl.workers, Some(4));
}

#[test]
#[serial]
fn test_setting_priority_order() {
    std::env::remove_var(WORKERS_ENV_VAR);
    assert_eq!(resolve_setting("workers", Some(2usize), WORKERS_ENV_VAR, Some(3), 8), 2);
    assert_eq!(resolve_setting("workers", None, WORKERS_ENV_VAR, Some(3usize), 8), 3);
    assert_eq!(resolve_setting::<usize>("workers", None, WORKERS_ENV_VAR, None, 8), 8);

    std::env::set_var(WORKERS_ENV_VAR, "5");
    assert_eq!(resolve_setting("workers", None, WORKERS_ENV_VAR, Some(3usize), 8), 5);
    assert_eq!(resolve_setting("workers", Some(2usize), WORKERS_ENV_VAR, Some(3), 8), 2);

    std::env::set_var(WORKERS_ENV_VAR, "many");
    assert_eq!(resolve_setting("workers", None, WORKERS_ENV_VAR, Some(3usize), 8), 3);
    std::env::remove_var(WORKERS_ENV_VAR);
}

#[test]
#[serial]
fn test_index_dir_defaults_inside_crawl_root() {
    std::env::remove_var(INDEX_DIR_ENV_VAR);
    let root = Path::new("/data/scans");
    let dir = resolve_index_dir(None, &IndexSettings::default(), root);
    assert_eq!(dir, root.join(".dcmi"));

    let settings = IndexSettings {
        dir: Some(PathBuf::from("/var/cache/dcmi")),
        dataset_name: None,
    };
    assert_eq!(resolve_index_dir(None, &settings, root), PathBuf::from("/var/cache/dcmi"));
    assert_eq!(
        resolve_index_dir(Some(Path::new("/tmp/idx")), &settings, root),
        PathBuf::from("/tmp/idx")
    );
}
