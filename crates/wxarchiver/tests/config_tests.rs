//! Config files combined with `ARCHIVER_*` environment overrides.
//!
//! These tests mutate the process environment and therefore run serially.

use std::path::{Path, PathBuf};

use assert_fs::prelude::*;
use assert_fs::TempDir;
use serial_test::serial;

use wxarchiver::config::{load_config, resolve_config_path};
use wxarchiver::error::ConfigError;

/// Sets environment variables for the life of the guard.
struct EnvGuard {
    keys: Vec<&'static str>,
}

impl EnvGuard {
    fn set(vars: &[(&'static str, &str)]) -> Self {
        for (key, value) in vars {
            std::env::set_var(key, value);
        }
        Self {
            keys: vars.iter().map(|(key, _)| *key).collect(),
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for key in &self.keys {
            std::env::remove_var(key);
        }
    }
}

const CONFIG_YAML: &str = r#"
archive:
  output_dir: /data/archive
  retention_days: 14
schedule:
  interval_minutes: 10
source:
  api_key: partner-key
airports:
  selected: [kspb, " kawo "]
"#;

#[test]
#[serial]
fn test_file_then_env_overrides() {
    let temp = TempDir::new().unwrap();
    let file = temp.child("config.yaml");
    file.write_str(CONFIG_YAML).unwrap();
    let _env = EnvGuard::set(&[
        ("ARCHIVER_SCHEDULE_INTERVAL_MINUTES", "5"),
        ("ARCHIVER_SOURCE_USE_HISTORY_API", "no"),
        ("ARCHIVER_ARCHIVE_RETENTION_MAX_GB", "2.5"),
    ]);

    let config = load_config(file.path()).unwrap();

    assert_eq!(config.archive.output_dir, "/data/archive");
    assert_eq!(config.archive.retention_days, 14);
    assert_eq!(config.schedule.interval_minutes, 5);
    assert!(!config.source.use_history_api);
    assert_eq!(config.archive.retention_max_gb, 2.5);
    assert_eq!(config.source.api_key, "partner-key");
    assert_eq!(config.airports.selected, vec!["KSPB", "KAWO"]);
}

#[test]
#[serial]
fn test_missing_file_uses_defaults_and_env() {
    let temp = TempDir::new().unwrap();
    let _env = EnvGuard::set(&[
        ("ARCHIVER_AIRPORTS_SELECTED", "kspb, kawo,"),
        ("ARCHIVER_ARCHIVE_OUTPUT_DIR", "/mnt/wx"),
    ]);

    let config = load_config(temp.path().join("absent.yaml")).unwrap();

    assert_eq!(config.airports.selected, vec!["KSPB", "KAWO"]);
    assert_eq!(config.archive.output_dir, "/mnt/wx");
    assert_eq!(config.schedule.interval_minutes, 15);
}

#[test]
#[serial]
fn test_unparseable_env_value_is_ignored() {
    let temp = TempDir::new().unwrap();
    let file = temp.child("config.yaml");
    file.write_str(CONFIG_YAML).unwrap();
    let _env = EnvGuard::set(&[("ARCHIVER_SCHEDULE_INTERVAL_MINUTES", "soon")]);

    let config = load_config(file.path()).unwrap();

    assert_eq!(config.schedule.interval_minutes, 10);
}

#[test]
#[serial]
fn test_env_can_make_config_invalid() {
    let temp = TempDir::new().unwrap();
    let file = temp.child("config.yaml");
    file.write_str(CONFIG_YAML).unwrap();
    let _env = EnvGuard::set(&[
        ("ARCHIVER_SCHEDULE_INTERVAL_MINUTES", "0"),
        ("ARCHIVER_ARCHIVE_OUTPUT_DIR", "/"),
    ]);

    match load_config(file.path()) {
        Err(ConfigError::Validation { message }) => {
            assert!(message.contains("interval_minutes"), "{}", message);
            assert!(message.contains("output_dir"), "{}", message);
        }
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[test]
#[serial]
fn test_malformed_yaml_is_an_error() {
    let temp = TempDir::new().unwrap();
    let file = temp.child("config.yaml");
    file.write_str("archive: [unclosed").unwrap();

    assert!(matches!(
        load_config(file.path()),
        Err(ConfigError::ParseYaml(_))
    ));
}

#[test]
#[serial]
fn test_config_path_resolution() {
    let explicit = Path::new("/etc/wx.yaml");
    assert_eq!(resolve_config_path(Some(explicit)), PathBuf::from("/etc/wx.yaml"));

    {
        let _env = EnvGuard::set(&[("ARCHIVER_CONFIG", "/srv/archiver.yaml")]);
        assert_eq!(resolve_config_path(None), PathBuf::from("/srv/archiver.yaml"));
        assert_eq!(resolve_config_path(Some(explicit)), PathBuf::from("/etc/wx.yaml"));
    }

    assert_eq!(
        resolve_config_path(None),
        PathBuf::from("/config/config.yaml")
    );
}
