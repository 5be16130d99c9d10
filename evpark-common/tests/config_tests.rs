//! Configuration loading, validation, and root folder resolution
//!
//! Tests that touch EVPARK_* environment variables are marked #[serial].

use std::env;
use std::path::{Path, PathBuf};

use evpark_common::config::{Config, CONFIG_ENV_VAR, ROOT_FOLDER_ENV_VAR};
use serial_test::serial;

#[test]
fn test_defaults_are_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.anpr.plate_window_size, 10);
    assert_eq!(config.anpr.plate_count_threshold, 5);
    assert_eq!(config.anpr.reconnect_delay_secs, 5);
    assert_eq!(config.classifier.target_size, [320, 180]);
    assert!((config.classifier.confidence_threshold - 0.45).abs() < f32::EPSILON);
    assert!(config.classifier.required_resolution.is_none());
    assert_eq!(config.reconciler.auto_exit_minutes, 30);
    assert_eq!(config.reconciler.misrecognized_dir_cap, 10_000);
    assert_eq!(config.vendor.disallowed_locations, vec!["타워".to_string()]);
}

#[test]
fn test_partial_toml_keeps_defaults() {
    let config = Config::from_toml_str(
        r#"
        root_folder = "/srv/evpark"

        [anpr]
        plate_window_size = 8
        plate_count_threshold = 4

        [[cameras]]
        name = "gate-1"
        snapshot_url = "http://10.0.0.5/snapshot.jpg"
        roi = [0.2, 0.9, 0.1, 0.8]

        [vendor]
        location_url = "http://vendor.example/api/location"
        lot_area_no = 30
        "#,
    )
    .unwrap();

    assert_eq!(config.root_folder, Some(PathBuf::from("/srv/evpark")));
    assert_eq!(config.anpr.plate_window_size, 8);
    assert_eq!(config.anpr.evidence_writers, 4);
    assert_eq!(config.cameras.len(), 1);
    assert_eq!(config.cameras[0].frame_interval_ms, 200);
    assert_eq!(config.cameras[0].roi, Some([0.2, 0.9, 0.1, 0.8]));
    assert_eq!(config.vendor.lot_area_no, 30);
    assert_eq!(config.vendor.timeout_secs, 10);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_threshold_above_window_is_rejected() {
    let err = Config::from_toml_str(
        r#"
        [anpr]
        plate_window_size = 3
        plate_count_threshold = 5
        "#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("plate_count_threshold"));
}

#[test]
fn test_inverted_roi_is_rejected() {
    let result = Config::from_toml_str(
        r#"
        [[cameras]]
        name = "gate-1"
        snapshot_url = "http://10.0.0.5/snapshot.jpg"
        roi = [0.9, 0.2, 0.1, 0.8]
        "#,
    );
    assert!(result.is_err());
}

#[test]
fn test_malformed_toml_is_config_error() {
    let result = Config::from_toml_str("[anpr\nplate_window_size = ");
    assert!(matches!(result, Err(evpark_common::Error::Config(_))));
}

#[test]
fn test_relative_paths_resolve_under_root() {
    let config = Config::default();
    let root = Path::new("/srv/evpark");
    let layout = config.evidence_layout(root);
    assert_eq!(layout.pending, PathBuf::from("/srv/evpark/anpr_img/TEMP"));
    assert_eq!(layout.misrecognized, PathBuf::from("/srv/evpark/anpr_img/MISRECOG"));
    assert_eq!(config.database_path(root), PathBuf::from("/srv/evpark/evpark.db"));
}

#[test]
#[serial]
fn test_root_folder_priority() {
    env::remove_var(ROOT_FOLDER_ENV_VAR);
    let mut config = Config::default();
    config.root_folder = Some(PathBuf::from("/from/toml"));

    assert_eq!(
        config.resolve_root_folder(Some(Path::new("/from/cli"))),
        PathBuf::from("/from/cli")
    );

    env::set_var(ROOT_FOLDER_ENV_VAR, "/from/env");
    assert_eq!(config.resolve_root_folder(None), PathBuf::from("/from/env"));
    env::remove_var(ROOT_FOLDER_ENV_VAR);

    assert_eq!(config.resolve_root_folder(None), PathBuf::from("/from/toml"));

    config.root_folder = None;
    assert!(!config.resolve_root_folder(None).as_os_str().is_empty());
}

#[test]
#[serial]
fn test_env_config_file_is_loaded() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("evpark.toml");
    std::fs::write(&path, "[server]\nport = 6123\n").unwrap();

    env::set_var(CONFIG_ENV_VAR, &path);
    let config = Config::locate_and_load(None);
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(config.unwrap().server.port, 6123);
}

#[test]
#[serial]
fn test_missing_explicit_config_is_an_error() {
    env::remove_var(CONFIG_ENV_VAR);
    let result = Config::locate_and_load(Some(Path::new("/nonexistent/evpark.toml")));
    assert!(result.is_err());
}
