//! Configuration loading from TOML files and the environment.

mod support;

use std::io::Write;

use ibp_xyz::config::AppConfig;
use ibp_xyz::sap::{BackendType, TransportFactory};
use tempfile::NamedTempFile;

use support::with_scoped_env;

const SAMPLE: &str = r#"
[server]
port = 9100

[sap]
backend = "local"
planning_area = "SAPIBP1"
key_figure = "XYZSEGMENT"
enable_null_handling = true
timeout_secs = 45

[analysis]
x_threshold = 12.5

[write]
batch_size = 2000
"#;

fn sample_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(SAMPLE.as_bytes()).unwrap();
    file
}

#[test]
fn test_from_file_fills_defaults() {
    let file = sample_file();
    let config = AppConfig::from_file(file.path()).unwrap();

    assert_eq!(config.server.port, 9100);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.sap.backend_type().unwrap(), BackendType::Local);
    assert_eq!(config.sap.timeout().as_secs(), 45);
    assert!(config.sap.enable_null_handling);
    assert_eq!(config.analysis.x_threshold, 12.5);
    assert_eq!(config.analysis.y_threshold, 25.0);
    assert_eq!(config.write.batch_size, 2000);
    assert_eq!(config.write.max_workers, 4);
    assert_eq!(config.write.period_field, "PERIODID3_TSTAMP");
}

#[test]
fn test_from_file_rejects_invalid_toml() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"[sap\nbackend = ").unwrap();
    assert!(AppConfig::from_file(file.path()).is_err());
}

#[test]
fn test_environment_overrides_file() {
    let file = sample_file();
    let path = file.path().to_string_lossy().to_string();
    let config = with_scoped_env(
        &[
            ("IBP_CONFIG", Some(path.as_str())),
            ("DEFAULT_BATCH_SIZE", Some("750")),
            ("SAP_XYZ_KEY_FIGURE", Some("XYZSEG2")),
            ("PORT", None),
        ],
        AppConfig::load,
    )
    .unwrap();

    assert_eq!(config.write.batch_size, 750);
    assert_eq!(config.sap.key_figure.as_deref(), Some("XYZSEG2"));
    assert_eq!(config.sap.planning_area.as_deref(), Some("SAPIBP1"));
    assert_eq!(config.server.port, 9100);
}

#[test]
fn test_invalid_numeric_variable_is_an_error() {
    let result = with_scoped_env(&[("SAP_TIMEOUT", Some("soon"))], AppConfig::from_env);
    assert!(result.is_err());
}

#[test]
fn test_validation_for_local_backend() {
    let file = sample_file();
    let config = AppConfig::from_file(file.path()).unwrap();
    let validation = config.validate_write_settings();

    assert_eq!(validation.status, "valid");
    assert!(validation.missing.is_empty());
    assert!(validation.null_handling_enabled);
}

#[test]
fn test_validation_for_incomplete_odata_backend() {
    let validation = AppConfig::default().validate_write_settings();
    assert_eq!(validation.status, "incomplete");
    assert!(validation.missing.contains(&"SAP_PASSWORD".to_string()));
}

#[test]
fn test_local_transport_from_seed_file() {
    let mut seed = NamedTempFile::new().unwrap();
    seed.write_all(
        br#"[
            {"dimensions": {"PRDID": "A", "LOCID": "1720"}, "period": "2024-01-01", "quantity": 5.0},
            {"dimensions": {"PRDID": "B", "LOCID": null}, "quantity": 7.0}
        ]"#,
    )
    .unwrap();

    let mut config = AppConfig::default();
    config.sap.backend = "local".to_string();
    config.sap.local_data = Some(seed.path().to_path_buf());

    assert!(TransportFactory::from_settings(&config.sap).is_ok());
}
