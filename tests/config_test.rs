//! Configuration loading: file layering, environment overrides, validation.

use std::io::Write;
use std::time::Duration;

use piezo_driver_mock::{MockMode, ResponseCurve};
use piezo_stage::config::StageConfig;
use piezo_stage::logging::OutputFormat;
use serial_test::serial;
use tempfile::{tempdir, NamedTempFile};

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_shipped_config_loads_and_validates() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/piezo_stage.toml");
    let config = StageConfig::load_from(path).unwrap();
    config.validate().unwrap();

    assert_eq!(config.controller.serial, "81858318");
    assert_eq!(config.controller.reader_serial.as_deref(), Some("84858066"));
    assert_eq!(config.monitor.interval(), Duration::from_millis(100));
    assert_eq!(config.simulation.mode, MockMode::Instant);
    assert_eq!(config.simulation.response_curve, ResponseCurve::linear(20.0));
}

#[test]
#[serial]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempdir().unwrap();
    let config = StageConfig::load_from(dir.path().join("absent.toml")).unwrap();
    config.validate().unwrap();

    assert_eq!(config.application.log_level, "info");
    assert_eq!(config.controller.tuning.max_output_voltage, 75.0);
    assert_eq!(config.monitor.interval_ms, 100);
}

#[test]
#[serial]
fn test_partial_file_keeps_other_defaults() {
    let file = write_config(
        r#"
        [application]
        log_format = "json"

        [controller]
        serial = "81000001"

        [controller.tuning]
        max_output_voltage = 100.0

        [simulation]
        piezos = ["81000001"]
        response_curve = [[10.0, 5.0], [70.0, 25.0]]
        "#,
    );
    let config = StageConfig::load_from(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.application.log_format, OutputFormat::Json);
    assert_eq!(config.application.log_level, "info");
    assert_eq!(config.controller.serial, "81000001");
    assert_eq!(config.controller.reader_serial.as_deref(), Some("84858066"));
    assert_eq!(config.controller.tuning.max_output_voltage, 100.0);
    assert_eq!(config.controller.tuning.voltage_step, 1.0);
    assert_eq!(
        config.simulation.response_curve.points(),
        &[(10.0, 5.0), (70.0, 25.0)]
    );
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let file = write_config(
        r#"
        [application]
        log_level = "debug"

        [monitor]
        interval_ms = 250
        "#,
    );

    std::env::set_var("PIEZO_STAGE_MONITOR__INTERVAL_MS", "500");
    std::env::set_var("PIEZO_STAGE_APPLICATION__LOG_LEVEL", "warn");
    let result = StageConfig::load_from(file.path());
    std::env::remove_var("PIEZO_STAGE_MONITOR__INTERVAL_MS");
    std::env::remove_var("PIEZO_STAGE_APPLICATION__LOG_LEVEL");

    let config = result.unwrap();
    assert_eq!(config.monitor.interval_ms, 500);
    assert_eq!(config.application.log_level, "warn");
}

#[test]
#[serial]
fn test_wrong_type_is_a_load_error() {
    let file = write_config(
        r#"
        [monitor]
        interval_ms = "soon"
        "#,
    );
    assert!(StageConfig::load_from(file.path()).is_err());
}

#[test]
#[serial]
fn test_invalid_values_load_but_fail_validation() {
    let file = write_config(
        r#"
        [controller]
        serial = "not-a-serial"

        [monitor]
        interval_ms = 0
        "#,
    );
    let config = StageConfig::load_from(file.path()).unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("controller.serial"), "{err}");
}
