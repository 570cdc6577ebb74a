use anyhow::Result;
use rust_s7_monitor::config::Config;
use std::fs;
use std::path::Path;
use std::sync::Once;
use tempfile::tempdir;

static INIT: Once = Once::new();

// Setup logger for tests
fn setup() {
    INIT.call_once(|| {
        env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .is_test(true)
            .init();
    });
}

#[test]
fn test_config_validation_error_creates_sample_file() -> Result<()> {
    setup();

    // Create a temporary directory for the test
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");

    // Valid YAML but an invalid value (port out of range)
    let invalid_config = r#"
plc:
  address: "192.168.0.1"
  port: 99999  # Port out of range (valid range is 1-65534)
"#;

    fs::write(&config_path, invalid_config)?;

    // Loading should fail but create a sample file
    let result = Config::from_file(&config_path);
    assert!(result.is_err(), "Config loading should have failed");

    let sample_path = config_path.with_extension("sample.yaml");
    assert!(
        Path::new(&sample_path).exists(),
        "Sample config file was not created"
    );

    // The generated sample itself loads cleanly with default values
    let sample_config = Config::from_file(&sample_path)?;
    assert_eq!(sample_config.plc.port, 102);

    Ok(())
}

#[test]
fn test_config_rule_error_creates_sample_file() -> Result<()> {
    setup();

    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");

    // Passes the schema but breaks a semantic rule: a bit index on a
    // point that is not a bool
    let invalid_config = r#"
acquisition:
  points:
    - name: encoder
      offset: 124
      type: real
      bit: 3
"#;

    fs::write(&config_path, invalid_config)?;

    let result = Config::from_file(&config_path);
    assert!(result.is_err(), "Config loading should have failed");

    let sample_path = config_path.with_extension("sample.yaml");
    assert!(
        Path::new(&sample_path).exists(),
        "Sample config file was not created"
    );

    let sample_config = Config::from_file(&sample_path)?;
    assert_eq!(sample_config.acquisition.db_number, 5);

    Ok(())
}
