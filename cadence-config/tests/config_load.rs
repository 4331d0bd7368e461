use cadence_config::{CadenceConfigLoader, LogFormatSetting, StateBackend};
use serial_test::serial;
use std::{fs, path::PathBuf};
use tempfile::TempDir;

/// Helper to write a YAML file in a temp dir and return its path.
fn write_yaml(tmp: &TempDir, name: &str, yaml: &str) -> PathBuf {
    let p = tmp.path().join(name);
    fs::write(&p, yaml).expect("write yaml");
    p
}

const FILE_YAML: &str = r#"
version: "0.1"
screen:
  width: 2560
  height: 1440
regions:
  input:  { x1: 600, y1: 1200, x2: 1900, y2: 1320 }
  submit: { x1: 1920, y1: 1250, x2: 1990, y2: 1300 }
  idle:   { x1: 300, y1: 200, x2: 2200, y2: 1100 }
schedule:
  interval_secs: 120
  max_retries: 3
tasks:
  file: "${CADENCE_TEST_HOME}/prompts.txt"
state:
  backend: sqlite
  database_url: "sqlite://${CADENCE_TEST_HOME}/cadence.db"
persona:
  typo_rate: { min: 0.01, max: 0.02 }
logging:
  format: json
  stderr: true
"#;

#[test]
#[serial]
fn loads_file_with_env_expansion() {
    let tmp = TempDir::new().unwrap();
    let p = write_yaml(&tmp, "cadence.yaml", FILE_YAML);

    let config = temp_env::with_var("CADENCE_TEST_HOME", Some("/home/op"), || {
        CadenceConfigLoader::new()
            .with_file(&p)
            .load()
            .expect("load system config")
    });

    config.validate().expect("pre-flight passes");
    assert_eq!(config.screen.width, 2560.0);
    assert_eq!(config.schedule.interval_secs, 120);
    assert_eq!(config.schedule.max_retries, 3);
    assert_eq!(config.schedule.tick_millis, 1000);
    assert_eq!(config.tasks.file, PathBuf::from("/home/op/prompts.txt"));
    assert_eq!(config.tasks.separator, "|||");
    assert_eq!(config.state.backend, StateBackend::Sqlite);
    assert_eq!(config.state.database_url(), "sqlite:///home/op/cadence.db");
    assert_eq!(config.logging.format, LogFormatSetting::Json);

    let table = config.persona_table();
    assert_eq!(table.typo_rate.min, 0.01);
    assert_eq!(table.typo_rate.max, 0.02);
    // untouched rows keep their built-in ranges
    assert_eq!(table.speed_multiplier.max, 2.5);
}

#[test]
#[serial]
fn environment_overrides_file_values() {
    let tmp = TempDir::new().unwrap();
    let p = write_yaml(&tmp, "cadence.yaml", FILE_YAML);

    let config = temp_env::with_vars(
        [
            ("CADENCE_TEST_HOME", Some("/home/op")),
            ("CADENCE_SCHEDULE__INTERVAL_SECS", Some("240")),
            ("CADENCE_STATE__SET_ID", Some("night-shift")),
        ],
        || CadenceConfigLoader::new().with_file(&p).load().unwrap(),
    );

    assert_eq!(config.schedule.interval_secs, 240);
    assert_eq!(config.state.set_id, "night-shift");
}

#[test]
#[serial]
fn missing_optional_file_is_skipped() {
    let tmp = TempDir::new().unwrap();
    let config = CadenceConfigLoader::new()
        .with_optional_file(tmp.path().join("absent.yaml"))
        .load()
        .expect("defaults only");

    assert_eq!(config.state.backend, StateBackend::Json);
    assert!(config.validate().is_err());
}

#[test]
#[serial]
fn missing_required_file_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let res = CadenceConfigLoader::new()
        .with_file(tmp.path().join("absent.yaml"))
        .load();
    assert!(res.is_err());
}
