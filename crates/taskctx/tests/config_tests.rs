use std::io::Write;
use taskctx::{ConfigError, SchedulerConfig};

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "max_steps = 1000\ntick_duration_ms = 0\nlog_filter = \"taskctx=debug\"").unwrap();

    let config = SchedulerConfig::from_file(file.path()).unwrap();
    assert_eq!(config.max_steps, Some(1000));
    assert_eq!(config.log_filter, "taskctx=debug");
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = SchedulerConfig::from_file(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn test_invalid_values_rejected() {
    assert!(matches!(
        SchedulerConfig::from_toml_str("max_steps = 0"),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_builder() {
    let config = SchedulerConfig::new()
        .with_max_steps(10)
        .with_trace_capacity(5)
        .with_tick_duration_ms(1);
    assert!(config.validate().is_ok());
    assert_eq!(config.trace_capacity, 5);
}
