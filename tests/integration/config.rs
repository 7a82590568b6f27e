use std::io::Write;

use corun::util::config::{apply_env, load_config, load_config_file, parse_config, ConfigError};
use corun::{QueueKind, Runtime, ShutdownPolicy};

#[test]
fn test_load_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[runtime]
num_workers = 3
queue_kind = "lock-free"
queue_capacity = 256
tracing = true
"#
    )
    .unwrap();

    let config = load_config_file(file.path()).unwrap();
    assert_eq!(config.num_workers, 3);
    assert_eq!(config.queue_kind, QueueKind::LockFree);
    assert_eq!(config.queue_capacity, 256);
    assert!(config.tracing);
    assert_eq!(config.shutdown_policy, ShutdownPolicy::Drain);

    let rt = Runtime::with_config(config).unwrap();
    assert_eq!(rt.num_workers(), 3);
    assert!(rt.is_tracing());
    rt.destroy();
}

#[test]
fn test_load_config_explicit_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    let err = load_config(Some(missing.as_path())).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn test_parse_config_rejects_bad_toml() {
    let err = parse_config("[runtime]\nnum_workers = \"many\"").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_env_overrides_file() {
    let mut config = parse_config("[runtime]\nnum_workers = 2").unwrap();
    apply_env(
        &mut config,
        vec![
            ("CORUN_WORKERS".to_string(), "6".to_string()),
            ("CORUN_QUEUE".to_string(), "ring".to_string()),
            ("CORUN_SHUTDOWN".to_string(), "abandon".to_string()),
            ("HOME".to_string(), "/tmp".to_string()),
        ],
    )
    .unwrap();
    assert_eq!(config.num_workers, 6);
    assert_eq!(config.queue_kind, QueueKind::LockFree);
    assert_eq!(config.shutdown_policy, ShutdownPolicy::Abandon);
}

#[test]
fn test_env_invalid_value() {
    let mut config = parse_config("").unwrap();
    let err = apply_env(
        &mut config,
        vec![("CORUN_TRACE".to_string(), "maybe".to_string())],
    )
    .unwrap_err();
    match err {
        ConfigError::InvalidValue { key, value } => {
            assert_eq!(key, "CORUN_TRACE");
            assert_eq!(value, "maybe");
        }
        other => panic!("unexpected error: {}", other),
    }
}
