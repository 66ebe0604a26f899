use p2pfs::{Config, ConfigError, DEFAULT_POLL_INTERVAL};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_defaults() {
    let config = Config::default();

    assert_eq!(config.shared_dir, PathBuf::from("./shared"));
    assert_eq!(config.download_dir, PathBuf::from("./downloads"));
    assert!(config.node.enable_mdns);
    assert!(config.node.listen_multiaddr().is_ok());
    assert_eq!(config.transfer.poll_interval(), DEFAULT_POLL_INTERVAL);
    assert_eq!(config.transfer.operation_timeout(), Duration::from_secs(30));
    assert_eq!(config.transfer.max_body_size, None);
}

#[test]
fn test_partial_file_keeps_other_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(
        &path,
        r#"{
            "shared_dir": "/data/outbox",
            "node": { "enable_mdns": false },
            "transfer": { "poll_interval_ms": 250, "max_body_size": 1048576 }
        }"#,
    )
    .unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.shared_dir, PathBuf::from("/data/outbox"));
    assert_eq!(config.download_dir, PathBuf::from("./downloads"));
    assert!(!config.node.enable_mdns);
    assert_eq!(config.node.listen_addr, "/ip4/0.0.0.0/tcp/0");
    assert_eq!(config.transfer.poll_interval(), Duration::from_millis(250));
    assert_eq!(config.transfer.operation_timeout(), Duration::from_secs(30));
    assert_eq!(config.transfer.max_body_size, Some(1024 * 1024));
}

#[test]
fn test_round_trips_through_json() {
    let mut config = Config::default();
    config.node.idle_connection_timeout_secs = 5;

    let json = serde_json::to_string(&config).unwrap();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, json).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.node.idle_connection_timeout(), Duration::from_secs(5));
}

#[test]
fn test_zero_poll_interval_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{ "transfer": { "poll_interval_ms": 0 } }"#).unwrap();

    let err = Config::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidPollInterval(0)));

    let mut config = Config::default();
    assert!(config.validate().is_ok());
    config.transfer.poll_interval_ms = 0;
    assert!(config.validate().is_err());
}
