//! Integration tests for configuration validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use game_protocol::config::{
    ClientConfig, LoggingConfig, NetworkConfig, ProtocolConfig, ServerConfig, MAX_PAYLOAD_SIZE,
};
use game_protocol::transport::{SessionContext, SessionOptions};
use std::time::Duration;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = NetworkConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_invalid_server_address() {
    let mut config = NetworkConfig::default();
    config.server.address = "invalid_address".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid server address")));
}

#[test]
fn test_empty_server_address() {
    let mut config = NetworkConfig::default();
    config.server.address = String::new();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_zero_backpressure_limit() {
    let mut config = NetworkConfig::default();
    config.server.backpressure_limit = 0;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Backpressure limit must be greater than 0")));
}

#[test]
fn test_excessive_backpressure_limit() {
    let mut config = NetworkConfig::default();
    config.server.backpressure_limit = 2_000_000;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("too large")));
}

#[test]
fn test_short_handshake_timeout() {
    let mut config = NetworkConfig::default();
    config.client.handshake_timeout = Duration::from_millis(10);

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Handshake timeout too short")));
}

#[test]
fn test_long_handshake_timeout() {
    let mut config = NetworkConfig::default();
    config.client.handshake_timeout = Duration::from_secs(600);

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Handshake timeout too long")));
}

#[test]
fn test_zero_version_rejected() {
    let mut config = NetworkConfig::default();
    config.protocol.version = 0;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("version cannot be 0")));
}

#[test]
fn test_long_subversion_rejected() {
    let mut config = NetworkConfig::default();
    config.protocol.subversion = "9".repeat(64);

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Subversion too long")));
}

#[test]
fn test_payload_limit_bounded_by_header() {
    let mut config = NetworkConfig::default();
    config.protocol.max_payload_size = MAX_PAYLOAD_SIZE + 1;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Max payload size too large")));

    config.protocol.max_payload_size = 0;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("cannot be 0")));
}

#[test]
fn test_logging_needs_an_output() {
    let mut config = NetworkConfig::default();
    config.logging.log_to_console = false;
    config.logging.log_to_file = false;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("At least one logging output")));
}

#[test]
fn test_file_logging_without_path() {
    let mut config = NetworkConfig::default();
    config.logging.log_to_file = true;
    config.logging.log_file_path = None;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("log_file_path must be specified")));
}

#[test]
fn test_multiple_errors_reported() {
    let config = NetworkConfig {
        server: ServerConfig {
            address: String::new(),
            backpressure_limit: 0,
        },
        client: ClientConfig {
            handshake_timeout: Duration::from_millis(1),
            ..ClientConfig::default()
        },
        protocol: ProtocolConfig {
            version: 0,
            ..ProtocolConfig::default()
        },
        logging: LoggingConfig::default(),
    };

    let errors = config.validate();
    assert!(errors.len() >= 4, "expected several errors, got {errors:?}");
}

#[test]
fn test_validate_strict() {
    assert!(NetworkConfig::default().validate_strict().is_ok());

    let mut config = NetworkConfig::default();
    config.server.backpressure_limit = 0;
    let err = config.validate_strict().unwrap_err();
    assert!(err.to_string().contains("Configuration validation failed"));
}

#[test]
fn test_toml_roundtrip_keeps_values() {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.protocol.version = 75;
        c.protocol.subversion = String::new();
        c.protocol.accepted_versions = vec![83, 176];
        c.client.handshake_timeout = Duration::from_millis(2500);
        c.logging.log_level = Level::DEBUG;
    });

    let text = toml::to_string_pretty(&config).unwrap();
    let parsed = NetworkConfig::from_toml(&text).unwrap();
    assert_eq!(parsed.protocol.version, 75);
    assert_eq!(parsed.protocol.subversion, "");
    assert_eq!(parsed.protocol.accepted_versions, vec![83, 176]);
    assert_eq!(parsed.client.handshake_timeout, Duration::from_millis(2500));
    assert_eq!(parsed.logging.log_level, Level::DEBUG);
}

#[test]
fn test_partial_toml_uses_defaults() {
    let parsed = NetworkConfig::from_toml(
        r#"
        [protocol]
        version = 62
        subversion = "1"
        locale = 8
        max_payload_size = 4096
        "#,
    )
    .unwrap();
    assert_eq!(parsed.protocol.version, 62);
    assert!(parsed.protocol.accepted_versions.is_empty());
    assert_eq!(parsed.server.address, ServerConfig::default().address);
}

#[test]
fn test_bad_log_level_rejected() {
    let text = NetworkConfig::example_config().replace("\"info\"", "\"loud\"");
    assert!(NetworkConfig::from_toml(&text).is_err());
}

#[test]
fn test_save_and_load_file() {
    let path = std::env::temp_dir().join(format!("game-protocol-{}.toml", std::process::id()));
    let config = NetworkConfig::default_with_overrides(|c| c.protocol.locale = 3);
    config.save_to_file(&path).unwrap();

    let loaded = NetworkConfig::from_file(&path).unwrap();
    assert_eq!(loaded.protocol.locale, 3);
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_missing_file_is_config_error() {
    let err = NetworkConfig::from_file("/definitely/not/here.toml").unwrap_err();
    assert!(err.to_string().contains("Failed to open config file"));
}

#[test]
fn test_registry_covers_advertised_and_accepted_versions() {
    let protocol = ProtocolConfig {
        version: 83,
        accepted_versions: vec![75, 176],
        ..ProtocolConfig::default()
    };
    let registry = protocol.algorithm_registry();
    assert!(registry.supports(83));
    assert!(registry.supports(75));
    assert!(registry.supports(176));
    assert!(!registry.supports(62));
}

#[test]
fn test_session_options_follow_config() {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.server.backpressure_limit = 7;
        c.protocol.max_payload_size = 1024;
        c.client.handshake_timeout = Duration::from_secs(3);
    });
    let options = SessionOptions::from(&config);
    assert_eq!(options.outbound_queue, 7);
    assert_eq!(options.max_payload_size, 1024);
    assert_eq!(options.handshake_timeout, Duration::from_secs(3));

    let context = SessionContext::from_config(&config);
    assert!(context.algorithms.supports(config.protocol.version));
}
