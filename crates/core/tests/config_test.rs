use scheduler_core::config::*;
use std::env;
use std::fs;
use tempfile::NamedTempFile;

#[test]
fn test_default_config() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());

    assert!(config.executor.enabled);
    assert!(config.coordinator.enabled);
    assert_eq!(config.executor.queue_capacity, 1000);
    assert_eq!(config.executor.max_handler_concurrency, 200);
    assert_eq!(config.executor.max_pending_requests, 2000);
    assert_eq!(config.executor.log_retention_days, 30);
    assert_eq!(config.coordinator.probe_timeout_ms, 1000);
    assert_eq!(config.observability.log_level, "info");
}

#[test]
fn test_config_from_toml() {
    let toml_content = r#"
[executor]
app_name = "order-executor"
address = "http://10.1.2.3:9999/"
port = 19999
access_token = "token"
coordinator_addresses = "http://10.0.0.1:8080/"
log_path = "/var/log/jobs"
log_retention_days = 7
queue_capacity = 16

[coordinator]
bind_address = "127.0.0.1:18080"
registry_dead_timeout_seconds = 60
health_refresh_interval_seconds = 5

[observability]
log_level = "debug"
"#;

    let config = AppConfig::from_toml_str(toml_content).unwrap();

    assert_eq!(config.executor.app_name, "order-executor");
    assert_eq!(config.executor.advertised_address(), "http://10.1.2.3:9999/");
    assert_eq!(config.executor.bind_address(), "0.0.0.0:19999");
    assert_eq!(config.executor.log_retention_days, 7);
    assert_eq!(config.executor.queue_capacity, 16);
    assert_eq!(config.coordinator.bind_address, "127.0.0.1:18080");
    assert_eq!(config.coordinator.registry_dead_timeout_seconds, 60);
    assert_eq!(config.observability.log_level, "debug");
}

#[test]
fn test_advertised_address_from_ip_and_port() {
    let config = ExecutorConfig {
        ip: "192.168.1.10".to_string(),
        port: 9998,
        ..ExecutorConfig::default()
    };
    assert_eq!(config.advertised_address(), "http://192.168.1.10:9998/");
}

#[test]
fn test_config_validation_executor() {
    let mut config = AppConfig::default();

    config.executor.app_name = " ".to_string();
    assert!(config.validate().is_err());
    config.executor.app_name = "executor".to_string();

    config.executor.coordinator_addresses = " , ".to_string();
    assert!(config.validate().is_err());
    config.executor.coordinator_addresses = "http://127.0.0.1:8080/".to_string();

    config.executor.queue_capacity = 0;
    assert!(config.validate().is_err());
    config.executor.queue_capacity = 10;

    config.executor.heartbeat_interval_seconds = 0;
    assert!(config.validate().is_err());
    config.executor.heartbeat_interval_seconds = 30;

    assert!(config.validate().is_ok());

    // 执行器禁用时不校验其配置
    config.executor.enabled = false;
    config.executor.port = 0;
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_validation_coordinator() {
    let mut config = AppConfig::default();

    config.coordinator.registry_dead_timeout_seconds = 0;
    assert!(config.validate().is_err());
    config.coordinator.registry_dead_timeout_seconds = 90;

    config.coordinator.probe_timeout_ms = 0;
    assert!(config.validate().is_err());
    config.coordinator.probe_timeout_ms = 500;

    assert!(config.validate().is_ok());
}

#[test]
fn test_config_validation_observability() {
    let mut config = AppConfig::default();

    for level in ["trace", "debug", "info", "warn", "error", "WARN"] {
        config.observability.log_level = level.to_string();
        assert!(config.validate().is_ok(), "level {level} should be valid");
    }

    config.observability.log_level = "verbose".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_config_load_from_file() {
    let temp_file = NamedTempFile::new().unwrap();
    fs::write(
        temp_file.path(),
        "[executor]\nport = 9090\nheartbeat_interval_seconds = 10\n",
    )
    .unwrap();

    let config = AppConfig::load(temp_file.path().to_str()).unwrap();
    assert_eq!(config.executor.port, 9090);
    assert_eq!(config.executor.heartbeat_interval_seconds, 10);
}

#[test]
fn test_config_load_nonexistent_file() {
    let result = AppConfig::load(Some("nonexistent.toml"));
    assert!(result.is_err());
}

#[test]
fn test_config_environment_override() {
    let temp_file = NamedTempFile::new().unwrap();
    fs::write(temp_file.path(), "[executor]\napp_name = \"from-file\"\n").unwrap();

    env::set_var("SCHEDULER_EXECUTOR__APP_NAME", "from-env");
    env::set_var("SCHEDULER_EXECUTOR__CALLBACK_RETRY_INTERVAL_SECONDS", "45");

    let result = AppConfig::load(temp_file.path().to_str());

    env::remove_var("SCHEDULER_EXECUTOR__APP_NAME");
    env::remove_var("SCHEDULER_EXECUTOR__CALLBACK_RETRY_INTERVAL_SECONDS");

    let config = result.unwrap();
    assert_eq!(config.executor.app_name, "from-env");
    assert_eq!(config.executor.callback_retry_interval_seconds, 45);
}

#[test]
fn test_invalid_toml_format() {
    let result = AppConfig::from_toml_str("[executor\nport = ");
    assert!(result.is_err());
}
