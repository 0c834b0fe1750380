use std::io::Write;

use crate::config::models::{AppConfig, VendorKind};

#[test]
fn test_default_config() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());

    assert_eq!(config.rate_limit.tokens_per_second, 10.0);
    assert_eq!(config.rate_limit.burst, 10);
    assert_eq!(config.worker.workers, 4);
    assert_eq!(config.retry.max_retries, 5);
    assert_eq!(config.vendor.request_timeout_seconds, 10);
    assert_eq!(config.circuit_breaker.failure_threshold, 5);
    assert_eq!(config.reconciliation.unconfirmed_after_seconds, 60);
    assert_eq!(config.reconciliation.campaign_timeout_seconds, 86_400);
    assert_eq!(config.segmentation.gsm7_segment_limit, 153);
    assert_eq!(config.vendor.kind, VendorKind::Mock);
}

#[test]
fn test_config_from_partial_toml() {
    let toml_content = r#"
[database]
url = "sqlite::memory:"
max_connections = 1

[vendor]
kind = "http"
base_url = "https://sms.example.com/v1"
api_key = "test-key"
request_timeout_seconds = 5

[rate_limit]
tokens_per_second = 2.5
burst = 5

[worker]
workers = 8

[observability]
log_level = "debug"
"#;

    let config = AppConfig::from_toml(toml_content).unwrap();

    assert_eq!(config.database.url, "sqlite::memory:");
    assert_eq!(config.database.max_connections, 1);
    assert_eq!(config.vendor.kind, VendorKind::Http);
    assert_eq!(config.vendor.send_path, "/messages");
    assert_eq!(config.rate_limit.tokens_per_second, 2.5);
    assert_eq!(config.worker.workers, 8);
    assert_eq!(config.worker.poll_interval_ms, 500);
    assert_eq!(config.retry.max_retries, 5);
    assert_eq!(config.observability.log_level, "debug");
}

#[test]
fn test_config_to_toml() {
    let config = AppConfig::default();
    let toml_str = config.to_toml().unwrap();

    assert!(toml_str.contains("[rate_limit]"));
    assert!(toml_str.contains("[reconciliation]"));

    let parsed = AppConfig::from_toml(&toml_str).unwrap();
    assert_eq!(parsed.worker.workers, config.worker.workers);
    assert_eq!(parsed.retry.backoff_multiplier, config.retry.backoff_multiplier);
}

#[test]
fn test_load_from_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
[retry]
max_retries = 3
base_interval_seconds = 1

[reconciliation]
max_attempts = 2
"#
    )
    .unwrap();

    let path = file.path().to_str().unwrap().to_string();
    let config = AppConfig::load(Some(&path)).unwrap();

    assert_eq!(config.retry.max_retries, 3);
    assert_eq!(config.retry.base_interval_seconds, 1);
    assert_eq!(config.reconciliation.max_attempts, 2);
}

#[test]
fn test_load_missing_file() {
    let result = AppConfig::load(Some("/nonexistent/sms-dispatch.toml"));
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("配置文件不存在"));
}
