use super::*;

fn valid_config() -> Config {
    let mut config = Config::default();
    config.gateway.access_key = "s3cret".to_string();
    config
}

#[test]
fn test_default_config_requires_access_key() {
    let config = Config::default();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("accessKey"));
}

#[test]
fn test_config_with_access_key_validates() {
    assert!(valid_config().validate().is_ok());
}

#[test]
fn test_whitespace_access_key_rejected() {
    let mut config = valid_config();
    config.gateway.access_key = "   ".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_zero_port() {
    let mut config = valid_config();
    config.gateway.port = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_zero_audit_capacity() {
    let mut config = valid_config();
    config.audit.capacity = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_zero_max_retries() {
    let mut config = valid_config();
    config.session.max_retries = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_max_delay_below_base() {
    let mut config = valid_config();
    config.session.retry_base_delay_secs = 60;
    config.session.retry_max_delay_secs = 10;
    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_zero_health_interval() {
    let mut config = valid_config();
    config.session.health_check_interval_secs = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_webhook_scheme() {
    let mut config = valid_config();
    config.webhook.url = "ftp://example.com/hook".to_string();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("webhook.url"));
}

#[test]
fn test_invalid_sidecar_url() {
    let mut config = valid_config();
    config.engine.sidecar_url = "not a url".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_empty_webhook_url_allowed() {
    let mut config = valid_config();
    config.webhook.url = String::new();
    assert!(config.validate().is_ok());
}

#[test]
fn test_defaults_match_documented_values() {
    let config = Config::default();
    assert_eq!(config.gateway.port, 3000);
    assert_eq!(config.session.name, "default_session");
    assert_eq!(config.session.max_retries, 5);
    assert_eq!(config.session.health_check_interval_secs, 30);
    assert_eq!(config.session.restart_cooldown_secs, 10);
    assert_eq!(config.webhook.timeout_secs, 10);
    assert_eq!(config.audit.capacity, 100);
    assert!(!config.session.purge_credentials_on_conflict);
}

#[test]
fn test_public_base_url_derived_from_host_port() {
    let mut config = valid_config();
    config.gateway.host = "0.0.0.0".to_string();
    config.gateway.port = 8080;
    assert_eq!(config.public_base_url(), "http://0.0.0.0:8080");
}

#[test]
fn test_public_base_url_trailing_slash_trimmed() {
    let mut config = valid_config();
    config.gateway.public_base_url = "https://bridge.example.com/".to_string();
    assert_eq!(config.public_base_url(), "https://bridge.example.com");
}

#[test]
fn test_explicit_uploads_dir_used() {
    let mut config = valid_config();
    config.media.uploads_dir = "/var/lib/wabridge/uploads".to_string();
    assert_eq!(
        config.uploads_path(),
        PathBuf::from("/var/lib/wabridge/uploads")
    );
}

#[test]
fn test_camel_case_deserialization() {
    let json = serde_json::json!({
        "gateway": {"accessKey": "k", "port": 4000, "companyName": "Acme"},
        "session": {"maxRetries": 3, "purgeCredentialsOnConflict": true},
        "webhook": {"url": "https://hooks.example.com/in", "timeoutSecs": 5},
        "audit": {"capacity": 10}
    });
    let config: Config = serde_json::from_value(json).unwrap();
    assert_eq!(config.gateway.access_key, "k");
    assert_eq!(config.gateway.port, 4000);
    assert_eq!(config.gateway.company_name, "Acme");
    assert_eq!(config.session.max_retries, 3);
    assert!(config.session.purge_credentials_on_conflict);
    assert_eq!(config.webhook.timeout_secs, 5);
    assert_eq!(config.audit.capacity, 10);
    // Unspecified fields keep their defaults
    assert_eq!(config.session.health_check_interval_secs, 30);
}

#[test]
fn test_debug_redacts_secrets() {
    let mut config = valid_config();
    config.engine.callback_secret = "hmac-key".to_string();
    config.webhook.url = "https://hooks.example.com/in?token=abc".to_string();
    let debug = format!("{:?}", config);
    assert!(!debug.contains("s3cret"));
    assert!(!debug.contains("hmac-key"));
    assert!(!debug.contains("token=abc"));
    assert!(debug.contains("[REDACTED]"));
}
