use super::*;
use serial_test::serial;
use std::env;

fn cleanup_test_env() {
    env::remove_var("API_KEY");
    env::remove_var("API_HOST");
    env::remove_var("API_PORT");
    env::remove_var("ALLOWED_ORIGINS");
    env::remove_var("MAX_QUEUE_SIZE");
    env::remove_var("CIRCUIT_FAILURE_THRESHOLD");
}

#[test]
#[serial]
fn missing_api_key_is_rejected() {
    cleanup_test_env();
    let result = Config::load();
    assert!(result.is_err());
    match result.unwrap_err() {
        OrchestratorError::ConfigurationError(msg) => {
            assert!(msg.contains("API_KEY"));
        }
        other => panic!("expected ConfigurationError, got {other:?}"),
    }
    cleanup_test_env();
}

#[test]
#[serial]
fn short_api_key_is_rejected() {
    cleanup_test_env();
    env::set_var("API_KEY", "too-short");
    let result = Config::load();
    assert!(result.is_err());
    cleanup_test_env();
}

#[test]
#[serial]
fn valid_api_key_loads_with_defaults() {
    cleanup_test_env();
    env::set_var("API_KEY", "a".repeat(32));
    let config = Config::load().unwrap();
    assert_eq!(config.api.host, "127.0.0.1");
    assert_eq!(config.api.port, 3000);
    assert_eq!(config.engine.max_queue_size, 1000);
    cleanup_test_env();
}

#[test]
#[serial]
fn engine_and_circuit_tuning_is_read_from_env() {
    cleanup_test_env();
    env::set_var("API_KEY", "a".repeat(32));
    env::set_var("MAX_QUEUE_SIZE", "42");
    env::set_var("CIRCUIT_FAILURE_THRESHOLD", "9");

    let config = Config::load().unwrap();
    assert_eq!(config.engine.max_queue_size, 42);
    assert_eq!(config.circuit.failure_threshold, 9);
    cleanup_test_env();
}

#[test]
#[serial]
fn allowed_origins_are_split_and_trimmed() {
    cleanup_test_env();
    env::set_var("API_KEY", "a".repeat(32));
    env::set_var("ALLOWED_ORIGINS", "https://a.example, https://b.example");

    let config = Config::load().unwrap();
    assert_eq!(
        config.api.allowed_origins,
        vec!["https://a.example".to_string(), "https://b.example".to_string()]
    );
    cleanup_test_env();
}
