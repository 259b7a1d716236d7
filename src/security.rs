use crate::error::OrchestratorError;
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

pub const API_KEY_LENGTH: usize = 64;
pub const API_KEY_FILE: &str = ".conductor-api-key";

pub fn generate_secure_api_key() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(API_KEY_LENGTH)
        .map(char::from)
        .collect()
}

/// Writes `api_key` to [`API_KEY_FILE`] with owner-only permissions on
/// Unix.
pub fn save_api_key_to_file(api_key: &str) -> Result<(), OrchestratorError> {
    fs::write(API_KEY_FILE, api_key)
        .map_err(|e| OrchestratorError::ConfigurationError(format!("failed to write API key file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(API_KEY_FILE)
            .map_err(|e| OrchestratorError::ConfigurationError(format!("failed to get file metadata: {e}")))?
            .permissions();
        perms.set_mode(0o600);
        fs::set_permissions(API_KEY_FILE, perms)
            .map_err(|e| OrchestratorError::ConfigurationError(format!("failed to set file permissions: {e}")))?;
    }

    info!("api key saved to {}", API_KEY_FILE);
    Ok(())
}

pub fn load_api_key_from_file() -> Result<Option<String>, OrchestratorError> {
    if !Path::new(API_KEY_FILE).exists() {
        return Ok(None);
    }

    let api_key = fs::read_to_string(API_KEY_FILE)
        .map_err(|e| OrchestratorError::ConfigurationError(format!("failed to read API key file: {e}")))?;
    let api_key = api_key.trim().to_string();

    if api_key.len() != API_KEY_LENGTH || !api_key.chars().all(|c| c.is_alphanumeric()) {
        warn!("api key file contains an invalid key");
        return Err(OrchestratorError::ConfigurationError(
            "invalid API key format in file".to_string(),
        ));
    }

    Ok(Some(api_key))
}

/// Uses `existing_api_key` if set, otherwise an existing key file,
/// otherwise generates and persists a new key.
pub fn ensure_api_key_exists(existing_api_key: Option<&str>) -> Result<String, OrchestratorError> {
    if let Some(key) = existing_api_key {
        if !key.trim().is_empty() {
            return Ok(key.to_string());
        }
    }

    match load_api_key_from_file()? {
        Some(existing_key) => Ok(existing_key),
        None => {
            let new_key = generate_secure_api_key();
            save_api_key_to_file(&new_key)?;
            Ok(new_key)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_have_expected_length_and_charset() {
        let key = generate_secure_api_key();
        assert_eq!(key.len(), API_KEY_LENGTH);
        assert!(key.chars().all(|c| c.is_alphanumeric()));
    }

    #[test]
    fn generated_keys_are_unique() {
        let key1 = generate_secure_api_key();
        let key2 = generate_secure_api_key();
        assert_ne!(key1, key2);
    }

    #[test]
    fn ensure_api_key_exists_prefers_existing_config_key() {
        let result = ensure_api_key_exists(Some("configured-key")).unwrap();
        assert_eq!(result, "configured-key");
    }
}
