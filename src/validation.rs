use crate::error::OrchestratorError;
use html_escape::encode_text;
use regex::Regex;
use std::collections::HashSet;

pub const MAX_TASK_CONTENT_LENGTH: usize = 10000;
pub const MAX_CONTEXT_KEY_LENGTH: usize = 100;
pub const MAX_CONTEXT_VALUE_LENGTH: usize = 1000;

static SAFE_TASK_CONTENT_REGEX: &str =
    r"^[a-zA-Z0-9\s\.,!?:;()\[\]{}\-_+=@#$%^&*|\\/<>'`~\n\r\t]+$";

static DANGEROUS_PATTERNS: &[&str] = &[
    "<script",
    "javascript:",
    "data:text/html",
    "vbscript:",
    "&&",
    "||",
    ";rm",
    ";del",
    "`rm",
    "`del",
    "$(rm",
    "$(del",
    "';",
    "\";",
    "union select",
    "drop table",
    "delete from",
    "../",
    "..\\",
    "file://",
    "/etc/passwd",
    "/etc/shadow",
    "c:\\windows\\system32",
];

/// Validates and sanitizes task content (description, tags, metadata
/// values) accepted over the HTTP surface before it enters the engine.
#[derive(Debug, Clone)]
pub struct TaskContentValidator {
    safe_content_regex: Regex,
    dangerous_patterns: HashSet<String>,
}

impl TaskContentValidator {
    pub fn new() -> Result<Self, OrchestratorError> {
        let safe_content_regex = Regex::new(SAFE_TASK_CONTENT_REGEX)
            .map_err(|e| OrchestratorError::ConfigurationError(format!("invalid regex pattern: {e}")))?;
        let dangerous_patterns = DANGEROUS_PATTERNS.iter().map(|s| s.to_lowercase()).collect();
        Ok(Self {
            safe_content_regex,
            dangerous_patterns,
        })
    }

    fn contains_dangerous_pattern(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.dangerous_patterns.iter().any(|p| lower.contains(p.as_str()))
    }

    pub fn validate_and_sanitize_task_content(&self, content: &str) -> Result<String, OrchestratorError> {
        if content.len() > MAX_TASK_CONTENT_LENGTH {
            return Err(OrchestratorError::invalid(format!(
                "task content exceeds maximum length of {MAX_TASK_CONTENT_LENGTH} characters"
            )));
        }
        if content.trim().is_empty() {
            return Err(OrchestratorError::invalid("task content cannot be empty"));
        }
        if self.contains_dangerous_pattern(content) {
            return Err(OrchestratorError::invalid(
                "task content contains potentially dangerous patterns",
            ));
        }
        if !self.safe_content_regex.is_match(content) {
            return Err(OrchestratorError::invalid("task content contains invalid characters"));
        }
        Ok(encode_text(content).to_string())
    }

    pub fn validate_context_key(&self, key: &str) -> Result<(), OrchestratorError> {
        if key.is_empty() || key.len() > MAX_CONTEXT_KEY_LENGTH {
            return Err(OrchestratorError::invalid(format!(
                "context key must be non-empty and under {MAX_CONTEXT_KEY_LENGTH} characters"
            )));
        }
        if !key.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(OrchestratorError::invalid(
                "context keys can only contain alphanumeric characters and underscores",
            ));
        }
        Ok(())
    }

    pub fn validate_and_sanitize_context_value(&self, value: &str) -> Result<String, OrchestratorError> {
        if value.len() > MAX_CONTEXT_VALUE_LENGTH {
            return Err(OrchestratorError::invalid(format!(
                "context value exceeds maximum length of {MAX_CONTEXT_VALUE_LENGTH} characters"
            )));
        }
        if self.contains_dangerous_pattern(value) {
            return Err(OrchestratorError::invalid(
                "context value contains potentially dangerous patterns",
            ));
        }
        Ok(encode_text(value).to_string())
    }
}

impl Default for TaskContentValidator {
    fn default() -> Self {
        Self::new().expect("safe content regex is a fixed valid pattern")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_clean_content() {
        let validator = TaskContentValidator::new().unwrap();
        assert!(validator
            .validate_and_sanitize_task_content("Create a hello world function in Rust")
            .is_ok());
    }

    #[test]
    fn rejects_script_injection() {
        let validator = TaskContentValidator::new().unwrap();
        let result = validator.validate_and_sanitize_task_content("Create <script>alert(1)</script>");
        assert!(result.is_err());
    }

    #[test]
    fn rejects_command_injection() {
        let validator = TaskContentValidator::new().unwrap();
        let result = validator.validate_and_sanitize_task_content("Create file && rm -rf /");
        assert!(result.is_err());
    }

    #[test]
    fn rejects_empty_content() {
        let validator = TaskContentValidator::new().unwrap();
        assert!(validator.validate_and_sanitize_task_content("").is_err());
    }

    #[test]
    fn boundary_length_is_accepted_one_over_is_rejected() {
        let validator = TaskContentValidator::new().unwrap();
        let at_limit = "x".repeat(MAX_TASK_CONTENT_LENGTH);
        assert!(validator.validate_and_sanitize_task_content(&at_limit).is_ok());

        let over_limit = "x".repeat(MAX_TASK_CONTENT_LENGTH + 1);
        assert!(validator.validate_and_sanitize_task_content(&over_limit).is_err());
    }

    #[test]
    fn context_keys_reject_non_alphanumeric() {
        let validator = TaskContentValidator::new().unwrap();
        for key in ["project_type", "file_path", "priority_hint"] {
            assert!(validator.validate_context_key(key).is_ok());
        }
        for key in ["", "key with spaces", "key-with-dashes", "key.with.dots"] {
            assert!(validator.validate_context_key(key).is_err());
        }
    }

    #[test]
    fn context_values_are_escaped_and_dangerous_ones_rejected() {
        let validator = TaskContentValidator::new().unwrap();
        for value in ["rust", "REST API", "high priority"] {
            assert!(validator.validate_and_sanitize_context_value(value).is_ok());
        }
        for value in [
            "<script>alert(1)</script>",
            "'; DROP TABLE users; --",
            "javascript:alert(1)",
        ] {
            assert!(validator.validate_and_sanitize_context_value(value).is_err());
        }
    }

    #[test]
    fn validation_is_idempotent() {
        let validator = TaskContentValidator::new().unwrap();
        let input = "Text with ampersands & symbols";
        let first = validator.validate_and_sanitize_task_content(input);
        let second = validator.validate_and_sanitize_task_content(input);
        assert_eq!(first.ok(), second.ok());
    }
}
