//! Crate-level error type
//!
//! Each concern has its own error enum next to the code that raises it.
//! [`IotError`] wraps them for callers that mix configuration, MQTT, message
//! and registry operations.

use crate::api::ApiError;
use crate::config::ConfigError;
use crate::protocol::MessageError;
use crate::transport::mqtt::MqttError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for iot-2 client operations
#[derive(Debug, Error)]
pub enum IotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection error: {0}")]
    Connection(#[from] MqttError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl IotError {
    /// True when the failure came from configuration validation
    pub fn is_config(&self) -> bool {
        matches!(self, IotError::Config(_))
    }
}

static SECRET_VALUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+")
        .expect("secret redaction pattern must be a valid regex")
});

static SENSITIVE_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("path redaction pattern must be a valid regex")
});

const MAX_MESSAGE_LEN: usize = 500;
const TRUNCATE_SUFFIX: &str = "...[truncated]";

/// Redact credentials and private paths from a message meant for logs
///
/// The result is at most 500 bytes long.
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_VALUE.replace_all(message, "${1}=***");
    let mut sanitized = SENSITIVE_PATH
        .replace_all(&sanitized, "/***REDACTED***/")
        .into_owned();

    if sanitized.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN - TRUNCATE_SUFFIX.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(TRUNCATE_SUFFIX);
    }

    sanitized
}

/// Result type for iot-2 client operations
pub type IotResult<T> = Result<T, IotError>;
