//! Registry API errors

use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Errors raised by the REST layer
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Status(#[from] StatusError),

    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid API URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Malformed page from {url}: {reason}")]
    MalformedPage { url: String, reason: String },

    #[error("Invalid {resource} record: {reason}")]
    InvalidResource {
        resource: &'static str,
        reason: String,
    },

    #[error("Server repeated bookmark {bookmark} for {url}")]
    RepeatedBookmark { url: String, bookmark: String },

    #[error("Unexpected response body from {url}: {reason}")]
    UnexpectedBody { url: String, reason: String },

    #[error("Invalid device key {key}: expected d:orgId:typeId:deviceId")]
    InvalidDeviceKey { key: String },

    #[error("{resource} is not attached to an API client")]
    Detached { resource: &'static str },
}

impl ApiError {
    pub fn invalid_resource<S: Into<String>>(resource: &'static str, reason: S) -> Self {
        Self::InvalidResource {
            resource,
            reason: reason.into(),
        }
    }

    /// HTTP status of a rejected request
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status(error) => Some(error.status),
            _ => None,
        }
    }
}

/// One constraint violation reported by the platform
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub message: String,
    pub exception_id: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    exception: Option<ExceptionRef>,
    #[serde(default)]
    violations: Vec<ViolationBody>,
}

#[derive(Deserialize)]
struct ExceptionRef {
    id: Option<String>,
}

#[derive(Deserialize)]
struct ViolationBody {
    #[serde(default)]
    message: String,
    exception: Option<ExceptionRef>,
}

/// A response with an unexpected HTTP status
///
/// The platform usually answers with
/// `{"message": "...", "exception": {"id": "..."}, "violations": [...]}`;
/// those fields are extracted when the body is JSON.
#[derive(Debug, Clone)]
pub struct StatusError {
    pub status: u16,
    pub reason: String,
    pub url: String,
    pub body: Option<Value>,
    pub message: Option<String>,
    pub exception_id: Option<String>,
    pub violations: Vec<Violation>,
}

impl StatusError {
    pub fn new(status: u16, reason: impl Into<String>, url: impl Into<String>, text: &str) -> Self {
        let body: Option<Value> = serde_json::from_str(text).ok();
        let parsed = body
            .as_ref()
            .and_then(|body| ErrorBody::deserialize(body).ok());

        let (message, exception_id, violations) = match parsed {
            Some(parsed) => (
                parsed.message,
                parsed.exception.and_then(|e| e.id),
                parsed
                    .violations
                    .into_iter()
                    .map(|v| Violation {
                        message: v.message,
                        exception_id: v.exception.and_then(|e| e.id),
                    })
                    .collect(),
            ),
            None => (None, None, Vec::new()),
        };

        Self {
            status,
            reason: reason.into(),
            url: url.into(),
            body,
            message,
            exception_id,
            violations,
        }
    }

    /// Consume a rejected response
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let url = response.url().to_string();
        let reason = status.canonical_reason().unwrap_or("Unknown").to_string();
        let text = response.text().await.unwrap_or_default();
        Self::new(status.as_u16(), reason, url, &text)
    }
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{message}"),
            None => write!(
                f,
                "Unexpected return code from API: {} ({}) - {}",
                self.status, self.reason, self.url
            ),
        }
    }
}

impl std::error::Error for StatusError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_uses_server_message() {
        let body = r#"{
            "violations": [
                {
                    "message": "CUDRS0012E: The severity field has a value that is too high.",
                    "exception": {"id": "CUDRS0012E", "properties": ["severity", "2"]}
                }
            ],
            "message": "CUDRS0007E: The request was not valid. Review the constraint violations provided.",
            "exception": {"id": "CUDRS0007E", "properties": []}
        }"#;
        let error = StatusError::new(400, "Bad Request", "https://org.example.com/api", body);

        assert_eq!(error.exception_id.as_deref(), Some("CUDRS0007E"));
        assert_eq!(error.violations.len(), 1);
        assert_eq!(
            error.violations[0].exception_id.as_deref(),
            Some("CUDRS0012E")
        );
        assert!(error.to_string().starts_with("CUDRS0007E"));
    }

    #[test]
    fn test_status_error_without_json_body() {
        let error = StatusError::new(502, "Bad Gateway", "https://org.example.com/api", "<html>");
        assert!(error.body.is_none());
        assert!(error.violations.is_empty());
        assert_eq!(
            error.to_string(),
            "Unexpected return code from API: 502 (Bad Gateway) - https://org.example.com/api"
        );

        let api_error: ApiError = error.into();
        assert_eq!(api_error.status(), Some(502));
    }
}
