//! Pure connection state management for the MQTT client
//!
//! Broker endpoint resolution, option construction and ConnAck refusal
//! reasons. Nothing in here performs I/O.

use crate::error::sanitize_error_message;
use rumqttc::{ClientError, ConnectReturnCode, MqttOptions, Transport};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Port the quickstart organization listens on without TLS
pub const QUICKSTART_PORT: u16 = 1883;
/// Default TLS port for every other organization
pub const SECURE_PORT: u16 = 8883;

/// Connection state for MQTT client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial state - attempting to connect
    Connecting,
    /// ConnAck received, ready for operations
    Connected,
    /// Disconnected with reason
    Disconnected(String),
    /// Waiting before the next poll (attempt count)
    Reconnecting(u32),
}

/// Reconnection backoff between failed polls
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delays in milliseconds for the first attempts
    pub backoff_pattern: Vec<u64>,
    /// Delay used once the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff_pattern: vec![25, 50, 100, 250],
            sustained_delay: 250,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay for `attempt` (1-based) in milliseconds
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Failed to connect to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Timed out waiting for connection acknowledgement from {address}")]
    ConnectTimeout { address: String },

    #[error("Unsupported authentication method: {0}")]
    UnsupportedAuthenticationMethod(String),

    #[error("Invalid MQTT configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Unable to read CA file {path}: {source}")]
    CaFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },

    #[error("Publishing failed")]
    PublishFailed(#[source] ClientError),

    #[error("Subscription failed")]
    SubscriptionFailed(#[source] ClientError),

    #[error("Client is already connected")]
    AlreadyConnected,
}

/// Resolved broker host, port and transport security
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerEndpoint {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Pure function selecting the broker endpoint for an organization
///
/// The host is always `{org}.messaging.{domain}`. Ports 80 and 1883 are
/// plain TCP, 443 and 8883 use TLS. Without an override the quickstart
/// organization connects in plain text on 1883 and everyone else on 8883.
pub fn resolve_endpoint(
    org_id: &str,
    domain: &str,
    port: Option<u16>,
) -> Result<BrokerEndpoint, MqttError> {
    let host = format!("{org_id}.messaging.{domain}");
    let (port, tls) = match port {
        None if org_id == "quickstart" => (QUICKSTART_PORT, false),
        None => (SECURE_PORT, true),
        Some(port @ (80 | 1883)) => {
            warn!(
                port,
                "Unencrypted connection configured; credentials and payloads are sent in plain text"
            );
            (port, false)
        }
        Some(port @ (443 | 8883)) => (port, true),
        Some(port) => {
            return Err(MqttError::InvalidConfiguration(format!(
                "Unsupported value for port override: {port}. Supported values are 80, 443, 1883 & 8883"
            )))
        }
    };

    Ok(BrokerEndpoint { host, port, tls })
}

/// Everything the transport needs to open a session
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub client_id: String,
    pub org_id: String,
    pub domain: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub clean_start: bool,
    pub keep_alive: Duration,
    pub ca_file: Option<PathBuf>,
    pub connect_timeout: Duration,
}

impl MqttSettings {
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(
        client_id: impl Into<String>,
        org_id: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            org_id: org_id.into(),
            domain: domain.into(),
            port: None,
            username: None,
            password: None,
            clean_start: false,
            keep_alive: Duration::from_secs(60),
            ca_file: None,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn endpoint(&self) -> Result<BrokerEndpoint, MqttError> {
        resolve_endpoint(&self.org_id, &self.domain, self.port)
    }
}

/// Pure function building rumqttc options from settings
///
/// The session is clean when `clean_start` is false, mirroring the
/// platform's "resume the previous session" switch.
pub fn configure_mqtt_options(settings: &MqttSettings) -> Result<MqttOptions, MqttError> {
    let endpoint = settings.endpoint()?;

    // rumqttc panics on keep alive values between 1 and 4 seconds
    let keep_alive = settings.keep_alive.as_secs();
    if keep_alive != 0 && keep_alive < 5 {
        return Err(MqttError::InvalidConfiguration(format!(
            "keepAlive must be 0 or at least 5 seconds, got {keep_alive}"
        )));
    }

    let mut mqtt_options = MqttOptions::new(&settings.client_id, endpoint.host, endpoint.port);
    mqtt_options.set_keep_alive(settings.keep_alive);
    mqtt_options.set_clean_session(!settings.clean_start);

    if let Some(username) = &settings.username {
        let password = settings.password.as_deref().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    if endpoint.tls {
        let transport = match &settings.ca_file {
            Some(path) => {
                let ca = std::fs::read(path).map_err(|source| MqttError::CaFile {
                    path: path.clone(),
                    source,
                })?;
                Transport::tls(ca, None, None)
            }
            None => Transport::tls_with_default_config(),
        };
        mqtt_options.set_transport(transport);
    }

    Ok(mqtt_options)
}

/// Human readable reason for a refused ConnAck
pub fn describe_refusal(code: ConnectReturnCode) -> String {
    let reason = match code {
        ConnectReturnCode::Success => "Connection accepted".to_string(),
        ConnectReturnCode::RefusedProtocolVersion => "Incorrect protocol version".to_string(),
        ConnectReturnCode::BadClientId => "Invalid client identifier".to_string(),
        ConnectReturnCode::ServiceUnavailable => "Server unavailable".to_string(),
        ConnectReturnCode::BadUserNamePassword => "Bad username or password".to_string(),
        ConnectReturnCode::NotAuthorized => "Not authorized".to_string(),
    };
    sanitize_error_message(&reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_config_default() {
        let config = ReconnectConfig::default();
        assert_eq!(config.backoff_pattern, vec![25, 50, 100, 250]);
        assert_eq!(config.sustained_delay, 250);
    }

    #[test]
    fn test_calculate_backoff_delay() {
        let config = ReconnectConfig::default();

        assert_eq!(config.calculate_backoff_delay(1), 25);
        assert_eq!(config.calculate_backoff_delay(2), 50);
        assert_eq!(config.calculate_backoff_delay(3), 100);
        assert_eq!(config.calculate_backoff_delay(4), 250);
        assert_eq!(config.calculate_backoff_delay(5), 250);
        assert_eq!(config.calculate_backoff_delay(100), 250);

        let empty = ReconnectConfig {
            backoff_pattern: vec![],
            sustained_delay: 10,
        };
        assert_eq!(empty.calculate_backoff_delay(1), 10);
    }

    #[test]
    fn test_quickstart_defaults_to_plain_1883() {
        let endpoint =
            resolve_endpoint("quickstart", "internetofthings.ibmcloud.com", None).unwrap();
        assert_eq!(
            endpoint.host,
            "quickstart.messaging.internetofthings.ibmcloud.com"
        );
        assert_eq!(endpoint.port, 1883);
        assert!(!endpoint.tls);
    }

    #[test]
    fn test_registered_org_defaults_to_tls_8883() {
        let endpoint = resolve_endpoint("myorg", "example.com", None).unwrap();
        assert_eq!(endpoint.address(), "myorg.messaging.example.com:8883");
        assert!(endpoint.tls);
    }

    #[test]
    fn test_port_overrides() {
        for (port, tls) in [(80, false), (1883, false), (443, true), (8883, true)] {
            let endpoint = resolve_endpoint("myorg", "example.com", Some(port)).unwrap();
            assert_eq!(endpoint.port, port);
            assert_eq!(endpoint.tls, tls, "port {port}");
        }
    }

    #[test]
    fn test_unsupported_port() {
        let err = resolve_endpoint("myorg", "example.com", Some(1234)).unwrap_err();
        assert!(matches!(err, MqttError::InvalidConfiguration(_)));
        assert!(err
            .to_string()
            .contains("Unsupported value for port override: 1234"));
    }

    #[test]
    fn test_configure_mqtt_options() {
        let mut settings = MqttSettings::new("d:myorg:type:dev", "myorg", "example.com");
        settings.username = Some("use-token-auth".to_string());
        settings.password = Some("secret".to_string());
        settings.clean_start = true;

        let options = configure_mqtt_options(&settings).unwrap();
        assert_eq!(options.client_id(), "d:myorg:type:dev");
        assert_eq!(
            options.broker_address(),
            ("myorg.messaging.example.com".to_string(), 8883)
        );
        assert!(!options.clean_session());
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
        assert_eq!(
            options.credentials(),
            Some(("use-token-auth".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn test_configure_rejects_short_keep_alive() {
        let mut settings = MqttSettings::new("a:quickstart:app", "quickstart", "example.com");
        settings.keep_alive = Duration::from_secs(3);
        assert!(matches!(
            configure_mqtt_options(&settings),
            Err(MqttError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_missing_ca_file() {
        let mut settings = MqttSettings::new("d:o:t:d", "o", "example.com");
        settings.ca_file = Some(PathBuf::from("/nonexistent/ca.pem"));
        assert!(matches!(
            configure_mqtt_options(&settings),
            Err(MqttError::CaFile { .. })
        ));
    }

    #[test]
    fn test_refusal_reasons() {
        assert_eq!(
            describe_refusal(ConnectReturnCode::RefusedProtocolVersion),
            "Incorrect protocol version"
        );
        assert_eq!(
            describe_refusal(ConnectReturnCode::BadClientId),
            "Invalid client identifier"
        );
        assert_eq!(
            describe_refusal(ConnectReturnCode::ServiceUnavailable),
            "Server unavailable"
        );
        assert_eq!(
            describe_refusal(ConnectReturnCode::BadUserNamePassword),
            "Bad username or password"
        );
        assert_eq!(
            describe_refusal(ConnectReturnCode::NotAuthorized),
            "Not authorized"
        );
    }

    #[test]
    fn test_connection_state_equality() {
        assert_eq!(ConnectionState::Connected, ConnectionState::Connected);
        assert_ne!(
            ConnectionState::Connected,
            ConnectionState::Disconnected("test".to_string())
        );
    }
}
