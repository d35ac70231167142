//! Client configuration
//!
//! Device, gateway and application clients are configured from a TOML file
//! or from `WIOTP_*` environment variables. Both sources produce the same
//! structures and go through the same validation.
//!
//! ```toml
//! [identity]
//! orgId = "org1id"
//! typeId = "raspberry-pi-3"
//! deviceId = "00ef08ac05"
//!
//! [auth]
//! token = "Ab$76s)asj8_s5"
//!
//! [options]
//! domain = "internetofthings.ibmcloud.com"
//! logLevel = "info"
//!
//! [options.mqtt]
//! port = 8883
//! cleanStart = true
//! ```

use crate::transport::mqtt::{MqttError, MqttSettings};
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_DOMAIN: &str = "internetofthings.ibmcloud.com";
pub const QUICKSTART_ORG: &str = "quickstart";
/// MQTT username used by devices and gateways authenticating with a token
pub const TOKEN_AUTH_USERNAME: &str = "use-token-auth";

const LOG_LEVELS: [&str; 4] = ["error", "warning", "info", "debug"];
const SUPPORTED_PORTS: [u16; 4] = [80, 443, 1883, 8883];

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Missing {0} environment variable")]
    EnvVarNotFound(String),
    #[error("Missing {0} from configuration")]
    Missing(String),
    #[error("{0}")]
    InvalidConfig(String),
}

impl ConfigError {
    pub fn missing<S: Into<String>>(field: S) -> Self {
        Self::Missing(field.into())
    }

    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig(message.into())
    }
}

/// Log level accepted by `options.logLevel`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    Warning,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "error" => Some(LogLevel::Error),
            "warning" => Some(LogLevel::Warning),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            _ => None,
        }
    }

    /// Level name understood by tracing's env filter
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warning => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

/// `[options]` section shared by every client kind
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientOptions {
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub mqtt: MqttOptions,
    /// Only used by application clients
    #[serde(default)]
    pub http: HttpOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            log_level: default_log_level(),
            mqtt: MqttOptions::default(),
            http: HttpOptions::default(),
        }
    }
}

/// `[options.mqtt]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MqttOptions {
    /// One of 80, 443, 1883, 8883; chosen from the organization when absent
    pub port: Option<u16>,
    #[serde(default = "default_transport")]
    pub transport: String,
    /// Resume the previous session instead of starting a clean one
    #[serde(default)]
    pub clean_start: bool,
    #[serde(default = "default_session_expiry")]
    pub session_expiry: u64,
    #[serde(default = "default_keep_alive")]
    pub keep_alive: u64,
    pub ca_file: Option<PathBuf>,
    /// Shared-subscription instance of an application
    pub instance_id: Option<String>,
}

impl Default for MqttOptions {
    fn default() -> Self {
        Self {
            port: None,
            transport: default_transport(),
            clean_start: false,
            session_expiry: default_session_expiry(),
            keep_alive: default_keep_alive(),
            ca_file: None,
            instance_id: None,
        }
    }
}

/// `[options.http]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpOptions {
    /// Verify the registry API's TLS certificate
    #[serde(default = "default_verify")]
    pub verify: bool,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            verify: default_verify(),
        }
    }
}

fn default_domain() -> String {
    DEFAULT_DOMAIN.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_transport() -> String {
    "tcp".to_string()
}

fn default_session_expiry() -> u64 {
    3600
}

fn default_keep_alive() -> u64 {
    60
}

fn default_verify() -> bool {
    true
}

fn default_auth_method() -> String {
    "token".to_string()
}

fn default_app_id() -> String {
    Uuid::new_v4().to_string()
}

impl ClientOptions {
    pub fn log_level(&self) -> LogLevel {
        LogLevel::parse(&self.log_level).unwrap_or_default()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if LogLevel::parse(&self.log_level).is_none() {
            return Err(ConfigError::invalid(format!(
                "Optional setting options.logLevel must be one of {}",
                LOG_LEVELS.join(", ")
            )));
        }
        if self.mqtt.transport != "tcp" {
            return Err(ConfigError::invalid(format!(
                "Unsupported value for options.mqtt.transport: {}. Only tcp is supported",
                self.mqtt.transport
            )));
        }
        if let Some(port) = self.mqtt.port {
            if !SUPPORTED_PORTS.contains(&port) {
                return Err(ConfigError::invalid(format!(
                    "Unsupported value for port override: {port}. Supported values are 80, 443, 1883 & 8883"
                )));
            }
        }
        if self.mqtt.keep_alive != 0 && self.mqtt.keep_alive < 5 {
            return Err(ConfigError::invalid(
                "Optional setting options.mqtt.keepAlive must be 0 or at least 5 seconds",
            ));
        }
        Ok(())
    }

    /// Read the `WIOTP_OPTIONS_*` variables common to every client kind
    fn from_lookup<F>(lookup: &F, clean_start_default: &str) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let log_level = lookup("WIOTP_OPTIONS_LOGLEVEL").unwrap_or_else(default_log_level);
        if LogLevel::parse(&log_level).is_none() {
            return Err(ConfigError::invalid(format!(
                "WIOTP_OPTIONS_LOGLEVEL must be one of {}",
                LOG_LEVELS.join(", ")
            )));
        }

        let port = lookup("WIOTP_OPTIONS_MQTT_PORT")
            .map(|port| {
                port.trim()
                    .parse::<u16>()
                    .map_err(|_| ConfigError::invalid("WIOTP_OPTIONS_MQTT_PORT must be a number"))
            })
            .transpose()?;
        let session_expiry = parse_number(lookup, "WIOTP_OPTIONS_MQTT_SESSIONEXPIRY", "3600")?;
        let keep_alive = parse_number(lookup, "WIOTP_OPTIONS_MQTT_KEEPALIVE", "60")?;
        let clean_start = lookup("WIOTP_OPTIONS_MQTT_CLEANSTART")
            .unwrap_or_else(|| clean_start_default.to_string());

        Ok(Self {
            domain: lookup("WIOTP_OPTIONS_DOMAIN").unwrap_or_else(default_domain),
            log_level,
            mqtt: MqttOptions {
                port,
                transport: lookup("WIOTP_OPTIONS_MQTT_TRANSPORT").unwrap_or_else(default_transport),
                clean_start: is_truthy(&clean_start),
                session_expiry,
                keep_alive,
                ca_file: lookup("WIOTP_OPTIONS_MQTT_CAFILE").map(PathBuf::from),
                instance_id: None,
            },
            http: HttpOptions::default(),
        })
    }

    fn mqtt_settings(&self, client_id: String, org_id: &str) -> MqttSettings {
        let mut settings = MqttSettings::new(client_id, org_id, &self.domain);
        settings.port = self.mqtt.port;
        settings.clean_start = self.mqtt.clean_start;
        settings.keep_alive = Duration::from_secs(self.mqtt.keep_alive);
        settings.ca_file = self.mqtt.ca_file.clone();
        settings
    }
}

fn parse_number<F>(lookup: &F, name: &str, default: &str) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .unwrap_or_else(|| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(format!("{name} must be a number")))
}

fn is_truthy(value: &str) -> bool {
    matches!(value, "True" | "true" | "1")
}

fn require<F>(lookup: &F, name: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).ok_or_else(|| ConfigError::EnvVarNotFound(name.to_string()))
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// `[identity]` of a device or gateway
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    pub org_id: Option<String>,
    pub type_id: Option<String>,
    pub device_id: Option<String>,
}

/// `[auth]` of a device or gateway
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceAuth {
    pub token: Option<String>,
    /// Only token authentication is supported
    #[serde(default = "default_auth_method")]
    pub method: String,
}

/// Device client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    #[serde(default)]
    pub identity: DeviceIdentity,
    pub auth: Option<DeviceAuth>,
    #[serde(default)]
    pub options: ClientOptions,
}

impl DeviceConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: DeviceConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from `WIOTP_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    /// Build configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let org_id = require(&lookup, "WIOTP_IDENTITY_ORGID")?;
        let type_id = require(&lookup, "WIOTP_IDENTITY_TYPEID")?;
        let device_id = require(&lookup, "WIOTP_IDENTITY_DEVICEID")?;
        let token = lookup("WIOTP_AUTH_TOKEN");
        if org_id != QUICKSTART_ORG && token.is_none() {
            return Err(ConfigError::EnvVarNotFound("WIOTP_AUTH_TOKEN".to_string()));
        }

        let config = Self {
            identity: DeviceIdentity {
                org_id: Some(org_id),
                type_id: Some(type_id),
                device_id: Some(device_id),
            },
            auth: token.map(|token| DeviceAuth {
                token: Some(token),
                method: default_auth_method(),
            }),
            options: ClientOptions::from_lookup(&lookup, "False")?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let org_id = self
            .identity
            .org_id
            .as_deref()
            .ok_or_else(|| ConfigError::missing("identity.orgId"))?;
        if self.identity.type_id.is_none() {
            return Err(ConfigError::missing("identity.typeId"));
        }
        if self.identity.device_id.is_none() {
            return Err(ConfigError::missing("identity.deviceId"));
        }

        if org_id == QUICKSTART_ORG {
            if self.auth.is_some() {
                return Err(ConfigError::invalid(
                    "Quickstart service does not support device authentication",
                ));
            }
        } else {
            let auth = self.auth.as_ref().ok_or_else(|| ConfigError::missing("auth"))?;
            if auth.token.is_none() {
                return Err(ConfigError::missing("auth.token"));
            }
        }

        self.options.validate()
    }

    pub fn org_id(&self) -> &str {
        self.identity.org_id.as_deref().unwrap_or_default()
    }

    pub fn type_id(&self) -> &str {
        self.identity.type_id.as_deref().unwrap_or_default()
    }

    pub fn device_id(&self) -> &str {
        self.identity.device_id.as_deref().unwrap_or_default()
    }

    pub fn is_quickstart(&self) -> bool {
        self.org_id() == QUICKSTART_ORG
    }

    /// `d:{org}:{type}:{device}`
    pub fn client_id(&self) -> String {
        format!("d:{}:{}:{}", self.org_id(), self.type_id(), self.device_id())
    }

    pub fn username(&self) -> Option<&str> {
        self.auth.as_ref().map(|_| TOKEN_AUTH_USERNAME)
    }

    pub fn password(&self) -> Option<&str> {
        self.auth.as_ref().and_then(|auth| auth.token.as_deref())
    }

    pub fn log_level(&self) -> LogLevel {
        self.options.log_level()
    }

    /// MQTT session settings for a device connection
    pub fn mqtt_settings(&self) -> Result<MqttSettings, MqttError> {
        self.mqtt_settings_for(self.client_id())
    }

    fn mqtt_settings_for(&self, client_id: String) -> Result<MqttSettings, MqttError> {
        if let Some(auth) = &self.auth {
            if auth.method != "token" {
                return Err(MqttError::UnsupportedAuthenticationMethod(
                    auth.method.clone(),
                ));
            }
        }

        let mut settings = self.options.mqtt_settings(client_id, self.org_id());
        settings.username = self.username().map(str::to_string);
        settings.password = self.password().map(str::to_string);
        Ok(settings)
    }
}

/// Gateway client configuration
///
/// Same shape and rules as a device; only the client id differs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct GatewayConfig(pub DeviceConfig);

impl GatewayConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        DeviceConfig::load_from_file(path).map(Self)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        DeviceConfig::from_env().map(Self)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        DeviceConfig::from_lookup(lookup).map(Self)
    }

    /// `g:{org}:{type}:{device}`
    pub fn client_id(&self) -> String {
        format!("g:{}:{}:{}", self.org_id(), self.type_id(), self.device_id())
    }

    pub fn mqtt_settings(&self) -> Result<MqttSettings, MqttError> {
        self.0.mqtt_settings_for(self.client_id())
    }
}

impl Deref for GatewayConfig {
    type Target = DeviceConfig;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// `[identity]` of an application
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationIdentity {
    #[serde(default = "default_app_id")]
    pub app_id: String,
}

impl Default for ApplicationIdentity {
    fn default() -> Self {
        Self {
            app_id: default_app_id(),
        }
    }
}

/// `[auth]` of an application: an API key and its token
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ApplicationAuth {
    pub key: Option<String>,
    pub token: Option<String>,
}

/// Application client configuration
///
/// Without `[auth]` the application connects to quickstart.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ApplicationConfig {
    #[serde(default)]
    pub identity: ApplicationIdentity,
    pub auth: Option<ApplicationAuth>,
    #[serde(default)]
    pub options: ClientOptions,
}

impl ApplicationConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ApplicationConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    /// Build configuration from any variable source
    ///
    /// `WIOTP_API_KEY`/`WIOTP_API_TOKEN` are used when neither
    /// `WIOTP_AUTH_KEY` nor `WIOTP_AUTH_TOKEN` is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut key = lookup("WIOTP_AUTH_KEY");
        let mut token = lookup("WIOTP_AUTH_TOKEN");
        if key.is_none() && token.is_none() {
            key = lookup("WIOTP_API_KEY");
            token = lookup("WIOTP_API_TOKEN");
        }

        let mut options = ClientOptions::from_lookup(&lookup, "True")?;
        options.mqtt.instance_id = lookup("WIOTP_OPTIONS_MQTT_INSTANCEID");
        options.http.verify = is_truthy(
            &lookup("WIOTP_OPTIONS_HTTP_VERIFY").unwrap_or_else(|| "True".to_string()),
        );

        let config = Self {
            identity: ApplicationIdentity {
                app_id: lookup("WIOTP_IDENTITY_APPID").unwrap_or_else(default_app_id),
            },
            auth: token.map(|token| ApplicationAuth {
                key,
                token: Some(token),
            }),
            options,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(auth) = &self.auth {
            let key = auth
                .key
                .as_deref()
                .ok_or_else(|| ConfigError::missing("auth.key"))?;
            if auth.token.is_none() {
                return Err(ConfigError::missing("auth.token"));
            }
            if key.split('-').nth(1).map_or(true, str::is_empty) {
                return Err(ConfigError::invalid(format!(
                    "auth.key must have the form a-{{orgId}}-{{suffix}}, got: {key}"
                )));
            }
        }
        self.options.validate()
    }

    pub fn api_key(&self) -> Option<&str> {
        self.auth.as_ref().and_then(|auth| auth.key.as_deref())
    }

    pub fn api_token(&self) -> Option<&str> {
        self.auth.as_ref().and_then(|auth| auth.token.as_deref())
    }

    /// Organization encoded in the API key (`a-{org}-...`), quickstart without one
    pub fn org_id(&self) -> &str {
        self.api_key()
            .and_then(|key| key.split('-').nth(1))
            .unwrap_or(QUICKSTART_ORG)
    }

    pub fn app_id(&self) -> &str {
        &self.identity.app_id
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.options.mqtt.instance_id.as_deref()
    }

    pub fn is_quickstart(&self) -> bool {
        self.org_id() == QUICKSTART_ORG
    }

    /// `a:{org}:{app}`, or `A:{org}:{app}:{instance}` for shared subscriptions
    pub fn client_id(&self) -> String {
        match self.instance_id() {
            Some(instance) => format!("A:{}:{}:{}", self.org_id(), self.app_id(), instance),
            None => format!("a:{}:{}", self.org_id(), self.app_id()),
        }
    }

    /// Registry API host: `{org}.{domain}`
    pub fn api_host(&self) -> String {
        format!("{}.{}", self.org_id(), self.options.domain)
    }

    pub fn log_level(&self) -> LogLevel {
        self.options.log_level()
    }

    pub fn mqtt_settings(&self) -> MqttSettings {
        let mut settings = self
            .options
            .mqtt_settings(self.client_id(), self.org_id());
        settings.username = self.api_key().map(str::to_string);
        settings.password = self.api_token().map(str::to_string);
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    fn device_toml(extra: &str) -> String {
        format!(
            r#"
[identity]
orgId = "myorg"
typeId = "raspberry-pi-3"
deviceId = "00ef08ac05"

[auth]
token = "Ab$76s)asj8_s5"
{extra}
"#
        )
    }

    #[test]
    fn test_device_config_defaults() {
        let config: DeviceConfig = toml::from_str(&device_toml("")).unwrap();
        config.validate().unwrap();

        assert_eq!(config.options.domain, DEFAULT_DOMAIN);
        assert_eq!(config.log_level(), LogLevel::Info);
        assert_eq!(config.options.mqtt.port, None);
        assert_eq!(config.options.mqtt.transport, "tcp");
        assert!(!config.options.mqtt.clean_start);
        assert_eq!(config.options.mqtt.session_expiry, 3600);
        assert_eq!(config.options.mqtt.keep_alive, 60);
        assert_eq!(config.options.mqtt.ca_file, None);
        assert_eq!(config.client_id(), "d:myorg:raspberry-pi-3:00ef08ac05");
        assert_eq!(config.username(), Some("use-token-auth"));
        assert_eq!(config.password(), Some("Ab$76s)asj8_s5"));
    }

    #[test]
    fn test_device_missing_identity_fields() {
        let config: DeviceConfig = toml::from_str("[identity]\norgId = \"myorg\"").unwrap();
        assert_eq!(
            config.validate().unwrap_err().to_string(),
            "Missing identity.typeId from configuration"
        );

        let config = DeviceConfig::default();
        assert_eq!(
            config.validate().unwrap_err().to_string(),
            "Missing identity.orgId from configuration"
        );
    }

    #[test]
    fn test_quickstart_rejects_auth() {
        let toml = device_toml("").replace("myorg", "quickstart");
        let config: DeviceConfig = toml::from_str(&toml).unwrap();
        assert_eq!(
            config.validate().unwrap_err().to_string(),
            "Quickstart service does not support device authentication"
        );
    }

    #[test]
    fn test_registered_org_requires_token() {
        let config: DeviceConfig = toml::from_str(
            "[identity]\norgId = \"myorg\"\ntypeId = \"t\"\ndeviceId = \"d\"",
        )
        .unwrap();
        assert_eq!(
            config.validate().unwrap_err().to_string(),
            "Missing auth from configuration"
        );

        let config: DeviceConfig = toml::from_str(
            "[identity]\norgId = \"myorg\"\ntypeId = \"t\"\ndeviceId = \"d\"\n[auth]\n",
        )
        .unwrap();
        assert_eq!(
            config.validate().unwrap_err().to_string(),
            "Missing auth.token from configuration"
        );
    }

    #[test]
    fn test_invalid_options() {
        let config: DeviceConfig =
            toml::from_str(&device_toml("[options]\nlogLevel = \"verbose\"")).unwrap();
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("must be one of error, warning, info, debug"));

        let config: DeviceConfig = toml::from_str(&device_toml(
            "[options.mqtt]\ntransport = \"websockets\"",
        ))
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));

        let config: DeviceConfig =
            toml::from_str(&device_toml("[options.mqtt]\nport = 1234")).unwrap();
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("Unsupported value for port override"));
    }

    #[test]
    fn test_unsupported_auth_method() {
        let toml = device_toml("").replace(
            "token = \"Ab$76s)asj8_s5\"",
            "token = \"x\"\nmethod = \"certificate\"",
        );
        let config: DeviceConfig = toml::from_str(&toml).unwrap();
        let err = config.mqtt_settings().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unsupported authentication method: certificate"
        );
    }

    #[test]
    fn test_device_mqtt_settings() {
        let config: DeviceConfig = toml::from_str(&device_toml(
            "[options.mqtt]\nport = 443\ncleanStart = true\nkeepAlive = 30",
        ))
        .unwrap();
        let settings = config.mqtt_settings().unwrap();

        assert_eq!(settings.client_id, "d:myorg:raspberry-pi-3:00ef08ac05");
        assert_eq!(settings.org_id, "myorg");
        assert_eq!(settings.port, Some(443));
        assert!(settings.clean_start);
        assert_eq!(settings.keep_alive, Duration::from_secs(30));
        assert_eq!(settings.username.as_deref(), Some("use-token-auth"));
    }

    #[test]
    fn test_gateway_client_id() {
        let config = GatewayConfig(toml::from_str(&device_toml("")).unwrap());
        assert_eq!(config.client_id(), "g:myorg:raspberry-pi-3:00ef08ac05");
        assert_eq!(
            config.mqtt_settings().unwrap().client_id,
            "g:myorg:raspberry-pi-3:00ef08ac05"
        );
    }

    #[test]
    fn test_device_from_env() {
        let config = DeviceConfig::from_lookup(lookup_from(&[
            ("WIOTP_IDENTITY_ORGID", "myorg"),
            ("WIOTP_IDENTITY_TYPEID", "t"),
            ("WIOTP_IDENTITY_DEVICEID", "d"),
            ("WIOTP_AUTH_TOKEN", "secret"),
            ("WIOTP_OPTIONS_MQTT_PORT", "1883"),
            ("WIOTP_OPTIONS_MQTT_CLEANSTART", "true"),
        ]))
        .unwrap();

        assert_eq!(config.client_id(), "d:myorg:t:d");
        assert_eq!(config.password(), Some("secret"));
        assert_eq!(config.options.mqtt.port, Some(1883));
        assert!(config.options.mqtt.clean_start);
    }

    #[test]
    fn test_device_env_errors() {
        let err = DeviceConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing WIOTP_IDENTITY_ORGID environment variable"
        );

        let err = DeviceConfig::from_lookup(lookup_from(&[
            ("WIOTP_IDENTITY_ORGID", "myorg"),
            ("WIOTP_IDENTITY_TYPEID", "t"),
            ("WIOTP_IDENTITY_DEVICEID", "d"),
        ]))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing WIOTP_AUTH_TOKEN environment variable"
        );

        let err = DeviceConfig::from_lookup(lookup_from(&[
            ("WIOTP_IDENTITY_ORGID", "quickstart"),
            ("WIOTP_IDENTITY_TYPEID", "t"),
            ("WIOTP_IDENTITY_DEVICEID", "d"),
            ("WIOTP_OPTIONS_MQTT_KEEPALIVE", "soon"),
        ]))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "WIOTP_OPTIONS_MQTT_KEEPALIVE must be a number"
        );
    }

    #[test]
    fn test_quickstart_device_from_env_without_token() {
        let config = DeviceConfig::from_lookup(lookup_from(&[
            ("WIOTP_IDENTITY_ORGID", "quickstart"),
            ("WIOTP_IDENTITY_TYPEID", "t"),
            ("WIOTP_IDENTITY_DEVICEID", "d"),
        ]))
        .unwrap();
        assert!(config.is_quickstart());
        assert!(config.auth.is_none());
        assert!(!config.options.mqtt.clean_start);
    }

    #[test]
    fn test_application_from_file_shape() {
        let config: ApplicationConfig = toml::from_str(
            r#"
[identity]
appId = "myApp"

[auth]
key = "a-23gh56-sdsdajhjnee"
token = "Ab$76s)asj8_s5"

[options.mqtt]
instanceId = "myInstance"

[options.http]
verify = false
"#,
        )
        .unwrap();
        config.validate().unwrap();

        assert_eq!(config.org_id(), "23gh56");
        assert_eq!(config.client_id(), "A:23gh56:myApp:myInstance");
        assert_eq!(config.api_host(), "23gh56.internetofthings.ibmcloud.com");
        assert!(!config.options.http.verify);

        let settings = config.mqtt_settings();
        assert_eq!(settings.username.as_deref(), Some("a-23gh56-sdsdajhjnee"));
        assert_eq!(settings.password.as_deref(), Some("Ab$76s)asj8_s5"));
    }

    #[test]
    fn test_application_quickstart_defaults() {
        let config: ApplicationConfig = toml::from_str("").unwrap();
        config.validate().unwrap();

        assert!(config.is_quickstart());
        assert!(Uuid::parse_str(config.app_id()).is_ok());
        assert_eq!(config.client_id(), format!("a:quickstart:{}", config.app_id()));
        assert!(config.options.http.verify);
        assert!(config.mqtt_settings().username.is_none());
    }

    #[test]
    fn test_application_auth_validation() {
        let config: ApplicationConfig = toml::from_str("[auth]\ntoken = \"t\"").unwrap();
        assert_eq!(
            config.validate().unwrap_err().to_string(),
            "Missing auth.key from configuration"
        );

        let config: ApplicationConfig = toml::from_str("[auth]\nkey = \"a-org-x\"").unwrap();
        assert_eq!(
            config.validate().unwrap_err().to_string(),
            "Missing auth.token from configuration"
        );

        let config: ApplicationConfig =
            toml::from_str("[auth]\nkey = \"malformed\"\ntoken = \"t\"").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_application_from_env() {
        let config = ApplicationConfig::from_lookup(lookup_from(&[
            ("WIOTP_API_KEY", "a-myorg-abc"),
            ("WIOTP_API_TOKEN", "tok"),
            ("WIOTP_IDENTITY_APPID", "monitor"),
            ("WIOTP_OPTIONS_HTTP_VERIFY", "false"),
        ]))
        .unwrap();

        assert_eq!(config.client_id(), "a:myorg:monitor");
        assert!(config.options.mqtt.clean_start);
        assert!(!config.options.http.verify);

        let err = ApplicationConfig::from_lookup(lookup_from(&[(
            "WIOTP_OPTIONS_LOGLEVEL",
            "trace",
        )]))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "WIOTP_OPTIONS_LOGLEVEL must be one of error, warning, info, debug"
        );
    }

    #[test]
    fn test_auth_vars_take_precedence_over_api_vars() {
        let config = ApplicationConfig::from_lookup(lookup_from(&[
            ("WIOTP_AUTH_KEY", "a-first-1"),
            ("WIOTP_AUTH_TOKEN", "t1"),
            ("WIOTP_API_KEY", "a-second-2"),
            ("WIOTP_API_TOKEN", "t2"),
        ]))
        .unwrap();
        assert_eq!(config.org_id(), "first");
    }
}
