//! Configuration for the `mqtt-session` binary
//!
//! Loaded once at startup from a TOML file. Broker credentials are not stored
//! in the file; it names environment variables that are read when the
//! connection config is built.

use crate::session::{
    validate_publish_topic, validate_topic_filter, ConnectionConfig, OutboundMessage, QoS,
    ReconnectConfig, SessionOptions, DEFAULT_KEEP_ALIVE_SECS,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default MQTT port when the broker URL has none
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub client: ClientSection,
    pub broker: BrokerSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub demo: DemoSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSection {
    /// Client identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
    /// Append "-<uuid>" to the identifier so parallel runs do not kick each other off
    #[serde(default)]
    pub unique_suffix: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL, `mqtt://host[:port]` or `tcp://host[:port]`
    pub url: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u16,
}

fn default_keep_alive() -> u16 {
    DEFAULT_KEEP_ALIVE_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSection {
    /// Topic filters subscribed on every connect
    pub topics: Vec<String>,
    pub connect_timeout_secs: u64,
    pub operation_timeout_secs: u64,
    pub reconnect: ReconnectSection,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            topics: Vec::new(),
            connect_timeout_secs: 10,
            operation_timeout_secs: 10,
            reconnect: ReconnectSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectSection {
    /// Delay between attempts once `backoff_pattern_ms` is used up
    pub delay_ms: u64,
    pub backoff_pattern_ms: Vec<u64>,
    /// 0 = retry forever
    pub max_attempts: u32,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            delay_ms: 5_000,
            backoff_pattern_ms: Vec::new(),
            max_attempts: 0,
        }
    }
}

/// Message the demo publishes after every connect
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DemoSection {
    pub message: String,
    pub qos: QoS,
    pub retain: bool,
}

impl Default for DemoSection {
    fn default() -> Self {
        Self {
            message: "Test Message".to_string(),
            qos: QoS::ExactlyOnce,
            retain: false,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid client ID format: {0}")]
    InvalidClientId(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid topic filter '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AppConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_client_id(&self.client.id)?;
        self.broker_host_port()?;

        for topic in &self.session.topics {
            validate_topic_filter(topic).map_err(|e| ConfigError::InvalidTopic {
                topic: topic.clone(),
                reason: e.to_string(),
            })?;
        }

        if self.session.connect_timeout_secs == 0 || self.session.operation_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "session timeouts must be greater than 0".to_string(),
            ));
        }
        if self.broker.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "keep_alive_secs must be greater than 0".to_string(),
            ));
        }
        self.reconnect_config()
            .validate()
            .map_err(ConfigError::InvalidConfig)?;

        Ok(())
    }

    /// Host and port from the broker URL
    pub fn broker_host_port(&self) -> Result<(String, u16), ConfigError> {
        let invalid = || ConfigError::InvalidBrokerUrl(self.broker.url.clone());

        let url = Url::parse(&self.broker.url).map_err(|_| invalid())?;
        match url.scheme() {
            "mqtt" | "tcp" => {}
            scheme => {
                return Err(ConfigError::InvalidBrokerUrl(format!(
                    "{}: unsupported scheme '{scheme}', expected mqtt:// or tcp://",
                    self.broker.url
                )))
            }
        }
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(invalid)?;
        Ok((host.to_string(), url.port().unwrap_or(DEFAULT_MQTT_PORT)))
    }

    /// Client identifier, with a random suffix if configured
    pub fn client_id(&self) -> String {
        if self.client.unique_suffix {
            format!("{}-{}", self.client.id, uuid::Uuid::new_v4())
        } else {
            self.client.id.clone()
        }
    }

    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Get MQTT username from environment variable
    pub fn get_mqtt_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.broker.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn get_mqtt_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.broker.password_env.as_ref())
    }

    /// Connection parameters with credentials resolved from the environment
    pub fn connection_config(&self) -> Result<ConnectionConfig, ConfigError> {
        let (host, port) = self.broker_host_port()?;
        let mut config = ConnectionConfig::new(self.client_id(), host, port)
            .with_keep_alive(self.broker.keep_alive_secs);

        if let Some(username) = self.get_mqtt_username() {
            config = config.with_credentials(username, self.get_mqtt_password().unwrap_or_default());
        }
        Ok(config)
    }

    pub fn reconnect_config(&self) -> ReconnectConfig {
        let reconnect = &self.session.reconnect;
        ReconnectConfig {
            max_attempts: (reconnect.max_attempts > 0).then_some(reconnect.max_attempts),
            backoff_pattern: reconnect.backoff_pattern_ms.clone(),
            sustained_delay: reconnect.delay_ms,
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            reconnect: self.reconnect_config(),
            connect_timeout: Duration::from_secs(self.session.connect_timeout_secs),
            operation_timeout: Duration::from_secs(self.session.operation_timeout_secs),
            ..Default::default()
        }
    }

    /// Demo message addressed to the first configured topic
    ///
    /// None when there is no topic or the first one is a wildcard filter.
    pub fn demo_message(&self) -> Option<OutboundMessage> {
        let topic = self.session.topics.first()?;
        validate_publish_topic(topic).ok()?;
        Some(
            OutboundMessage::new(topic.clone())
                .with_payload(self.demo.message.clone())
                .with_qos(self.demo.qos)
                .with_retain(self.demo.retain),
        )
    }
}

/// Validate client ID format: [a-zA-Z0-9._-]+
fn validate_client_id(client_id: &str) -> Result<(), ConfigError> {
    let valid_chars = client_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if client_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidClientId(format!(
            "Client ID '{client_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_CONFIG: &str = r#"
[client]
id = "MqttClient"

[broker]
url = "mqtt://localhost:1884"
username_env = "MQTT_SESSION_TEST_USER_UNSET"
keep_alive_secs = 30

[session]
topics = ["mqttServerTopic", "sensors/+/temp"]
connect_timeout_secs = 5

[session.reconnect]
delay_ms = 2000
backoff_pattern_ms = [100, 500]
max_attempts = 4

[demo]
message = "hello"
qos = "at_least_once"
retain = true
"#;

    #[test]
    fn test_full_config() {
        let config = AppConfig::parse(FULL_CONFIG).unwrap();
        assert_eq!(config.client.id, "MqttClient");
        assert_eq!(
            config.broker_host_port().unwrap(),
            ("localhost".to_string(), 1884)
        );
        assert_eq!(config.session.operation_timeout_secs, 10);

        let options = config.session_options();
        assert_eq!(options.connect_timeout, Duration::from_secs(5));
        assert_eq!(options.reconnect.max_attempts, Some(4));
        assert_eq!(options.reconnect.calculate_backoff_delay(2), 500);
        assert_eq!(options.reconnect.calculate_backoff_delay(3), 2_000);

        let message = config.demo_message().unwrap();
        assert_eq!(message.topic, "mqttServerTopic");
        assert_eq!(message.qos, QoS::AtLeastOnce);
        assert!(message.retain);
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = AppConfig::parse(
            r#"
[client]
id = "C1"

[broker]
url = "tcp://broker.local"
"#,
        )
        .unwrap();

        assert_eq!(
            config.broker_host_port().unwrap(),
            ("broker.local".to_string(), DEFAULT_MQTT_PORT)
        );
        assert_eq!(config.broker.keep_alive_secs, 60);
        assert!(config.session.topics.is_empty());
        assert!(config.demo_message().is_none());

        let options = config.session_options();
        assert_eq!(options.reconnect.max_attempts, None);
        assert_eq!(options.reconnect.calculate_backoff_delay(1), 5_000);
        assert_eq!(config.demo.message, "Test Message");
        assert_eq!(config.demo.qos, QoS::ExactlyOnce);
    }

    #[test]
    fn test_connection_config_without_credentials() {
        let config = AppConfig::parse(FULL_CONFIG).unwrap();
        let connection = config.connection_config().unwrap();
        assert_eq!(connection.client_id(), "MqttClient");
        assert_eq!(connection.port(), 1884);
        assert_eq!(connection.keep_alive(), Duration::from_secs(30));
        assert!(!connection.has_credentials());
    }

    #[test]
    fn test_unique_suffix() {
        let mut config = AppConfig::parse(FULL_CONFIG).unwrap();
        config.client.unique_suffix = true;
        let first = config.client_id();
        let second = config.client_id();
        assert!(first.starts_with("MqttClient-"));
        assert_ne!(first, second);
    }

    #[test]
    fn test_invalid_client_id() {
        let content = FULL_CONFIG.replace("id = \"MqttClient\"", "id = \"bad id!\"");
        assert!(matches!(
            AppConfig::parse(&content),
            Err(ConfigError::InvalidClientId(_))
        ));
    }

    #[test]
    fn test_rejects_tls_and_unknown_schemes() {
        for url in ["mqtts://localhost:8883", "http://localhost", "not a url"] {
            let content = FULL_CONFIG.replace("mqtt://localhost:1884", url);
            assert!(
                matches!(
                    AppConfig::parse(&content),
                    Err(ConfigError::InvalidBrokerUrl(_))
                ),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn test_invalid_topic_filter() {
        let content = FULL_CONFIG.replace("sensors/+/temp", "sensors/#/temp");
        assert!(matches!(
            AppConfig::parse(&content),
            Err(ConfigError::InvalidTopic { .. })
        ));
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let content = FULL_CONFIG.replace("connect_timeout_secs = 5", "connect_timeout_secs = 0");
        assert!(matches!(
            AppConfig::parse(&content),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_wildcard_first_topic_has_no_demo_message() {
        let content = FULL_CONFIG.replace(
            r#"topics = ["mqttServerTopic", "sensors/+/temp"]"#,
            r#"topics = ["sensors/+/temp"]"#,
        );
        let config = AppConfig::parse(&content).unwrap();
        assert!(config.demo_message().is_none());
    }
}
