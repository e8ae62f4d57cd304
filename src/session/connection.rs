//! Connection configuration, connection state and reconnection policy
//!
//! Everything in this module is plain data: it is built once at startup and
//! then only read by the session manager.

use std::fmt;
use std::time::Duration;

/// Default broker keep-alive interval
pub const DEFAULT_KEEP_ALIVE_SECS: u16 = 60;

/// Immutable broker connection parameters
///
/// An empty username means the CONNECT carries no credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    client_id: String,
    username: String,
    password: String,
    host: String,
    port: u16,
    keep_alive_secs: u16,
}

impl ConnectionConfig {
    /// Config without credentials and with the default keep-alive
    pub fn new(client_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            client_id: client_id.into(),
            username: String::new(),
            password: String::new(),
            host: host.into(),
            port,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
        }
    }

    /// Username and password sent in CONNECT
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Keep-alive interval in seconds; the transport pings within it
    pub fn with_keep_alive(mut self, keep_alive_secs: u16) -> Self {
        self.keep_alive_secs = keep_alive_secs;
        self
    }

    /// MQTT client identifier
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Username, empty when no credentials are configured
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Password; never logged
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Broker host name or address
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Broker TCP port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Keep-alive interval
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(u64::from(self.keep_alive_secs))
    }

    /// Whether CONNECT carries a username and password
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }

    /// `host:port` form used in log lines
    pub fn broker_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .field("host", &self.host)
            .field("port", &self.port)
            .field("keep_alive_secs", &self.keep_alive_secs)
            .finish()
    }
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected and not trying to be
    #[default]
    Disconnected,
    /// A handshake is in flight
    Connecting,
    /// Handshake completed; publish and subscribe go straight to the transport
    Connected,
    /// Link lost, waiting out the backoff before reconnect attempt `n`
    Reconnecting(u32),
}

impl ConnectionState {
    pub fn can_publish(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Whether a connection is established or being worked on
    pub fn is_active(&self) -> bool {
        !matches!(self, ConnectionState::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting(attempt) => {
                write!(f, "reconnecting (attempt {attempt})")
            }
        }
    }
}

/// Reconnection configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Escalating delays in milliseconds used before `sustained_delay` takes over
    pub backoff_pattern: Vec<u64>,
    /// Delay in milliseconds once the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: Vec::new(),
            sustained_delay: 5_000,
        }
    }
}

impl ReconnectConfig {
    /// Fixed delay between every attempt
    pub fn fixed(delay: Duration) -> Self {
        Self {
            sustained_delay: delay.as_millis() as u64,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Backoff delay in milliseconds before reconnect `attempt` (1-based)
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }

    /// Sum of all backoff delays, or None if retries are unlimited
    pub fn calculate_max_total_time(&self) -> Option<u64> {
        self.max_attempts.map(|max_attempts| {
            (1..=max_attempts)
                .map(|attempt| self.calculate_backoff_delay(attempt))
                .sum()
        })
    }

    /// Reject a zero attempt cap or a zero sustained delay
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == Some(0) {
            return Err("max_attempts must be greater than 0 or None for unlimited".to_string());
        }
        if self.sustained_delay == 0 {
            return Err("sustained_delay must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Timing and capacity knobs for a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub reconnect: ReconnectConfig,
    /// Upper bound on a single CONNECT handshake
    pub connect_timeout: Duration,
    /// Default upper bound on publish, subscribe and disconnect
    pub operation_timeout: Duration,
    /// Capacity of the session event broadcast channel
    pub event_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            connect_timeout: Duration::from_secs(10),
            operation_timeout: Duration::from_secs(10),
            event_capacity: 256,
        }
    }
}
