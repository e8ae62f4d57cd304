//! MQTT client session management
//!
//! A long-lived MQTT client session with explicit lifecycle states, automatic
//! reconnection with backoff, subscriptions that survive reconnects and
//! callbacks for connect, message and disconnect events.
//!
//! # Overview
//!
//! - [`session`] - the session manager, its state machine and message types
//! - [`transport`] - the transport abstraction and its `rumqttc` implementation
//! - [`config`] - TOML configuration for the demo binary
//! - [`observability`] - structured logging and per-session metrics
//! - [`testing`] - a scriptable mock transport
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_session::session::{ConnectionConfig, ConnectionState, OutboundMessage, SessionManager};
//! use mqtt_session::testing::MockTransport;
//! use mqtt_session::SessionError;
//!
//! # tokio_test::block_on(async {
//! let session = SessionManager::new(
//!     ConnectionConfig::new("C1", "localhost", 1884),
//!     MockTransport::new(),
//! );
//!
//! // Publishing before connect is rejected, never queued
//! let result = session.publish(OutboundMessage::new("topicA")).await;
//! assert!(matches!(result, Err(SessionError::NotConnected { .. })));
//!
//! session.connect().await.unwrap();
//! assert_eq!(session.state(), ConnectionState::Connected);
//! session.stop().await;
//! # });
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{AppConfig, ConfigError};
pub use error::{sanitize_error_message, SessionError, SessionResult};
pub use session::{
    ConnectionConfig, ConnectionState, InboundMessage, OutboundMessage, QoS, SessionEvent,
    SessionHandler, SessionManager, SessionOptions,
};
pub use transport::mqtt::RumqttcTransport;
pub use transport::{DisconnectReason, Transport, TransportError};
