//! MQTT client session management
//!
//! A [`SessionManager`] owns one broker connection for its whole life: it
//! performs the handshake, re-applies subscriptions after every connect,
//! hands inbound messages to a [`SessionHandler`], and reconnects with a
//! backoff when the link drops.
//!
//! The module is split the same way the rest of the crate is:
//!
//! - [`connection`] - immutable configuration and the state type
//! - [`lifecycle`] - pure state-transition and reconnection decisions
//! - [`message`] - messages, subscriptions and topic validation
//! - [`events`] - observability events and user callbacks
//! - [`manager`] - the session itself and its background tasks
//!
//! ```rust,no_run
//! use mqtt_session::session::{ConnectionConfig, OutboundMessage, QoS, SessionManager};
//! use mqtt_session::transport::mqtt::RumqttcTransport;
//!
//! # tokio_test::block_on(async {
//! let config = ConnectionConfig::new("MqttClient", "localhost", 1884);
//! let session = SessionManager::new(config, RumqttcTransport::new());
//!
//! session.subscribe("mqttServerTopic").await?;
//! session.connect().await?;
//! session
//!     .publish(OutboundMessage::new("mqttServerTopic").with_payload("Test Message").with_qos(QoS::ExactlyOnce))
//!     .await?;
//! session.stop().await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod connection;
pub mod events;
pub mod lifecycle;
pub mod manager;
pub mod message;

pub use connection::{
    ConnectionConfig, ConnectionState, ReconnectConfig, SessionOptions, DEFAULT_KEEP_ALIVE_SECS,
};
pub use events::{NoopHandler, SessionEvent, SessionHandler};
pub use lifecycle::{ConnectionEvent, Lifecycle, ReconnectionDecision};
pub use manager::{SessionManager, SessionManagerBuilder};
pub use message::{
    validate_publish_topic, validate_topic_filter, InboundMessage, OutboundMessage, QoS,
    Subscription, Subscriptions,
};
