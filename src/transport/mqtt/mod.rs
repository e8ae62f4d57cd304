//! MQTT transport built on `rumqttc`
//!
//! Split the same way as the session layer, pure logic apart from I/O:
//!
//! - [`connection`] - client options and error classification
//! - [`event_router`] - routing decisions for polled events
//! - [`client`] - [`RumqttcTransport`], the impure part
//!
//! ```rust,no_run
//! use mqtt_session::session::ConnectionConfig;
//! use mqtt_session::transport::{mqtt::RumqttcTransport, Transport};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let config = ConnectionConfig::new("MqttClient", "localhost", 1884)
//!     .with_credentials("test", "123456");
//! let mut transport = RumqttcTransport::new();
//! let mut events = transport.connect(&config, Duration::from_secs(10)).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod event_router;

pub use client::RumqttcTransport;
pub use event_router::{route_event, EventRoute};
