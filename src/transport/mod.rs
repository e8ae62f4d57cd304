//! Transport layer for session communication
//!
//! The session manager never touches sockets or MQTT framing. It drives a
//! [`Transport`], which performs the CONNECT handshake and hands back a
//! per-link stream of [`TransportEvent`]s, and which publishes and subscribes
//! on behalf of the session.

use crate::session::{ConnectionConfig, InboundMessage, OutboundMessage, Subscription};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mqtt;

/// Errors reported by a transport implementation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("network failure: {0}")]
    Network(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport is not connected")]
    Closed,
}

/// Why a link went away
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    NetworkError(String),
    BrokerClosed,
    KeepAliveTimeout,
    ProtocolError(String),
    /// The transport was asked to disconnect
    LocalClose,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::NetworkError(e) => write!(f, "network error: {e}"),
            DisconnectReason::BrokerClosed => write!(f, "broker closed the connection"),
            DisconnectReason::KeepAliveTimeout => write!(f, "keep-alive timeout"),
            DisconnectReason::ProtocolError(e) => write!(f, "protocol error: {e}"),
            DisconnectReason::LocalClose => write!(f, "closed locally"),
        }
    }
}

/// Asynchronous notification from an established link
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(InboundMessage),
    Disconnected(DisconnectReason),
}

/// Stream of events for one established link
pub type TransportEvents = mpsc::Receiver<TransportEvent>;

/// Transport abstraction over an MQTT client library
///
/// Exclusively owned by one session. The session serializes calls, so
/// implementations never see two operations at once.
#[async_trait::async_trait]
pub trait Transport: Send + 'static {
    /// Perform the CONNECT handshake, giving up after `timeout`
    ///
    /// On success returns the event stream of the new link. The link is
    /// considered lost once the stream yields
    /// [`TransportEvent::Disconnected`] or closes.
    async fn connect(
        &mut self,
        config: &ConnectionConfig,
        timeout: Duration,
    ) -> Result<TransportEvents, TransportError>;

    /// Send one PUBLISH; resolves once the transport accepted it for sending
    async fn publish(&mut self, message: &OutboundMessage) -> Result<(), TransportError>;

    /// Request the given filters, in order, in a single SUBSCRIBE
    async fn subscribe(&mut self, subscriptions: &[Subscription]) -> Result<(), TransportError>;

    /// Close the current link, if any
    async fn disconnect(&mut self) -> Result<(), TransportError>;
}
