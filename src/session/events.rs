//! Session observability events and user callbacks

use async_trait::async_trait;
use serde::Serialize;

use super::manager::SessionManager;
use super::message::{InboundMessage, QoS};
use crate::transport::DisconnectReason;

/// Structured record of something the session did
///
/// Broadcast to every receiver obtained from
/// [`SessionManager::subscribe_events`]. Error text is already sanitized.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    ConnectAttempt { client_id: String, attempt: u32 },
    Connected { client_id: String, resubscribed: usize },
    ConnectFailed { error: String },
    Subscribed { topic_filters: Vec<String> },
    SubscribeFailed { topic_filters: Vec<String>, error: String },
    MessageSent { topic: String, qos: QoS, bytes: usize },
    PublishRejected { topic: String, state: String },
    PublishFailed { topic: String, error: String },
    MessageReceived { topic: String, qos: QoS, retain: bool, bytes: usize },
    Disconnected { reason: String },
    ReconnectScheduled { attempt: u32, delay_ms: u64 },
    ReconnectFailed { attempt: u32, error: String },
    GaveUp { attempts: u32 },
    Stopped,
}

/// Callbacks invoked by the session's dispatcher task
///
/// Calls happen one at a time, in the order the underlying events occurred.
/// A slow handler delays later callbacks but never the transport read path.
/// [`SessionManager::stop`] waits for queued callbacks, so none run after it
/// returns.
#[async_trait]
pub trait SessionHandler: Send + Sync + 'static {
    /// Called after every successful (re)connect, once subscriptions were re-applied
    async fn on_connected(&self, _session: &SessionManager) {}

    async fn on_message(&self, _message: InboundMessage) {}

    async fn on_disconnected(&self, _reason: &DisconnectReason) {}
}

/// Handler that ignores every callback
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl SessionHandler for NoopHandler {}
