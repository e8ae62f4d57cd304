//! Mock implementations for testing
//!
//! [`MockTransport`] scripts handshake and operation outcomes, injects link
//! events and records every call, so sessions can be tested without a broker.

use crate::session::{ConnectionConfig, InboundMessage, OutboundMessage, Subscription};
use crate::transport::{
    DisconnectReason, Transport, TransportError, TransportEvent, TransportEvents,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

const LINK_CAPACITY: usize = 64;

/// One recorded transport call
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Connect { client_id: String },
    Publish(OutboundMessage),
    Subscribe(Vec<Subscription>),
    Disconnect,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<TransportCall>,
    connect_results: VecDeque<TransportError>,
    publish_results: VecDeque<TransportError>,
    subscribe_results: VecDeque<TransportError>,
    connect_delay: Option<Duration>,
    publish_delay: Option<Duration>,
    link: Option<mpsc::Sender<TransportEvent>>,
}

/// Mock transport for testing
///
/// Clones share state: hand one clone to the session and keep another to
/// script and inspect it. Operations succeed unless a failure was queued.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next handshake fail with `error`; failures queue up
    pub async fn fail_next_connect(&self, error: TransportError) {
        self.state.lock().await.connect_results.push_back(error);
    }

    pub async fn fail_next_publish(&self, error: TransportError) {
        self.state.lock().await.publish_results.push_back(error);
    }

    pub async fn fail_next_subscribe(&self, error: TransportError) {
        self.state.lock().await.subscribe_results.push_back(error);
    }

    /// Delay every handshake by `delay`
    pub async fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().await.connect_delay = Some(delay);
    }

    /// Delay every publish by `delay`
    pub async fn set_publish_delay(&self, delay: Duration) {
        self.state.lock().await.publish_delay = Some(delay);
    }

    pub async fn calls(&self) -> Vec<TransportCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    pub async fn connect_count(&self) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|call| matches!(call, TransportCall::Connect { .. }))
            .count()
    }

    pub async fn publish_calls(&self) -> Vec<OutboundMessage> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::Publish(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Topic filters of each subscribe call, in call order
    pub async fn subscribe_calls(&self) -> Vec<Vec<String>> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::Subscribe(subscriptions) => Some(
                    subscriptions
                        .iter()
                        .map(|s| s.topic_filter.clone())
                        .collect(),
                ),
                _ => None,
            })
            .collect()
    }

    pub async fn is_linked(&self) -> bool {
        self.state.lock().await.link.is_some()
    }

    /// Inject an inbound message on the current link
    ///
    /// Returns false if there is no link.
    pub async fn deliver(&self, message: InboundMessage) -> bool {
        let link = self.state.lock().await.link.clone();
        match link {
            Some(link) => link.send(TransportEvent::Message(message)).await.is_ok(),
            None => false,
        }
    }

    /// Report the current link as lost with `reason`
    ///
    /// Returns false if there is no link.
    pub async fn drop_link(&self, reason: DisconnectReason) -> bool {
        let link = self.state.lock().await.link.take();
        match link {
            Some(link) => link.send(TransportEvent::Disconnected(reason)).await.is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &mut self,
        config: &ConnectionConfig,
        _timeout: Duration,
    ) -> Result<TransportEvents, TransportError> {
        let delay = {
            let mut state = self.state.lock().await;
            state.calls.push(TransportCall::Connect {
                client_id: config.client_id().to_string(),
            });
            state.connect_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        if let Some(error) = state.connect_results.pop_front() {
            return Err(error);
        }
        let (link_tx, link_rx) = mpsc::channel(LINK_CAPACITY);
        state.link = Some(link_tx);
        Ok(link_rx)
    }

    async fn publish(&mut self, message: &OutboundMessage) -> Result<(), TransportError> {
        let delay = {
            let mut state = self.state.lock().await;
            state.calls.push(TransportCall::Publish(message.clone()));
            state.publish_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        match state.publish_results.pop_front() {
            Some(error) => Err(error),
            None if state.link.is_none() => Err(TransportError::Closed),
            None => Ok(()),
        }
    }

    async fn subscribe(&mut self, subscriptions: &[Subscription]) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(TransportCall::Subscribe(subscriptions.to_vec()));
        match state.subscribe_results.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        state.calls.push(TransportCall::Disconnect);
        state.link = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::QoS;

    #[tokio::test]
    async fn test_connect_records_call_and_opens_link() {
        let mut transport = MockTransport::new();
        let config = ConnectionConfig::new("C1", "localhost", 1884);

        let mut events = transport
            .connect(&config, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(transport.is_linked().await);
        assert_eq!(transport.connect_count().await, 1);

        let message = InboundMessage::new("topicA", "hello", QoS::AtMostOnce, false);
        assert!(transport.deliver(message.clone()).await);
        assert_eq!(events.recv().await, Some(TransportEvent::Message(message)));

        assert!(transport.drop_link(DisconnectReason::BrokerClosed).await);
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Disconnected(DisconnectReason::BrokerClosed))
        );
        assert_eq!(events.recv().await, None);
        assert!(!transport.drop_link(DisconnectReason::BrokerClosed).await);
    }

    #[tokio::test]
    async fn test_scripted_failures_are_consumed_in_order() {
        let mut transport = MockTransport::new();
        let config = ConnectionConfig::new("C1", "localhost", 1884);
        transport
            .fail_next_connect(TransportError::Auth("denied".into()))
            .await;

        assert_eq!(
            transport
                .connect(&config, Duration::from_secs(1))
                .await
                .unwrap_err(),
            TransportError::Auth("denied".into())
        );
        assert!(transport.connect(&config, Duration::from_secs(1)).await.is_ok());
        assert_eq!(transport.connect_count().await, 2);
    }

    #[tokio::test]
    async fn test_publish_without_link_is_closed() {
        let mut transport = MockTransport::new();
        let result = transport.publish(&OutboundMessage::new("t")).await;
        assert_eq!(result, Err(TransportError::Closed));
        assert_eq!(transport.publish_calls().await.len(), 1);
    }
}
