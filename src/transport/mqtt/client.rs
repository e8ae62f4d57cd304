//! Impure I/O operations for the rumqttc-backed transport
//!
//! Every `connect` builds a fresh [`AsyncClient`]/[`EventLoop`] pair, polls
//! it until CONNACK, then hands the event loop to a poller task that forwards
//! inbound traffic to the session. The poller stops on the first error
//! instead of letting rumqttc reconnect, so the session stays in charge of
//! reconnection.

use super::connection::{
    classify_connack, classify_connect_error, configure_mqtt_options, disconnect_reason,
    to_mqtt_qos,
};
use super::event_router::{route_event, EventRoute};
use crate::session::{ConnectionConfig, OutboundMessage, Subscription};
use crate::transport::{
    DisconnectReason, Transport, TransportError, TransportEvent, TransportEvents,
};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Filter};
use rumqttc::v5::{AsyncClient, EventLoop};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Capacity of rumqttc's request channel
const REQUEST_CAPACITY: usize = 10;
/// Capacity of the per-link event channel
const EVENT_CAPACITY: usize = 64;
/// How long `disconnect` lets the poller flush the DISCONNECT packet
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

struct Link {
    client: AsyncClient,
    poller: JoinHandle<()>,
}

/// [`Transport`] implementation on top of `rumqttc`'s MQTT v5 client
#[derive(Default)]
pub struct RumqttcTransport {
    link: Option<Link>,
}

impl RumqttcTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_linked(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| !link.poller.is_finished())
    }

    fn client(&self) -> Result<&AsyncClient, TransportError> {
        self.link
            .as_ref()
            .map(|link| &link.client)
            .ok_or(TransportError::Closed)
    }

    /// Drop the current link without a DISCONNECT
    fn discard_link(&mut self) {
        if let Some(link) = self.link.take() {
            link.poller.abort();
        }
    }
}

/// Poll until the broker answers the CONNECT
async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), TransportError> {
    loop {
        let event = event_loop.poll().await.map_err(classify_connect_error)?;
        match route_event(&event) {
            EventRoute::ConnectionAcknowledged(ConnectReturnCode::Success) => return Ok(()),
            EventRoute::ConnectionAcknowledged(code) => return Err(classify_connack(code)),
            other => debug!(target: "mqtt_transport", ?other, "event before CONNACK"),
        }
    }
}

/// Forward link events to the session until the link ends
async fn poll_link(mut event_loop: EventLoop, events_tx: mpsc::Sender<TransportEvent>) {
    loop {
        let event = match event_loop.poll().await {
            Ok(event) => event,
            Err(e) => {
                let reason = disconnect_reason(&e);
                warn!(target: "mqtt_transport", error = %e, %reason, "MQTT event loop error");
                let _ = events_tx.send(TransportEvent::Disconnected(reason)).await;
                break;
            }
        };

        match route_event(&event) {
            EventRoute::MessageReceived(message) => {
                if events_tx.send(TransportEvent::Message(message)).await.is_err() {
                    debug!(target: "mqtt_transport", "session dropped the link");
                    break;
                }
            }
            EventRoute::Disconnected => {
                let _ = events_tx
                    .send(TransportEvent::Disconnected(DisconnectReason::BrokerClosed))
                    .await;
                break;
            }
            EventRoute::LocalDisconnect => {
                let _ = events_tx
                    .send(TransportEvent::Disconnected(DisconnectReason::LocalClose))
                    .await;
                break;
            }
            EventRoute::SubscriptionConfirmed {
                packet_id,
                rejected,
            } => {
                if rejected > 0 {
                    warn!(target: "mqtt_transport", packet_id, rejected, "broker rejected subscription filters");
                } else {
                    debug!(target: "mqtt_transport", packet_id, "subscription confirmed");
                }
            }
            EventRoute::InfrastructureEvent(event) => {
                tracing::trace!(target: "mqtt_transport", "MQTT event: {}", event);
            }
            EventRoute::ConnectionAcknowledged(_) | EventRoute::OutgoingEvent => {}
        }
    }
    debug!(target: "mqtt_transport", "MQTT event loop stopped");
}

#[async_trait]
impl Transport for RumqttcTransport {
    async fn connect(
        &mut self,
        config: &ConnectionConfig,
        timeout: Duration,
    ) -> Result<TransportEvents, TransportError> {
        self.discard_link();

        let mqtt_options = configure_mqtt_options(config)?;
        let (client, mut event_loop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);

        match tokio::time::timeout(timeout, wait_for_connack(&mut event_loop)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(TransportError::Timeout(timeout)),
        }
        info!(target: "mqtt_transport", client_id = config.client_id(), broker = %config.broker_address(), "CONNACK received");

        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let span = crate::mqtt_span!(client_id = %config.client_id());
        let poller = tokio::spawn(poll_link(event_loop, events_tx).instrument(span));
        self.link = Some(Link { client, poller });

        Ok(events_rx)
    }

    async fn publish(&mut self, message: &OutboundMessage) -> Result<(), TransportError> {
        if message.duplicate {
            // rumqttc manages the DUP flag itself on retransmission
            debug!(target: "mqtt_transport", topic = %message.topic, "ignoring caller-set DUP flag");
        }
        self.client()?
            .publish(
                message.topic.clone(),
                to_mqtt_qos(message.qos),
                message.retain,
                message.payload.clone(),
            )
            .await
            .map_err(|e| TransportError::Network(format!("publish request failed: {e}")))
    }

    async fn subscribe(&mut self, subscriptions: &[Subscription]) -> Result<(), TransportError> {
        if subscriptions.is_empty() {
            return Ok(());
        }
        let filters: Vec<Filter> = subscriptions
            .iter()
            .map(|s| Filter::new(s.topic_filter.clone(), to_mqtt_qos(s.qos)))
            .collect();
        self.client()?
            .subscribe_many(filters)
            .await
            .map_err(|e| TransportError::Network(format!("subscribe request failed: {e}")))
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let Some(mut link) = self.link.take() else {
            return Ok(());
        };

        let result = link
            .client
            .disconnect()
            .await
            .map_err(|e| TransportError::Network(format!("disconnect request failed: {e}")));

        // Let the poller write the DISCONNECT, then make sure it is gone
        if tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, &mut link.poller)
            .await
            .is_err()
        {
            link.poller.abort();
        }
        result
    }
}

impl Drop for RumqttcTransport {
    fn drop(&mut self) {
        // Async disconnect is not possible here; only stop the poller
        self.discard_link();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::QoS;

    #[tokio::test]
    async fn test_operations_without_link_are_closed() {
        let mut transport = RumqttcTransport::new();
        assert!(!transport.is_linked());

        let publish = transport.publish(&OutboundMessage::new("topicA")).await;
        assert_eq!(publish, Err(TransportError::Closed));

        let subscribe = transport
            .subscribe(&[Subscription::new("topicA", QoS::AtMostOnce)])
            .await;
        assert_eq!(subscribe, Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_empty_subscribe_is_noop() {
        let mut transport = RumqttcTransport::new();
        assert_eq!(transport.subscribe(&[]).await, Ok(()));
    }

    #[tokio::test]
    async fn test_disconnect_without_link_is_ok() {
        let mut transport = RumqttcTransport::new();
        assert_eq!(transport.disconnect().await, Ok(()));
    }
}
