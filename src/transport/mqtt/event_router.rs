//! Pure routing decisions for rumqttc events

use super::connection::from_mqtt_qos;
use crate::session::InboundMessage;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet, SubscribeReasonCode};
use rumqttc::v5::Event;
use rumqttc::Outgoing;

/// What the transport should do with one polled event
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// CONNACK with the broker's return code
    ConnectionAcknowledged(ConnectReturnCode),
    /// Inbound PUBLISH
    MessageReceived(InboundMessage),
    /// Broker sent DISCONNECT
    Disconnected,
    /// We sent DISCONNECT
    LocalDisconnect,
    /// SUBACK; `rejected` counts filters the broker refused
    SubscriptionConfirmed { packet_id: u16, rejected: usize },
    /// Anything else incoming (PingResp, PubAck, ...)
    InfrastructureEvent(String),
    /// Other outgoing packets, handled by rumqttc
    OutgoingEvent,
}

pub fn route_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(incoming) => match incoming {
            Packet::ConnAck(connack) => EventRoute::ConnectionAcknowledged(connack.code),
            Packet::Publish(publish) => EventRoute::MessageReceived(InboundMessage::new(
                String::from_utf8_lossy(&publish.topic).into_owned(),
                publish.payload.clone(),
                from_mqtt_qos(publish.qos),
                publish.retain,
            )),
            Packet::Disconnect(_) => EventRoute::Disconnected,
            Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                packet_id: suback.pkid,
                rejected: suback
                    .return_codes
                    .iter()
                    .filter(|code| !matches!(code, SubscribeReasonCode::Success(_)))
                    .count(),
            },
            other => EventRoute::InfrastructureEvent(format!("{other:?}")),
        },
        Event::Outgoing(Outgoing::Disconnect) => EventRoute::LocalDisconnect,
        Event::Outgoing(_) => EventRoute::OutgoingEvent,
    }
}
