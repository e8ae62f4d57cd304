//! Pure connection configuration and error classification for rumqttc
//!
//! Building [`MqttOptions`] and deciding what a broker refusal or event-loop
//! failure means for the session are kept free of I/O so they can be tested
//! without a broker.

use crate::session::{ConnectionConfig, QoS};
use crate::transport::{DisconnectReason, TransportError};
use rumqttc::v5::mqttbytes::v5::ConnectReturnCode;
use rumqttc::v5::mqttbytes::QoS as MqttQoS;
use rumqttc::v5::{ConnectionError, MqttOptions, StateError};

/// Build client options for one connection attempt
///
/// Credentials are only set when a username is configured. Every attempt
/// starts a clean session; the session manager re-applies subscriptions.
pub fn configure_mqtt_options(config: &ConnectionConfig) -> Result<MqttOptions, TransportError> {
    let client_id = config.client_id();
    if client_id.is_empty() || client_id.starts_with(' ') {
        return Err(TransportError::Protocol(format!(
            "invalid client id '{client_id}'"
        )));
    }

    let mut mqtt_options = MqttOptions::new(client_id, config.host(), config.port());
    if config.has_credentials() {
        mqtt_options.set_credentials(config.username(), config.password());
    }
    mqtt_options.set_keep_alive(config.keep_alive());
    mqtt_options.set_clean_start(true);

    Ok(mqtt_options)
}

/// Map a refused CONNACK to a transport error
pub fn classify_connack(code: ConnectReturnCode) -> TransportError {
    match code {
        ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized => {
            TransportError::Auth(format!("broker refused connection: {code:?}"))
        }
        other => TransportError::Protocol(format!("broker refused connection: {other:?}")),
    }
}

/// Map an event-loop failure during the handshake to a transport error
pub fn classify_connect_error(error: ConnectionError) -> TransportError {
    match error {
        ConnectionError::ConnectionRefused(code) => classify_connack(code),
        ConnectionError::Io(e) => TransportError::Network(e.to_string()),
        ConnectionError::NotConnAck(packet) => {
            TransportError::Protocol(format!("expected CONNACK, received {packet:?}"))
        }
        other => TransportError::Network(other.to_string()),
    }
}

/// Map an event-loop failure on an established link to a disconnect reason
pub fn disconnect_reason(error: &ConnectionError) -> DisconnectReason {
    match error {
        ConnectionError::MqttState(StateError::AwaitPingResp) => {
            DisconnectReason::KeepAliveTimeout
        }
        ConnectionError::MqttState(StateError::Io(e)) | ConnectionError::Io(e) => {
            DisconnectReason::NetworkError(e.to_string())
        }
        ConnectionError::MqttState(other) => DisconnectReason::ProtocolError(other.to_string()),
        other => DisconnectReason::NetworkError(other.to_string()),
    }
}

pub fn to_mqtt_qos(qos: QoS) -> MqttQoS {
    match qos {
        QoS::AtMostOnce => MqttQoS::AtMostOnce,
        QoS::AtLeastOnce => MqttQoS::AtLeastOnce,
        QoS::ExactlyOnce => MqttQoS::ExactlyOnce,
    }
}

pub fn from_mqtt_qos(qos: MqttQoS) -> QoS {
    match qos {
        MqttQoS::AtMostOnce => QoS::AtMostOnce,
        MqttQoS::AtLeastOnce => QoS::AtLeastOnce,
        MqttQoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_options_from_config() {
        let config = ConnectionConfig::new("MqttClient", "localhost", 1884)
            .with_credentials("test", "123456")
            .with_keep_alive(30);
        let options = configure_mqtt_options(&config).unwrap();

        assert_eq!(options.client_id(), "MqttClient");
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1884));
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_client_id_is_rejected() {
        let config = ConnectionConfig::new("", "localhost", 1883);
        assert!(matches!(
            configure_mqtt_options(&config),
            Err(TransportError::Protocol(_))
        ));
    }

    #[test]
    fn test_connack_classification() {
        assert!(matches!(
            classify_connack(ConnectReturnCode::BadUserNamePassword),
            TransportError::Auth(_)
        ));
        assert!(matches!(
            classify_connack(ConnectReturnCode::NotAuthorized),
            TransportError::Auth(_)
        ));
        assert!(matches!(
            classify_connack(ConnectReturnCode::ServerUnavailable),
            TransportError::Protocol(_)
        ));
    }

    #[test]
    fn test_connect_error_classification() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            classify_connect_error(ConnectionError::Io(refused)),
            TransportError::Network(_)
        ));
        assert!(matches!(
            classify_connect_error(ConnectionError::ConnectionRefused(
                ConnectReturnCode::BadUserNamePassword
            )),
            TransportError::Auth(_)
        ));
    }

    #[test]
    fn test_disconnect_reason_classification() {
        assert_eq!(
            disconnect_reason(&ConnectionError::MqttState(StateError::AwaitPingResp)),
            DisconnectReason::KeepAliveTimeout
        );
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(
            disconnect_reason(&ConnectionError::Io(reset)),
            DisconnectReason::NetworkError(_)
        ));
    }

    #[test]
    fn test_qos_conversion() {
        for qos in [QoS::AtMostOnce, QoS::AtLeastOnce, QoS::ExactlyOnce] {
            assert_eq!(from_mqtt_qos(to_mqtt_qos(qos)), qos);
        }
    }
}
