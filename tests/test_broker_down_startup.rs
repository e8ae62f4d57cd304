//! Integration tests for starting a session when the broker is down
//!
//! Nothing listens on localhost:9999, so every connect attempt fails fast
//! with a network error (or times out on hosts that drop the SYN).

use mqtt_session::session::{
    ConnectionConfig, ConnectionState, OutboundMessage, SessionManager, SessionOptions,
};
use mqtt_session::transport::mqtt::RumqttcTransport;
use mqtt_session::transport::{Transport, TransportError};
use mqtt_session::SessionError;
use std::time::Duration;
use tokio::time::timeout;

fn unreachable_broker() -> ConnectionConfig {
    ConnectionConfig::new("broker-down-client", "localhost", 9999)
}

#[tokio::test]
async fn test_transport_connect_fails_when_broker_unavailable() {
    // Arrange
    let mut transport = RumqttcTransport::new();

    // Act
    let result = transport
        .connect(&unreachable_broker(), Duration::from_secs(2))
        .await;

    // Assert
    assert!(
        matches!(
            result,
            Err(TransportError::Network(_)) | Err(TransportError::Timeout(_))
        ),
        "expected network failure or timeout, got {:?}",
        result.map(|_| ())
    );
    assert!(!transport.is_linked());
}

#[tokio::test]
async fn test_initial_connect_failure_leaves_session_disconnected() {
    // Arrange
    let options = SessionOptions {
        connect_timeout: Duration::from_secs(2),
        ..Default::default()
    };
    let session = SessionManager::builder(unreachable_broker(), RumqttcTransport::new())
        .options(options)
        .build();
    session.subscribe("mqttServerTopic").await.unwrap();

    // Act
    let result = timeout(Duration::from_secs(5), session.connect())
        .await
        .expect("connect should resolve within its own timeout");

    // Assert: the initial connect is not retried
    assert!(
        matches!(
            result,
            Err(SessionError::Network { .. }) | Err(SessionError::Timeout { .. })
        ),
        "expected network failure or timeout, got {result:?}"
    );
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(session.metrics().connection_attempts, 1);
    assert_eq!(session.metrics().connection_failures, 1);

    // Subscriptions survive for the next connect
    assert_eq!(session.subscriptions().await.len(), 1);

    // Publishing is rejected, not queued
    let publish = session
        .publish(OutboundMessage::new("mqttServerTopic").with_payload("Test Message"))
        .await;
    assert!(matches!(publish, Err(SessionError::NotConnected { .. })));

    session.stop().await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
}
