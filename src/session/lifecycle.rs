//! Pure state-machine logic for the session lifecycle
//!
//! The session manager never assigns a [`ConnectionState`] directly. It feeds
//! a [`ConnectionEvent`] through [`Lifecycle::next_state`] and applies the
//! result only if the event is valid for the current state. Events that no
//! longer apply (for example a link loss reported after an explicit stop) are
//! dropped here.

use super::connection::{ConnectionState, ReconnectConfig};
use std::time::Duration;

/// Events that drive state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Caller asked the session to connect
    StartRequested,
    /// Transport completed the handshake
    HandshakeSucceeded,
    /// Initial handshake failed; no automatic retry
    HandshakeFailed,
    /// Transport reported the link as lost
    LinkLost,
    /// Backoff delay elapsed; try the handshake again
    BackoffElapsed,
    /// A reconnect handshake failed; wait again before attempt `n`
    ReconnectFailed { next_attempt: u32 },
    /// Reconnect attempts exhausted
    GaveUp,
    /// Caller asked the session to stop
    StopRequested,
}

/// Outcome of asking whether another reconnect attempt should be made
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectionDecision {
    /// Wait `delay`, then make attempt number `attempt`
    Proceed { attempt: u32, delay: Duration },
    /// A stop was requested meanwhile
    AbortShutdownRequested,
    /// `max_attempts` reached
    AbortMaxAttemptsExceeded,
}

pub struct Lifecycle;

impl Lifecycle {
    /// Next state for `event`, or None if the event does not apply in `current`
    pub fn next_state(
        current: &ConnectionState,
        event: &ConnectionEvent,
    ) -> Option<ConnectionState> {
        use ConnectionEvent as E;
        use ConnectionState as S;

        match (current, event) {
            (S::Disconnected, E::StartRequested) => Some(S::Connecting),
            (S::Connecting, E::HandshakeSucceeded) => Some(S::Connected),
            (S::Connecting, E::HandshakeFailed) => Some(S::Disconnected),
            (S::Connected, E::LinkLost) => Some(S::Reconnecting(1)),
            (S::Reconnecting(_), E::BackoffElapsed) => Some(S::Connecting),
            (S::Connecting, E::ReconnectFailed { next_attempt }) => {
                Some(S::Reconnecting(*next_attempt))
            }
            (S::Reconnecting(_), E::GaveUp) => Some(S::Disconnected),
            (S::Disconnected, E::StopRequested) => None,
            (_, E::StopRequested) => Some(S::Disconnected),
            _ => None,
        }
    }

    /// Decide whether reconnect attempt `attempt` (1-based) should happen
    pub fn should_attempt_reconnection(
        attempt: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if let Some(max_attempts) = config.max_attempts {
            if attempt > max_attempts {
                return ReconnectionDecision::AbortMaxAttemptsExceeded;
            }
        }

        ReconnectionDecision::Proceed {
            attempt,
            delay: Duration::from_millis(config.calculate_backoff_delay(attempt)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionEvent as E;
    use ConnectionState as S;

    #[test]
    fn test_happy_path() {
        let connecting = Lifecycle::next_state(&S::Disconnected, &E::StartRequested);
        assert_eq!(connecting, Some(S::Connecting));

        let connected = Lifecycle::next_state(&S::Connecting, &E::HandshakeSucceeded);
        assert_eq!(connected, Some(S::Connected));
    }

    #[test]
    fn test_initial_handshake_failure_returns_to_disconnected() {
        assert_eq!(
            Lifecycle::next_state(&S::Connecting, &E::HandshakeFailed),
            Some(S::Disconnected)
        );
    }

    #[test]
    fn test_reconnect_cycle() {
        let lost = Lifecycle::next_state(&S::Connected, &E::LinkLost);
        assert_eq!(lost, Some(S::Reconnecting(1)));

        let retry = Lifecycle::next_state(&S::Reconnecting(1), &E::BackoffElapsed);
        assert_eq!(retry, Some(S::Connecting));

        let failed =
            Lifecycle::next_state(&S::Connecting, &E::ReconnectFailed { next_attempt: 2 });
        assert_eq!(failed, Some(S::Reconnecting(2)));

        assert_eq!(
            Lifecycle::next_state(&S::Reconnecting(2), &E::GaveUp),
            Some(S::Disconnected)
        );
    }

    #[test]
    fn test_stop_from_every_active_state() {
        for state in [S::Connecting, S::Connected, S::Reconnecting(3)] {
            assert_eq!(
                Lifecycle::next_state(&state, &E::StopRequested),
                Some(S::Disconnected),
                "stop from {state}"
            );
        }
        assert_eq!(
            Lifecycle::next_state(&S::Disconnected, &E::StopRequested),
            None
        );
    }

    #[test]
    fn test_stale_events_are_ignored() {
        // Link loss racing a stop
        assert_eq!(Lifecycle::next_state(&S::Disconnected, &E::LinkLost), None);
        // Second start while one is in flight
        assert_eq!(Lifecycle::next_state(&S::Connecting, &E::StartRequested), None);
        assert_eq!(Lifecycle::next_state(&S::Connected, &E::StartRequested), None);
        // Backoff firing after stop
        assert_eq!(
            Lifecycle::next_state(&S::Disconnected, &E::BackoffElapsed),
            None
        );
        assert_eq!(
            Lifecycle::next_state(&S::Connected, &E::HandshakeSucceeded),
            None
        );
    }

    #[test]
    fn test_should_attempt_reconnection_unlimited() {
        let config = ReconnectConfig::default();
        assert_eq!(
            Lifecycle::should_attempt_reconnection(1, &config, false),
            ReconnectionDecision::Proceed {
                attempt: 1,
                delay: Duration::from_secs(5)
            }
        );
        assert_eq!(
            Lifecycle::should_attempt_reconnection(1_000, &config, false),
            ReconnectionDecision::Proceed {
                attempt: 1_000,
                delay: Duration::from_secs(5)
            }
        );
    }

    #[test]
    fn test_should_attempt_reconnection_shutdown_wins() {
        let config = ReconnectConfig::default();
        assert_eq!(
            Lifecycle::should_attempt_reconnection(1, &config, true),
            ReconnectionDecision::AbortShutdownRequested
        );
    }

    #[test]
    fn test_should_attempt_reconnection_limited() {
        let config = ReconnectConfig {
            max_attempts: Some(2),
            backoff_pattern: vec![10, 20],
            sustained_delay: 50,
        };
        assert_eq!(
            Lifecycle::should_attempt_reconnection(2, &config, false),
            ReconnectionDecision::Proceed {
                attempt: 2,
                delay: Duration::from_millis(20)
            }
        );
        assert_eq!(
            Lifecycle::should_attempt_reconnection(3, &config, false),
            ReconnectionDecision::AbortMaxAttemptsExceeded
        );
    }
}
