//! Per-session metrics collection
//!
//! Atomic counters updated from the session's hot paths, plus a mutex-guarded
//! timestamp of the last successful connect. [`SessionMetrics::snapshot`]
//! produces a serializable copy for logs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Thread-safe counters for one session
#[derive(Debug, Default)]
pub struct SessionMetrics {
    connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    disconnects: AtomicU64,
    reconnect_attempts: AtomicU64,
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
    publishes_rejected: AtomicU64,
    messages_received: AtomicU64,
    last_connected_at: Mutex<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of [`SessionMetrics`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub disconnects: u64,
    pub reconnect_attempts: u64,
    pub messages_published: u64,
    pub publish_failures: u64,
    pub publishes_rejected: u64,
    pub messages_received: u64,
    pub last_connected_at: Option<DateTime<Utc>>,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.connected.store(true, Ordering::Relaxed);
        if let Ok(mut last) = self.last_connected_at.lock() {
            *last = Some(Utc::now());
        }
    }

    pub fn connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn connection_lost(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_rejected(&self) {
        self.publishes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connected: self.connected.load(Ordering::Relaxed),
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            connections_established: self.connections_established.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            messages_published: self.messages_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            publishes_rejected: self.publishes_rejected.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            last_connected_at: self.last_connected_at.lock().ok().and_then(|last| *last),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_snapshot_is_zeroed() {
        let snapshot = SessionMetrics::new().snapshot();
        assert!(!snapshot.connected);
        assert_eq!(snapshot.connection_attempts, 0);
        assert_eq!(snapshot.messages_received, 0);
        assert!(snapshot.last_connected_at.is_none());
    }

    #[test]
    fn test_connection_counters() {
        let metrics = SessionMetrics::new();
        metrics.connection_attempt();
        metrics.connection_failed();
        metrics.connection_attempt();
        metrics.connection_established();

        let snapshot = metrics.snapshot();
        assert!(snapshot.connected);
        assert_eq!(snapshot.connection_attempts, 2);
        assert_eq!(snapshot.connection_failures, 1);
        assert_eq!(snapshot.connections_established, 1);
        assert!(snapshot.last_connected_at.is_some());

        metrics.connection_lost();
        metrics.reconnect_attempt();
        let snapshot = metrics.snapshot();
        assert!(!snapshot.connected);
        assert_eq!(snapshot.disconnects, 1);
        assert_eq!(snapshot.reconnect_attempts, 1);
    }

    #[test]
    fn test_message_counters() {
        let metrics = SessionMetrics::new();
        metrics.message_published();
        metrics.message_published();
        metrics.publish_failed();
        metrics.publish_rejected();
        metrics.message_received();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_published, 2);
        assert_eq!(snapshot.publish_failures, 1);
        assert_eq!(snapshot.publishes_rejected, 1);
        assert_eq!(snapshot.messages_received, 1);
    }

    #[test]
    fn test_snapshot_serializes_to_json() {
        let metrics = SessionMetrics::new();
        metrics.connection_established();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["connected"], true);
        assert_eq!(json["connections_established"], 1);
        assert!(json["last_connected_at"].is_string());
    }
}
