//! Session manager: connection lifecycle, supervisor and dispatcher tasks
//!
//! Each successful [`SessionManager::connect`] starts one *run*: a supervisor
//! task that performs the handshake, pumps the link's event stream and drives
//! reconnection, plus a dispatcher task that invokes the [`SessionHandler`]
//! one callback at a time. [`SessionManager::stop`] ends the run.
//!
//! Lock order is `run`, then `transport`, then `subscriptions`. The state
//! itself lives in a watch channel and is only changed through
//! [`Lifecycle::next_state`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use super::connection::{ConnectionConfig, ConnectionState, SessionOptions};
use super::events::{NoopHandler, SessionEvent, SessionHandler};
use super::lifecycle::{ConnectionEvent, Lifecycle, ReconnectionDecision};
use super::message::{
    validate_publish_topic, validate_topic_filter, InboundMessage, OutboundMessage, QoS,
    Subscription, Subscriptions,
};
use crate::error::{SessionError, SessionResult};
use crate::observability::metrics::{MetricsSnapshot, SessionMetrics};
use crate::transport::{DisconnectReason, Transport, TransportEvent, TransportEvents};

/// How long `stop` waits for each background task before aborting it
const TASK_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

tokio::task_local! {
    /// Set while a handler callback runs on the dispatcher task
    static IN_DISPATCHER: ();
}

/// Work queued for the dispatcher task
enum Notification {
    Connected,
    Message(InboundMessage),
    Disconnected(DisconnectReason),
}

struct Shared {
    config: ConnectionConfig,
    options: SessionOptions,
    handler: Arc<dyn SessionHandler>,
    transport: Mutex<Box<dyn Transport>>,
    subscriptions: Mutex<Subscriptions>,
    /// Bumped under the subscriptions lock each time a handshake succeeds
    generation: AtomicU64,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    events_tx: broadcast::Sender<SessionEvent>,
    run: Mutex<Option<Run>>,
    metrics: SessionMetrics,
}

/// Background tasks of one `connect` .. `stop` cycle
struct Run {
    supervisor: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl Run {
    /// Wait for the supervisor, then for the dispatcher to drain its queue
    ///
    /// The supervisor owns the notification sender, so the dispatcher ends
    /// once it is gone. A stop issued from inside a handler callback leaves
    /// the dispatcher to finish on its own.
    async fn join(self) {
        join_task("supervisor", self.supervisor).await;
        if IN_DISPATCHER.try_with(|_| ()).is_ok() {
            debug!("stop called from a handler callback, not waiting for dispatcher");
            return;
        }
        join_task("dispatcher", self.dispatcher).await;
    }
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Apply `event` if it is valid for the current state
    fn transition(&self, event: ConnectionEvent) -> Option<ConnectionState> {
        let mut applied = None;
        self.state_tx.send_if_modified(|state| {
            match Lifecycle::next_state(state, &event) {
                Some(next) => {
                    debug!(from = %state, to = %next, ?event, "state transition");
                    *state = next;
                    applied = Some(next);
                    true
                }
                None => {
                    debug!(state = %state, ?event, "ignoring event not valid in current state");
                    false
                }
            }
        });
        applied
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine
        let _ = self.events_tx.send(event);
    }

    fn client_id(&self) -> &str {
        self.config.client_id()
    }
}

/// Handle to one MQTT client session
///
/// Cheap to clone; all clones drive the same session. Background tasks keep
/// the session alive until [`stop`](SessionManager::stop) is called.
#[derive(Clone)]
pub struct SessionManager {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("client_id", &self.shared.client_id())
            .field("state", &self.shared.state())
            .finish_non_exhaustive()
    }
}

/// Builder for [`SessionManager`]
pub struct SessionManagerBuilder {
    config: ConnectionConfig,
    transport: Box<dyn Transport>,
    handler: Arc<dyn SessionHandler>,
    options: SessionOptions,
}

impl SessionManagerBuilder {
    /// Callbacks for connect, message and disconnect; defaults to [`NoopHandler`]
    pub fn handler<H: SessionHandler>(mut self, handler: H) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// Timeouts, reconnect policy and event capacity
    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Create the session in `Disconnected`; nothing runs until `connect`
    pub fn build(self) -> SessionManager {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);
        let (events_tx, _) = broadcast::channel(self.options.event_capacity.max(1));

        SessionManager {
            shared: Arc::new(Shared {
                config: self.config,
                options: self.options,
                handler: self.handler,
                transport: Mutex::new(self.transport),
                subscriptions: Mutex::new(Subscriptions::new()),
                generation: AtomicU64::new(0),
                state_tx,
                shutdown_tx,
                events_tx,
                run: Mutex::new(None),
                metrics: SessionMetrics::new(),
            }),
        }
    }
}

impl SessionManager {
    /// Session with default options and no handler
    pub fn new<T: Transport>(config: ConnectionConfig, transport: T) -> Self {
        Self::builder(config, transport).build()
    }

    /// Start building a session that exclusively owns `transport`
    pub fn builder<T: Transport>(config: ConnectionConfig, transport: T) -> SessionManagerBuilder {
        SessionManagerBuilder {
            config,
            transport: Box::new(transport),
            handler: Arc::new(NoopHandler),
            options: SessionOptions::default(),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Receiver for awaiting state transitions
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Registered subscriptions in registration order
    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.shared.subscriptions.lock().await.to_vec()
    }

    /// Receiver for [`SessionEvent`]s emitted from now on
    ///
    /// A receiver that falls more than `event_capacity` events behind skips
    /// the oldest ones.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events_tx.subscribe()
    }

    /// Point-in-time copy of the session counters
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Connection parameters the session was built with
    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    /// Options the session was built with
    pub fn options(&self) -> &SessionOptions {
        &self.shared.options
    }

    /// Start the session and wait for the first handshake
    ///
    /// The handshake runs on the session's supervisor task, so dropping the
    /// returned future neither cancels nor wedges it. Fails with
    /// [`SessionError::AlreadyActive`] unless the session is `Disconnected`.
    pub async fn connect(&self) -> SessionResult<()> {
        let first_result = {
            let mut run = self.shared.run.lock().await;

            let state = self.shared.state();
            if state.is_active() {
                return Err(SessionError::AlreadyActive { state });
            }

            // A previous run that ended on its own (failed handshake, gave up)
            if let Some(previous) = run.take() {
                previous.join().await;
            }

            self.shared.shutdown_tx.send_replace(false);
            if self.shared.transition(ConnectionEvent::StartRequested).is_none() {
                return Err(SessionError::AlreadyActive {
                    state: self.shared.state(),
                });
            }

            let (notify_tx, notify_rx) = mpsc::unbounded_channel();
            let (result_tx, result_rx) = oneshot::channel();
            let span = crate::session_span!(client_id = %self.shared.client_id());

            let dispatcher = tokio::spawn(
                IN_DISPATCHER
                    .scope((), dispatch(self.clone(), notify_rx))
                    .instrument(span.clone()),
            );
            let supervisor = tokio::spawn(
                supervise(
                    self.shared.clone(),
                    self.shared.shutdown_tx.subscribe(),
                    notify_tx,
                    result_tx,
                )
                .instrument(span),
            );
            *run = Some(Run {
                supervisor,
                dispatcher,
            });

            result_rx
        };

        // The sender only disappears if the supervisor was aborted
        first_result.await.unwrap_or(Err(SessionError::Cancelled))
    }

    /// Subscribe to `topic_filter` at QoS 0
    pub async fn subscribe(&self, topic_filter: &str) -> SessionResult<()> {
        self.subscribe_with_qos(topic_filter, QoS::AtMostOnce).await
    }

    /// Register `topic_filter` and request it from the broker if connected
    ///
    /// While not connected the filter is only stored; it is requested on the
    /// next successful connect. Registering a filter twice is a no-op. A
    /// filter whose immediate SUBSCRIBE fails stays registered and is retried
    /// on the next reconnect.
    pub async fn subscribe_with_qos(&self, topic_filter: &str, qos: QoS) -> SessionResult<()> {
        validate_topic_filter(topic_filter)?;
        let subscription = Subscription::new(topic_filter, qos);

        let registered_in = {
            let mut subscriptions = self.shared.subscriptions.lock().await;
            if !subscriptions.insert(subscription.clone()) {
                debug!(topic_filter, "already subscribed");
                return Ok(());
            }
            if self.shared.state() != ConnectionState::Connected {
                info!(topic_filter, %qos, state = %self.shared.state(), "subscription deferred until connected");
                return Ok(());
            }
            self.shared.generation.load(Ordering::SeqCst)
        };

        let mut transport = self.shared.transport.lock().await;

        // A handshake since registration already re-applied the whole set
        let state = self.shared.state();
        if state != ConnectionState::Connected
            || self.shared.generation.load(Ordering::SeqCst) != registered_in
        {
            debug!(topic_filter, %state, "subscription covered by reconnect");
            return Ok(());
        }

        let timeout = self.shared.options.operation_timeout;
        let result = match tokio::time::timeout(
            timeout,
            transport.subscribe(std::slice::from_ref(&subscription)),
        )
        .await
        {
            Ok(result) => result.map_err(SessionError::from),
            Err(_) => Err(SessionError::timeout(timeout)),
        };
        drop(transport);

        let topic_filters = vec![subscription.topic_filter];
        match result {
            Ok(()) => {
                info!(topic_filter, %qos, "subscribed");
                self.shared.emit(SessionEvent::Subscribed { topic_filters });
                Ok(())
            }
            Err(e) => {
                error!(topic_filter, error = %e.sanitized(), "subscribe failed");
                self.shared.emit(SessionEvent::SubscribeFailed {
                    topic_filters,
                    error: e.sanitized(),
                });
                Err(e)
            }
        }
    }

    /// Forget `topic_filter` so it is not re-applied on reconnect
    ///
    /// The broker keeps an already active subscription until the link is
    /// re-established. Returns whether the filter was registered.
    pub async fn unsubscribe(&self, topic_filter: &str) -> bool {
        let removed = self.shared.subscriptions.lock().await.remove(topic_filter);
        if removed {
            info!(topic_filter, "subscription removed");
        }
        removed
    }

    /// Publish with the session's default operation timeout
    pub async fn publish(&self, message: OutboundMessage) -> SessionResult<()> {
        self.publish_with_timeout(message, self.shared.options.operation_timeout)
            .await
    }

    /// Publish `message`, giving up after `timeout`
    ///
    /// Fails with [`SessionError::NotConnected`] without touching the
    /// transport unless the session is `Connected`. Messages are never queued.
    pub async fn publish_with_timeout(
        &self,
        message: OutboundMessage,
        timeout: Duration,
    ) -> SessionResult<()> {
        validate_publish_topic(&message.topic)?;

        let state = self.shared.state();
        if !state.can_publish() {
            return Err(self.reject_publish(&message, state));
        }

        let mut shutdown_rx = self.shared.shutdown_tx.subscribe();
        let mut transport = self.shared.transport.lock().await;

        // The link may have dropped while waiting for the transport
        let state = self.shared.state();
        if !state.can_publish() {
            return Err(self.reject_publish(&message, state));
        }

        let result = tokio::select! {
            _ = shutdown_rx.wait_for(|stop| *stop) => Err(SessionError::Cancelled),
            result = tokio::time::timeout(timeout, transport.publish(&message)) => match result {
                Ok(result) => result.map_err(SessionError::from),
                Err(_) => Err(SessionError::timeout(timeout)),
            },
        };
        drop(transport);

        match &result {
            Ok(()) => {
                self.shared.metrics.message_published();
                debug!(topic = %message.topic, qos = %message.qos, retain = message.retain, bytes = message.payload.len(), "message published");
                self.shared.emit(SessionEvent::MessageSent {
                    topic: message.topic,
                    qos: message.qos,
                    bytes: message.payload.len(),
                });
            }
            Err(e) => {
                self.shared.metrics.publish_failed();
                warn!(topic = %message.topic, error = %e.sanitized(), "publish failed");
                self.shared.emit(SessionEvent::PublishFailed {
                    topic: message.topic,
                    error: e.sanitized(),
                });
            }
        }
        result
    }

    fn reject_publish(&self, message: &OutboundMessage, state: ConnectionState) -> SessionError {
        self.shared.metrics.publish_rejected();
        warn!(topic = %message.topic, %state, "client is not connected, message can not be published");
        self.shared.emit(SessionEvent::PublishRejected {
            topic: message.topic.clone(),
            state: state.to_string(),
        });
        SessionError::NotConnected { state }
    }

    /// Stop the session
    ///
    /// Cancels any pending backoff and any in-flight connect or publish,
    /// moves to `Disconnected`, then closes the transport link. Handler
    /// callbacks already queued run before this returns; none run after.
    /// Stopping an idle or already stopped session does nothing.
    pub async fn stop(&self) {
        let mut run = self.shared.run.lock().await;
        let Some(current) = run.take() else {
            debug!("stop requested on an idle session");
            return;
        };

        info!(client_id = %self.shared.client_id(), state = %self.shared.state(), "stopping session");
        self.shared.shutdown_tx.send_replace(true);
        self.shared.transition(ConnectionEvent::StopRequested);
        self.shared.metrics.connection_closed();

        current.join().await;

        let timeout = self.shared.options.operation_timeout;
        let mut transport = self.shared.transport.lock().await;
        match tokio::time::timeout(timeout, transport.disconnect()).await {
            Ok(Ok(())) => debug!("transport disconnected"),
            Ok(Err(e)) => {
                warn!(error = %SessionError::from(e).sanitized(), "transport disconnect failed")
            }
            Err(_) => warn!(timeout_ms = timeout.as_millis() as u64, "transport disconnect timed out"),
        }
        drop(transport);

        info!(client_id = %self.shared.client_id(), "session stopped");
        self.shared.emit(SessionEvent::Stopped);
    }
}

/// Wait for a background task to finish, aborting it after the grace period
async fn join_task(name: &str, mut handle: JoinHandle<()>) {
    if tokio::time::timeout(TASK_SHUTDOWN_GRACE, &mut handle)
        .await
        .is_err()
    {
        warn!(task = name, "task did not stop within {TASK_SHUTDOWN_GRACE:?}, aborting");
        handle.abort();
        let _ = handle.await;
    }
}

/// Invoke handler callbacks in order, one at a time
async fn dispatch(session: SessionManager, mut notifications: mpsc::UnboundedReceiver<Notification>) {
    let handler = session.shared.handler.clone();
    while let Some(notification) = notifications.recv().await {
        match notification {
            Notification::Connected => handler.on_connected(&session).await,
            Notification::Message(message) => handler.on_message(message).await,
            Notification::Disconnected(reason) => handler.on_disconnected(&reason).await,
        }
    }
    debug!("dispatcher stopped");
}

/// Body of the supervisor task for one run
async fn supervise(
    shared: Arc<Shared>,
    mut shutdown_rx: watch::Receiver<bool>,
    notify_tx: mpsc::UnboundedSender<Notification>,
    first_result: oneshot::Sender<SessionResult<()>>,
) {
    let mut events = match handshake(&shared, &mut shutdown_rx, &notify_tx, 0).await {
        Ok(events) => {
            let _ = first_result.send(Ok(()));
            events
        }
        Err(e) => {
            shared.transition(ConnectionEvent::HandshakeFailed);
            if e == SessionError::Cancelled {
                info!(client_id = %shared.client_id(), "connect cancelled by stop");
            } else {
                error!(client_id = %shared.client_id(), broker = %shared.config.broker_address(), error = %e.sanitized(), "connection to broker failed");
            }
            shared.emit(SessionEvent::ConnectFailed {
                error: e.sanitized(),
            });
            let _ = first_result.send(Err(e));
            return;
        }
    };

    loop {
        let reason = tokio::select! {
            _ = shutdown_rx.wait_for(|stop| *stop) => break,
            reason = pump_link(&shared, &mut events, &notify_tx) => reason,
        };

        if shared.transition(ConnectionEvent::LinkLost).is_none() {
            break;
        }
        shared.metrics.connection_lost();
        warn!(client_id = %shared.client_id(), %reason, "connection to broker lost");
        shared.emit(SessionEvent::Disconnected {
            reason: reason.to_string(),
        });
        let _ = notify_tx.send(Notification::Disconnected(reason));

        match reconnect(&shared, &mut shutdown_rx, &notify_tx).await {
            Some(next) => events = next,
            None => break,
        }
    }

    debug!("supervisor stopped");
}

/// Forward inbound messages until the link is lost
async fn pump_link(
    shared: &Shared,
    events: &mut TransportEvents,
    notify_tx: &mpsc::UnboundedSender<Notification>,
) -> DisconnectReason {
    loop {
        match events.recv().await {
            Some(TransportEvent::Message(message)) => {
                shared.metrics.message_received();
                debug!(topic = %message.topic, qos = %message.qos, retain = message.retain, bytes = message.payload.len(), "message received");
                shared.emit(SessionEvent::MessageReceived {
                    topic: message.topic.clone(),
                    qos: message.qos,
                    retain: message.retain,
                    bytes: message.payload.len(),
                });
                let _ = notify_tx.send(Notification::Message(message));
            }
            Some(TransportEvent::Disconnected(reason)) => return reason,
            None => return DisconnectReason::NetworkError("event stream closed".to_string()),
        }
    }
}

/// Retry the handshake with backoff until it succeeds, stop is requested or
/// attempts run out
async fn reconnect(
    shared: &Shared,
    shutdown_rx: &mut watch::Receiver<bool>,
    notify_tx: &mpsc::UnboundedSender<Notification>,
) -> Option<TransportEvents> {
    let reconnect_config = &shared.options.reconnect;
    let mut attempt = 1u32;

    match reconnect_config.calculate_max_total_time() {
        Some(total_ms) => info!(
            max_attempts = ?reconnect_config.max_attempts,
            total_backoff_ms = total_ms,
            "starting reconnection"
        ),
        None => info!("starting reconnection, retrying until connected or stopped"),
    }

    loop {
        let shutdown_requested = *shutdown_rx.borrow();
        match Lifecycle::should_attempt_reconnection(attempt, reconnect_config, shutdown_requested)
        {
            ReconnectionDecision::Proceed { attempt, delay } => {
                let max_display = reconnect_config
                    .max_attempts
                    .map_or("∞".to_string(), |max| max.to_string());
                info!(
                    "Attempting reconnection {}/{} after {}ms delay",
                    attempt,
                    max_display,
                    delay.as_millis()
                );
                shared.emit(SessionEvent::ReconnectScheduled {
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                });

                if !interruptible_sleep(shutdown_rx, delay).await {
                    return None;
                }
                shared.transition(ConnectionEvent::BackoffElapsed)?;
                shared.metrics.reconnect_attempt();

                match handshake(shared, shutdown_rx, notify_tx, attempt).await {
                    Ok(events) => return Some(events),
                    Err(SessionError::Cancelled) => return None,
                    Err(e) => {
                        error!(attempt, error = %e.sanitized(), "reconnecting failed");
                        shared.emit(SessionEvent::ReconnectFailed {
                            attempt,
                            error: e.sanitized(),
                        });
                        shared.transition(ConnectionEvent::ReconnectFailed {
                            next_attempt: attempt + 1,
                        })?;
                    }
                }
            }
            ReconnectionDecision::AbortShutdownRequested => {
                info!("Shutdown signal received, stopping reconnection");
                return None;
            }
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                let attempts = attempt - 1;
                warn!(
                    attempts,
                    total_backoff_ms = ?reconnect_config.calculate_max_total_time(),
                    "max reconnection attempts exceeded, giving up"
                );
                shared.transition(ConnectionEvent::GaveUp);
                shared.emit(SessionEvent::GaveUp { attempts });
                return None;
            }
        }
        attempt += 1;
    }
}

/// Sleep for `delay` unless stop is requested first; false means stopped
async fn interruptible_sleep(shutdown_rx: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown_rx.wait_for(|stop| *stop) => {
            info!("Shutdown signal received during reconnection delay, stopping");
            false
        }
        _ = tokio::time::sleep(delay) => true,
    }
}

/// One CONNECT handshake followed by re-subscription
///
/// `attempt` is 0 for the initial connect and the reconnect attempt number
/// otherwise.
async fn handshake(
    shared: &Shared,
    shutdown_rx: &mut watch::Receiver<bool>,
    notify_tx: &mpsc::UnboundedSender<Notification>,
    attempt: u32,
) -> SessionResult<TransportEvents> {
    let client_id = shared.client_id();
    let connect_timeout = shared.options.connect_timeout;

    shared.metrics.connection_attempt();
    shared.emit(SessionEvent::ConnectAttempt {
        client_id: client_id.to_string(),
        attempt,
    });
    info!(client_id, broker = %shared.config.broker_address(), attempt, "connecting to broker");

    let mut transport = shared.transport.lock().await;
    let outcome = tokio::select! {
        _ = shutdown_rx.wait_for(|stop| *stop) => Err(SessionError::Cancelled),
        result = tokio::time::timeout(connect_timeout, transport.connect(&shared.config, connect_timeout)) => match result {
            Ok(result) => result.map_err(SessionError::from),
            Err(_) => Err(SessionError::timeout(connect_timeout)),
        },
    };
    let events = match outcome {
        Ok(events) => events,
        Err(e) => {
            shared.metrics.connection_failed();
            return Err(e);
        }
    };

    let resubscribe = {
        let subscriptions = shared.subscriptions.lock().await;
        if shared
            .transition(ConnectionEvent::HandshakeSucceeded)
            .is_none()
        {
            // stop won the race; `stop` closes the link
            return Err(SessionError::Cancelled);
        }
        shared.generation.fetch_add(1, Ordering::SeqCst);
        subscriptions.to_vec()
    };

    if !resubscribe.is_empty() {
        let topic_filters: Vec<String> = resubscribe
            .iter()
            .map(|s| s.topic_filter.clone())
            .collect();
        let timeout = shared.options.operation_timeout;
        let result = match tokio::time::timeout(timeout, transport.subscribe(&resubscribe)).await {
            Ok(result) => result.map_err(SessionError::from),
            Err(_) => Err(SessionError::timeout(timeout)),
        };
        match result {
            Ok(()) => {
                info!(?topic_filters, "subscriptions re-applied");
                shared.emit(SessionEvent::Subscribed { topic_filters });
            }
            Err(e) => {
                error!(?topic_filters, error = %e.sanitized(), "re-subscribe failed");
                shared.emit(SessionEvent::SubscribeFailed {
                    topic_filters,
                    error: e.sanitized(),
                });
            }
        }
    }
    drop(transport);

    shared.metrics.connection_established();
    info!(client_id, broker = %shared.config.broker_address(), "connected to broker");
    shared.emit(SessionEvent::Connected {
        client_id: client_id.to_string(),
        resubscribed: resubscribe.len(),
    });
    let _ = notify_tx.send(Notification::Connected);

    Ok(events)
}
