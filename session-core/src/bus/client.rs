//! BusClient - one physical kernel connection shared by every application
//!
//! # Architecture
//!
//! ```text
//!   publish() ──► [Connected?] ──yes──► outbound channel ──► writer task ──► socket
//!                      │ no
//!                      ▼
//!                OutboundQueue ──(flushed FIFO on open)──┘
//!
//!   socket ──► reader task ──► driver: dispatch_frame() ──► registry callbacks
//! ```
//!
//! - A single driver task per connection campaign owns the transport: it
//!   connects, flushes the queue, pumps inbound frames and applies the
//!   reconnect policy when the connection drops.
//! - All client state sits behind one `std::sync::Mutex` that is never held
//!   across an `.await` or while a subscriber runs.
//! - Connection state is published on a `tokio::sync::watch` channel so the
//!   shell can react to `Failed`.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::Serialize;
use shared_types::{is_topic_pattern, ConnectionState, Envelope, META_IDENTITY};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

use super::correlation::PendingRequests;
use super::queue::OutboundQueue;
use super::reconnect::ReconnectPolicy;
use super::registry::{SubscriptionId, SubscriptionRegistry};
use super::transport::{Connection, Endpoint, Transport, TransportError, TransportEvent};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error, Clone)]
pub enum BusError {
    #[error("Bus client is closed")]
    Closed,

    #[error("Connection attempt failed: {0}")]
    ConnectFailed(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("No reply to {topic} within {timeout_ms} ms")]
    Timeout { topic: String, timeout_ms: u64 },

    #[error("Request {topic} failed: {payload}")]
    Remote {
        topic: String,
        payload: serde_json::Value,
    },
}

impl From<serde_json::Error> for BusError {
    fn from(e: serde_json::Error) -> Self {
        BusError::Serialization(e.to_string())
    }
}

// ============================================================================
// State
// ============================================================================

struct BusState {
    phase: ConnectionState,
    /// Present only while `Connected`
    outbound: Option<mpsc::UnboundedSender<String>>,
    queue: OutboundQueue,
    registry: SubscriptionRegistry,
    pending: PendingRequests,
    /// Failed/closed connections since the last successful open
    attempts: u32,
    driver_running: bool,
    /// Explicit `connect()` waiting for the driver to attempt
    connect_requested: bool,
    driver: Option<JoinHandle<()>>,
    closed: bool,
}

struct BusShared {
    endpoint: Endpoint,
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    state: Mutex<BusState>,
    status: watch::Sender<ConnectionState>,
    /// Wakes a driver sleeping out a backoff; only meaningful with `connect_requested` set
    wake: Notify,
}

impl BusShared {
    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_phase(&self, state: &mut BusState, phase: ConnectionState) {
        if state.phase != phase {
            tracing::debug!(from = %state.phase, to = %phase, "Bus connection state changed");
        }
        state.phase = phase;
        self.status.send_replace(phase);
    }

    fn start_driver(self: &Arc<Self>, state: &mut BusState) {
        self.set_phase(state, ConnectionState::Connecting);
        state.driver_running = true;
        state.connect_requested = false;
        state.driver = Some(tokio::spawn(drive(Arc::downgrade(self))));
    }

    /// Connection opened: flush the queue and switch to `Connected` atomically,
    /// so no concurrent publish can overtake a queued envelope.
    fn on_open(&self, outbound: mpsc::UnboundedSender<String>) -> bool {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.closed {
            return false;
        }

        let mut flushed = 0usize;
        while let Some(frame) = state.queue.pop() {
            if let Err(mpsc::error::SendError(frame)) = outbound.send(frame) {
                // Writer already gone; the close event follows
                state.queue.push_front(frame);
                break;
            }
            flushed += 1;
        }

        state.outbound = Some(outbound);
        state.attempts = 0;
        self.set_phase(state, ConnectionState::Connected);
        tracing::info!(endpoint = %self.endpoint, flushed, "Connected to kernel");
        true
    }

    fn on_close(&self, reason: Option<&str>) {
        let mut state = self.lock();
        state.outbound = None;
        if state.closed {
            return;
        }
        self.set_phase(&mut state, ConnectionState::Disconnected);
        tracing::warn!(
            endpoint = %self.endpoint,
            reason = reason.unwrap_or("none"),
            "Kernel connection lost"
        );
    }

    /// Apply the reconnect policy. `None` means the driver must stop.
    fn next_retry(&self) -> Option<Duration> {
        let mut state = self.lock();
        if state.closed {
            state.driver_running = false;
            return None;
        }

        if std::mem::take(&mut state.connect_requested) {
            tracing::info!(attempts = state.attempts, "Connect requested; retrying now");
            return Some(Duration::ZERO);
        }

        if self.policy.allows_retry(state.attempts) {
            let delay = self.policy.delay_for(state.attempts);
            state.attempts += 1;
            tracing::info!(
                attempt = state.attempts,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Scheduling kernel reconnect"
            );
            Some(delay)
        } else {
            state.driver_running = false;
            self.set_phase(&mut state, ConnectionState::Failed);
            tracing::error!(
                attempts = state.attempts,
                queued = state.queue.len(),
                "Reconnect budget exhausted; bus client stays offline until reconnect()"
            );
            None
        }
    }

    fn take_connect_request(&self) -> bool {
        std::mem::take(&mut self.lock().connect_requested)
    }

    fn begin_attempt(&self) -> bool {
        let mut state = self.lock();
        if state.closed {
            state.driver_running = false;
            return false;
        }
        state.connect_requested = false;
        self.set_phase(&mut state, ConnectionState::Connecting);
        true
    }

    fn dispatch_frame(&self, frame: &str) {
        match Envelope::from_json(frame) {
            Ok(envelope) => self.dispatch(&envelope),
            Err(e) => {
                tracing::warn!(error = %e, frame_len = frame.len(), "Dropping malformed frame");
            }
        }
    }

    fn dispatch(&self, envelope: &Envelope) {
        let deliveries = {
            let mut state = self.lock();
            state.pending.resolve(envelope);
            state.registry.deliveries(&envelope.topic)
        };

        tracing::debug!(
            topic = %envelope.topic,
            id = %envelope.id,
            subscribers = deliveries.len(),
            "Dispatching envelope"
        );

        for delivery in deliveries {
            // Unsubscribed after the snapshot was taken
            if !delivery.is_active() {
                continue;
            }
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| delivery.invoke(envelope))) {
                tracing::warn!(
                    topic = %envelope.topic,
                    subscription = delivery.id.0,
                    panic = %panic_message(panic.as_ref()),
                    "Subscriber panicked; continuing delivery"
                );
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = panic.downcast_ref::<String>() {
        return message.clone();
    }
    "non-string panic payload".to_string()
}

// ============================================================================
// Connection Driver
// ============================================================================

enum PumpExit {
    Closed(Option<String>),
    /// Every client handle is gone
    Orphaned,
}

async fn pump(weak: &Weak<BusShared>, inbound: &mut mpsc::UnboundedReceiver<TransportEvent>) -> PumpExit {
    while let Some(event) = inbound.recv().await {
        match event {
            TransportEvent::Frame(frame) => {
                let Some(shared) = weak.upgrade() else {
                    return PumpExit::Orphaned;
                };
                shared.dispatch_frame(&frame);
            }
            TransportEvent::Closed { reason } => return PumpExit::Closed(reason),
        }
    }
    PumpExit::Closed(Some("transport dropped".to_string()))
}

async fn drive(weak: Weak<BusShared>) {
    loop {
        let Some(shared) = weak.upgrade() else {
            return;
        };
        let transport = shared.transport.clone();
        let endpoint = shared.endpoint.clone();
        drop(shared);

        tracing::info!(endpoint = %endpoint, "Connecting to kernel");
        let result = transport.connect(&endpoint).await;

        let Some(shared) = weak.upgrade() else {
            return;
        };
        match result {
            Ok(Connection {
                outbound,
                mut inbound,
            }) => {
                if !shared.on_open(outbound) {
                    return;
                }
                drop(shared);

                let exit = pump(&weak, &mut inbound).await;
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                match exit {
                    PumpExit::Closed(reason) => shared.on_close(reason.as_deref()),
                    PumpExit::Orphaned => return,
                }
                drop(shared);
            }
            Err(e) => {
                tracing::warn!(endpoint = %endpoint, error = %e, "Kernel connection attempt failed");
                shared.on_close(Some(&e.to_string()));
                drop(shared);
            }
        }

        let Some(shared) = weak.upgrade() else {
            return;
        };
        let Some(delay) = shared.next_retry() else {
            return;
        };
        let deadline = tokio::time::Instant::now() + delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                _ = shared.wake.notified() => {
                    // Permits can outlive the request that stored them
                    if shared.take_connect_request() {
                        tracing::debug!("Reconnect backoff cut short");
                        break;
                    }
                }
            }
        }
        if !shared.begin_attempt() {
            return;
        }
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Cloneable handle to the session's bus connection
#[derive(Clone)]
pub struct BusClient {
    shared: Arc<BusShared>,
}

impl std::fmt::Debug for BusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusClient")
            .field("endpoint", &self.shared.endpoint)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl BusClient {
    pub fn new(endpoint: Endpoint, transport: Arc<dyn Transport>, policy: ReconnectPolicy) -> Self {
        let (status, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(BusShared {
                endpoint,
                transport,
                policy,
                state: Mutex::new(BusState {
                    phase: ConnectionState::Disconnected,
                    outbound: None,
                    queue: OutboundQueue::new(),
                    registry: SubscriptionRegistry::new(),
                    pending: PendingRequests::new(),
                    attempts: 0,
                    driver_running: false,
                    connect_requested: false,
                    driver: None,
                    closed: false,
                }),
                status,
                wake: Notify::new(),
            }),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().phase
    }

    /// Observe connection state changes (including the terminal `Failed`).
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.status.subscribe()
    }

    /// Envelopes waiting for a connection.
    pub fn queued_len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Failed/closed connections since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.lock().attempts
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.shared.lock().registry.subscriber_count(topic)
    }

    /// Open the connection, or join the attempt already in flight.
    ///
    /// Resolves immediately when connected. Otherwise resolves with the outcome
    /// of the current attempt; on failure the reconnect policy keeps running in
    /// the background.
    pub async fn connect(&self) -> Result<(), BusError> {
        let mut status = self.shared.status.subscribe();
        {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(BusError::Closed);
            }
            match state.phase {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => {}
                ConnectionState::Disconnected | ConnectionState::Failed => {
                    if state.driver_running {
                        // Driver is waiting out a backoff: attempt now
                        self.shared.set_phase(&mut state, ConnectionState::Connecting);
                        state.connect_requested = true;
                        self.shared.wake.notify_one();
                    } else {
                        self.shared.start_driver(&mut state);
                    }
                }
            }
        }

        let settled = status
            .wait_for(|phase| *phase != ConnectionState::Connecting)
            .await
            .map(|phase| *phase)
            .map_err(|_| BusError::Closed)?;

        match settled {
            ConnectionState::Connected => Ok(()),
            other => {
                if self.shared.lock().closed {
                    return Err(BusError::Closed);
                }
                Err(BusError::ConnectFailed(format!(
                    "connection to {} ended {other}",
                    self.shared.endpoint
                )))
            }
        }
    }

    /// External trigger after the reconnect budget is exhausted: resets the
    /// attempt counter and connects.
    pub async fn reconnect(&self) -> Result<(), BusError> {
        {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(BusError::Closed);
            }
            state.attempts = 0;
        }
        tracing::info!(endpoint = %self.shared.endpoint, "Manual reconnect requested");
        self.connect().await
    }

    /// Publish `payload` on `topic`. Never waits for the network: the envelope
    /// is either handed to the writer or queued. Returns the envelope id.
    pub fn publish(&self, topic: impl Into<String>, payload: impl Serialize) -> Result<String, BusError> {
        self.send(Envelope::with_payload(topic, payload)?)
    }

    /// Publish with an optional sender identity stamped into `meta`.
    pub fn publish_as(
        &self,
        topic: impl Into<String>,
        payload: impl Serialize,
        identity: Option<&str>,
    ) -> Result<String, BusError> {
        let mut envelope = Envelope::with_payload(topic, payload)?;
        if let Some(identity) = identity {
            envelope.set_meta(META_IDENTITY, serde_json::Value::String(identity.to_string()));
        }
        self.send(envelope)
    }

    /// Send a fully built envelope.
    pub fn send(&self, envelope: Envelope) -> Result<String, BusError> {
        let frame = envelope.to_json()?;
        let mut guard = self.shared.lock();
        let state = &mut *guard;
        if state.closed {
            return Err(BusError::Closed);
        }

        if state.phase == ConnectionState::Connected {
            if let Some(outbound) = &state.outbound {
                match outbound.send(frame) {
                    Ok(()) => {
                        tracing::debug!(topic = %envelope.topic, id = %envelope.id, "Sent envelope");
                        return Ok(envelope.id);
                    }
                    Err(mpsc::error::SendError(frame)) => {
                        // Writer died; its close event is on the way
                        state.queue.push(frame);
                        return Ok(envelope.id);
                    }
                }
            }
        }

        state.queue.push(frame);
        tracing::debug!(
            topic = %envelope.topic,
            id = %envelope.id,
            queued = state.queue.len(),
            "Queued envelope until connected"
        );
        if !state.driver_running {
            self.shared.start_driver(state);
        }
        Ok(envelope.id)
    }

    /// Register `callback` for `topic`. Wildcard patterns ("agent.*", "*") are
    /// accepted and matched after exact-topic subscribers.
    pub fn subscribe<F>(&self, topic: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&serde_json::Value, &Envelope) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let (id, active) = self.shared.lock().registry.insert(&topic, Arc::new(callback));
        tracing::debug!(topic = %topic, subscription = id.0, "Subscribed");
        Subscription {
            bus: Arc::downgrade(&self.shared),
            topic,
            id,
            active,
        }
    }

    /// Wildcard subscription, e.g. `agent.taskgraph.*`.
    pub fn subscribe_pattern<F>(&self, pattern: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&serde_json::Value, &Envelope) + Send + Sync + 'static,
    {
        let pattern = pattern.into();
        if !is_topic_pattern(&pattern) {
            tracing::debug!(topic = %pattern, "Pattern subscription without wildcard; matching exactly");
        }
        self.subscribe(pattern, callback)
    }

    /// Tear down: stop the driver, drop the socket and the queue, fail
    /// pending requests. Further publishes return [`BusError::Closed`].
    pub fn close(&self) {
        let mut state = self.shared.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        if let Some(driver) = state.driver.take() {
            driver.abort();
        }
        state.driver_running = false;
        state.outbound = None;
        let dropped = state.queue.len();
        state.queue.clear();
        let pending = state.pending.clear();
        self.shared.set_phase(&mut state, ConnectionState::Disconnected);
        tracing::info!(
            endpoint = %self.shared.endpoint,
            dropped_queued = dropped,
            failed_requests = pending,
            "Bus client closed"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Correlated requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub(crate) fn register_pending(
        &self,
        correlation_id: &str,
        topic: &str,
    ) -> tokio::sync::oneshot::Receiver<Result<Envelope, BusError>> {
        self.shared.lock().pending.register(correlation_id, topic)
    }

    pub(crate) fn cancel_pending(&self, correlation_id: &str) {
        self.shared.lock().pending.cancel(correlation_id);
    }
}

// ============================================================================
// Subscription Handle
// ============================================================================

/// Handle returned by [`BusClient::subscribe`]
#[must_use = "dropping a Subscription does not unsubscribe"]
pub struct Subscription {
    bus: Weak<BusShared>,
    topic: String,
    id: SubscriptionId,
    active: Arc<AtomicBool>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Remove exactly this callback. Calling it again has no effect.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(shared) = self.bus.upgrade() {
            shared.lock().registry.remove(&self.topic, self.id);
            tracing::debug!(topic = %self.topic, subscription = self.id.0, "Unsubscribed");
        }
    }
}
