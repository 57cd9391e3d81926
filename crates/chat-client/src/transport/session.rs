//! Shared session handle: state, subscriptions and the outbound queue

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chat_common::ClientConfig;
use chat_core::{ClientEvent, GatewayMessage};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::driver::Driver;
use super::events::{ConnectionState, DisconnectReason, SessionEvent};
use crate::error::{ClientError, ClientResult};

/// Buffer of the typed event broadcast
const EVENT_BUFFER_SIZE: usize = 1024;

type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

struct HandlerEntry {
    id: u64,
    event: String,
    handler: Handler,
}

/// Raw per-event handlers, called in registration order
#[derive(Default)]
pub(crate) struct Registry {
    next_id: AtomicU64,
    handlers: RwLock<Vec<HandlerEntry>>,
}

impl Registry {
    fn add(&self, event: String, handler: Handler) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.write().push(HandlerEntry { id, event, handler });
        id
    }

    fn remove(&self, id: u64) {
        self.handlers.write().retain(|entry| entry.id != id);
    }

    /// Call every handler registered for `event`
    ///
    /// Handlers are cloned out first so they may unsubscribe while running.
    pub(crate) fn emit(&self, event: &str, payload: &Value) {
        let matching: Vec<Handler> = self
            .handlers
            .read()
            .iter()
            .filter(|entry| entry.event == event)
            .map(|entry| Arc::clone(&entry.handler))
            .collect();
        for handler in matching {
            handler(payload);
        }
    }

    fn len(&self) -> usize {
        self.handlers.read().len()
    }
}

/// Handle of one raw event handler
///
/// Dropping it keeps the handler registered; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
    active: AtomicBool,
}

impl Subscription {
    /// Remove the handler; repeated calls are no-ops
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            if let Some(registry) = self.registry.upgrade() {
                registry.remove(self.id);
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

struct Control {
    generation: u64,
    outbound: Option<mpsc::Sender<GatewayMessage>>,
}

/// State shared between the session handle and its driver task
///
/// Every transition checks the driver generation under the control lock, so
/// a superseded driver can never touch the state of its replacement.
pub(crate) struct Shared {
    control: Mutex<Control>,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<SessionEvent>,
    pub(crate) registry: Arc<Registry>,
}

impl Shared {
    fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self {
            control: Mutex::new(Control {
                generation: 0,
                outbound: None,
            }),
            state_tx,
            events_tx,
            registry: Arc::new(Registry::default()),
        }
    }

    /// Invalidate the running driver and return the next generation
    fn next_generation(&self) -> u64 {
        let mut control = self.control.lock();
        control.generation += 1;
        control.generation
    }

    pub(crate) fn set_connecting(&self, generation: u64) -> bool {
        let control = self.control.lock();
        if control.generation != generation {
            return false;
        }
        self.state_tx.send_replace(ConnectionState::Connecting);
        true
    }

    pub(crate) fn set_connected(
        &self,
        generation: u64,
        outbound: mpsc::Sender<GatewayMessage>,
        ready: chat_core::protocol::ReadyPayload,
    ) -> bool {
        let mut control = self.control.lock();
        if control.generation != generation {
            return false;
        }
        control.outbound = Some(outbound);
        self.state_tx.send_replace(ConnectionState::Connected);
        let _ = self.events_tx.send(SessionEvent::Connected { ready });
        true
    }

    /// Leave the current state; `None` forces the transition for any generation
    pub(crate) fn set_disconnected(&self, generation: Option<u64>, reason: DisconnectReason) {
        let mut control = self.control.lock();
        if generation.is_some_and(|g| g != control.generation) {
            return;
        }
        control.outbound = None;
        let previous = self.state_tx.send_replace(ConnectionState::Disconnected);
        if previous == ConnectionState::Connected {
            tracing::info!(reason = ?reason, "Disconnected from gateway");
            let _ = self.events_tx.send(SessionEvent::Disconnected { reason });
        }
    }

    pub(crate) fn publish(&self, generation: u64, event: SessionEvent) {
        let control = self.control.lock();
        if control.generation == generation {
            let _ = self.events_tx.send(event);
        }
    }

    fn enqueue(&self, message: GatewayMessage) -> ClientResult<()> {
        let control = self.control.lock();
        let outbound = control
            .outbound
            .as_ref()
            .ok_or(ClientError::TransportUnavailable)?;
        outbound.try_send(message).map_err(|err| {
            match err {
                TrySendError::Full(_) => tracing::warn!("Outbound queue full, dropping event"),
                TrySendError::Closed(_) => tracing::warn!("Outbound queue closed"),
            }
            ClientError::TransportUnavailable
        })
    }
}

struct DriverHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Client connection to the gateway
///
/// Constructed explicitly and shared as `Arc<TransportSession>`. The socket
/// lives in a driver task; this handle only enqueues outbound events and
/// observes state.
pub struct TransportSession {
    config: ClientConfig,
    shared: Arc<Shared>,
    credential: Mutex<Option<String>>,
    driver: Mutex<Option<DriverHandle>>,
}

impl TransportSession {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared::new()),
            credential: Mutex::new(None),
            driver: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect with an access token
    ///
    /// Resolves once the first handshake completes, the credential is
    /// rejected, or the retry budget runs out.
    pub async fn connect(&self, credential: impl Into<String>) -> ClientResult<()> {
        let credential = credential.into();
        if credential.trim().is_empty() {
            return Err(ClientError::Unauthenticated);
        }
        *self.credential.lock() = Some(credential.clone());
        self.start(credential).await
    }

    /// Start a fresh driver with the last credential and a reset attempt counter
    pub async fn reconnect(&self) -> ClientResult<()> {
        let credential = self
            .credential
            .lock()
            .clone()
            .ok_or(ClientError::Unauthenticated)?;
        self.start(credential).await
    }

    async fn start(&self, credential: String) -> ClientResult<()> {
        self.stop_driver();
        let generation = self.shared.next_generation();
        self.shared.set_disconnected(None, DisconnectReason::Requested);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let driver = Driver::new(
            self.config.clone(),
            credential,
            Arc::clone(&self.shared),
            generation,
            ready_tx,
        );
        let task = tokio::spawn(driver.run(shutdown_rx));
        *self.driver.lock() = Some(DriverHandle {
            shutdown: shutdown_tx,
            task,
        });

        tracing::debug!(generation, url = %self.config.gateway_url, "Connecting to gateway");
        ready_rx.await.unwrap_or(Err(ClientError::TransportUnavailable))
    }

    fn stop_driver(&self) {
        if let Some(handle) = self.driver.lock().take() {
            // The driver closes the socket itself; a driver that already
            // exited has dropped its receiver.
            let _ = handle.shutdown.send(());
            drop(handle.task);
        }
    }

    /// Stop the driver; no automatic retry follows
    pub fn disconnect(&self) {
        self.stop_driver();
        self.shared.next_generation();
        self.shared.set_disconnected(None, DisconnectReason::Requested);
    }

    /// Enqueue a client event
    ///
    /// Fails with [`ClientError::TransportUnavailable`] when not connected.
    pub fn send(&self, event: &ClientEvent) -> ClientResult<()> {
        let message = GatewayMessage::event(event)?;
        self.shared.enqueue(message).inspect_err(|_| {
            tracing::warn!(event = event.name(), "Transport unavailable, event not sent");
        })
    }

    /// Register a raw handler for one server event name
    ///
    /// Handlers receive the `d` payload and run on the driver task, so they
    /// must not block.
    pub fn subscribe<F>(&self, event: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.shared.registry.add(event.into(), Arc::new(handler));
        Subscription {
            id,
            registry: Arc::downgrade(&self.shared.registry),
            active: AtomicBool::new(true),
        }
    }

    /// Number of registered raw handlers
    pub fn handler_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Typed lifecycle and server events
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.stop_driver();
    }
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("gateway_url", &self.config.gateway_url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
