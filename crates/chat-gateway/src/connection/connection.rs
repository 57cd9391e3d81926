//! Individual WebSocket connection
//!
//! Represents a single WebSocket connection and its state.

use chat_core::{CloseCode, GatewayMessage, ServerEvent, Snowflake, UserSummary};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Frame queued for the socket writer
#[derive(Debug, Clone)]
pub enum Outbound {
    Message(GatewayMessage),
    /// Send a close frame and stop writing
    Close(CloseCode),
}

/// A single WebSocket connection
pub struct Connection {
    /// Unique session ID
    session_id: String,

    /// Authenticated user (set once by Identify)
    user: OnceLock<UserSummary>,

    /// Channel to the socket writer
    sender: mpsc::Sender<Outbound>,

    /// Last dispatch sequence number sent
    sequence: AtomicU64,

    /// Last heartbeat received
    last_heartbeat: Mutex<Instant>,

    /// Conversations this connection joined
    conversations: Mutex<HashSet<Snowflake>>,

    /// Connection creation time
    created_at: Instant,
}

impl Connection {
    /// Create a new connection
    pub fn new(session_id: String, sender: mpsc::Sender<Outbound>) -> Arc<Self> {
        Arc::new(Self {
            session_id,
            user: OnceLock::new(),
            sender,
            sequence: AtomicU64::new(0),
            last_heartbeat: Mutex::new(Instant::now()),
            conversations: Mutex::new(HashSet::new()),
            created_at: Instant::now(),
        })
    }

    /// Generate a new session ID
    pub fn generate_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Authenticated user, if Identify succeeded
    pub fn user(&self) -> Option<&UserSummary> {
        self.user.get()
    }

    pub fn user_id(&self) -> Option<Snowflake> {
        self.user.get().map(|u| u.id)
    }

    /// Bind the connection to a user; fails if it was already bound
    pub fn authenticate(&self, user: UserSummary) -> bool {
        self.user.set(user).is_ok()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.get().is_some()
    }

    /// Get the next sequence number
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn record_heartbeat(&self) {
        *self.last_heartbeat.lock() = Instant::now();
    }

    pub fn time_since_heartbeat(&self) -> Duration {
        self.last_heartbeat.lock().elapsed()
    }

    /// Record a joined conversation; returns `false` if already joined
    pub fn subscribe(&self, conversation_id: Snowflake) -> bool {
        self.conversations.lock().insert(conversation_id)
    }

    pub fn unsubscribe(&self, conversation_id: Snowflake) -> bool {
        self.conversations.lock().remove(&conversation_id)
    }

    pub fn conversations(&self) -> Vec<Snowflake> {
        self.conversations.lock().iter().copied().collect()
    }

    pub fn is_subscribed_to(&self, conversation_id: Snowflake) -> bool {
        self.conversations.lock().contains(&conversation_id)
    }

    /// Queue a server event as a Dispatch frame
    ///
    /// Never waits: a full queue drops the event and returns `false`. The
    /// receiver notices the sequence gap and refetches.
    pub fn dispatch(&self, event: &ServerEvent) -> bool {
        let message = match GatewayMessage::dispatch(event, self.next_sequence()) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(event = event.name(), error = %e, "Failed to encode event");
                return false;
            }
        };
        self.send(message)
    }

    /// Queue a raw gateway message
    pub fn send(&self, message: GatewayMessage) -> bool {
        match self.sender.try_send(Outbound::Message(message)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(session_id = %self.session_id, "Outbound queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Ask the writer to close the socket with `code`
    pub async fn close(&self, code: CloseCode) {
        let _ = self.sender.send(Outbound::Close(code)).await;
    }

    /// Check if the writer is gone
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("session_id", &self.session_id)
            .field("user_id", &self.user_id())
            .field("sequence", &self.sequence.load(Ordering::SeqCst))
            .field("created_at", &self.created_at)
            .finish()
    }
}
