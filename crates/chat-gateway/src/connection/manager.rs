//! Connection manager
//!
//! Manages all active WebSocket connections using DashMap for thread-safe access.

use super::{Connection, Outbound};
use chat_core::{Conversation, ServerEvent, Snowflake, UserSummary};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Recipients to skip when fanning out an event
#[derive(Debug, Clone, Copy, Default)]
pub enum Exclude<'a> {
    #[default]
    Nobody,
    /// One connection, usually the one that caused the event
    Session(&'a str),
    /// Every connection of one user
    User(Snowflake),
}

impl Exclude<'_> {
    fn skips(&self, connection: &Connection) -> bool {
        match self {
            Self::Nobody => false,
            Self::Session(id) => connection.session_id() == *id,
            Self::User(id) => connection.user_id() == Some(*id),
        }
    }
}

/// What removing a connection meant for its user
#[derive(Debug, Clone)]
pub struct Departure {
    pub user: UserSummary,
    /// The user has no connection left
    pub last_session: bool,
    /// Conversations the connection had joined
    pub conversations: Vec<Snowflake>,
}

/// Manages all active WebSocket connections
pub struct ConnectionManager {
    /// Active connections by session ID
    connections: DashMap<String, Arc<Connection>>,

    /// User ID to session IDs mapping
    user_connections: DashMap<Snowflake, HashSet<String>>,

    /// Conversation ID to joined session IDs mapping
    conversation_connections: DashMap<Snowflake, HashSet<String>>,
}

impl ConnectionManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            user_connections: DashMap::new(),
            conversation_connections: DashMap::new(),
        }
    }

    #[must_use]
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection
    pub fn add_connection(&self, session_id: String, sender: mpsc::Sender<Outbound>) -> Arc<Connection> {
        let connection = Connection::new(session_id.clone(), sender);
        self.connections.insert(session_id.clone(), connection.clone());

        tracing::debug!(session_id = %session_id, "Connection added");

        connection
    }

    /// Remove a connection and every mapping that points at it
    ///
    /// Uses `alter` for atomic modify-and-cleanup operations to avoid TOCTOU race conditions.
    pub fn remove_connection(&self, session_id: &str) -> Option<Departure> {
        let (_, connection) = self.connections.remove(session_id)?;

        let conversations = connection.conversations();
        for conversation_id in &conversations {
            self.conversation_connections.alter(conversation_id, |_, mut sessions| {
                sessions.remove(session_id);
                sessions
            });
        }
        self.conversation_connections
            .retain(|_, sessions| !sessions.is_empty());

        tracing::debug!(session_id = %session_id, "Connection removed");

        let user = connection.user()?.clone();
        let mut last_session = false;
        self.user_connections
            .remove_if_mut(&user.id, |_, sessions| {
                sessions.remove(session_id);
                last_session = sessions.is_empty();
                last_session
            });

        Some(Departure {
            user,
            last_session,
            conversations,
        })
    }

    pub fn get_connection(&self, session_id: &str) -> Option<Arc<Connection>> {
        self.connections.get(session_id).map(|r| r.clone())
    }

    /// Link a connection to its user; returns `true` for the user's first session
    pub fn authenticate_connection(&self, connection: &Connection, user: UserSummary) -> bool {
        let user_id = user.id;
        if !connection.authenticate(user) {
            return false;
        }

        let mut sessions = self.user_connections.entry(user_id).or_default();
        sessions.insert(connection.session_id().to_string());
        let first = sessions.len() == 1;
        drop(sessions);

        tracing::debug!(
            session_id = %connection.session_id(),
            user_id = %user_id,
            first,
            "Connection authenticated"
        );

        first
    }

    /// Subscribe a connection to a conversation's events
    pub fn subscribe(&self, connection: &Connection, conversation_id: Snowflake) {
        connection.subscribe(conversation_id);
        self.conversation_connections
            .entry(conversation_id)
            .or_default()
            .insert(connection.session_id().to_string());

        tracing::trace!(
            session_id = %connection.session_id(),
            conversation_id = %conversation_id,
            "Connection joined conversation"
        );
    }

    /// Unsubscribe a connection; returns `false` if it had not joined
    pub fn unsubscribe(&self, connection: &Connection, conversation_id: Snowflake) -> bool {
        let joined = connection.unsubscribe(conversation_id);

        self.conversation_connections
            .remove_if_mut(&conversation_id, |_, sessions| {
                sessions.remove(connection.session_id());
                sessions.is_empty()
            });

        tracing::trace!(
            session_id = %connection.session_id(),
            conversation_id = %conversation_id,
            "Connection left conversation"
        );

        joined
    }

    fn resolve(&self, sessions: &HashSet<String>) -> Vec<Arc<Connection>> {
        sessions
            .iter()
            .filter_map(|sid| self.connections.get(sid).map(|c| c.clone()))
            .collect()
    }

    pub fn get_user_connections(&self, user_id: Snowflake) -> Vec<Arc<Connection>> {
        self.user_connections
            .get(&user_id)
            .map(|sessions| self.resolve(&sessions))
            .unwrap_or_default()
    }

    /// Connections that joined a conversation
    pub fn get_conversation_connections(&self, conversation_id: Snowflake) -> Vec<Arc<Connection>> {
        self.conversation_connections
            .get(&conversation_id)
            .map(|sessions| self.resolve(&sessions))
            .unwrap_or_default()
    }

    /// Everyone who should see activity in a conversation
    ///
    /// Joined connections, plus every connection of both participants for
    /// a direct thread.
    pub fn audience(&self, conversation: &Conversation) -> Vec<Arc<Connection>> {
        let mut audience = self.get_conversation_connections(conversation.id);
        if let Some(pair) = conversation.participants() {
            for user_id in [pair.first(), pair.second()] {
                for connection in self.get_user_connections(user_id) {
                    if !audience
                        .iter()
                        .any(|c| c.session_id() == connection.session_id())
                    {
                        audience.push(connection);
                    }
                }
            }
        }
        audience
    }

    fn deliver(connections: impl IntoIterator<Item = Arc<Connection>>, event: &ServerEvent, exclude: Exclude<'_>) -> usize {
        connections
            .into_iter()
            .filter(|c| !exclude.skips(c))
            .filter(|c| c.dispatch(event))
            .count()
    }

    /// Send an event to all connections of a user
    pub fn send_to_user(&self, user_id: Snowflake, event: &ServerEvent, exclude: Exclude<'_>) -> usize {
        let sent = Self::deliver(self.get_user_connections(user_id), event, exclude);

        tracing::trace!(user_id = %user_id, event = event.name(), sent, "Event sent to user");

        sent
    }

    /// Send an event to a conversation's audience
    pub fn send_to_conversation(&self, conversation: &Conversation, event: &ServerEvent, exclude: Exclude<'_>) -> usize {
        let sent = Self::deliver(self.audience(conversation), event, exclude);

        tracing::trace!(
            conversation_id = %conversation.id,
            event = event.name(),
            sent,
            "Event sent to conversation"
        );

        sent
    }

    /// Send an event to every authenticated connection
    pub fn broadcast(&self, event: &ServerEvent, exclude: Exclude<'_>) -> usize {
        let connections: Vec<_> = self
            .connections
            .iter()
            .filter(|c| c.is_authenticated())
            .map(|c| c.clone())
            .collect();
        let sent = Self::deliver(connections, event, exclude);

        tracing::debug!(event = event.name(), sent, "Event broadcast");

        sent
    }

    /// Get the total number of active connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Get the number of unique authenticated users
    pub fn user_count(&self) -> usize {
        self.user_connections.len()
    }

    /// Get the number of conversations with joined connections
    pub fn conversation_count(&self) -> usize {
        self.conversation_connections.len()
    }

    pub fn is_user_connected(&self, user_id: Snowflake) -> bool {
        self.user_connections.contains_key(&user_id)
    }

    pub fn has_session(&self, session_id: &str) -> bool {
        self.connections.contains_key(session_id)
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connections", &self.connections.len())
            .field("users", &self.user_connections.len())
            .field("conversations", &self.conversation_connections.len())
            .finish()
    }
}
