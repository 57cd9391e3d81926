//! Typing indicator coordinator
//!
//! Timers are plain deadlines: every method takes `now`, the runtime sleeps
//! until [`TypingCoordinator::next_deadline`] and then calls
//! [`TypingCoordinator::poll`].

use std::collections::HashMap;
use std::time::Duration;

use chat_core::protocol::ChannelRef;
use chat_core::{ClientEvent, Snowflake, UserSummary};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct LocalTyping {
    conversation_id: Snowflake,
    deadline: Instant,
}

#[derive(Debug, Clone)]
struct RemoteTyper {
    user: UserSummary,
    expires_at: Instant,
}

/// Local typing signal plus the remote typers of every conversation
#[derive(Debug)]
pub struct TypingCoordinator {
    local_user: Option<Snowflake>,
    debounce: Duration,
    expiry: Duration,
    local: Option<LocalTyping>,
    remote: HashMap<Snowflake, Vec<RemoteTyper>>,
}

fn typing_start(conversation_id: Snowflake) -> ClientEvent {
    ClientEvent::TypingStart(ChannelRef {
        channel_id: conversation_id,
    })
}

fn typing_stop(conversation_id: Snowflake) -> ClientEvent {
    ClientEvent::TypingStop(ChannelRef {
        channel_id: conversation_id,
    })
}

impl TypingCoordinator {
    /// `debounce` is the local quiet period before an automatic stop;
    /// `expiry` is how long a remote indicator lives without a refresh
    pub fn new(debounce: Duration, expiry: Duration) -> Self {
        Self {
            local_user: None,
            debounce,
            expiry,
            local: None,
            remote: HashMap::new(),
        }
    }

    /// Set the local identity; the local user never shows up as a remote typer
    pub fn set_local_user(&mut self, user_id: Snowflake) {
        self.local_user = Some(user_id);
        for typers in self.remote.values_mut() {
            typers.retain(|t| t.user.id != user_id);
        }
        self.remote.retain(|_, typers| !typers.is_empty());
    }

    /// Record a keystroke in `conversation_id`
    ///
    /// Emits `typing_start` only when not already typing there; switching
    /// conversations stops the previous one first. Each call re-arms the
    /// debounce deadline.
    pub fn notify_typing(&mut self, conversation_id: Snowflake, now: Instant) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        let deadline = now + self.debounce;

        match self.local {
            Some(ref mut local) if local.conversation_id == conversation_id => {
                local.deadline = deadline;
            }
            previous => {
                if let Some(previous) = previous {
                    events.push(typing_stop(previous.conversation_id));
                }
                events.push(typing_start(conversation_id));
                self.local = Some(LocalTyping {
                    conversation_id,
                    deadline,
                });
            }
        }

        events
    }

    /// Explicit stop, e.g. after the message was sent
    pub fn stop_typing(&mut self, conversation_id: Snowflake) -> Option<ClientEvent> {
        match self.local {
            Some(local) if local.conversation_id == conversation_id => {
                self.local = None;
                Some(typing_stop(conversation_id))
            }
            _ => None,
        }
    }

    /// A remote user started (or is still) typing
    pub fn remote_started(&mut self, conversation_id: Snowflake, user: UserSummary, now: Instant) {
        if Some(user.id) == self.local_user {
            return;
        }
        let expires_at = now + self.expiry;
        let typers = self.remote.entry(conversation_id).or_default();
        match typers.iter_mut().find(|t| t.user.id == user.id) {
            Some(existing) => {
                existing.expires_at = expires_at;
                existing.user = user;
            }
            None => typers.push(RemoteTyper { user, expires_at }),
        }
    }

    /// A remote user stopped typing
    pub fn remote_stopped(&mut self, conversation_id: Snowflake, user_id: Snowflake) {
        if let Some(typers) = self.remote.get_mut(&conversation_id) {
            typers.retain(|t| t.user.id != user_id);
            if typers.is_empty() {
                self.remote.remove(&conversation_id);
            }
        }
    }

    /// Drop a user from every conversation (they went offline)
    pub fn forget_user(&mut self, user_id: Snowflake) {
        for typers in self.remote.values_mut() {
            typers.retain(|t| t.user.id != user_id);
        }
        self.remote.retain(|_, typers| !typers.is_empty());
    }

    /// Expire deadlines at `now`; returns the `typing_stop` to send, if any
    pub fn poll(&mut self, now: Instant) -> Vec<ClientEvent> {
        let mut events = Vec::new();

        if let Some(local) = self.local {
            if local.deadline <= now {
                self.local = None;
                events.push(typing_stop(local.conversation_id));
            }
        }

        for typers in self.remote.values_mut() {
            typers.retain(|t| t.expires_at > now);
        }
        self.remote.retain(|_, typers| !typers.is_empty());

        events
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        let remote = self
            .remote
            .values()
            .flatten()
            .map(|t| t.expires_at)
            .min();
        match (self.local.map(|l| l.deadline), remote) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Cancel everything tied to a conversation being left
    pub fn leave_conversation(&mut self, conversation_id: Snowflake) -> Option<ClientEvent> {
        self.remote.remove(&conversation_id);
        self.stop_typing(conversation_id)
    }

    /// Clear all state without emitting anything (the connection is gone)
    pub fn reset(&mut self) {
        self.local = None;
        self.remote.clear();
    }

    pub fn is_typing_locally(&self, conversation_id: Snowflake) -> bool {
        self.local
            .is_some_and(|local| local.conversation_id == conversation_id)
    }

    /// Remote typers of a conversation sorted by display name
    pub fn typing_users(&self, conversation_id: Snowflake) -> Vec<&UserSummary> {
        let mut users: Vec<_> = self
            .remote
            .get(&conversation_id)
            .into_iter()
            .flatten()
            .map(|t| &t.user)
            .collect();
        users.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        users
    }

    /// Human readable indicator line
    pub fn typing_label(&self, conversation_id: Snowflake) -> Option<String> {
        match self.typing_users(conversation_id).as_slice() {
            [] => None,
            [one] => Some(format!("{} is typing…", one.display_name)),
            [a, b] => Some(format!("{} and {} are typing…", a.display_name, b.display_name)),
            _ => Some("Several people are typing…".to_string()),
        }
    }
}
