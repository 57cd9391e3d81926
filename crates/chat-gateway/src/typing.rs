//! Server-side typing state
//!
//! Every typing entry carries an expiry. A client that stops sending
//! `typing_start` without a `typing_stop` is expired by the sweeper.

use chat_core::{Snowflake, UserSummary};
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct TypingEntry {
    user: UserSummary,
    expires_at: Instant,
}

/// Who is typing where
#[derive(Debug)]
pub struct TypingRegistry {
    entries: DashMap<(Snowflake, Snowflake), TypingEntry>,
    ttl: Duration,
}

impl TypingRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Start or refresh typing; returns `true` if the user was not typing yet
    pub fn start(&self, conversation_id: Snowflake, user: &UserSummary, now: Instant) -> bool {
        let entry = TypingEntry {
            user: user.clone(),
            expires_at: now + self.ttl,
        };
        self.entries
            .insert((conversation_id, user.id), entry)
            .is_none()
    }

    /// Stop typing; returns the user if they were typing
    pub fn stop(&self, conversation_id: Snowflake, user_id: Snowflake) -> Option<UserSummary> {
        self.entries
            .remove(&(conversation_id, user_id))
            .map(|(_, entry)| entry.user)
    }

    /// Stop a user everywhere, e.g. when their last connection closes
    pub fn stop_user(&self, user_id: Snowflake) -> Vec<(Snowflake, UserSummary)> {
        self.drain(|(_, uid), _| *uid == user_id)
    }

    /// Remove entries past their expiry
    pub fn expire(&self, now: Instant) -> Vec<(Snowflake, UserSummary)> {
        self.drain(|_, entry| entry.expires_at <= now)
    }

    fn drain(&self, matches: impl Fn(&(Snowflake, Snowflake), &TypingEntry) -> bool) -> Vec<(Snowflake, UserSummary)> {
        let keys: Vec<_> = self
            .entries
            .iter()
            .filter(|e| matches(e.key(), e.value()))
            .map(|e| *e.key())
            .collect();

        keys.into_iter()
            .filter_map(|key| {
                self.entries
                    .remove_if(&key, |k, entry| matches(k, entry))
                    .map(|((conversation_id, _), entry)| (conversation_id, entry.user))
            })
            .collect()
    }

    pub fn is_typing(&self, conversation_id: Snowflake, user_id: Snowflake) -> bool {
        self.entries.contains_key(&(conversation_id, user_id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
