//! Presence tracker - the client's view of the online set

use std::collections::HashMap;

use chat_core::{PresenceRecord, PresenceStatus, Snowflake};
use chrono::Utc;

use crate::error::{ClientError, ClientResult};

/// Online users keyed by id
///
/// Every update is idempotent, so replays and duplicated broadcasts never
/// produce duplicate entries.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    users: HashMap<Snowflake, PresenceRecord>,
}

impl PresenceTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole set from an `online_users` snapshot
    pub fn replace_snapshot(&mut self, records: impl IntoIterator<Item = PresenceRecord>) {
        self.users = records
            .into_iter()
            .filter(|record| record.status != PresenceStatus::Offline)
            .map(|record| (record.user_id, record))
            .collect();
    }

    /// Insert a user if absent; returns `true` if the set changed
    pub fn user_online(&mut self, user_id: Snowflake, display_name: impl Into<String>) -> bool {
        if self.users.contains_key(&user_id) {
            return false;
        }
        self.users.insert(
            user_id,
            PresenceRecord {
                user_id,
                display_name: display_name.into(),
                status: PresenceStatus::Online,
                last_changed_at: Utc::now(),
            },
        );
        true
    }

    /// Remove a user if present; returns `true` if the set changed
    pub fn user_offline(&mut self, user_id: Snowflake) -> bool {
        self.users.remove(&user_id).is_some()
    }

    /// Update a known user's status
    ///
    /// Status changes for users not in the set are stale (the matching
    /// `user_online` was lost or arrives later) and are rejected.
    pub fn status_changed(&mut self, user_id: Snowflake, status: PresenceStatus) -> ClientResult<()> {
        if status == PresenceStatus::Offline {
            self.user_offline(user_id);
            return Ok(());
        }
        let record = self
            .users
            .get_mut(&user_id)
            .ok_or_else(|| ClientError::StaleEvent(format!("status change for unknown user {user_id}")))?;
        if record.status != status {
            record.set_status(status);
        }
        Ok(())
    }

    /// Forget everything; presence is refetched after reconnecting
    pub fn reset(&mut self) {
        self.users.clear();
    }

    pub fn is_online(&self, user_id: Snowflake) -> bool {
        self.users.contains_key(&user_id)
    }

    /// Status of any user; users outside the set are offline
    pub fn status_of(&self, user_id: Snowflake) -> PresenceStatus {
        self.users
            .get(&user_id)
            .map_or(PresenceStatus::Offline, |record| record.status)
    }

    /// Online users sorted by display name
    pub fn online_users(&self) -> Vec<&PresenceRecord> {
        let mut users: Vec<_> = self.users.values().collect();
        users.sort_by(|a, b| {
            a.display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
                .then(a.user_id.cmp(&b.user_id))
        });
        users
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
