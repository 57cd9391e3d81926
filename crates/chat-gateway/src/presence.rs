//! Online presence registry
//!
//! Users appear on their first authenticated connection and disappear when
//! the last one closes. Status changes in between are last-write-wins.

use chat_core::{PresenceRecord, PresenceStatus, Snowflake, UserSummary};
use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    records: DashMap<Snowflake, PresenceRecord>,
}

impl PresenceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a user online; returns `false` if already present
    pub fn go_online(&self, user: &UserSummary) -> bool {
        let mut inserted = false;
        self.records.entry(user.id).or_insert_with(|| {
            inserted = true;
            PresenceRecord::online(user)
        });
        inserted
    }

    /// Change a present user's status; `None` if the user is not online
    pub fn set_status(&self, user_id: Snowflake, status: PresenceStatus) -> Option<PresenceRecord> {
        let mut record = self.records.get_mut(&user_id)?;
        record.set_status(status);
        Some(record.clone())
    }

    pub fn go_offline(&self, user_id: Snowflake) -> bool {
        self.records.remove(&user_id).is_some()
    }

    pub fn get(&self, user_id: Snowflake) -> Option<PresenceRecord> {
        self.records.get(&user_id).map(|r| r.clone())
    }

    /// Everyone online, ordered by display name
    pub fn snapshot(&self) -> Vec<PresenceRecord> {
        let mut users: Vec<_> = self.records.iter().map(|r| r.clone()).collect();
        users.sort_by(|a, b| {
            a.display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
                .then(a.user_id.cmp(&b.user_id))
        });
        users
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
