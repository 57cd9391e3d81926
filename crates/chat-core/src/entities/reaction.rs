//! Reaction aggregate - emoji to the set of users who reacted with it

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::value_objects::Snowflake;

/// Reaction aggregate for one message
///
/// Adding a present user and removing an absent user are no-ops, and an
/// emoji whose user set becomes empty is dropped from the map. The server
/// always broadcasts the whole aggregate, so clients replace rather than merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reactions(BTreeMap<String, BTreeSet<Snowflake>>);

impl Reactions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user to an emoji's set; returns `true` if the set changed
    pub fn add(&mut self, emoji: &str, user_id: Snowflake) -> bool {
        self.0.entry(emoji.to_string()).or_default().insert(user_id)
    }

    /// Remove a user from an emoji's set; returns `true` if the set changed
    pub fn remove(&mut self, emoji: &str, user_id: Snowflake) -> bool {
        let Some(users) = self.0.get_mut(emoji) else {
            return false;
        };
        let removed = users.remove(&user_id);
        if users.is_empty() {
            self.0.remove(emoji);
        }
        removed
    }

    /// Flip a user's membership; returns `true` if the user is now present
    pub fn toggle(&mut self, emoji: &str, user_id: Snowflake) -> bool {
        if self.contains(emoji, user_id) {
            self.remove(emoji, user_id);
            false
        } else {
            self.add(emoji, user_id);
            true
        }
    }

    /// Check whether a user reacted with an emoji
    pub fn contains(&self, emoji: &str, user_id: Snowflake) -> bool {
        self.0.get(emoji).is_some_and(|users| users.contains(&user_id))
    }

    /// Number of users who reacted with an emoji
    pub fn count(&self, emoji: &str) -> usize {
        self.0.get(emoji).map_or(0, BTreeSet::len)
    }

    /// Users who reacted with an emoji
    pub fn users(&self, emoji: &str) -> impl Iterator<Item = Snowflake> + '_ {
        self.0.get(emoji).into_iter().flatten().copied()
    }

    /// Iterate over `(emoji, users)` pairs in emoji order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<Snowflake>)> {
        self.0.iter().map(|(emoji, users)| (emoji.as_str(), users))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}
