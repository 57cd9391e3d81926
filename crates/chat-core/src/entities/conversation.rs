//! Conversation entity - a channel or a direct thread between two users

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::message::MessagePreview;
use super::user::UserSummary;
use crate::error::DomainError;
use crate::value_objects::Snowflake;

/// A conversation: the unit of message ordering and membership
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Snowflake,
    #[serde(flatten)]
    pub kind: ConversationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessagePreview>,
    pub created_at: DateTime<Utc>,
}

/// Channel or direct thread specifics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ConversationKind {
    Channel {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<String>,
        #[serde(default)]
        is_private: bool,
        #[serde(default)]
        member_ids: BTreeSet<Snowflake>,
    },
    Direct {
        participants: ParticipantPair,
        /// Display data for both participants
        #[serde(default)]
        members: Vec<UserSummary>,
    },
}

impl Conversation {
    /// Create a channel from a creation request
    pub fn channel(id: Snowflake, spec: ChannelSpec, creator: Snowflake) -> Self {
        let mut member_ids = spec.member_ids;
        if spec.is_private {
            member_ids.insert(creator);
        }

        Self {
            id,
            kind: ConversationKind::Channel {
                name: spec.name,
                category: spec.category,
                is_private: spec.is_private,
                member_ids,
            },
            last_message: None,
            created_at: Utc::now(),
        }
    }

    /// Create a direct thread between two users
    pub fn direct(id: Snowflake, a: UserSummary, b: UserSummary) -> Result<Self, DomainError> {
        let participants = ParticipantPair::new(a.id, b.id)?;
        Ok(Self {
            id,
            kind: ConversationKind::Direct {
                participants,
                members: vec![a, b],
            },
            last_message: None,
            created_at: Utc::now(),
        })
    }

    #[inline]
    pub fn is_direct(&self) -> bool {
        matches!(self.kind, ConversationKind::Direct { .. })
    }

    /// Participant pair of a direct thread
    pub fn participants(&self) -> Option<ParticipantPair> {
        match &self.kind {
            ConversationKind::Direct { participants, .. } => Some(*participants),
            ConversationKind::Channel { .. } => None,
        }
    }

    /// Check whether a user may read and post in this conversation
    pub fn can_access(&self, user_id: Snowflake) -> bool {
        match &self.kind {
            ConversationKind::Channel {
                is_private,
                member_ids,
                ..
            } => !is_private || member_ids.contains(&user_id),
            ConversationKind::Direct { participants, .. } => participants.contains(user_id),
        }
    }

    /// Title as seen by `viewer`: channel name, or the other participant's name
    pub fn title_for(&self, viewer: Snowflake) -> String {
        match &self.kind {
            ConversationKind::Channel { name, .. } => format!("#{name}"),
            ConversationKind::Direct {
                participants,
                members,
            } => {
                let other = participants.other(viewer);
                members
                    .iter()
                    .find(|m| Some(m.id) == other)
                    .map(|m| m.display_name.clone())
                    .unwrap_or_else(|| "Direct message".to_string())
            }
        }
    }

    /// Timestamp of the most recent activity
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_message
            .as_ref()
            .map_or(self.created_at, |preview| preview.created_at)
    }
}

/// The two distinct participants of a direct thread, stored lower id first
///
/// Normalization makes the pair usable as a lookup key, so a pair maps to at
/// most one thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "[Snowflake; 2]", into = "[Snowflake; 2]")]
pub struct ParticipantPair(Snowflake, Snowflake);

impl ParticipantPair {
    pub fn new(a: Snowflake, b: Snowflake) -> Result<Self, DomainError> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Ok(Self(a, b)),
            std::cmp::Ordering::Greater => Ok(Self(b, a)),
            std::cmp::Ordering::Equal => Err(DomainError::CannotMessageSelf),
        }
    }

    pub fn contains(&self, user_id: Snowflake) -> bool {
        self.0 == user_id || self.1 == user_id
    }

    /// The participant that is not `user_id`
    pub fn other(&self, user_id: Snowflake) -> Option<Snowflake> {
        if self.0 == user_id {
            Some(self.1)
        } else if self.1 == user_id {
            Some(self.0)
        } else {
            None
        }
    }

    pub fn first(&self) -> Snowflake {
        self.0
    }

    pub fn second(&self) -> Snowflake {
        self.1
    }
}

impl TryFrom<[Snowflake; 2]> for ParticipantPair {
    type Error = DomainError;

    fn try_from([a, b]: [Snowflake; 2]) -> Result<Self, Self::Error> {
        Self::new(a, b)
    }
}

impl From<ParticipantPair> for [Snowflake; 2] {
    fn from(pair: ParticipantPair) -> Self {
        [pair.0, pair.1]
    }
}

/// Channel creation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSpec {
    #[validate(length(min = 1, max = 100, message = "Channel name must be 1-100 characters"))]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 50, message = "Category must be at most 50 characters"))]
    pub category: Option<String>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub member_ids: BTreeSet<Snowflake>,
}

impl ChannelSpec {
    /// Public channel with no category
    pub fn public(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: None,
            is_private: false,
            member_ids: BTreeSet::new(),
        }
    }
}
