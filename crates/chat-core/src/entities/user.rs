//! User summary - the identity collaborator's view of a user
//!
//! Identities are issued elsewhere; here they are only a foreign key plus the
//! display fields needed to render messages, presence, and typing indicators.

use serde::{Deserialize, Serialize};

use crate::value_objects::Snowflake;

/// Verified user identity as carried on the wire
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Snowflake,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl UserSummary {
    /// Create a new user summary without an avatar
    pub fn new(id: Snowflake, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            avatar_url: None,
        }
    }

    /// Attach an avatar URL
    #[must_use]
    pub fn with_avatar(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }
}
