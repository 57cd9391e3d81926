//! Presence - live online/away status of users

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::user::UserSummary;
use crate::value_objects::Snowflake;

/// User status
///
/// `Offline` is what queries report for users absent from the online set;
/// presence records themselves only ever hold `Online` or `Away`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    #[default]
    Online,
    Away,
    Offline,
}

impl PresenceStatus {
    /// Check if a client may set this status explicitly
    #[must_use]
    pub fn is_settable(&self) -> bool {
        !matches!(self, Self::Offline)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Away => "away",
            Self::Offline => "offline",
        }
    }
}

impl std::fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PresenceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "online" => Ok(Self::Online),
            "away" | "idle" => Ok(Self::Away),
            "offline" => Ok(Self::Offline),
            _ => Err(format!("Invalid status: {s}")),
        }
    }
}

/// One entry of the online set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user_id: Snowflake,
    pub display_name: String,
    pub status: PresenceStatus,
    pub last_changed_at: DateTime<Utc>,
}

impl PresenceRecord {
    /// A freshly online user
    pub fn online(user: &UserSummary) -> Self {
        Self {
            user_id: user.id,
            display_name: user.display_name.clone(),
            status: PresenceStatus::Online,
            last_changed_at: Utc::now(),
        }
    }

    /// Update the status and touch the timestamp
    pub fn set_status(&mut self, status: PresenceStatus) {
        self.status = status;
        self.last_changed_at = Utc::now();
    }
}
