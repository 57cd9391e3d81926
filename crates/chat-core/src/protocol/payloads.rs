//! Handshake payload definitions

use serde::{Deserialize, Serialize};

use crate::entities::{Conversation, UserSummary};
use crate::value_objects::Snowflake;

/// Payload for op 10 (Hello)
///
/// Sent by the server immediately after connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

impl HelloPayload {
    /// Default heartbeat interval (45 seconds)
    pub const DEFAULT_HEARTBEAT_INTERVAL: u64 = 45_000;

    /// Create a new Hello payload with default interval
    #[must_use]
    pub fn new() -> Self {
        Self {
            heartbeat_interval: Self::DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    /// Create a Hello payload with custom interval
    #[must_use]
    pub fn with_interval(heartbeat_interval: u64) -> Self {
        Self { heartbeat_interval }
    }
}

impl Default for HelloPayload {
    fn default() -> Self {
        Self::new()
    }
}

/// Payload for op 2 (Identify)
///
/// Sent by the client to authenticate the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    /// Access token, with or without a `Bearer ` prefix
    pub token: String,

    /// Optional client properties
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<IdentifyProperties>,
}

impl IdentifyPayload {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            properties: None,
        }
    }

    /// Token with any `Bearer ` prefix stripped
    pub fn bare_token(&self) -> &str {
        self.token
            .strip_prefix("Bearer ")
            .unwrap_or(&self.token)
            .trim()
    }
}

/// Client connection properties
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentifyProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,

    /// Client library name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
}

impl IdentifyProperties {
    /// Properties describing this build
    #[must_use]
    pub fn current() -> Self {
        Self {
            os: Some(std::env::consts::OS.to_string()),
            client: Some(format!("chat-client/{}", env!("CARGO_PKG_VERSION"))),
        }
    }
}

/// Payload of the `ready` dispatch, sent once Identify succeeds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyPayload {
    pub user: UserSummary,
    pub session_id: String,
    /// Every conversation visible to the user
    pub conversations: Vec<Conversation>,
    /// Server-side unread counters (direct threads only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unread: Vec<UnreadCount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCount {
    pub conversation_id: Snowflake,
    pub count: u32,
}
