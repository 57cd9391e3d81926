//! Test users and conversation lookups

use chat_client::ClientState;
use chat_core::{ConversationKind, Snowflake, UserSummary};

pub fn ada() -> UserSummary {
    UserSummary::new(Snowflake::new(1001), "Ada")
}

pub fn bob() -> UserSummary {
    UserSummary::new(Snowflake::new(1002), "Bob")
}

pub fn cleo() -> UserSummary {
    UserSummary::new(Snowflake::new(1003), "Cleo")
}

/// Id of the channel named `name` in the client's directory
pub fn channel_named(state: &ClientState, name: &str) -> Option<Snowflake> {
    state.directory.conversations().into_iter().find_map(|c| match &c.kind {
        ConversationKind::Channel { name: n, .. } if n == name => Some(c.id),
        _ => None,
    })
}

/// Contents of the conversation timeline in display order
pub fn contents(state: &ClientState, conversation_id: Snowflake) -> Vec<String> {
    state
        .directory
        .pipeline(conversation_id)
        .map(|p| p.entries().iter().map(|e| e.content.clone()).collect())
        .unwrap_or_default()
}

/// Number of confirmed entries in the conversation timeline
pub fn confirmed_count(state: &ClientState, conversation_id: Snowflake) -> usize {
    state
        .directory
        .pipeline(conversation_id)
        .map_or(0, |p| p.entries().iter().filter(|e| e.is_confirmed()).count())
}
