//! Pipeline input events and apply outcomes

use chat_core::{Message, Reactions, ServerEvent, Snowflake};
use chrono::{DateTime, Utc};

/// Everything that can change a conversation timeline from the server side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// Full history, oldest first
    Snapshot(Vec<Message>),
    /// Confirmation of our own send
    Confirmed { temp_id: String, message: Message },
    /// A message broadcast to this conversation
    Incoming {
        temp_id: Option<String>,
        message: Message,
    },
    Edited {
        message_id: Snowflake,
        content: String,
        edited_at: DateTime<Utc>,
    },
    Deleted { message_id: Snowflake },
    /// Full reaction aggregate, replacing the local one
    ReactionsUpdated {
        message_id: Snowflake,
        reactions: Reactions,
    },
    /// The server refused our send
    Rejected { temp_id: String },
}

/// Result of applying one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Appended as a new confirmed entry
    Inserted,
    /// A pending entry became confirmed in place
    Reconciled,
    /// An existing confirmed entry was overwritten (replay)
    Replaced,
    /// A confirmation matched nothing and was inserted fresh
    ReconciliationMiss,
    /// An existing entry changed
    Updated,
    /// The timeline was rebuilt from a snapshot
    Reset,
    Ignored,
}

impl ApplyOutcome {
    /// Check if the timeline changed
    pub fn changed(self) -> bool {
        !matches!(self, Self::Ignored)
    }
}

impl PipelineEvent {
    /// Route a server event to its conversation, if it is timeline material
    ///
    /// `error` events have no conversation; callers route them by `tempId`.
    pub fn from_server(event: &ServerEvent) -> Option<(Snowflake, Self)> {
        let routed = match event {
            ServerEvent::ChannelMessages(e) => (e.channel_id, Self::Snapshot(e.messages.clone())),
            ServerEvent::MessageConfirmed(e) => (
                e.channel_id,
                Self::Confirmed {
                    temp_id: e.temp_id.clone(),
                    message: e.message.clone(),
                },
            ),
            ServerEvent::NewMessage(e) => (
                e.message.conversation_id,
                Self::Incoming {
                    temp_id: e.temp_id.clone(),
                    message: e.message.clone(),
                },
            ),
            ServerEvent::NewDirectMessage(e) => {
                let envelope = e.message.as_ref()?;
                (
                    e.conversation.id,
                    Self::Incoming {
                        temp_id: envelope.temp_id.clone(),
                        message: envelope.message.clone(),
                    },
                )
            }
            ServerEvent::MessageEdited(e) => (
                e.channel_id,
                Self::Edited {
                    message_id: e.message_id,
                    content: e.content.clone(),
                    edited_at: e.edited_at,
                },
            ),
            ServerEvent::MessageDeleted(e) => (
                e.channel_id,
                Self::Deleted {
                    message_id: e.message_id,
                },
            ),
            ServerEvent::MessageReactionUpdated(e) => (
                e.channel_id,
                Self::ReactionsUpdated {
                    message_id: e.message_id,
                    reactions: e.reactions.clone(),
                },
            ),
            _ => return None,
        };
        Some(routed)
    }

    /// Event name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Snapshot(_) => "snapshot",
            Self::Confirmed { .. } => "confirmed",
            Self::Incoming { .. } => "incoming",
            Self::Edited { .. } => "edited",
            Self::Deleted { .. } => "deleted",
            Self::ReactionsUpdated { .. } => "reactions_updated",
            Self::Rejected { .. } => "rejected",
        }
    }
}
