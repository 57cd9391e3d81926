//! # chat-core
//!
//! Domain layer for the realtime messaging core: conversations, messages,
//! reactions, presence, the gateway wire protocol, and the storage port.
//! This crate has zero dependencies on infrastructure (transport, storage, runtime).

pub mod entities;
pub mod error;
pub mod protocol;
pub mod traits;
pub mod value_objects;

// Re-export commonly used types at crate root
pub use entities::{
    Attachment, ChannelSpec, Conversation, ConversationKind, Message, MessagePreview,
    ParticipantPair, PresenceRecord, PresenceStatus, Reactions, ReplyPreview, UserSummary,
};
pub use error::DomainError;
pub use protocol::{ClientEvent, CloseCode, GatewayMessage, OpCode, ServerEvent};
pub use traits::{ConversationStore, NewMessage, StoreResult};
pub use value_objects::{Snowflake, SnowflakeGenerator, SnowflakeParseError};
