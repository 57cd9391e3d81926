//! Gateway protocol definitions
//!
//! Shared by the gateway and the client: op codes, close codes, the message
//! envelope, handshake payloads, and the typed client/server event unions.

mod client_events;
mod close_codes;
mod messages;
mod opcodes;
mod payloads;
mod server_events;

pub use client_events::{
    ChannelRef, ClientEvent, ConversationRef, EditMessage, MessageRef, ReactionChange,
    SendDirectMessage, SendMessage, StartConversation, UpdateStatus, MAX_CONTENT_LEN,
};
pub use close_codes::CloseCode;
pub use messages::GatewayMessage;
pub use opcodes::OpCode;
pub use payloads::{HelloPayload, IdentifyPayload, IdentifyProperties, ReadyPayload, UnreadCount};
pub use server_events::{
    ChannelMessages, ErrorPayload, MessageConfirmed, MessageDeleted, MessageEdited,
    MessageEnvelope, NewChannel, NewDirectMessage, OnlineUsers, ReactionsUpdated, ServerEvent,
    TypingUpdate, UserOffline, UserOnline, UserStatusChanged,
};
