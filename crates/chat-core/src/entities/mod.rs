//! Domain entities - core business objects

mod conversation;
mod message;
mod presence;
mod reaction;
mod user;

pub use conversation::{ChannelSpec, Conversation, ConversationKind, ParticipantPair};
pub use message::{Attachment, Message, MessagePreview, ReplyPreview, PREVIEW_LEN};
pub use presence::{PresenceRecord, PresenceStatus};
pub use reaction::Reactions;
pub use user::UserSummary;
