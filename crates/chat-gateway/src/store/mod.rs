//! Store implementations
//!
//! The gateway talks to history through [`chat_core::ConversationStore`].

mod memory;

pub use memory::MemoryStore;
