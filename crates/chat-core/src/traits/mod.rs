//! Ports implemented by infrastructure

mod store;

pub use store::{ConversationStore, NewMessage, StoreResult};
