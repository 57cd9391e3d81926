//! Per-conversation ordering
//!
//! Sequence numbers are assigned by the store; the sequencer makes sure the
//! append and the fan-out that follows happen as one step, so every
//! connection receives a conversation's events in sequence order.

use chat_core::Snowflake;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async lock per conversation
#[derive(Debug, Default)]
pub struct Sequencer {
    locks: DashMap<Snowflake, Arc<Mutex<()>>>,
}

impl Sequencer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a conversation's ordering
    ///
    /// Hold the guard across the store append and the fan-out.
    pub async fn lock(&self, conversation_id: Snowflake) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(conversation_id).or_default().clone();
        lock.lock_owned().await
    }

    /// Number of conversations that have been sequenced
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
