//! In-memory implementation of ConversationStore

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::instrument;

use chat_core::protocol::UnreadCount;
use chat_core::traits::{ConversationStore, NewMessage, StoreResult};
use chat_core::{Conversation, DomainError, Message, ParticipantPair, Reactions, Snowflake};

#[derive(Debug, Default)]
struct Inner {
    conversations: HashMap<Snowflake, Conversation>,
    direct_index: HashMap<ParticipantPair, Snowflake>,
    messages: HashMap<Snowflake, Message>,
    /// Message ids per conversation in sequence order
    timelines: HashMap<Snowflake, Vec<Snowflake>>,
    /// (conversation, sender, tempId) -> message id
    submissions: HashMap<(Snowflake, Snowflake, String), Snowflake>,
    unread: HashMap<(Snowflake, Snowflake), u32>,
}

/// Process-local store; history does not survive a restart
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with conversations
    pub fn with_conversations(conversations: impl IntoIterator<Item = Conversation>) -> Self {
        let store = Self::new();
        {
            let mut inner = store.inner.write();
            for conversation in conversations {
                Self::insert(&mut inner, conversation);
            }
        }
        store
    }

    fn insert(inner: &mut Inner, conversation: Conversation) {
        if let Some(pair) = conversation.participants() {
            inner.direct_index.insert(pair, conversation.id);
        }
        inner.conversations.insert(conversation.id, conversation);
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn find_conversation(&self, id: Snowflake) -> StoreResult<Option<Conversation>> {
        Ok(self.inner.read().conversations.get(&id).cloned())
    }

    #[instrument(skip(self))]
    async fn conversations_for(&self, user_id: Snowflake) -> StoreResult<Vec<Conversation>> {
        let inner = self.inner.read();
        let mut conversations: Vec<_> = inner
            .conversations
            .values()
            .filter(|c| c.can_access(user_id))
            .cloned()
            .collect();
        conversations.sort_by_key(|c| std::cmp::Reverse(c.last_activity()));
        Ok(conversations)
    }

    #[instrument(skip(self, conversation), fields(id = %conversation.id))]
    async fn insert_conversation(&self, conversation: &Conversation) -> StoreResult<()> {
        let mut inner = self.inner.write();
        if inner.conversations.contains_key(&conversation.id) {
            return Err(DomainError::StoreError(format!(
                "conversation {} already exists",
                conversation.id
            )));
        }
        if let Some(pair) = conversation.participants() {
            if inner.direct_index.contains_key(&pair) {
                return Err(DomainError::StoreError(
                    "direct thread already exists for this pair".to_string(),
                ));
            }
        }
        Self::insert(&mut inner, conversation.clone());
        Ok(())
    }

    #[instrument(skip(self, candidate), fields(id = %candidate.id))]
    async fn find_or_create_direct(&self, candidate: Conversation) -> StoreResult<(Conversation, bool)> {
        let pair = candidate
            .participants()
            .ok_or_else(|| DomainError::ValidationError("not a direct thread".to_string()))?;

        let mut inner = self.inner.write();
        if let Some(existing) = inner
            .direct_index
            .get(&pair)
            .and_then(|id| inner.conversations.get(id))
        {
            return Ok((existing.clone(), false));
        }

        Self::insert(&mut inner, candidate.clone());
        Ok((candidate, true))
    }

    #[instrument(skip(self, message), fields(conversation_id = %message.conversation_id))]
    async fn append_message(&self, message: NewMessage) -> StoreResult<Message> {
        let mut inner = self.inner.write();
        if !inner.conversations.contains_key(&message.conversation_id) {
            return Err(DomainError::ConversationNotFound(message.conversation_id));
        }

        let reply_to = message
            .reply_to
            .and_then(|id| inner.messages.get(&id))
            .filter(|quoted| quoted.conversation_id == message.conversation_id && !quoted.is_deleted)
            .map(Message::reply_preview);

        let submission = message
            .temp_id
            .clone()
            .map(|temp_id| (message.conversation_id, message.sender.id, temp_id));
        if let Some(key) = &submission {
            if inner.submissions.contains_key(key) {
                return Err(DomainError::StoreError(format!(
                    "tempId {} already submitted",
                    key.2
                )));
            }
        }

        let timeline = inner.timelines.entry(message.conversation_id).or_default();
        let seq = timeline.len() as u64 + 1;
        timeline.push(message.id);

        let stored = Message {
            id: message.id,
            seq,
            conversation_id: message.conversation_id,
            sender_id: message.sender.id,
            sender_name: message.sender.display_name,
            content: message.content,
            attachments: message.attachments,
            created_at: Utc::now(),
            edited_at: None,
            is_deleted: false,
            reactions: Reactions::new(),
            reply_to,
            temp_id: message.temp_id,
        };

        if let Some(conversation) = inner.conversations.get_mut(&stored.conversation_id) {
            conversation.last_message = Some(stored.preview());
        }
        if let Some(key) = submission {
            inner.submissions.insert(key, stored.id);
        }
        inner.messages.insert(stored.id, stored.clone());

        Ok(stored)
    }

    async fn find_by_temp_id(
        &self,
        conversation_id: Snowflake,
        sender_id: Snowflake,
        temp_id: &str,
    ) -> StoreResult<Option<Message>> {
        let inner = self.inner.read();
        Ok(inner
            .submissions
            .get(&(conversation_id, sender_id, temp_id.to_string()))
            .and_then(|id| inner.messages.get(id))
            .cloned())
    }

    async fn find_message(&self, id: Snowflake) -> StoreResult<Option<Message>> {
        Ok(self.inner.read().messages.get(&id).cloned())
    }

    #[instrument(skip(self, message), fields(id = %message.id))]
    async fn update_message(&self, message: &Message) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let Some(stored) = inner.messages.get_mut(&message.id) else {
            return Err(DomainError::MessageNotFound(message.id));
        };
        *stored = message.clone();

        if let Some(conversation) = inner.conversations.get_mut(&message.conversation_id) {
            if let Some(last) = conversation
                .last_message
                .as_mut()
                .filter(|last| last.message_id == message.id)
            {
                *last = message.preview();
            }
        }
        Ok(())
    }

    async fn recent_messages(&self, conversation_id: Snowflake, limit: usize) -> StoreResult<Vec<Message>> {
        let inner = self.inner.read();
        let Some(timeline) = inner.timelines.get(&conversation_id) else {
            return Ok(Vec::new());
        };
        let start = timeline.len().saturating_sub(limit);
        Ok(timeline[start..]
            .iter()
            .filter_map(|id| inner.messages.get(id).cloned())
            .collect())
    }

    async fn increment_unread(&self, conversation_id: Snowflake, user_id: Snowflake) -> StoreResult<u32> {
        let mut inner = self.inner.write();
        let count = inner.unread.entry((conversation_id, user_id)).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn reset_unread(&self, conversation_id: Snowflake, user_id: Snowflake) -> StoreResult<()> {
        self.inner.write().unread.remove(&(conversation_id, user_id));
        Ok(())
    }

    async fn unread_for(&self, user_id: Snowflake) -> StoreResult<Vec<UnreadCount>> {
        let inner = self.inner.read();
        let mut unread: Vec<_> = inner
            .unread
            .iter()
            .filter(|((_, uid), count)| *uid == user_id && **count > 0)
            .map(|((conversation_id, _), count)| UnreadCount {
                conversation_id: *conversation_id,
                count: *count,
            })
            .collect();
        unread.sort_by_key(|u| u.conversation_id);
        Ok(unread)
    }
}
