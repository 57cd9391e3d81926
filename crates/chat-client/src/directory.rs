//! Conversation directory - known conversations, joined timelines, unread counts

use std::collections::HashMap;
use std::time::Duration;

use chat_core::protocol::{ChannelRef, ConversationRef, ReadyPayload, StartConversation};
use chat_core::{
    Attachment, ChannelSpec, ClientEvent, Conversation, Message, ParticipantPair, ServerEvent,
    Snowflake, UserSummary,
};
use tokio::time::Instant;

use crate::error::{ClientError, ClientResult};
use crate::pipeline::{MessagePipeline, PipelineEvent};

/// Answer to [`ConversationDirectory::start_direct_thread`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectThreadRequest {
    /// A thread with that user is already known
    Existing(Snowflake),
    /// Send this `start_conversation`; the thread arrives as `new_direct_message`
    Requested(ClientEvent),
}

#[derive(Debug)]
pub struct ConversationDirectory {
    local_user: Option<UserSummary>,
    conversations: HashMap<Snowflake, Conversation>,
    direct_index: HashMap<ParticipantPair, Snowflake>,
    unread: HashMap<Snowflake, u32>,
    pipelines: HashMap<Snowflake, MessagePipeline>,
    active: Option<Snowflake>,
    confirmation_timeout: Duration,
}

impl ConversationDirectory {
    pub fn new(confirmation_timeout: Duration) -> Self {
        Self {
            local_user: None,
            conversations: HashMap::new(),
            direct_index: HashMap::new(),
            unread: HashMap::new(),
            pipelines: HashMap::new(),
            active: None,
            confirmation_timeout,
        }
    }

    pub fn local_user(&self) -> Option<&UserSummary> {
        self.local_user.as_ref()
    }

    fn local_user_id(&self) -> ClientResult<Snowflake> {
        self.local_user
            .as_ref()
            .map(|user| user.id)
            .ok_or(ClientError::Unauthenticated)
    }

    pub fn set_local_user(&mut self, user: UserSummary) {
        for pipeline in self.pipelines.values_mut() {
            pipeline.set_local_user(user.id);
        }
        self.local_user = Some(user);
    }

    /// Replace the known conversations with the `ready` handshake payload
    ///
    /// Joined timelines survive if their conversation is still visible, so
    /// pending sends outlive a reconnect.
    pub fn load(&mut self, ready: &ReadyPayload) {
        self.set_local_user(ready.user.clone());
        self.conversations.clear();
        self.direct_index.clear();
        for conversation in &ready.conversations {
            self.upsert(conversation.clone());
        }

        let conversations = &self.conversations;
        self.pipelines.retain(|id, _| conversations.contains_key(id));
        if self.active.is_some_and(|id| !conversations.contains_key(&id)) {
            self.active = None;
        }

        self.unread = ready
            .unread
            .iter()
            .filter(|u| u.count > 0)
            .map(|u| (u.conversation_id, u.count))
            .collect();
    }

    /// Insert or update a conversation; returns its id
    ///
    /// A direct thread replaces any other thread known for the same pair.
    pub fn upsert(&mut self, conversation: Conversation) -> Snowflake {
        let id = conversation.id;
        if let Some(pair) = conversation.participants() {
            if let Some(previous) = self.direct_index.insert(pair, id) {
                if previous != id {
                    tracing::debug!(old = %previous, new = %id, "Replacing duplicate direct thread");
                    self.conversations.remove(&previous);
                    self.pipelines.remove(&previous);
                    self.unread.remove(&previous);
                }
            }
        }

        match self.conversations.get_mut(&id) {
            Some(existing) => {
                let last_message = existing.last_message.take();
                *existing = conversation;
                if existing.last_message.is_none() {
                    existing.last_message = last_message;
                }
            }
            None => {
                self.conversations.insert(id, conversation);
            }
        }
        id
    }

    pub fn conversation(&self, id: Snowflake) -> Option<&Conversation> {
        self.conversations.get(&id)
    }

    /// Conversations by most recent activity, newest first
    pub fn conversations(&self) -> Vec<&Conversation> {
        let mut list: Vec<_> = self.conversations.values().collect();
        list.sort_by(|a, b| {
            b.last_activity()
                .cmp(&a.last_activity())
                .then(b.id.cmp(&a.id))
        });
        list
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Known direct thread with `user`, if any
    pub fn direct_thread_with(&self, user: Snowflake) -> Option<Snowflake> {
        let me = self.local_user.as_ref()?.id;
        let pair = ParticipantPair::new(me, user).ok()?;
        self.direct_index.get(&pair).copied()
    }

    /// Validate a channel request and build the event; nothing is inserted locally
    pub fn create_channel(&self, spec: ChannelSpec) -> ClientResult<ClientEvent> {
        let event = ClientEvent::CreateChannel(spec);
        event
            .validate_payload()
            .map_err(|e| ClientError::Validation(e.to_string()))?;
        Ok(event)
    }

    /// Find or request the direct thread with `target`
    pub fn start_direct_thread(&self, target: &UserSummary) -> ClientResult<DirectThreadRequest> {
        let me = self.local_user_id()?;
        let pair = ParticipantPair::new(me, target.id)
            .map_err(|e| ClientError::Validation(e.to_string()))?;
        if let Some(id) = self.direct_index.get(&pair) {
            return Ok(DirectThreadRequest::Existing(*id));
        }

        let event = ClientEvent::StartConversation(StartConversation {
            receiver_id: target.id,
            receiver_name: target.display_name.clone(),
            receiver_email: None,
        });
        event
            .validate_payload()
            .map_err(|e| ClientError::Validation(e.to_string()))?;
        Ok(DirectThreadRequest::Requested(event))
    }

    /// Create the timeline and request history
    pub fn join(&mut self, id: Snowflake) -> ClientResult<ClientEvent> {
        let me = self.local_user_id()?;
        let conversation = self
            .conversations
            .get(&id)
            .ok_or_else(|| ClientError::UnknownConversation(id.to_string()))?;
        let is_direct = conversation.is_direct();
        let timeout = self.confirmation_timeout;
        self.pipelines
            .entry(id)
            .or_insert_with(|| MessagePipeline::new(id, is_direct, me, timeout));
        Ok(ClientEvent::JoinChannel(ChannelRef { channel_id: id }))
    }

    /// Drop the timeline; the caller cancels typing for the conversation
    pub fn leave(&mut self, id: Snowflake) -> ClientResult<ClientEvent> {
        if self.pipelines.remove(&id).is_none() {
            return Err(ClientError::UnknownConversation(id.to_string()));
        }
        if self.active == Some(id) {
            self.active = None;
        }
        Ok(ClientEvent::LeaveChannel(ChannelRef { channel_id: id }))
    }

    pub fn is_joined(&self, id: Snowflake) -> bool {
        self.pipelines.contains_key(&id)
    }

    /// Make `id` the active conversation, joining it first if needed
    pub fn open(&mut self, id: Snowflake) -> ClientResult<Vec<ClientEvent>> {
        let mut events = Vec::new();
        if !self.is_joined(id) {
            events.push(self.join(id)?);
        }
        self.active = Some(id);
        events.push(self.mark_read(id)?);
        Ok(events)
    }

    pub fn active(&self) -> Option<Snowflake> {
        self.active
    }

    /// Reset the unread counter and tell the user's other sessions
    pub fn mark_read(&mut self, id: Snowflake) -> ClientResult<ClientEvent> {
        if !self.conversations.contains_key(&id) {
            return Err(ClientError::UnknownConversation(id.to_string()));
        }
        self.unread.remove(&id);
        Ok(ClientEvent::MarkMessagesRead(ConversationRef {
            conversation_id: id,
        }))
    }

    pub fn unread_count(&self, id: Snowflake) -> u32 {
        self.unread.get(&id).copied().unwrap_or(0)
    }

    pub fn total_unread(&self) -> u32 {
        self.unread.values().sum()
    }

    /// Re-request history of every joined conversation after a reconnect
    pub fn rejoin_all(&mut self) -> Vec<ClientEvent> {
        let mut ids: Vec<_> = self.pipelines.keys().copied().collect();
        ids.sort();
        ids.into_iter()
            .map(|id| {
                if let Some(pipeline) = self.pipelines.get_mut(&id) {
                    pipeline.mark_unsynced();
                }
                ClientEvent::JoinChannel(ChannelRef { channel_id: id })
            })
            .collect()
    }

    pub fn pipeline(&self, id: Snowflake) -> Option<&MessagePipeline> {
        self.pipelines.get(&id)
    }

    fn pipeline_mut(&mut self, id: Snowflake) -> ClientResult<&mut MessagePipeline> {
        self.pipelines
            .get_mut(&id)
            .ok_or_else(|| ClientError::UnknownConversation(id.to_string()))
    }

    /// Optimistic send into a joined conversation
    pub fn send_message(
        &mut self,
        id: Snowflake,
        content: impl Into<String>,
        attachments: Vec<Attachment>,
        reply_to: Option<Snowflake>,
        now: Instant,
    ) -> ClientResult<(String, ClientEvent)> {
        let sender = self
            .local_user
            .clone()
            .ok_or(ClientError::Unauthenticated)?;
        self.pipeline_mut(id)?
            .send(&sender, content, attachments, reply_to, now)
    }

    pub fn edit_message(
        &mut self,
        id: Snowflake,
        message_id: Snowflake,
        content: impl Into<String>,
        now: Instant,
    ) -> ClientResult<ClientEvent> {
        self.pipeline_mut(id)?.edit(message_id, content, now)
    }

    pub fn delete_message(&mut self, id: Snowflake, message_id: Snowflake, now: Instant) -> ClientResult<ClientEvent> {
        self.pipeline_mut(id)?.delete(message_id, now)
    }

    pub fn toggle_reaction(
        &mut self,
        id: Snowflake,
        message_id: Snowflake,
        emoji: &str,
        now: Instant,
    ) -> ClientResult<ClientEvent> {
        let me = self.local_user_id()?;
        self.pipeline_mut(id)?.toggle_reaction(message_id, emoji, me, now)
    }

    pub fn retry(&mut self, id: Snowflake, local_id: &str, now: Instant) -> ClientResult<ClientEvent> {
        self.pipeline_mut(id)?.retry(local_id, now)
    }

    pub fn discard(&mut self, id: Snowflake, local_id: &str) -> ClientResult<bool> {
        Ok(self.pipeline_mut(id)?.discard(local_id))
    }

    /// Expire pipeline deadlines; returns `true` if any timeline changed
    pub fn poll(&mut self, now: Instant) -> bool {
        self.pipelines
            .values_mut()
            .fold(false, |changed, pipeline| pipeline.poll(now) | changed)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pipelines
            .values()
            .filter_map(MessagePipeline::next_deadline)
            .min()
    }

    fn record_message(&mut self, message: &Message) {
        if let Some(conversation) = self.conversations.get_mut(&message.conversation_id) {
            let newer = conversation
                .last_message
                .as_ref()
                .map_or(true, |last| last.created_at <= message.created_at);
            if newer {
                conversation.last_message = Some(message.preview());
            }
        }
    }

    fn count_unread(&mut self, message: &Message) {
        let from_me = self
            .local_user
            .as_ref()
            .is_some_and(|me| me.id == message.sender_id);
        if !from_me && self.active != Some(message.conversation_id) {
            *self.unread.entry(message.conversation_id).or_insert(0) += 1;
        }
    }

    /// Apply a server event; returns follow-up events to send
    ///
    /// Events for conversations this client does not know are stale.
    pub fn apply(&mut self, event: &ServerEvent) -> ClientResult<Vec<ClientEvent>> {
        match event {
            ServerEvent::NewChannel(e) => {
                self.upsert(e.channel.clone());
                return Ok(Vec::new());
            }
            ServerEvent::NewDirectMessage(e) => {
                self.upsert(e.conversation.clone());
                if let Some(envelope) = &e.message {
                    self.record_message(&envelope.message);
                    self.count_unread(&envelope.message);
                }
            }
            ServerEvent::NewMessage(e) => {
                if !self.conversations.contains_key(&e.message.conversation_id) {
                    return Err(ClientError::StaleEvent(format!(
                        "message for unknown conversation {}",
                        e.message.conversation_id
                    )));
                }
                self.record_message(&e.message);
                self.count_unread(&e.message);
            }
            ServerEvent::MessageConfirmed(e) => self.record_message(&e.message),
            ServerEvent::MessageDeleted(e) => {
                if let Some(conversation) = self.conversations.get_mut(&e.channel_id) {
                    if let Some(last) = conversation
                        .last_message
                        .as_mut()
                        .filter(|last| last.message_id == e.message_id)
                    {
                        last.snippet.clear();
                    }
                }
            }
            ServerEvent::MessagesRead(e) => {
                self.unread.remove(&e.conversation_id);
                return Ok(Vec::new());
            }
            ServerEvent::Error(e) => {
                tracing::warn!(code = %e.code, message = %e.message, "Gateway rejected an event");
                if let Some(temp_id) = &e.temp_id {
                    if let Some(pipeline) = self.pipelines.values_mut().find(|p| p.has_local(temp_id)) {
                        pipeline.apply(PipelineEvent::Rejected {
                            temp_id: temp_id.clone(),
                        });
                    }
                }
                return Ok(Vec::new());
            }
            _ => {}
        }

        let mut follow_up = Vec::new();
        if let Some((id, pipeline_event)) = PipelineEvent::from_server(event) {
            if let Some(pipeline) = self.pipelines.get_mut(&id) {
                pipeline.apply(pipeline_event);
                if pipeline.take_resync() {
                    follow_up.push(ClientEvent::JoinChannel(ChannelRef { channel_id: id }));
                }
            }
        }
        Ok(follow_up)
    }
}
