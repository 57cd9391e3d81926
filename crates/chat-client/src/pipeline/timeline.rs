//! The per-conversation message timeline and its reducer

use std::time::Duration;

use chat_core::protocol::{
    EditMessage, MessageRef, ReactionChange, SendDirectMessage, SendMessage,
};
use chat_core::{Attachment, ClientEvent, Message, Reactions, Snowflake, UserSummary};
use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::entry::{Delivery, MutationKind, TimelineEntry};
use super::events::{ApplyOutcome, PipelineEvent};
use crate::error::{ClientError, ClientResult};

/// Timeline of one joined conversation
///
/// All server input goes through [`MessagePipeline::apply`]; local actions
/// return the [`ClientEvent`] to send. Confirmed entries keep server order and
/// pending entries keep submission order; reconciliation never moves an entry.
#[derive(Debug)]
pub struct MessagePipeline {
    conversation_id: Snowflake,
    is_direct: bool,
    local_user: Snowflake,
    confirmation_timeout: Duration,
    entries: Vec<TimelineEntry>,
    last_seq: u64,
    synced: bool,
    needs_resync: bool,
}

impl MessagePipeline {
    pub fn new(
        conversation_id: Snowflake,
        is_direct: bool,
        local_user: Snowflake,
        confirmation_timeout: Duration,
    ) -> Self {
        Self {
            conversation_id,
            is_direct,
            local_user,
            confirmation_timeout,
            entries: Vec::new(),
            last_seq: 0,
            synced: false,
            needs_resync: false,
        }
    }

    pub fn conversation_id(&self) -> Snowflake {
        self.conversation_id
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    /// Content to render; deleted messages show nothing
    pub fn visible_content(entry: &TimelineEntry) -> Option<&str> {
        (!entry.is_deleted).then_some(entry.content.as_str())
    }

    /// Highest sequence number applied so far
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Check if a snapshot has been applied since the last resync request
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Return and clear the resync flag raised by a sequence gap
    pub fn take_resync(&mut self) -> bool {
        std::mem::take(&mut self.needs_resync)
    }

    /// Forget that the timeline is in sync; the next snapshot restores it
    pub fn mark_unsynced(&mut self) {
        self.synced = false;
        self.needs_resync = false;
    }

    pub fn set_local_user(&mut self, user_id: Snowflake) {
        self.local_user = user_id;
    }

    /// Check if a pending or failed send with this `tempId` lives here
    pub fn has_local(&self, temp_id: &str) -> bool {
        self.entries.iter().any(|e| e.has_local_id(temp_id))
    }

    fn position_durable(&self, id: Snowflake) -> Option<usize> {
        self.entries.iter().position(|e| e.durable_id == Some(id))
    }

    fn position_local(&self, temp_id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.has_local_id(temp_id))
    }

    fn confirmed_mut(&mut self, id: Snowflake) -> ClientResult<&mut TimelineEntry> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.durable_id == Some(id))
            .ok_or_else(|| ClientError::UnknownMessage(id.to_string()))?;
        if entry.is_deleted {
            return Err(ClientError::MessageDeleted);
        }
        Ok(entry)
    }

    fn send_event(
        &self,
        temp_id: String,
        content: String,
        attachments: Vec<Attachment>,
        reply_to: Option<Snowflake>,
    ) -> ClientEvent {
        if self.is_direct {
            ClientEvent::SendDirectMessage(SendDirectMessage {
                conversation_id: self.conversation_id,
                content,
                reply_to,
                attachments,
                temp_id,
            })
        } else {
            ClientEvent::SendMessage(SendMessage {
                channel_id: self.conversation_id,
                content,
                reply_to,
                attachments,
                temp_id,
            })
        }
    }

    /// Append a pending entry and return its local id with the event to send
    pub fn send(
        &mut self,
        sender: &UserSummary,
        content: impl Into<String>,
        attachments: Vec<Attachment>,
        reply_to: Option<Snowflake>,
        now: Instant,
    ) -> ClientResult<(String, ClientEvent)> {
        let content = content.into();
        let local_id = Uuid::new_v4().to_string();
        let event = self.send_event(local_id.clone(), content.clone(), attachments.clone(), reply_to);
        event
            .validate_payload()
            .map_err(|e| ClientError::Validation(e.to_string()))?;

        let reply_preview = reply_to.and_then(|id| {
            self.entries
                .iter()
                .find(|e| e.durable_id == Some(id))
                .and_then(TimelineEntry::reply_preview)
        });

        self.entries.push(TimelineEntry {
            local_id: Some(local_id.clone()),
            durable_id: None,
            seq: None,
            sender_id: sender.id,
            sender_name: sender.display_name.clone(),
            content,
            attachments,
            created_at: Utc::now(),
            edited_at: None,
            is_deleted: false,
            reactions: Reactions::new(),
            reply_to: reply_preview,
            delivery: Delivery::Pending {
                deadline: now + self.confirmation_timeout,
            },
            pending_mutation: None,
            mutation_failed: false,
        });

        Ok((local_id, event))
    }

    /// Re-send a failed entry with the same `tempId`
    pub fn retry(&mut self, local_id: &str, now: Instant) -> ClientResult<ClientEvent> {
        let deadline = now + self.confirmation_timeout;
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.has_local_id(local_id) && e.is_failed())
            .ok_or_else(|| ClientError::UnknownMessage(local_id.to_string()))?;

        entry.delivery = Delivery::Pending { deadline };
        let content = entry.content.clone();
        let attachments = entry.attachments.clone();
        let reply_to = entry.reply_to.as_ref().map(|r| r.message_id);

        Ok(self.send_event(local_id.to_string(), content, attachments, reply_to))
    }

    /// Drop a failed entry; returns `true` if something was removed
    pub fn discard(&mut self, local_id: &str) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|e| !(e.has_local_id(local_id) && e.is_failed()));
        self.entries.len() != before
    }

    /// Optimistically replace the content of a confirmed message
    pub fn edit(&mut self, message_id: Snowflake, content: impl Into<String>, now: Instant) -> ClientResult<ClientEvent> {
        let content = content.into();
        let event = ClientEvent::EditMessage(EditMessage {
            message_id,
            content: content.clone(),
        });
        event
            .validate_payload()
            .map_err(|e| ClientError::Validation(e.to_string()))?;

        let deadline = now + self.confirmation_timeout;
        let entry = self.confirmed_mut(message_id)?;
        entry.begin_mutation(MutationKind::Edit, deadline);
        entry.content = content;
        entry.edited_at = Some(Utc::now());

        Ok(event)
    }

    /// Optimistically tombstone a confirmed message
    pub fn delete(&mut self, message_id: Snowflake, now: Instant) -> ClientResult<ClientEvent> {
        let deadline = now + self.confirmation_timeout;
        let entry = self.confirmed_mut(message_id)?;
        entry.begin_mutation(MutationKind::Delete, deadline);
        entry.tombstone();

        Ok(ClientEvent::DeleteMessage(MessageRef { message_id }))
    }

    /// Flip `user`'s reaction locally and return the matching add or remove
    pub fn toggle_reaction(
        &mut self,
        message_id: Snowflake,
        emoji: &str,
        user: Snowflake,
        now: Instant,
    ) -> ClientResult<ClientEvent> {
        let change = ReactionChange {
            message_id,
            emoji: emoji.to_string(),
        };
        ClientEvent::AddReaction(change.clone())
            .validate_payload()
            .map_err(|e| ClientError::Validation(e.to_string()))?;

        let deadline = now + self.confirmation_timeout;
        let entry = self.confirmed_mut(message_id)?;
        let added = entry.reactions.toggle(emoji, user);
        entry.begin_mutation(
            MutationKind::Reaction {
                emoji: emoji.to_string(),
                added,
            },
            deadline,
        );

        Ok(if added {
            ClientEvent::AddReaction(change)
        } else {
            ClientEvent::RemoveReaction(change)
        })
    }

    /// Apply one server-side event
    pub fn apply(&mut self, event: PipelineEvent) -> ApplyOutcome {
        let name = event.name();
        let outcome = match event {
            PipelineEvent::Snapshot(messages) => self.apply_snapshot(messages),
            PipelineEvent::Confirmed { temp_id, message } => self.apply_confirmed(&temp_id, message),
            PipelineEvent::Incoming { temp_id, message } => {
                self.apply_incoming(temp_id.as_deref(), message)
            }
            PipelineEvent::Edited {
                message_id,
                content,
                edited_at,
            } => self.update_confirmed(message_id, false, |entry| {
                entry.server_edit(content, edited_at);
                entry.settle_mutation(|kind| *kind == MutationKind::Edit);
            }),
            PipelineEvent::Deleted { message_id } => {
                self.update_confirmed(message_id, true, |entry| {
                    entry.tombstone();
                    entry.pending_mutation = None;
                    entry.mutation_failed = false;
                })
            }
            PipelineEvent::ReactionsUpdated {
                message_id,
                reactions,
            } => self.update_confirmed(message_id, true, |entry| {
                entry.server_reactions(reactions);
                entry.settle_mutation(|kind| matches!(kind, MutationKind::Reaction { .. }));
            }),
            PipelineEvent::Rejected { temp_id } => self.apply_rejected(&temp_id),
        };

        debug!(
            conversation_id = %self.conversation_id,
            event = name,
            outcome = ?outcome,
            "Applied pipeline event"
        );
        outcome
    }

    fn apply_snapshot(&mut self, mut messages: Vec<Message>) -> ApplyOutcome {
        messages.retain(|m| m.conversation_id == self.conversation_id);
        messages.sort_by_key(|m| m.seq);
        messages.dedup_by_key(|m| m.id);

        let previous = std::mem::take(&mut self.entries);
        let mut local = Vec::new();
        let mut known_local_ids = Vec::new();
        for entry in previous {
            match entry.durable_id {
                None => local.push(entry),
                Some(id) => {
                    if let Some(local_id) = entry.local_id {
                        known_local_ids.push((id, local_id));
                    }
                }
            }
        }

        self.last_seq = messages.last().map_or(0, |m| m.seq);
        let mut entries = Vec::with_capacity(messages.len() + local.len());
        for message in messages {
            let id = message.id;
            // A send whose confirmation was lost is stored under its tempId
            let claimed = message
                .temp_id
                .as_deref()
                .filter(|_| message.sender_id == self.local_user)
                .and_then(|temp_id| local.iter().position(|e| e.has_local_id(temp_id)))
                .map(|index| local.remove(index));

            let mut entry = TimelineEntry::confirmed(message);
            entry.local_id = match claimed {
                Some(claimed) => claimed.local_id,
                None => known_local_ids
                    .iter()
                    .find(|(known, _)| *known == id)
                    .map(|(_, local_id)| local_id.clone()),
            };
            entries.push(entry);
        }
        entries.extend(local);
        self.entries = entries;

        self.synced = true;
        self.needs_resync = false;
        ApplyOutcome::Reset
    }

    fn apply_confirmed(&mut self, temp_id: &str, message: Message) -> ApplyOutcome {
        if message.conversation_id != self.conversation_id {
            return ApplyOutcome::Ignored;
        }
        let seq = message.seq;
        let by_local = self.position_local(temp_id);

        let outcome = match self.position_durable(message.id) {
            Some(index) => {
                if self.entries[index].is_deleted && !message.is_deleted {
                    return ApplyOutcome::Ignored;
                }
                self.entries[index].overwrite(message);
                if let Some(local) = by_local.filter(|&local| local != index) {
                    let local_id = self.entries[local].local_id.take();
                    self.entries[index].local_id = local_id;
                    self.entries.remove(local);
                }
                ApplyOutcome::Replaced
            }
            None => match by_local {
                Some(index) => {
                    self.entries[index].overwrite(message);
                    ApplyOutcome::Reconciled
                }
                None => {
                    debug!(
                        conversation_id = %self.conversation_id,
                        temp_id,
                        "Confirmation without a local entry"
                    );
                    let mut entry = TimelineEntry::confirmed(message);
                    entry.local_id = Some(temp_id.to_string());
                    self.entries.push(entry);
                    ApplyOutcome::ReconciliationMiss
                }
            },
        };

        self.observe_seq(seq);
        outcome
    }

    fn apply_incoming(&mut self, temp_id: Option<&str>, message: Message) -> ApplyOutcome {
        if message.conversation_id != self.conversation_id {
            return ApplyOutcome::Ignored;
        }
        let seq = message.seq;

        let outcome = if let Some(index) = self.position_durable(message.id) {
            if self.entries[index].is_deleted && !message.is_deleted {
                return ApplyOutcome::Ignored;
            }
            self.entries[index].overwrite(message);
            ApplyOutcome::Replaced
        } else if message.sender_id == self.local_user {
            // Own messages only arrive here as echoes of a local send
            match temp_id.and_then(|t| self.position_local(t)) {
                Some(index) => {
                    self.entries[index].overwrite(message);
                    ApplyOutcome::Reconciled
                }
                None => {
                    self.observe_seq(seq);
                    return ApplyOutcome::Ignored;
                }
            }
        } else {
            self.entries.push(TimelineEntry::confirmed(message));
            ApplyOutcome::Inserted
        };

        self.observe_seq(seq);
        outcome
    }

    fn apply_rejected(&mut self, temp_id: &str) -> ApplyOutcome {
        match self
            .entries
            .iter_mut()
            .find(|e| e.has_local_id(temp_id) && e.is_pending())
        {
            Some(entry) => {
                entry.delivery = Delivery::Failed;
                ApplyOutcome::Updated
            }
            None => ApplyOutcome::Ignored,
        }
    }

    fn update_confirmed(
        &mut self,
        message_id: Snowflake,
        allow_deleted: bool,
        update: impl FnOnce(&mut TimelineEntry),
    ) -> ApplyOutcome {
        match self.entries.iter_mut().find(|e| e.durable_id == Some(message_id)) {
            Some(entry) if allow_deleted || !entry.is_deleted => {
                update(entry);
                ApplyOutcome::Updated
            }
            _ => ApplyOutcome::Ignored,
        }
    }

    fn observe_seq(&mut self, seq: u64) {
        if self.synced && seq > self.last_seq + 1 {
            warn!(
                conversation_id = %self.conversation_id,
                last_seq = self.last_seq,
                seq,
                "Sequence gap, requesting resync"
            );
            self.needs_resync = true;
            self.synced = false;
        }
        self.last_seq = self.last_seq.max(seq);
    }

    /// Expire deadlines; returns `true` if any entry changed
    pub fn poll(&mut self, now: Instant) -> bool {
        let mut changed = false;
        for entry in &mut self.entries {
            if let Delivery::Pending { deadline } = entry.delivery {
                if deadline <= now {
                    debug!(
                        conversation_id = %self.conversation_id,
                        local_id = ?entry.local_id,
                        "Send not confirmed in time"
                    );
                    entry.delivery = Delivery::Failed;
                    changed = true;
                }
            }
            if entry
                .pending_mutation
                .as_ref()
                .is_some_and(|m| m.deadline <= now)
            {
                entry.roll_back();
                changed = true;
            }
        }
        changed
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().filter_map(TimelineEntry::deadline).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    const GENERAL: Snowflake = Snowflake::new(100);
    const ME: Snowflake = Snowflake::new(1);
    const OTHER: Snowflake = Snowflake::new(2);
    const TIMEOUT: Duration = Duration::from_secs(10);

    fn pipeline() -> MessagePipeline {
        MessagePipeline::new(GENERAL, false, ME, TIMEOUT)
    }

    fn me() -> UserSummary {
        UserSummary::new(ME, "Ada")
    }

    fn message(id: i64, seq: u64, sender: Snowflake, content: &str) -> Message {
        Message {
            id: Snowflake::new(id),
            seq,
            conversation_id: GENERAL,
            sender_id: sender,
            sender_name: if sender == ME { "Ada" } else { "Grace" }.to_string(),
            content: content.to_string(),
            attachments: Vec::new(),
            created_at: Utc::now(),
            edited_at: None,
            is_deleted: false,
            reactions: Reactions::new(),
            reply_to: None,
            temp_id: None,
        }
    }

    fn send(pipeline: &mut MessagePipeline, content: &str, now: Instant) -> String {
        pipeline.send(&me(), content, Vec::new(), None, now).unwrap().0
    }

    fn confirm(temp_id: &str, message: Message) -> PipelineEvent {
        PipelineEvent::Confirmed {
            temp_id: temp_id.to_string(),
            message,
        }
    }

    fn incoming(temp_id: Option<&str>, message: Message) -> PipelineEvent {
        PipelineEvent::Incoming {
            temp_id: temp_id.map(str::to_string),
            message,
        }
    }

    fn snapshot(messages: Vec<Message>) -> PipelineEvent {
        PipelineEvent::Snapshot(messages)
    }

    fn contents(pipeline: &MessagePipeline) -> Vec<&str> {
        pipeline.entries().iter().map(|e| e.content.as_str()).collect()
    }

    #[test]
    fn test_send_appends_pending_and_emits_event() {
        let mut pipeline = pipeline();
        let now = Instant::now();
        let (local_id, event) = pipeline.send(&me(), "hello", Vec::new(), None, now).unwrap();

        match event {
            ClientEvent::SendMessage(payload) => {
                assert_eq!(payload.temp_id, local_id);
                assert_eq!(payload.channel_id, GENERAL);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(pipeline.entries()[0].is_pending());
        assert_eq!(pipeline.next_deadline(), Some(now + TIMEOUT));
    }

    #[test]
    fn test_direct_pipeline_sends_direct_message() {
        let mut pipeline = MessagePipeline::new(GENERAL, true, ME, TIMEOUT);
        let (_, event) = pipeline
            .send(&me(), "hi", Vec::new(), None, Instant::now())
            .unwrap();
        assert_eq!(event.name(), "send_direct_message");
    }

    #[test]
    fn test_empty_send_is_rejected_locally() {
        let mut pipeline = pipeline();
        let err = pipeline
            .send(&me(), "  ", Vec::new(), None, Instant::now())
            .unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
        assert!(pipeline.entries().is_empty());
    }

    #[test]
    fn test_reply_carries_preview_of_quoted_message() {
        let mut pipeline = pipeline();
        let now = Instant::now();
        pipeline.apply(snapshot(vec![message(41, 1, OTHER, "question?")]));

        pipeline
            .send(&me(), "answer", Vec::new(), Some(Snowflake::new(41)), now)
            .unwrap();
        let reply = pipeline.entries()[1].reply_to.as_ref().unwrap();
        assert_eq!(reply.sender_name, "Grace");
        assert_eq!(reply.snippet, "question?");
    }

    #[test]
    fn test_confirmation_reconciles_in_place() {
        let mut pipeline = pipeline();
        let now = Instant::now();
        let a = send(&mut pipeline, "A", now);
        let b = send(&mut pipeline, "B", now);
        let c = send(&mut pipeline, "C", now);

        assert_eq!(pipeline.apply(confirm(&a, message(10, 1, ME, "A"))), ApplyOutcome::Reconciled);
        assert_eq!(pipeline.apply(confirm(&b, message(11, 2, ME, "B"))), ApplyOutcome::Reconciled);
        assert_eq!(pipeline.apply(confirm(&c, message(12, 3, ME, "C"))), ApplyOutcome::Reconciled);

        assert_eq!(contents(&pipeline), vec!["A", "B", "C"]);
        let ids: Vec<_> = pipeline.entries().iter().map(|e| e.durable_id).collect();
        assert_eq!(
            ids,
            vec![Some(Snowflake::new(10)), Some(Snowflake::new(11)), Some(Snowflake::new(12))]
        );
        assert!(pipeline.entries().iter().all(TimelineEntry::is_confirmed));
        assert!(pipeline.next_deadline().is_none());
    }

    #[test]
    fn test_confirmation_keeps_position_among_other_messages() {
        let mut pipeline = pipeline();
        let now = Instant::now();
        let t1 = send(&mut pipeline, "hello", now);
        pipeline.apply(incoming(None, message(41, 1, OTHER, "hey")));

        pipeline.apply(confirm(&t1, message(42, 2, ME, "hello")));
        assert_eq!(contents(&pipeline), vec!["hello", "hey"]);
        assert_eq!(pipeline.entries()[0].durable_id, Some(Snowflake::new(42)));
        assert_eq!(pipeline.entries()[0].local_id.as_deref(), Some(t1.as_str()));
    }

    #[test]
    fn test_replayed_confirmation_does_not_duplicate() {
        let mut pipeline = pipeline();
        let t1 = send(&mut pipeline, "hello", Instant::now());

        pipeline.apply(confirm(&t1, message(42, 1, ME, "hello")));
        assert_eq!(
            pipeline.apply(confirm(&t1, message(42, 1, ME, "hello"))),
            ApplyOutcome::Replaced
        );
        assert_eq!(
            pipeline.apply(incoming(Some(&t1), message(42, 1, ME, "hello"))),
            ApplyOutcome::Replaced
        );
        assert_eq!(pipeline.entries().len(), 1);
    }

    #[test]
    fn test_confirmation_miss_inserts_fresh() {
        let mut pipeline = pipeline();
        let outcome = pipeline.apply(confirm("gone", message(42, 1, ME, "hello")));
        assert_eq!(outcome, ApplyOutcome::ReconciliationMiss);
        assert_eq!(pipeline.entries().len(), 1);
    }

    #[test]
    fn test_own_incoming_without_local_entry_is_ignored() {
        let mut pipeline = pipeline();
        let outcome = pipeline.apply(incoming(Some("other-device"), message(42, 1, ME, "hello")));
        assert_eq!(outcome, ApplyOutcome::Ignored);
        assert!(pipeline.entries().is_empty());
    }

    #[test]
    fn test_pending_past_deadline_fails_then_retries_with_same_temp_id() {
        let mut pipeline = pipeline();
        let now = Instant::now();
        let t1 = send(&mut pipeline, "hello", now);

        assert!(!pipeline.poll(now + Duration::from_secs(9)));
        assert!(pipeline.poll(now + TIMEOUT));
        assert!(pipeline.entries()[0].is_failed());

        let later = now + Duration::from_secs(20);
        let event = pipeline.retry(&t1, later).unwrap();
        assert_eq!(event.temp_id(), Some(t1.as_str()));
        assert!(pipeline.entries()[0].is_pending());
        assert_eq!(pipeline.next_deadline(), Some(later + TIMEOUT));
    }

    #[test]
    fn test_retry_requires_failed_entry() {
        let mut pipeline = pipeline();
        let t1 = send(&mut pipeline, "hello", Instant::now());
        assert!(matches!(
            pipeline.retry(&t1, Instant::now()),
            Err(ClientError::UnknownMessage(_))
        ));
    }

    #[test]
    fn test_rejection_fails_immediately_and_discard_removes() {
        let mut pipeline = pipeline();
        let t1 = send(&mut pipeline, "hello", Instant::now());

        let outcome = pipeline.apply(PipelineEvent::Rejected { temp_id: t1.clone() });
        assert_eq!(outcome, ApplyOutcome::Updated);
        assert!(pipeline.entries()[0].is_failed());

        assert!(pipeline.discard(&t1));
        assert!(pipeline.entries().is_empty());
    }

    #[test]
    fn test_late_confirmation_recovers_failed_entry() {
        let mut pipeline = pipeline();
        let now = Instant::now();
        let t1 = send(&mut pipeline, "hello", now);
        pipeline.poll(now + TIMEOUT);

        pipeline.apply(confirm(&t1, message(42, 1, ME, "hello")));
        assert!(pipeline.entries()[0].is_confirmed());
    }

    #[test]
    fn test_snapshot_keeps_unconfirmed_local_entries() {
        let mut pipeline = pipeline();
        let now = Instant::now();
        let t1 = send(&mut pipeline, "confirmed", now);
        pipeline.apply(confirm(&t1, message(42, 2, ME, "confirmed")));
        send(&mut pipeline, "still pending", now);

        let outcome = pipeline.apply(snapshot(vec![
            message(42, 2, ME, "confirmed"),
            message(41, 1, OTHER, "first"),
        ]));
        assert_eq!(outcome, ApplyOutcome::Reset);
        assert_eq!(contents(&pipeline), vec!["first", "confirmed", "still pending"]);
        assert_eq!(pipeline.entries()[1].local_id.as_deref(), Some(t1.as_str()));
        assert!(pipeline.entries()[2].is_pending());
        assert_eq!(pipeline.last_seq(), 2);
        assert!(pipeline.is_synced());
    }

    fn sent_as(temp_id: &str, mut message: Message) -> Message {
        message.temp_id = Some(temp_id.to_string());
        message
    }

    #[test]
    fn test_snapshot_claims_send_whose_confirmation_was_lost() {
        let mut pipeline = pipeline();
        let now = Instant::now();
        pipeline.apply(snapshot(vec![message(41, 1, OTHER, "first")]));
        let t1 = send(&mut pipeline, "hello", now);

        pipeline.apply(snapshot(vec![
            message(41, 1, OTHER, "first"),
            sent_as(&t1, message(42, 2, ME, "hello")),
        ]));

        assert_eq!(contents(&pipeline), vec!["first", "hello"]);
        let entry = &pipeline.entries()[1];
        assert!(entry.is_confirmed());
        assert_eq!(entry.durable_id, Some(Snowflake::new(42)));
        assert_eq!(entry.local_id.as_deref(), Some(t1.as_str()));
        assert!(pipeline.next_deadline().is_none());
        assert!(!pipeline.poll(now + TIMEOUT));
    }

    #[test]
    fn test_snapshot_claims_failed_send() {
        let mut pipeline = pipeline();
        let now = Instant::now();
        let t1 = send(&mut pipeline, "hello", now);
        pipeline.poll(now + TIMEOUT);
        assert!(pipeline.entries()[0].is_failed());

        pipeline.apply(snapshot(vec![sent_as(&t1, message(42, 1, ME, "hello"))]));

        assert_eq!(pipeline.entries().len(), 1);
        assert!(pipeline.entries()[0].is_confirmed());
        assert!(matches!(
            pipeline.retry(&t1, now + TIMEOUT),
            Err(ClientError::UnknownMessage(_))
        ));
    }

    #[test]
    fn test_snapshot_ignores_temp_id_of_other_senders() {
        let mut pipeline = pipeline();
        let t1 = send(&mut pipeline, "mine", Instant::now());

        pipeline.apply(snapshot(vec![sent_as(&t1, message(41, 1, OTHER, "theirs"))]));

        assert_eq!(contents(&pipeline), vec!["theirs", "mine"]);
        assert!(pipeline.entries()[1].is_pending());
    }

    #[test]
    fn test_retry_after_lost_confirmation_settles_once() {
        let mut pipeline = pipeline();
        let now = Instant::now();
        let t1 = send(&mut pipeline, "hello", now);
        pipeline.poll(now + TIMEOUT);

        let event = pipeline.retry(&t1, now + TIMEOUT).unwrap();
        assert_eq!(event.temp_id(), Some(t1.as_str()));

        pipeline.apply(confirm(&t1, sent_as(&t1, message(42, 1, ME, "hello"))));
        pipeline.apply(confirm(&t1, sent_as(&t1, message(42, 1, ME, "hello"))));
        assert_eq!(pipeline.entries().len(), 1);
        assert!(pipeline.entries()[0].is_confirmed());
    }

    #[test]
    fn test_own_message_from_other_device_keeps_sequence() {
        let mut pipeline = pipeline();
        pipeline.apply(snapshot(Vec::new()));

        pipeline.apply(incoming(None, message(41, 1, OTHER, "a")));
        let outcome = pipeline.apply(incoming(Some("phone"), message(42, 2, ME, "b")));
        assert_eq!(outcome, ApplyOutcome::Ignored);
        pipeline.apply(incoming(None, message(43, 3, OTHER, "c")));

        assert!(!pipeline.take_resync());
        assert!(pipeline.is_synced());
        assert_eq!(pipeline.last_seq(), 3);
    }

    #[test]
    fn test_sequence_gap_requests_resync() {
        let mut pipeline = pipeline();
        pipeline.apply(snapshot(vec![message(41, 1, OTHER, "a")]));

        pipeline.apply(incoming(None, message(42, 2, OTHER, "b")));
        assert!(!pipeline.take_resync());

        pipeline.apply(incoming(None, message(44, 4, OTHER, "d")));
        assert!(pipeline.take_resync());
        assert!(!pipeline.take_resync());
        assert!(!pipeline.is_synced());
    }

    #[test]
    fn test_edit_is_optimistic_and_server_wins() {
        let mut pipeline = pipeline();
        let now = Instant::now();
        pipeline.apply(snapshot(vec![message(42, 1, ME, "helo")]));

        let event = pipeline.edit(Snowflake::new(42), "hello", now).unwrap();
        assert_eq!(event.name(), "edit_message");
        assert_eq!(pipeline.entries()[0].content, "hello");
        assert!(pipeline.entries()[0].pending_mutation.is_some());

        let server_time: DateTime<Utc> = "2024-03-01T12:00:00Z".parse().unwrap();
        pipeline.apply(PipelineEvent::Edited {
            message_id: Snowflake::new(42),
            content: "hello".to_string(),
            edited_at: server_time,
        });
        let entry = &pipeline.entries()[0];
        assert_eq!(entry.edited_at, Some(server_time));
        assert!(entry.pending_mutation.is_none());
    }

    #[test]
    fn test_unconfirmed_edit_rolls_back() {
        let mut pipeline = pipeline();
        let now = Instant::now();
        pipeline.apply(snapshot(vec![message(42, 1, ME, "original")]));
        pipeline.edit(Snowflake::new(42), "changed", now).unwrap();

        assert!(pipeline.poll(now + TIMEOUT));
        let entry = &pipeline.entries()[0];
        assert_eq!(entry.content, "original");
        assert!(entry.edited_at.is_none());
        assert!(entry.mutation_failed);
    }

    #[test]
    fn test_rolled_back_edit_keeps_server_reactions() {
        let mut pipeline = pipeline();
        let now = Instant::now();
        let id = Snowflake::new(42);
        pipeline.apply(snapshot(vec![message(42, 1, OTHER, "original")]));
        pipeline.edit(id, "changed", now).unwrap();

        let mut server = Reactions::new();
        server.add("👍", OTHER);
        pipeline.apply(PipelineEvent::ReactionsUpdated {
            message_id: id,
            reactions: server.clone(),
        });
        assert!(pipeline.poll(now + TIMEOUT));

        let entry = &pipeline.entries()[0];
        assert_eq!(entry.content, "original");
        assert_eq!(entry.reactions, server);
        assert!(entry.mutation_failed);
    }

    #[test]
    fn test_rolled_back_reaction_keeps_server_edit() {
        let mut pipeline = pipeline();
        let now = Instant::now();
        let id = Snowflake::new(42);
        pipeline.apply(snapshot(vec![message(42, 1, ME, "helo")]));
        pipeline.toggle_reaction(id, "👍", ME, now).unwrap();

        let server_time: DateTime<Utc> = "2024-03-01T12:00:00Z".parse().unwrap();
        pipeline.apply(PipelineEvent::Edited {
            message_id: id,
            content: "hello".to_string(),
            edited_at: server_time,
        });
        assert!(pipeline.poll(now + TIMEOUT));

        let entry = &pipeline.entries()[0];
        assert_eq!(entry.content, "hello");
        assert_eq!(entry.edited_at, Some(server_time));
        assert!(entry.reactions.is_empty());
        assert!(entry.mutation_failed);
    }

    #[test]
    fn test_deletion_is_terminal() {
        let mut pipeline = pipeline();
        let now = Instant::now();
        let id = Snowflake::new(42);
        pipeline.apply(snapshot(vec![message(42, 1, ME, "bye")]));

        let event = pipeline.delete(id, now).unwrap();
        assert_eq!(event, ClientEvent::DeleteMessage(MessageRef { message_id: id }));
        assert_eq!(MessagePipeline::visible_content(&pipeline.entries()[0]), None);

        pipeline.apply(PipelineEvent::Deleted { message_id: id });
        assert!(pipeline.entries()[0].pending_mutation.is_none());
        assert!(matches!(pipeline.edit(id, "again", now), Err(ClientError::MessageDeleted)));
        assert!(matches!(
            pipeline.toggle_reaction(id, "👍", ME, now),
            Err(ClientError::MessageDeleted)
        ));
        assert!(matches!(pipeline.delete(id, now), Err(ClientError::MessageDeleted)));

        let outcome = pipeline.apply(PipelineEvent::Edited {
            message_id: id,
            content: "zombie".to_string(),
            edited_at: Utc::now(),
        });
        assert_eq!(outcome, ApplyOutcome::Ignored);
        assert!(pipeline.entries()[0].content.is_empty());
    }

    #[test]
    fn test_mutations_on_unknown_message_are_rejected() {
        let mut pipeline = pipeline();
        let now = Instant::now();
        send(&mut pipeline, "pending", now);

        assert!(matches!(
            pipeline.edit(Snowflake::new(999), "x", now),
            Err(ClientError::UnknownMessage(_))
        ));
        assert!(matches!(
            pipeline.delete(Snowflake::new(999), now),
            Err(ClientError::UnknownMessage(_))
        ));
    }

    #[test]
    fn test_toggle_reaction_twice_restores_aggregate() {
        let mut pipeline = pipeline();
        let now = Instant::now();
        let id = Snowflake::new(42);
        let mut original = message(42, 1, OTHER, "hi");
        original.reactions.add("🎉", OTHER);
        pipeline.apply(snapshot(vec![original.clone()]));

        let first = pipeline.toggle_reaction(id, "🎉", ME, now).unwrap();
        assert_eq!(first.name(), "add_reaction");
        let second = pipeline.toggle_reaction(id, "🎉", ME, now).unwrap();
        assert_eq!(second.name(), "remove_reaction");
        assert_eq!(pipeline.entries()[0].reactions, original.reactions);
    }

    #[test]
    fn test_reaction_broadcast_replaces_aggregate() {
        let mut pipeline = pipeline();
        let now = Instant::now();
        let id = Snowflake::new(42);
        pipeline.apply(snapshot(vec![message(42, 1, OTHER, "hi")]));
        pipeline.toggle_reaction(id, "👍", ME, now).unwrap();

        let mut server = Reactions::new();
        server.add("👍", ME);
        server.add("👍", OTHER);
        pipeline.apply(PipelineEvent::ReactionsUpdated {
            message_id: id,
            reactions: server.clone(),
        });

        let entry = &pipeline.entries()[0];
        assert_eq!(entry.reactions, server);
        assert!(entry.pending_mutation.is_none());
        assert!(!pipeline.poll(now + TIMEOUT));
    }
}
