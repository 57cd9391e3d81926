//! Timeline entries and their delivery state

use chat_core::{Attachment, Message, Reactions, ReplyPreview, Snowflake};
use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Delivery state of a timeline entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Sent, waiting for the server until `deadline`
    Pending { deadline: Instant },
    Confirmed,
    /// No confirmation before the deadline, or rejected by the server
    Failed,
}

/// Kind of an optimistic change to a confirmed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    Edit,
    Delete,
    Reaction { emoji: String, added: bool },
}

/// An optimistic edit, delete or reaction awaiting its broadcast
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMutation {
    pub kind: MutationKind,
    pub deadline: Instant,
    pub(crate) restore: EntryBody,
}

/// The mutable part of an entry, kept to roll back unconfirmed mutations
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EntryBody {
    content: String,
    attachments: Vec<Attachment>,
    edited_at: Option<DateTime<Utc>>,
    is_deleted: bool,
    reactions: Reactions,
}

/// One row of a conversation timeline, pending or confirmed
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    /// Client-generated id, doubling as the `tempId` of the send
    pub local_id: Option<String>,
    /// Server id, present once confirmed
    pub durable_id: Option<Snowflake>,
    pub seq: Option<u64>,
    pub sender_id: Snowflake,
    pub sender_name: String,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub reactions: Reactions,
    pub reply_to: Option<ReplyPreview>,
    pub delivery: Delivery,
    pub pending_mutation: Option<PendingMutation>,
    /// The last optimistic mutation was not confirmed in time and was rolled back
    pub mutation_failed: bool,
}

impl TimelineEntry {
    /// A confirmed entry straight from the server
    pub fn confirmed(message: Message) -> Self {
        let mut entry = Self {
            local_id: None,
            durable_id: None,
            seq: None,
            sender_id: message.sender_id,
            sender_name: String::new(),
            content: String::new(),
            attachments: Vec::new(),
            created_at: message.created_at,
            edited_at: None,
            is_deleted: false,
            reactions: Reactions::new(),
            reply_to: None,
            delivery: Delivery::Confirmed,
            pending_mutation: None,
            mutation_failed: false,
        };
        entry.overwrite(message);
        entry
    }

    /// Overwrite everything the server owns, keeping the local id
    ///
    /// A pending mutation survives, but rolls back to the new server state.
    pub(crate) fn overwrite(&mut self, message: Message) {
        self.durable_id = Some(message.id);
        self.seq = Some(message.seq);
        self.sender_id = message.sender_id;
        self.sender_name = message.sender_name;
        self.content = message.content;
        self.attachments = message.attachments;
        self.created_at = message.created_at;
        self.edited_at = message.edited_at;
        self.is_deleted = message.is_deleted;
        self.reactions = message.reactions;
        self.reply_to = message.reply_to;
        self.delivery = Delivery::Confirmed;

        let body = self.body();
        if let Some(mutation) = self.pending_mutation.as_mut() {
            mutation.restore = body;
        }
    }

    /// Apply a server edit; a pending mutation rolls back onto it
    pub(crate) fn server_edit(&mut self, content: String, edited_at: DateTime<Utc>) {
        if let Some(mutation) = self.pending_mutation.as_mut() {
            mutation.restore.content.clone_from(&content);
            mutation.restore.edited_at = Some(edited_at);
        }
        self.content = content;
        self.edited_at = Some(edited_at);
    }

    /// Apply the server's reaction aggregate; a pending mutation rolls back onto it
    pub(crate) fn server_reactions(&mut self, reactions: Reactions) {
        if let Some(mutation) = self.pending_mutation.as_mut() {
            mutation.restore.reactions.clone_from(&reactions);
        }
        self.reactions = reactions;
    }

    pub(crate) fn body(&self) -> EntryBody {
        EntryBody {
            content: self.content.clone(),
            attachments: self.attachments.clone(),
            edited_at: self.edited_at,
            is_deleted: self.is_deleted,
            reactions: self.reactions.clone(),
        }
    }

    /// Start an optimistic mutation; an earlier unconfirmed one keeps its snapshot
    pub(crate) fn begin_mutation(&mut self, kind: MutationKind, deadline: Instant) {
        let restore = match self.pending_mutation.take() {
            Some(previous) => previous.restore,
            None => self.body(),
        };
        self.pending_mutation = Some(PendingMutation {
            kind,
            deadline,
            restore,
        });
        self.mutation_failed = false;
    }

    /// Settle the pending mutation if the server confirmed its kind
    pub(crate) fn settle_mutation(&mut self, confirmed: impl Fn(&MutationKind) -> bool) {
        if self
            .pending_mutation
            .as_ref()
            .is_some_and(|mutation| confirmed(&mutation.kind))
        {
            self.pending_mutation = None;
            self.mutation_failed = false;
        }
    }

    /// Undo the pending mutation and flag the entry
    pub(crate) fn roll_back(&mut self) {
        if let Some(mutation) = self.pending_mutation.take() {
            let EntryBody {
                content,
                attachments,
                edited_at,
                is_deleted,
                reactions,
            } = mutation.restore;
            self.content = content;
            self.attachments = attachments;
            self.edited_at = edited_at;
            self.is_deleted = is_deleted;
            self.reactions = reactions;
            self.mutation_failed = true;
        }
    }

    pub(crate) fn tombstone(&mut self) {
        self.is_deleted = true;
        self.content.clear();
        self.attachments.clear();
        self.reactions.clear();
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.delivery, Delivery::Pending { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.delivery, Delivery::Failed)
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self.delivery, Delivery::Confirmed)
    }

    pub fn is_edited(&self) -> bool {
        self.edited_at.is_some()
    }

    pub(crate) fn has_local_id(&self, id: &str) -> bool {
        self.local_id.as_deref() == Some(id)
    }

    /// Earliest deadline attached to this entry
    pub(crate) fn deadline(&self) -> Option<Instant> {
        let delivery = match self.delivery {
            Delivery::Pending { deadline } => Some(deadline),
            _ => None,
        };
        let mutation = self.pending_mutation.as_ref().map(|m| m.deadline);
        match (delivery, mutation) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Reply preview for messages quoting this one
    pub(crate) fn reply_preview(&self) -> Option<ReplyPreview> {
        let message_id = self.durable_id?;
        Some(ReplyPreview {
            message_id,
            sender_name: self.sender_name.clone(),
            snippet: self
                .content
                .chars()
                .take(chat_core::entities::PREVIEW_LEN)
                .collect(),
        })
    }
}
