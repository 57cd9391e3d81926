//! Client runtime - one event loop driving every state machine

use std::sync::Arc;

use chat_core::protocol::UpdateStatus;
use chat_core::{Attachment, ChannelSpec, ClientEvent, PresenceStatus, ServerEvent, Snowflake, UserSummary};
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::directory::{ConversationDirectory, DirectThreadRequest};
use crate::error::{ClientError, ClientResult};
use crate::presence::PresenceTracker;
use crate::transport::{ConnectionState, SessionEvent, TransportSession};
use crate::typing::TypingCoordinator;

/// Everything the client knows, mutated only under the client lock
#[derive(Debug)]
pub struct ClientState {
    pub user: Option<UserSummary>,
    pub presence: PresenceTracker,
    pub typing: TypingCoordinator,
    pub directory: ConversationDirectory,
}

impl ClientState {
    pub fn new(typing: TypingCoordinator, directory: ConversationDirectory) -> Self {
        Self {
            user: None,
            presence: PresenceTracker::new(),
            typing,
            directory,
        }
    }

    /// Apply one session event; returns the events to send in response
    pub fn apply(&mut self, event: SessionEvent, now: Instant) -> Vec<ClientEvent> {
        match event {
            SessionEvent::Connected { ready } => {
                debug!(user_id = %ready.user.id, conversations = ready.conversations.len(), "Session ready");
                self.typing.set_local_user(ready.user.id);
                self.user = Some(ready.user.clone());
                self.directory.load(&ready);
                self.directory.rejoin_all()
            }
            SessionEvent::Disconnected { reason } => {
                debug!(reason = ?reason, "Resetting presence and typing");
                self.presence.reset();
                self.typing.reset();
                Vec::new()
            }
            SessionEvent::Event(event) => self.apply_server_event(event, now),
        }
    }

    fn apply_server_event(&mut self, event: ServerEvent, now: Instant) -> Vec<ClientEvent> {
        match event {
            ServerEvent::Ready(_) => {}
            ServerEvent::OnlineUsers(e) => self.presence.replace_snapshot(e.users),
            ServerEvent::UserOnline(e) => {
                self.presence.user_online(e.uid, e.name);
            }
            ServerEvent::UserOffline(e) => {
                self.presence.user_offline(e.uid);
                self.typing.forget_user(e.uid);
            }
            ServerEvent::UserStatusChanged(e) => {
                if let Err(err) = self.presence.status_changed(e.uid, e.status) {
                    debug!(error = %err, "Ignoring presence update");
                }
            }
            ServerEvent::UserTyping(e) => self.typing.remote_started(e.channel_id, e.user, now),
            ServerEvent::UserStoppedTyping(e) => self.typing.remote_stopped(e.channel_id, e.user.id),
            event => {
                if let ServerEvent::NewMessage(e) = &event {
                    self.typing
                        .remote_stopped(e.message.conversation_id, e.message.sender_id);
                }
                match self.directory.apply(&event) {
                    Ok(follow_up) => return follow_up,
                    Err(err) if err.is_ignorable() => {
                        debug!(event = event.name(), error = %err, "Ignoring stale event");
                    }
                    Err(err) => warn!(event = event.name(), error = %err, "Failed to apply event"),
                }
            }
        }
        Vec::new()
    }

    /// Expire typing and pipeline deadlines; returns events to send
    pub fn poll(&mut self, now: Instant) -> Vec<ClientEvent> {
        self.directory.poll(now);
        self.typing.poll(now)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.typing.next_deadline(), self.directory.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Realtime chat client
///
/// Public operations are synchronous: they update local state, enqueue the
/// resulting events and return without waiting for the server. A send that
/// cannot reach the transport stays pending and fails at its deadline.
pub struct ChatClient {
    transport: Arc<TransportSession>,
    state: Arc<Mutex<ClientState>>,
    wake: Arc<Notify>,
    changes: Arc<watch::Sender<u64>>,
    task: JoinHandle<()>,
}

impl ChatClient {
    /// Create a client around a session and start its event loop
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(transport: Arc<TransportSession>) -> Self {
        let config = transport.config();
        let state = Arc::new(Mutex::new(ClientState::new(
            TypingCoordinator::new(config.typing_debounce(), config.typing_expiry()),
            ConversationDirectory::new(config.confirmation_timeout()),
        )));
        let wake = Arc::new(Notify::new());
        let (changes, _) = watch::channel(0u64);
        let changes = Arc::new(changes);

        let task = tokio::spawn(run(
            Arc::clone(&transport),
            Arc::clone(&state),
            Arc::clone(&wake),
            Arc::clone(&changes),
            transport.events(),
        ));

        Self {
            transport,
            state,
            wake,
            changes,
            task,
        }
    }

    pub fn transport(&self) -> &Arc<TransportSession> {
        &self.transport
    }

    pub async fn connect(&self, credential: impl Into<String>) -> ClientResult<()> {
        self.transport.connect(credential).await
    }

    pub async fn reconnect(&self) -> ClientResult<()> {
        self.transport.reconnect().await
    }

    pub fn disconnect(&self) {
        self.transport.disconnect();
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    /// Read the current state under the lock
    pub fn with_state<R>(&self, f: impl FnOnce(&ClientState) -> R) -> R {
        f(&self.state.lock())
    }

    /// Counter bumped after every state change
    pub fn watch_changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn update<R>(&self, f: impl FnOnce(&mut ClientState, Instant) -> ClientResult<(R, Vec<ClientEvent>)>) -> ClientResult<R> {
        let (result, events) = {
            let mut state = self.state.lock();
            f(&mut state, Instant::now())?
        };
        send_all(&self.transport, &events);
        self.changes.send_modify(|n| *n += 1);
        self.wake.notify_one();
        Ok(result)
    }

    /// Send a text message; returns its local id
    pub fn send_message(&self, conversation_id: Snowflake, content: impl Into<String>) -> ClientResult<String> {
        self.send_message_with(conversation_id, content, Vec::new(), None)
    }

    /// Send a message with attachments and an optional quoted message
    pub fn send_message_with(
        &self,
        conversation_id: Snowflake,
        content: impl Into<String>,
        attachments: Vec<Attachment>,
        reply_to: Option<Snowflake>,
    ) -> ClientResult<String> {
        let content = content.into();
        self.update(|state, now| {
            let (local_id, event) =
                state
                    .directory
                    .send_message(conversation_id, content, attachments, reply_to, now)?;
            let mut events = vec![event];
            events.extend(state.typing.stop_typing(conversation_id));
            Ok((local_id, events))
        })
    }

    pub fn edit_message(&self, conversation_id: Snowflake, message_id: Snowflake, content: impl Into<String>) -> ClientResult<()> {
        let content = content.into();
        self.update(|state, now| {
            let event = state
                .directory
                .edit_message(conversation_id, message_id, content, now)?;
            Ok(((), vec![event]))
        })
    }

    pub fn delete_message(&self, conversation_id: Snowflake, message_id: Snowflake) -> ClientResult<()> {
        self.update(|state, now| {
            let event = state.directory.delete_message(conversation_id, message_id, now)?;
            Ok(((), vec![event]))
        })
    }

    pub fn toggle_reaction(&self, conversation_id: Snowflake, message_id: Snowflake, emoji: &str) -> ClientResult<()> {
        self.update(|state, now| {
            let event = state
                .directory
                .toggle_reaction(conversation_id, message_id, emoji, now)?;
            Ok(((), vec![event]))
        })
    }

    /// Re-send a failed message with its original local id
    pub fn retry(&self, conversation_id: Snowflake, local_id: &str) -> ClientResult<()> {
        self.update(|state, now| {
            let event = state.directory.retry(conversation_id, local_id, now)?;
            Ok(((), vec![event]))
        })
    }

    pub fn discard(&self, conversation_id: Snowflake, local_id: &str) -> ClientResult<bool> {
        self.update(|state, _| Ok((state.directory.discard(conversation_id, local_id)?, Vec::new())))
    }

    /// Record a keystroke in the composer
    pub fn notify_typing(&self, conversation_id: Snowflake) {
        let _ = self.update(|state, now| Ok(((), state.typing.notify_typing(conversation_id, now))));
    }

    pub fn stop_typing(&self, conversation_id: Snowflake) {
        let _ = self.update(|state, _| Ok(((), state.typing.stop_typing(conversation_id).into_iter().collect())));
    }

    pub fn create_channel(&self, spec: ChannelSpec) -> ClientResult<()> {
        self.update(|state, _| Ok(((), vec![state.directory.create_channel(spec)?])))
    }

    /// Existing thread id, or `None` once `start_conversation` was sent
    pub fn start_direct_thread(&self, target: &UserSummary) -> ClientResult<Option<Snowflake>> {
        self.update(|state, _| match state.directory.start_direct_thread(target)? {
            DirectThreadRequest::Existing(id) => Ok((Some(id), Vec::new())),
            DirectThreadRequest::Requested(event) => Ok((None, vec![event])),
        })
    }

    pub fn join(&self, conversation_id: Snowflake) -> ClientResult<()> {
        self.update(|state, _| Ok(((), vec![state.directory.join(conversation_id)?])))
    }

    pub fn leave(&self, conversation_id: Snowflake) -> ClientResult<()> {
        self.update(|state, _| {
            let mut events = vec![state.directory.leave(conversation_id)?];
            events.extend(state.typing.leave_conversation(conversation_id));
            Ok(((), events))
        })
    }

    /// Make a conversation active, joining it and clearing its unread count
    pub fn open(&self, conversation_id: Snowflake) -> ClientResult<()> {
        self.update(|state, _| Ok(((), state.directory.open(conversation_id)?)))
    }

    pub fn mark_read(&self, conversation_id: Snowflake) -> ClientResult<()> {
        self.update(|state, _| Ok(((), vec![state.directory.mark_read(conversation_id)?])))
    }

    /// Announce the local user's status
    pub fn update_status(&self, status: PresenceStatus) -> ClientResult<()> {
        if !status.is_settable() {
            return Err(ClientError::Validation(format!("status {status} cannot be set")));
        }
        self.update(|_, _| Ok(((), vec![ClientEvent::UpdateStatus(UpdateStatus { status })])))
    }

    /// Request a fresh presence snapshot
    pub fn refresh_presence(&self) {
        send_all(&self.transport, &[ClientEvent::GetOnlineUsers]);
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

fn send_all(transport: &TransportSession, events: &[ClientEvent]) {
    for event in events {
        if let Err(err) = transport.send(event) {
            debug!(event = event.name(), error = %err, "Event not sent");
        }
    }
}

async fn run(
    transport: Arc<TransportSession>,
    state: Arc<Mutex<ClientState>>,
    wake: Arc<Notify>,
    changes: Arc<watch::Sender<u64>>,
    mut events: broadcast::Receiver<SessionEvent>,
) {
    loop {
        let deadline = state.lock().next_deadline();
        let timer = async move {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        let outgoing = tokio::select! {
            received = events.recv() => match received {
                Ok(event) => state.lock().apply(event, Instant::now()),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Client lagged behind the session, refetching state");
                    let mut rejoin = state.lock().directory.rejoin_all();
                    rejoin.push(ClientEvent::GetOnlineUsers);
                    rejoin
                }
                Err(RecvError::Closed) => return,
            },
            () = timer => state.lock().poll(Instant::now()),
            () = wake.notified() => continue,
        };

        send_all(&transport, &outgoing);
        changes.send_modify(|n| *n += 1);
    }
}
