//! Event router (op 3)
//!
//! Maps each client event to its handler. A rejected event is answered
//! with an `error` event on the same connection; the socket stays open.

use super::messages::Post;
use super::{
    ConversationHandler, MessageHandler, PresenceHandler, ReactionHandler, TypingHandler,
};
use crate::connection::Connection;
use crate::server::GatewayState;
use chat_core::protocol::ErrorPayload;
use chat_core::{ClientEvent, DomainError, ServerEvent, StoreResult, UserSummary};
use std::sync::Arc;

pub struct EventRouter;

impl EventRouter {
    /// Run one client event for an authenticated connection
    pub async fn route(state: &GatewayState, connection: &Arc<Connection>, user: &UserSummary, event: ClientEvent) {
        let name = event.name();
        let temp_id = event.temp_id().map(str::to_string);

        tracing::trace!(session_id = %connection.session_id(), event = name, "Client event");

        if let Err(err) = Self::handle(state, connection, user, event).await {
            if err.is_internal() {
                tracing::error!(session_id = %connection.session_id(), event = name, error = %err, "Event failed");
            } else {
                tracing::debug!(session_id = %connection.session_id(), event = name, error = %err, "Event rejected");
            }
            connection.dispatch(&ServerEvent::Error(ErrorPayload::from(&err).with_temp_id(temp_id)));
        }
    }

    async fn handle(state: &GatewayState, connection: &Connection, user: &UserSummary, event: ClientEvent) -> StoreResult<()> {
        event.validate_payload().map_err(DomainError::from)?;

        match event {
            ClientEvent::JoinChannel(r) => ConversationHandler::join(state, connection, user, r.channel_id).await,
            ClientEvent::LeaveChannel(r) => ConversationHandler::leave(state, connection, user, r.channel_id).await,
            ClientEvent::SendMessage(m) => {
                let post = Post {
                    conversation_id: m.channel_id,
                    content: m.content,
                    attachments: m.attachments,
                    reply_to: m.reply_to,
                    temp_id: m.temp_id,
                    direct: false,
                };
                MessageHandler::send(state, connection, user, post).await
            }
            ClientEvent::SendDirectMessage(m) => {
                let post = Post {
                    conversation_id: m.conversation_id,
                    content: m.content,
                    attachments: m.attachments,
                    reply_to: m.reply_to,
                    temp_id: m.temp_id,
                    direct: true,
                };
                MessageHandler::send(state, connection, user, post).await
            }
            ClientEvent::EditMessage(edit) => MessageHandler::edit(state, user, edit).await,
            ClientEvent::DeleteMessage(r) => MessageHandler::delete(state, user, r.message_id).await,
            ClientEvent::AddReaction(change) => ReactionHandler::change(state, user, change, true).await,
            ClientEvent::RemoveReaction(change) => ReactionHandler::change(state, user, change, false).await,
            ClientEvent::TypingStart(r) => TypingHandler::start(state, user, r.channel_id).await,
            ClientEvent::TypingStop(r) => {
                TypingHandler::stop(state, user, r.channel_id).await;
                Ok(())
            }
            ClientEvent::CreateChannel(spec) => ConversationHandler::create_channel(state, user, spec).await,
            ClientEvent::StartConversation(request) => ConversationHandler::start_direct(state, user, request).await,
            ClientEvent::MarkMessagesRead(r) => {
                ConversationHandler::mark_read(state, connection, user, r.conversation_id).await
            }
            ClientEvent::GetOnlineUsers => PresenceHandler::online_users(state, connection),
            ClientEvent::UpdateStatus(update) => PresenceHandler::update_status(state, user, update.status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outbound;
    use chat_core::protocol::{ChannelRef, EditMessage, MessageRef, ReactionChange, SendMessage, StartConversation};
    use chat_core::{ChannelSpec, Conversation, Snowflake};
    use tokio::sync::mpsc;

    const GENERAL: Snowflake = Snowflake::new(1);

    struct Peer {
        user: UserSummary,
        connection: Arc<Connection>,
        rx: mpsc::Receiver<Outbound>,
    }

    impl Peer {
        fn connect(state: &GatewayState, id: i64, name: &str) -> Self {
            let (tx, rx) = mpsc::channel(64);
            let connection = state.connection_manager().add_connection(Connection::generate_id(), tx);
            let user = UserSummary::new(Snowflake::new(id), name);
            state.connection_manager().authenticate_connection(&connection, user.clone());
            Self { user, connection, rx }
        }

        async fn route(&self, state: &GatewayState, event: ClientEvent) {
            EventRouter::route(state, &self.connection, &self.user, event).await;
        }

        fn drain(&mut self) -> Vec<ServerEvent> {
            let mut events = Vec::new();
            while let Ok(outbound) = self.rx.try_recv() {
                if let Outbound::Message(message) = outbound {
                    events.push(message.as_server_event().unwrap().unwrap());
                }
            }
            events
        }
    }

    fn state() -> GatewayState {
        let general = Conversation::channel(GENERAL, ChannelSpec::public("general"), Snowflake::default());
        GatewayState::for_tests(vec![general])
    }

    fn send(temp_id: &str, content: &str) -> ClientEvent {
        ClientEvent::SendMessage(SendMessage {
            channel_id: GENERAL,
            content: content.to_string(),
            reply_to: None,
            attachments: Vec::new(),
            temp_id: temp_id.to_string(),
        })
    }

    fn join() -> ClientEvent {
        ClientEvent::JoinChannel(ChannelRef { channel_id: GENERAL })
    }

    #[tokio::test]
    async fn test_send_confirms_to_origin_and_fans_out() {
        let state = state();
        let mut ada = Peer::connect(&state, 1, "Ada");
        let mut bob = Peer::connect(&state, 2, "Bob");
        ada.route(&state, join()).await;
        bob.route(&state, join()).await;
        ada.drain();
        bob.drain();

        ada.route(&state, send("t1", "hello")).await;

        let ada_events = ada.drain();
        assert_eq!(ada_events.len(), 1);
        let ServerEvent::MessageConfirmed(confirmed) = &ada_events[0] else {
            panic!("expected confirmation, got {ada_events:?}");
        };
        assert_eq!(confirmed.temp_id, "t1");
        assert_eq!(confirmed.message.seq, 1);

        let bob_events = bob.drain();
        assert_eq!(bob_events.len(), 1);
        let ServerEvent::NewMessage(envelope) = &bob_events[0] else {
            panic!("expected new_message, got {bob_events:?}");
        };
        assert_eq!(envelope.message.id, confirmed.message.id);
        assert_eq!(envelope.message.content, "hello");
    }

    #[tokio::test]
    async fn test_resend_with_same_temp_id_is_stored_once() {
        let state = state();
        let mut ada = Peer::connect(&state, 1, "Ada");
        let mut bob = Peer::connect(&state, 2, "Bob");
        ada.route(&state, join()).await;
        bob.route(&state, join()).await;
        ada.drain();
        bob.drain();

        ada.route(&state, send("t1", "hello")).await;
        ada.route(&state, send("t1", "hello")).await;

        let confirmations: Vec<_> = ada
            .drain()
            .into_iter()
            .map(|event| match event {
                ServerEvent::MessageConfirmed(confirmed) => confirmed,
                other => panic!("expected confirmation, got {other:?}"),
            })
            .collect();
        assert_eq!(confirmations.len(), 2);
        assert_eq!(confirmations[0].message.id, confirmations[1].message.id);
        assert_eq!(confirmations[1].message.seq, 1);
        assert_eq!(bob.drain().len(), 1);

        let mut cleo = Peer::connect(&state, 3, "Cleo");
        cleo.route(&state, join()).await;
        let events = cleo.drain();
        let ServerEvent::ChannelMessages(history) = &events[0] else {
            panic!("expected history, got {events:?}");
        };
        assert_eq!(history.messages.len(), 1);
        assert_eq!(history.messages[0].temp_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn test_join_replies_with_history() {
        let state = state();
        let mut ada = Peer::connect(&state, 1, "Ada");
        ada.route(&state, join()).await;
        ada.route(&state, send("t1", "one")).await;
        ada.route(&state, send("t2", "two")).await;

        let mut bob = Peer::connect(&state, 2, "Bob");
        bob.route(&state, join()).await;

        let events = bob.drain();
        let ServerEvent::ChannelMessages(history) = &events[0] else {
            panic!("expected history, got {events:?}");
        };
        let seqs: Vec<u64> = history.messages.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_invalid_send_reports_error_with_temp_id() {
        let state = state();
        let mut ada = Peer::connect(&state, 1, "Ada");

        ada.route(&state, send("t9", "   ")).await;

        let events = ada.drain();
        let ServerEvent::Error(error) = &events[0] else {
            panic!("expected error, got {events:?}");
        };
        assert_eq!(error.code, "VALIDATION_ERROR");
        assert_eq!(error.temp_id.as_deref(), Some("t9"));
        assert!(ada.connection.is_authenticated());
    }

    #[tokio::test]
    async fn test_only_author_may_edit() {
        let state = state();
        let mut ada = Peer::connect(&state, 1, "Ada");
        let mut bob = Peer::connect(&state, 2, "Bob");
        ada.route(&state, join()).await;
        bob.route(&state, join()).await;
        ada.route(&state, send("t1", "hello")).await;

        let ServerEvent::MessageConfirmed(confirmed) = ada.drain().pop().unwrap() else {
            panic!("expected confirmation");
        };
        let message_id = confirmed.message.id;
        bob.drain();

        let edit = |content: &str| {
            ClientEvent::EditMessage(EditMessage {
                message_id,
                content: content.to_string(),
            })
        };
        bob.route(&state, edit("hijacked")).await;
        let ServerEvent::Error(error) = bob.drain().pop().unwrap() else {
            panic!("expected error");
        };
        assert_eq!(error.code, "NOT_MESSAGE_AUTHOR");

        ada.route(&state, edit("hello there")).await;
        for peer in [&mut ada, &mut bob] {
            let ServerEvent::MessageEdited(edited) = peer.drain().pop().unwrap() else {
                panic!("expected edit");
            };
            assert_eq!(edited.content, "hello there");
        }
    }

    #[tokio::test]
    async fn test_deleted_message_rejects_reactions() {
        let state = state();
        let mut ada = Peer::connect(&state, 1, "Ada");
        ada.route(&state, join()).await;
        ada.route(&state, send("t1", "hello")).await;
        let ServerEvent::MessageConfirmed(confirmed) = ada.drain().pop().unwrap() else {
            panic!("expected confirmation");
        };
        let message_id = confirmed.message.id;

        ada.route(&state, ClientEvent::DeleteMessage(MessageRef { message_id })).await;
        assert!(matches!(ada.drain().pop(), Some(ServerEvent::MessageDeleted(_))));

        ada.route(
            &state,
            ClientEvent::AddReaction(ReactionChange {
                message_id,
                emoji: "👍".to_string(),
            }),
        )
        .await;
        let ServerEvent::Error(error) = ada.drain().pop().unwrap() else {
            panic!("expected error");
        };
        assert_eq!(error.code, DomainError::MessageDeleted.code());
    }

    #[tokio::test]
    async fn test_reactions_broadcast_aggregate() {
        let state = state();
        let mut ada = Peer::connect(&state, 1, "Ada");
        let mut bob = Peer::connect(&state, 2, "Bob");
        ada.route(&state, join()).await;
        bob.route(&state, join()).await;
        ada.route(&state, send("t1", "hello")).await;
        let ServerEvent::MessageConfirmed(confirmed) = ada.drain().pop().unwrap() else {
            panic!("expected confirmation");
        };
        bob.drain();

        let add = ClientEvent::AddReaction(ReactionChange {
            message_id: confirmed.message.id,
            emoji: "👍".to_string(),
        });
        bob.route(&state, add.clone()).await;
        bob.route(&state, add).await;

        let events = ada.drain();
        assert_eq!(events.len(), 2);
        for event in events {
            let ServerEvent::MessageReactionUpdated(update) = event else {
                panic!("expected reaction update");
            };
            assert_eq!(update.reactions.count("👍"), 1);
            assert!(update.reactions.contains("👍", bob.user.id));
        }
    }

    #[tokio::test]
    async fn test_direct_thread_is_found_not_duplicated() {
        let state = state();
        let mut ada = Peer::connect(&state, 1, "Ada");
        let mut bob = Peer::connect(&state, 2, "Bob");

        let start = ClientEvent::StartConversation(StartConversation {
            receiver_id: bob.user.id,
            receiver_name: "Bob".to_string(),
            receiver_email: None,
        });
        ada.route(&state, start.clone()).await;
        ada.route(&state, start).await;

        let ids: Vec<Snowflake> = ada
            .drain()
            .into_iter()
            .map(|event| match event {
                ServerEvent::NewDirectMessage(dm) => dm.conversation.id,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], ids[1]);

        // The receiver only hears about the thread once, when it is created
        assert_eq!(bob.drain().len(), 1);
    }

    #[tokio::test]
    async fn test_typing_start_is_announced_once() {
        let state = state();
        let mut ada = Peer::connect(&state, 1, "Ada");
        let mut bob = Peer::connect(&state, 2, "Bob");
        ada.route(&state, join()).await;
        bob.route(&state, join()).await;
        ada.drain();
        bob.drain();

        let typing = ClientEvent::TypingStart(ChannelRef { channel_id: GENERAL });
        ada.route(&state, typing.clone()).await;
        ada.route(&state, typing).await;
        assert!(ada.drain().is_empty());
        let events = bob.drain();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ServerEvent::UserTyping(update) if update.user.id == ada.user.id));

        ada.route(&state, send("t1", "done")).await;
        let events = bob.drain();
        assert!(matches!(events[0], ServerEvent::NewMessage(_)));
        assert!(matches!(&events[1], ServerEvent::UserStoppedTyping(update) if update.user.id == ada.user.id));
    }

    #[tokio::test]
    async fn test_private_channel_hidden_from_outsiders() {
        let state = state();
        let mut ada = Peer::connect(&state, 1, "Ada");
        let mut eve = Peer::connect(&state, 3, "Eve");

        let mut spec = ChannelSpec::public("secret");
        spec.is_private = true;
        ada.route(&state, ClientEvent::CreateChannel(spec)).await;

        let ServerEvent::NewChannel(created) = ada.drain().pop().unwrap() else {
            panic!("expected new_channel");
        };
        assert!(eve.drain().is_empty());

        eve.route(&state, ClientEvent::JoinChannel(ChannelRef { channel_id: created.channel.id })).await;
        let ServerEvent::Error(error) = eve.drain().pop().unwrap() else {
            panic!("expected error");
        };
        assert_eq!(error.code, DomainError::NotConversationMember.code());
    }
}
