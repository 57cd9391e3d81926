//! WebSocket handler
//!
//! Handles WebSocket connections and message processing.

use crate::connection::{Connection, Outbound};
use crate::handlers::{MessageDispatcher, PresenceHandler, TypingHandler};
use crate::server::GatewayState;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use chat_core::protocol::HelloPayload;
use chat_core::{CloseCode, GatewayMessage};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::interval;

/// WebSocket gateway handler
pub async fn gateway_handler(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(state, socket))
}

/// Handle an upgraded WebSocket connection
async fn handle_socket(state: GatewayState, socket: WebSocket) {
    let session_id = Connection::generate_id();
    let realtime = state.config().realtime.clone();

    let (tx, mut rx) = mpsc::channel::<Outbound>(realtime.outbound_queue);
    let connection = state.connection_manager().add_connection(session_id.clone(), tx);

    tracing::info!(session_id = %session_id, "WebSocket connection established");

    let (mut ws_sink, mut ws_stream) = socket.split();

    // Hello goes out before anything else can be queued
    let hello = GatewayMessage::hello(&HelloPayload::with_interval(realtime.heartbeat_interval_ms))
        .and_then(|hello| hello.to_json());
    let hello_sent = match hello {
        Ok(json) => ws_sink.send(Message::Text(json)).await.is_ok(),
        Err(e) => {
            tracing::error!(session_id = %session_id, error = %e, "Failed to encode Hello");
            false
        }
    };
    if !hello_sent {
        tracing::warn!(session_id = %session_id, "Failed to send Hello message");
        cleanup_connection(&state, &session_id).await;
        return;
    }

    let state_recv = state.clone();
    let session_id_recv = session_id.clone();
    let connection_recv = connection.clone();

    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = ws_stream.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if let Err(close_code) = handle_text_message(&state_recv, &connection_recv, &text).await {
                        tracing::debug!(
                            session_id = %session_id_recv,
                            close_code = %close_code,
                            "Closing connection due to error"
                        );
                        return Some(close_code);
                    }
                }
                Ok(Message::Binary(_)) => {
                    tracing::debug!(session_id = %session_id_recv, "Binary messages not supported");
                    return Some(CloseCode::DecodeError);
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {
                    tracing::trace!(session_id = %session_id_recv, "Ping/pong received");
                }
                Ok(Message::Close(_)) => {
                    tracing::info!(session_id = %session_id_recv, "Client closed connection");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(session_id = %session_id_recv, error = %e, "WebSocket error");
                    return None;
                }
            }
        }
        None
    });

    let session_id_send = session_id.clone();

    let mut send_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Message(msg) => {
                    let json = match msg.to_json() {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::error!(session_id = %session_id_send, error = %e, "Failed to encode message");
                            continue;
                        }
                    };
                    if ws_sink.send(Message::Text(json)).await.is_err() {
                        tracing::warn!(session_id = %session_id_send, "Failed to send message to WebSocket");
                        return;
                    }
                }
                Outbound::Close(code) => {
                    let (code, reason) = GatewayMessage::close_frame(code);
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    let _ = ws_sink.send(Message::Close(Some(frame))).await;
                    break;
                }
            }
        }

        let _ = ws_sink.close().await;
    });

    let session_id_hb = session_id.clone();
    let connection_hb = connection.clone();

    let mut heartbeat_task = tokio::spawn(async move {
        let mut check_interval = interval(realtime.heartbeat_interval() / 2);

        loop {
            check_interval.tick().await;

            let time_since = connection_hb.time_since_heartbeat();
            if time_since > realtime.heartbeat_timeout() {
                tracing::warn!(
                    session_id = %session_id_hb,
                    time_since_ms = time_since.as_millis(),
                    "Connection timed out (no heartbeat)"
                );
                connection_hb.close(CloseCode::SessionTimeout).await;
                break;
            }
        }
    });

    let finished = tokio::select! {
        result = &mut recv_task => {
            if let Ok(Some(close_code)) = result {
                connection.close(close_code).await;
            }
            Finished::Reader
        }
        _ = &mut send_task => {
            tracing::debug!(session_id = %session_id, "Send task ended");
            Finished::Writer
        }
        _ = &mut heartbeat_task => {
            tracing::debug!(session_id = %session_id, "Heartbeat task ended");
            Finished::Heartbeat
        }
    };

    if finished != Finished::Reader {
        recv_task.abort();
        let _ = recv_task.await;
    }
    if finished != Finished::Heartbeat {
        heartbeat_task.abort();
        let _ = heartbeat_task.await;
    }
    drop(connection);

    // Unregistering drops the last sender, so the writer flushes any
    // pending close frame and ends
    cleanup_connection(&state, &session_id).await;
    if finished != Finished::Writer {
        let _ = send_task.await;
    }
}

/// Which connection task ended first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finished {
    Reader,
    Writer,
    Heartbeat,
}

/// Handle a text message from the client
async fn handle_text_message(state: &GatewayState, connection: &Arc<Connection>, text: &str) -> Result<(), CloseCode> {
    let message = match GatewayMessage::from_json(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(session_id = %connection.session_id(), error = %e, "Failed to parse message");
            return Err(CloseCode::DecodeError);
        }
    };

    tracing::trace!(session_id = %connection.session_id(), op = %message.op, "Received message");

    match MessageDispatcher::dispatch(state, connection, message).await {
        Ok(Some(close_code)) => Err(close_code),
        Ok(None) => Ok(()),
        Err(e) => {
            tracing::warn!(session_id = %connection.session_id(), error = %e, "Handler error");
            Err(e.to_close_code())
        }
    }
}

/// Clean up a connection on disconnect
///
/// The user's last connection going away takes them offline and clears
/// their typing indicators. Unidentified connections leave no trace.
async fn cleanup_connection(state: &GatewayState, session_id: &str) {
    let Some(departure) = state.connection_manager().remove_connection(session_id) else {
        return;
    };

    tracing::info!(
        session_id = %session_id,
        user_id = %departure.user.id,
        conversations = departure.conversations.len(),
        last_session = departure.last_session,
        "Connection closed"
    );

    if departure.last_session {
        PresenceHandler::announce_offline(state, departure.user.id);
        TypingHandler::stop_everywhere(state, departure.user.id).await;
    }
}
