//! Connection driver - one socket lifetime per loop iteration, with backoff between them

use std::sync::Arc;
use std::time::Duration;

use chat_common::ClientConfig;
use chat_core::protocol::{HelloPayload, IdentifyPayload, IdentifyProperties, ReadyPayload};
use chat_core::{ClientEvent, CloseCode, GatewayMessage, OpCode, ServerEvent};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::events::{DisconnectReason, SessionEvent};
use super::session::Shared;
use crate::error::{ClientError, ClientResult};

/// Upper bound for connect + Hello + Identify + ready
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// How one connection attempt ended
#[derive(Debug)]
enum Outcome {
    /// Shutdown requested by the session handle
    Shutdown,
    /// Credential rejected; no retry
    Rejected,
    /// Failed before `ready`
    Failed(DisconnectReason),
    /// An established session was lost
    Lost(DisconnectReason),
}

/// Map a gateway close frame to an outcome
fn closed(frame: Option<&CloseFrame<'_>>, established: bool) -> Outcome {
    let (code, reason) = frame.map_or((1005, String::new()), |f| {
        (u16::from(f.code), f.reason.to_string())
    });
    if CloseCode::from_u16(code).is_some_and(CloseCode::is_auth_failure) {
        return Outcome::Rejected;
    }
    let reason = DisconnectReason::Closed { code, reason };
    if established {
        Outcome::Lost(reason)
    } else {
        Outcome::Failed(reason)
    }
}

/// Background task owning the socket of one session generation
pub(crate) struct Driver {
    config: ClientConfig,
    credential: String,
    shared: Arc<Shared>,
    generation: u64,
    ready: Option<oneshot::Sender<ClientResult<()>>>,
}

impl Driver {
    pub(crate) fn new(
        config: ClientConfig,
        credential: String,
        shared: Arc<Shared>,
        generation: u64,
        ready: oneshot::Sender<ClientResult<()>>,
    ) -> Self {
        Self {
            config,
            credential,
            shared,
            generation,
            ready: Some(ready),
        }
    }

    fn resolve(&mut self, result: ClientResult<()>) {
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(result);
        }
    }

    /// Backoff with +-20% jitter, still capped at the configured maximum
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.reconnect_delay(attempt);
        let factor: f64 = rand::thread_rng().gen_range(0.8..1.2);
        base.mul_f64(factor)
            .min(Duration::from_millis(self.config.reconnect_max_delay_ms))
    }

    /// Connect, then keep reconnecting until shutdown, rejection or exhaustion
    pub(crate) async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        let mut failures = 0u32;

        loop {
            if !self.shared.set_connecting(self.generation) {
                return;
            }

            let attempt = match self.connect_once(&mut shutdown).await {
                Outcome::Shutdown => return,
                Outcome::Rejected => {
                    tracing::warn!("Gateway rejected the credential");
                    self.resolve(Err(ClientError::Unauthenticated));
                    self.shared
                        .set_disconnected(Some(self.generation), DisconnectReason::AuthenticationFailed);
                    return;
                }
                Outcome::Lost(reason) => {
                    tracing::info!(reason = ?reason, "Gateway connection lost");
                    self.shared.set_disconnected(Some(self.generation), reason);
                    failures = 0;
                    1
                }
                Outcome::Failed(reason) => {
                    failures += 1;
                    tracing::debug!(attempt = failures, reason = ?reason, "Connection attempt failed");
                    if failures >= self.config.max_reconnect_attempts {
                        tracing::warn!(attempts = failures, "Giving up on the gateway");
                        self.resolve(Err(ClientError::TransportUnavailable));
                        self.shared.set_disconnected(Some(self.generation), reason);
                        return;
                    }
                    failures
                }
            };

            let delay = self.backoff(attempt);
            tracing::debug!(delay_ms = delay.as_millis(), "Reconnecting after backoff");
            tokio::select! {
                _ = &mut shutdown => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn connect_once(&mut self, shutdown: &mut oneshot::Receiver<()>) -> Outcome {
        let handshake = timeout(HANDSHAKE_TIMEOUT, handshake(&self.config.gateway_url, &self.credential));
        let (sink, source, hello, ready) = tokio::select! {
            _ = &mut *shutdown => return Outcome::Shutdown,
            result = handshake => match result {
                Ok(Ok(parts)) => parts,
                Ok(Err(outcome)) => return outcome,
                Err(_) => {
                    return Outcome::Failed(DisconnectReason::Network("handshake timed out".to_string()))
                }
            },
        };

        let (tx, rx) = mpsc::channel(self.config.outbound_queue.max(1));
        if let Ok(message) = GatewayMessage::event(&ClientEvent::GetOnlineUsers) {
            let _ = tx.try_send(message);
        }

        tracing::info!(
            user_id = %ready.user.id,
            session_id = %ready.session_id,
            "Connected to gateway"
        );
        if !self.shared.set_connected(self.generation, tx, ready) {
            return Outcome::Shutdown;
        }
        self.resolve(Ok(()));

        self.session(sink, source, rx, hello, shutdown).await
    }

    /// Pump frames of an established session
    async fn session(
        &self,
        mut sink: WsSink,
        mut source: WsSource,
        mut outbound: mpsc::Receiver<GatewayMessage>,
        hello: HelloPayload,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> Outcome {
        let period = Duration::from_millis(hello.heartbeat_interval.max(1));
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_ack = Instant::now();
        let mut last_seq: Option<u64> = None;

        loop {
            tokio::select! {
                _ = &mut *shutdown => {
                    let frame = CloseFrame {
                        code: WsCloseCode::Normal,
                        reason: "client disconnect".into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    return Outcome::Shutdown;
                }

                Some(message) = outbound.recv() => {
                    if let Err(e) = send_frame(&mut sink, &message).await {
                        return Outcome::Lost(DisconnectReason::Network(e.to_string()));
                    }
                }

                _ = heartbeat.tick() => {
                    if last_ack.elapsed() > period * 2 {
                        tracing::warn!(
                            since_ack_ms = last_ack.elapsed().as_millis(),
                            "Heartbeat not acknowledged"
                        );
                        return Outcome::Lost(DisconnectReason::HeartbeatTimeout);
                    }
                    if let Err(e) = send_frame(&mut sink, &GatewayMessage::heartbeat(last_seq)).await {
                        return Outcome::Lost(DisconnectReason::Network(e.to_string()));
                    }
                }

                frame = source.next() => {
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(frame))) => return closed(frame.as_ref(), true),
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Outcome::Lost(DisconnectReason::Network(e.to_string())),
                        None => {
                            return Outcome::Lost(DisconnectReason::Network("stream ended".to_string()))
                        }
                    };

                    let message = match GatewayMessage::from_json(&text) {
                        Ok(message) => message,
                        Err(e) => {
                            tracing::warn!(error = %e, "Undecodable gateway frame");
                            continue;
                        }
                    };

                    match message.op {
                        OpCode::Dispatch => {
                            if message.s.is_some() {
                                last_seq = message.s;
                            }
                            self.dispatch(&message);
                        }
                        OpCode::HeartbeatAck => last_ack = Instant::now(),
                        OpCode::Heartbeat => {
                            if let Err(e) = send_frame(&mut sink, &GatewayMessage::heartbeat(last_seq)).await {
                                return Outcome::Lost(DisconnectReason::Network(e.to_string()));
                            }
                        }
                        OpCode::InvalidSession => {
                            return Outcome::Lost(DisconnectReason::InvalidSession);
                        }
                        op => tracing::trace!(op = %op, "Ignoring gateway op"),
                    }
                }
            }
        }
    }

    /// Fan a dispatch out to raw handlers and typed subscribers
    fn dispatch(&self, message: &GatewayMessage) {
        let Some(name) = message.t.as_deref() else {
            return;
        };
        let payload = message.d.clone().unwrap_or(serde_json::Value::Null);
        self.shared.registry.emit(name, &payload);

        match message.as_server_event() {
            Some(Ok(event)) => self.shared.publish(self.generation, SessionEvent::Event(event)),
            Some(Err(e)) => tracing::warn!(event = name, error = %e, "Malformed server event"),
            None => {}
        }
    }
}

async fn send_frame(sink: &mut WsSink, message: &GatewayMessage) -> ClientResult<()> {
    let json = message.to_json()?;
    sink.send(Message::Text(json)).await?;
    Ok(())
}

/// Open the socket and run Hello, Identify and ready
async fn handshake(
    url: &str,
    credential: &str,
) -> Result<(WsSink, WsSource, HelloPayload, ReadyPayload), Outcome> {
    let failed = |e: &dyn std::fmt::Display| Outcome::Failed(DisconnectReason::Network(e.to_string()));

    let (stream, _) = connect_async(url).await.map_err(|e| failed(&e))?;
    let (mut sink, mut source) = stream.split();

    let mut hello = None;
    loop {
        let message = next_message(&mut source).await?;
        match message.op {
            OpCode::Hello if hello.is_none() => {
                hello = Some(message.as_hello().unwrap_or_default());
                let identify = IdentifyPayload {
                    token: credential.to_string(),
                    properties: Some(IdentifyProperties::current()),
                };
                let frame = GatewayMessage::identify(&identify).map_err(|e| failed(&e))?;
                send_frame(&mut sink, &frame).await.map_err(|e| failed(&e))?;
            }
            OpCode::Dispatch => {
                if let Some(Ok(ServerEvent::Ready(ready))) = message.as_server_event() {
                    let hello = hello.unwrap_or_default();
                    return Ok((sink, source, hello, ready));
                }
            }
            OpCode::InvalidSession => return Err(Outcome::Rejected),
            _ => {}
        }
    }
}

async fn next_message(source: &mut WsSource) -> Result<GatewayMessage, Outcome> {
    loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => {
                return GatewayMessage::from_json(&text).map_err(|e| {
                    Outcome::Failed(DisconnectReason::Network(format!("bad frame: {e}")))
                });
            }
            Some(Ok(Message::Close(frame))) => return Err(closed(frame.as_ref(), false)),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(Outcome::Failed(DisconnectReason::Network(e.to_string()))),
            None => {
                return Err(Outcome::Failed(DisconnectReason::Network(
                    "stream ended during handshake".to_string(),
                )))
            }
        }
    }
}
