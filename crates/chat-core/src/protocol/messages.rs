//! Gateway message format
//!
//! Defines the envelope for all WebSocket messages.

use serde::de::DeserializeOwned;
use serde::ser::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ClientEvent, CloseCode, HelloPayload, IdentifyPayload, OpCode, ServerEvent};

/// Gateway message format
///
/// All messages sent over the WebSocket connection follow this format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayMessage {
    /// Operation code
    pub op: OpCode,

    /// Event name (op=0 Dispatch and op=3 Event)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,

    /// Per-connection dispatch sequence (op=0 Dispatch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Event data payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,
}

impl GatewayMessage {
    const fn bare(op: OpCode) -> Self {
        Self {
            op,
            t: None,
            s: None,
            d: None,
        }
    }

    // === Server Messages ===

    /// Create a Dispatch message (op=0) for a typed event
    pub fn dispatch(event: &ServerEvent, sequence: u64) -> Result<Self, serde_json::Error> {
        let (t, d) = split_tagged(event)?;
        Ok(Self {
            op: OpCode::Dispatch,
            t: Some(t),
            s: Some(sequence),
            d,
        })
    }

    /// Create a Hello message (op=10)
    pub fn hello(payload: &HelloPayload) -> Result<Self, serde_json::Error> {
        Ok(Self {
            d: Some(serde_json::to_value(payload)?),
            ..Self::bare(OpCode::Hello)
        })
    }

    /// Create a Heartbeat ACK message (op=11)
    #[must_use]
    pub const fn heartbeat_ack() -> Self {
        Self::bare(OpCode::HeartbeatAck)
    }

    /// Create an Invalid Session message (op=7)
    #[must_use]
    pub fn invalid_session() -> Self {
        Self {
            d: Some(Value::Bool(false)),
            ..Self::bare(OpCode::InvalidSession)
        }
    }

    // === Client Messages ===

    /// Create a Heartbeat message (op=1)
    #[must_use]
    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self {
            d: last_sequence.map(|s| Value::Number(s.into())),
            ..Self::bare(OpCode::Heartbeat)
        }
    }

    /// Create an Identify message (op=2)
    pub fn identify(payload: &IdentifyPayload) -> Result<Self, serde_json::Error> {
        Ok(Self {
            d: Some(serde_json::to_value(payload)?),
            ..Self::bare(OpCode::Identify)
        })
    }

    /// Create an Event message (op=3) for a typed client event
    pub fn event(event: &ClientEvent) -> Result<Self, serde_json::Error> {
        let (t, d) = split_tagged(event)?;
        Ok(Self {
            t: Some(t),
            d,
            ..Self::bare(OpCode::Event)
        })
    }

    // === Parsing ===

    /// Try to parse as a Hello payload (op=10)
    pub fn as_hello(&self) -> Option<HelloPayload> {
        if self.op != OpCode::Hello {
            return None;
        }
        self.d.as_ref().and_then(|d| serde_json::from_value(d.clone()).ok())
    }

    /// Try to parse as an Identify payload (op=2)
    pub fn as_identify(&self) -> Option<IdentifyPayload> {
        if self.op != OpCode::Identify {
            return None;
        }
        self.d.as_ref().and_then(|d| serde_json::from_value(d.clone()).ok())
    }

    /// Try to parse the heartbeat sequence number (op=1)
    pub fn as_heartbeat_seq(&self) -> Option<Option<u64>> {
        if self.op != OpCode::Heartbeat {
            return None;
        }
        Some(self.d.as_ref().and_then(Value::as_u64))
    }

    /// Decode a client event (op=3); `None` for any other op code
    pub fn as_client_event(&self) -> Option<Result<ClientEvent, serde_json::Error>> {
        if self.op != OpCode::Event {
            return None;
        }
        Some(join_tagged(self.t.as_deref(), self.d.as_ref()))
    }

    /// Decode a dispatched server event (op=0); `None` for any other op code
    pub fn as_server_event(&self) -> Option<Result<ServerEvent, serde_json::Error>> {
        if self.op != OpCode::Dispatch {
            return None;
        }
        Some(join_tagged(self.t.as_deref(), self.d.as_ref()))
    }

    // === Utilities ===

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Create an error close frame
    #[must_use]
    pub fn close_frame(code: CloseCode) -> (u16, String) {
        (code.as_u16(), code.description().to_string())
    }
}

/// Split an adjacently tagged event into its `t` and `d` parts
fn split_tagged<T: Serialize>(event: &T) -> Result<(String, Option<Value>), serde_json::Error> {
    let Value::Object(mut map) = serde_json::to_value(event)? else {
        return Err(serde_json::Error::custom("event did not serialize to an object"));
    };
    match map.remove("t") {
        Some(Value::String(t)) => Ok((t, map.remove("d"))),
        _ => Err(serde_json::Error::custom("event tag missing")),
    }
}

/// Reassemble `t` and `d` into an adjacently tagged event
fn join_tagged<T: DeserializeOwned>(
    t: Option<&str>,
    d: Option<&Value>,
) -> Result<T, serde_json::Error> {
    let mut map = Map::new();
    if let Some(t) = t {
        map.insert("t".to_string(), Value::String(t.to_string()));
    }
    if let Some(d) = d.filter(|d| !d.is_null()) {
        map.insert("d".to_string(), d.clone());
    }
    serde_json::from_value(Value::Object(map))
}

impl std::fmt::Display for GatewayMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(t) = &self.t {
            write!(f, "GatewayMessage(op={}, t={}", self.op, t)?;
            if let Some(s) = self.s {
                write!(f, ", s={s}")?;
            }
            write!(f, ")")
        } else {
            write!(f, "GatewayMessage(op={})", self.op)
        }
    }
}
