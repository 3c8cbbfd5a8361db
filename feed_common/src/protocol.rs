//! Feed protocol types shared by the relay and the tap.
//!
//! Every frame on the feed is a JSON document with a string `type` field.
//! Inbound documents are classified into an `InboundMessage`; the relay only
//! ever writes the two `OutboundFrame` variants back to the feed.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};

use crate::net::CLIENT_ROLE;
use crate::result::Result;

/// Name of the discriminator field carried by every feed document.
pub const TYPE_FIELD: &str = "type";
/// Name of the client identifier field in `welcome` and `pong`.
pub const CLIENT_ID_FIELD: &str = "client_id";

/// Message types the relay understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum MessageKind {
    /// Identity assignment from the feed.
    Welcome,
    /// Application-level heartbeat.
    Ping,
    /// Market alert, forwarded downstream.
    Alert,
    /// Symbol list change, forwarded downstream.
    SymbolUpdate,
}

impl MessageKind {
    /// Whether documents of this kind go to the local channel.
    pub fn is_forwardable(self) -> bool {
        matches!(self, MessageKind::Alert | MessageKind::SymbolUpdate)
    }
}

/// A classified inbound document.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// `welcome`; `client_id` is `None` when the field is absent or null.
    Welcome {
        /// Identifier assigned by the feed.
        client_id: Option<String>,
    },
    /// `ping`.
    Ping,
    /// `alert` or `symbol_update`, kept whole for re-encoding.
    Forwardable {
        /// Either `Alert` or `SymbolUpdate`.
        kind: MessageKind,
        /// The complete document as received.
        document: Value,
    },
    /// Any other `type`, or no `type` at all.
    Unrecognized {
        /// The `type` value if it was a string.
        type_name: Option<String>,
    },
}

impl InboundMessage {
    /// Parses raw frame bytes and classifies the resulting document.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let document: Value = serde_json::from_slice(bytes)?;
        Ok(Self::classify(document))
    }

    /// Classifies an already parsed document by its `type` field.
    pub fn classify(document: Value) -> Self {
        let type_name = document
            .get(TYPE_FIELD)
            .and_then(Value::as_str)
            .map(str::to_owned);

        let kind = type_name.as_deref().and_then(|t| t.parse::<MessageKind>().ok());
        match kind {
            Some(kind) if kind.is_forwardable() => InboundMessage::Forwardable { kind, document },
            Some(MessageKind::Welcome) => InboundMessage::Welcome {
                client_id: document.get(CLIENT_ID_FIELD).and_then(client_id_text),
            },
            Some(_) => InboundMessage::Ping,
            None => InboundMessage::Unrecognized { type_name },
        }
    }

    /// The recognised kind, if any.
    pub fn kind(&self) -> Option<MessageKind> {
        match self {
            InboundMessage::Welcome { .. } => Some(MessageKind::Welcome),
            InboundMessage::Ping => Some(MessageKind::Ping),
            InboundMessage::Forwardable { kind, .. } => Some(*kind),
            InboundMessage::Unrecognized { .. } => None,
        }
    }
}

/// Text form of a `client_id` value. Non-string values keep their JSON
/// encoding, so `42` becomes `"42"`.
fn client_id_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// Frames the relay sends to the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Sent once per connection to declare the process as a feed client.
    Register {
        /// Always `client`.
        role: String,
    },
    /// Answer to `ping`.
    Pong {
        /// Identifier previously assigned by `welcome`.
        client_id: String,
    },
}

impl OutboundFrame {
    /// Creates the registration frame.
    pub fn register() -> Self {
        OutboundFrame::Register {
            role: String::from(CLIENT_ROLE),
        }
    }

    /// Creates a `pong` for the given identifier.
    pub fn pong(client_id: &str) -> Self {
        OutboundFrame::Pong {
            client_id: String::from(client_id),
        }
    }

    /// Encodes the frame as a JSON text payload.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
