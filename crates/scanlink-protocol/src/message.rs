//! Wire message types.
//!
//! Every message is one JSON object with a `type` discriminator, a unique
//! `id`, an RFC 3339 `timestamp`, and a `payload` object whose shape
//! depends on the type. Known types decode into strongly-typed payload
//! structs; unrecognized types are preserved as an opaque blob so newer
//! peers do not break older builds.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{ProtocolError, ProtocolResult};

fn is_false(b: &bool) -> bool {
    !*b
}

/// Closed set of message kinds understood by this peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    HandshakeRequest,
    HandshakeResponse,
    Data,
    BatchData,
    Ack,
    Nack,
    Command,
    CommandResponse,
    StatusRequest,
    StatusResponse,
    Error,
    /// A wire type this build does not recognize.
    Unknown,
}

impl MessageKind {
    /// The discriminator string used on the wire.
    pub fn wire_name(&self) -> &'static str {
        match self {
            MessageKind::HandshakeRequest => "HANDSHAKE_REQUEST",
            MessageKind::HandshakeResponse => "HANDSHAKE_RESPONSE",
            MessageKind::Data => "DATA",
            MessageKind::BatchData => "BATCH_DATA",
            MessageKind::Ack => "ACK",
            MessageKind::Nack => "NACK",
            MessageKind::Command => "COMMAND",
            MessageKind::CommandResponse => "COMMAND_RESPONSE",
            MessageKind::StatusRequest => "STATUS_REQUEST",
            MessageKind::StatusResponse => "STATUS_RESPONSE",
            MessageKind::Error => "ERROR",
            MessageKind::Unknown => "UNKNOWN",
        }
    }

    fn from_wire(s: &str) -> MessageKind {
        match s {
            "HANDSHAKE_REQUEST" => MessageKind::HandshakeRequest,
            "HANDSHAKE_RESPONSE" => MessageKind::HandshakeResponse,
            "DATA" => MessageKind::Data,
            "BATCH_DATA" => MessageKind::BatchData,
            "ACK" => MessageKind::Ack,
            "NACK" => MessageKind::Nack,
            "COMMAND" => MessageKind::Command,
            "COMMAND_RESPONSE" => MessageKind::CommandResponse,
            "STATUS_REQUEST" => MessageKind::StatusRequest,
            "STATUS_RESPONSE" => MessageKind::StatusResponse,
            "ERROR" => MessageKind::Error,
            _ => MessageKind::Unknown,
        }
    }
}

/// Application identity carried in the handshake request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub app_name: String,
    pub version: String,
}

/// Handshake request payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeRequestPayload {
    pub app_info: AppInfo,
    pub capabilities: Vec<String>,
}

/// Peer device description from the handshake response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Fields this build does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Handshake response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeResponsePayload {
    pub session_id: String,
    #[serde(default)]
    pub device_info: DeviceInfo,
}

/// Single scan payload (`DATA`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPayload {
    /// Payload discriminator; always `"barcode"` for scans.
    #[serde(rename = "type")]
    pub kind: String,
    /// Scan content (hex-armored zlib when `compressed`).
    pub data: String,
    /// Wire name of the barcode format.
    pub format: String,
    /// Capture time, epoch seconds.
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub compressed: bool,
    /// Caller-provided metadata forwarded verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Batched scan payload (`BATCH_DATA`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDataPayload {
    pub batch_id: String,
    pub item_count: u32,
    pub items: Vec<DataPayload>,
}

/// Positive acknowledgment payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    /// Id of the message being acknowledged.
    pub original_message_id: String,
    /// Method-specific result fields (e.g. `itemsReceived`).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Negative acknowledgment payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NackPayload {
    pub original_message_id: String,
    pub error_message: String,
}

/// Request/response level status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Success,
    Error,
    Timeout,
    Unsupported,
}

/// Command payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPayload {
    pub command: String,
    #[serde(default)]
    pub params: Value,
}

/// Command response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponsePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_command: Option<String>,
    pub status: CommandStatus,
    #[serde(default)]
    pub result: Value,
}

/// Status response payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponsePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_length: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Peer-reported error payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

/// Typed payload union, one variant per known message kind.
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePayload {
    HandshakeRequest(HandshakeRequestPayload),
    HandshakeResponse(HandshakeResponsePayload),
    Data(DataPayload),
    BatchData(BatchDataPayload),
    Ack(AckPayload),
    Nack(NackPayload),
    Command(CommandPayload),
    CommandResponse(CommandResponsePayload),
    StatusRequest,
    StatusResponse(StatusResponsePayload),
    Error(ErrorPayload),
    /// Unrecognized wire type; the raw payload is preserved untouched.
    Unknown { kind: String, payload: Value },
}

impl MessagePayload {
    /// The message kind this payload belongs to.
    pub fn kind(&self) -> MessageKind {
        match self {
            MessagePayload::HandshakeRequest(_) => MessageKind::HandshakeRequest,
            MessagePayload::HandshakeResponse(_) => MessageKind::HandshakeResponse,
            MessagePayload::Data(_) => MessageKind::Data,
            MessagePayload::BatchData(_) => MessageKind::BatchData,
            MessagePayload::Ack(_) => MessageKind::Ack,
            MessagePayload::Nack(_) => MessageKind::Nack,
            MessagePayload::Command(_) => MessageKind::Command,
            MessagePayload::CommandResponse(_) => MessageKind::CommandResponse,
            MessagePayload::StatusRequest => MessageKind::StatusRequest,
            MessagePayload::StatusResponse(_) => MessageKind::StatusResponse,
            MessagePayload::Error(_) => MessageKind::Error,
            MessagePayload::Unknown { .. } => MessageKind::Unknown,
        }
    }

    fn wire_kind(&self) -> String {
        match self {
            MessagePayload::Unknown { kind, .. } => kind.clone(),
            other => other.kind().wire_name().to_string(),
        }
    }

    fn to_value(&self) -> ProtocolResult<Value> {
        let encode = |r: serde_json::Result<Value>| r.map_err(|e| ProtocolError::Encode(e.to_string()));
        match self {
            MessagePayload::HandshakeRequest(p) => encode(serde_json::to_value(p)),
            MessagePayload::HandshakeResponse(p) => encode(serde_json::to_value(p)),
            MessagePayload::Data(p) => encode(serde_json::to_value(p)),
            MessagePayload::BatchData(p) => encode(serde_json::to_value(p)),
            MessagePayload::Ack(p) => encode(serde_json::to_value(p)),
            MessagePayload::Nack(p) => encode(serde_json::to_value(p)),
            MessagePayload::Command(p) => encode(serde_json::to_value(p)),
            MessagePayload::CommandResponse(p) => encode(serde_json::to_value(p)),
            MessagePayload::StatusRequest => Ok(Value::Object(Map::new())),
            MessagePayload::StatusResponse(p) => encode(serde_json::to_value(p)),
            MessagePayload::Error(p) => encode(serde_json::to_value(p)),
            MessagePayload::Unknown { payload, .. } => Ok(payload.clone()),
        }
    }

    fn from_value(kind_str: &str, value: Value) -> ProtocolResult<MessagePayload> {
        // Peers may omit the payload entirely for bodyless messages.
        let value = if value.is_null() {
            Value::Object(Map::new())
        } else {
            value
        };
        let decode_err = |e: serde_json::Error| ProtocolError::Decode(e.to_string());
        let payload = match MessageKind::from_wire(kind_str) {
            MessageKind::HandshakeRequest => {
                MessagePayload::HandshakeRequest(serde_json::from_value(value).map_err(decode_err)?)
            }
            MessageKind::HandshakeResponse => {
                MessagePayload::HandshakeResponse(serde_json::from_value(value).map_err(decode_err)?)
            }
            MessageKind::Data => {
                MessagePayload::Data(serde_json::from_value(value).map_err(decode_err)?)
            }
            MessageKind::BatchData => {
                MessagePayload::BatchData(serde_json::from_value(value).map_err(decode_err)?)
            }
            MessageKind::Ack => {
                MessagePayload::Ack(serde_json::from_value(value).map_err(decode_err)?)
            }
            MessageKind::Nack => {
                MessagePayload::Nack(serde_json::from_value(value).map_err(decode_err)?)
            }
            MessageKind::Command => {
                MessagePayload::Command(serde_json::from_value(value).map_err(decode_err)?)
            }
            MessageKind::CommandResponse => {
                MessagePayload::CommandResponse(serde_json::from_value(value).map_err(decode_err)?)
            }
            MessageKind::StatusRequest => MessagePayload::StatusRequest,
            MessageKind::StatusResponse => {
                MessagePayload::StatusResponse(serde_json::from_value(value).map_err(decode_err)?)
            }
            MessageKind::Error => {
                MessagePayload::Error(serde_json::from_value(value).map_err(decode_err)?)
            }
            MessageKind::Unknown => MessagePayload::Unknown {
                kind: kind_str.to_string(),
                payload: value,
            },
        };
        Ok(payload)
    }
}

/// Envelope as it appears on the wire.
#[derive(Serialize, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    id: String,
    timestamp: String,
    #[serde(default)]
    payload: Value,
}

/// One framed protocol message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Globally unique per sender.
    pub id: String,
    /// RFC 3339 creation time, as stamped by the sender.
    pub timestamp: String,
    pub payload: MessagePayload,
}

impl Message {
    /// Create a message with a fresh id and timestamp.
    pub fn new(payload: MessagePayload) -> Self {
        Message {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().to_rfc3339(),
            payload,
        }
    }

    /// The kind of this message.
    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// Build a positive acknowledgment for `original`.
    pub fn ack(original: &Message) -> Message {
        Message::new(MessagePayload::Ack(AckPayload {
            original_message_id: original.id.clone(),
            extra: Map::new(),
        }))
    }

    /// Build a negative acknowledgment for `original`.
    pub fn nack(original: &Message, error_message: impl Into<String>) -> Message {
        Message::new(MessagePayload::Nack(NackPayload {
            original_message_id: original.id.clone(),
            error_message: error_message.into(),
        }))
    }

    /// Serialize to the wire JSON object.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let envelope = RawEnvelope {
            kind: self.payload.wire_kind(),
            id: self.id.clone(),
            timestamp: self.timestamp.clone(),
            payload: self.payload.to_value()?,
        };
        serde_json::to_vec(&envelope).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Parse one extracted JSON object.
    pub fn decode(frame: &[u8]) -> ProtocolResult<Message> {
        let envelope: RawEnvelope =
            serde_json::from_slice(frame).map_err(|e| ProtocolError::Decode(e.to_string()))?;
        let payload = MessagePayload::from_value(&envelope.kind, envelope.payload)?;
        Ok(Message {
            id: envelope.id,
            timestamp: envelope.timestamp,
            payload,
        })
    }
}
