//! Wire envelope types and the JSON text codec.
//!
//! Every message on the control connection is one JSON object. Outbound
//! traffic is always a [`Notification`] (`{"channel": ..., "payload": ...}`).
//! Inbound traffic is a [`Command`] (`{"namespace": ..., "method": ...,
//! "arguments": [...], "requestId": ...}`), the bootstrap request (a command
//! with only the reserved namespace), or the disconnect signal
//! (`{"type": "disconnect"}`).
//!
//! Shape dispatch is done by hand on the decoded object rather than with an
//! untagged enum: an object carrying both `channel` and `namespace` must be
//! rejected, which untagged matching would silently accept.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DecodeError;

/// Channel used for authorization notifications.
pub const CONNECT_CHANNEL: &str = "connect";

/// Payload sent on [`CONNECT_CHANNEL`] when a session must pair first.
pub const CODE_REQUIRED: &str = "CODE_REQUIRED";

/// Reserved namespace for the bootstrap (initial state) request.
pub const BOOTSTRAP_NAMESPACE: &str = "initial_burst";

/// Outbound state notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub channel: String,
    pub payload: Value,
}

impl Notification {
    pub fn new(channel: impl Into<String>, payload: Value) -> Self {
        Self { channel: channel.into(), payload }
    }
}

/// Inbound command envelope.
///
/// `method` and `arguments` are optional at the decode layer; the dispatcher
/// enforces `method` for everything except the bootstrap request. A missing
/// `arguments` field means the empty argument list. `request_id` is an opaque
/// JSON value chosen by the client and echoed verbatim in the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<Value>>,
    #[serde(default, rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Value>,
}

impl Command {
    /// True when this command is the reserved bootstrap request.
    pub fn is_bootstrap(&self) -> bool {
        self.namespace == BOOTSTRAP_NAMESPACE
    }
}

/// A decoded wire message, one of the three envelope shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Notification(Notification),
    Command(Command),
    Disconnect,
}

/// Encode an outbound notification as JSON text.
///
/// Serialization of `(String, Value)` pairs cannot fail for tree-shaped
/// values; the `Result` exists so callers drop (and log) rather than panic
/// if that ever changes.
pub fn encode(notification: &Notification) -> serde_json::Result<String> {
    serde_json::to_string(notification)
}

/// Decode one inbound JSON text message into an [`Envelope`].
pub fn decode(text: &str) -> Result<Envelope, DecodeError> {
    let value: Value = serde_json::from_str(text)?;
    let object = value.as_object().ok_or(DecodeError::NotAnObject)?;

    let has_channel = object.contains_key("channel");
    let has_namespace = object.contains_key("namespace");
    if has_channel && has_namespace {
        return Err(DecodeError::AmbiguousShape);
    }
    if has_channel {
        let notification = serde_json::from_value(value)?;
        return Ok(Envelope::Notification(notification));
    }
    if has_namespace {
        let command = serde_json::from_value(value)?;
        return Ok(Envelope::Command(command));
    }
    if object.get("type").and_then(Value::as_str) == Some("disconnect") {
        return Ok(Envelope::Disconnect);
    }
    Err(DecodeError::UnknownShape)
}
