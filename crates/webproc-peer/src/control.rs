use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::MessageError;
use crate::message::{Message, ERROR, PING, PONG, SHUTDOWN};

/// `HELLO` body: what the initiator speaks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hello {
    pub protocol: String,
    pub min_version: u16,
    pub max_version: u16,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// `HELLO_ACK` body: the responder's verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelloAck {
    pub protocol: String,
    pub accepted: bool,
    /// Negotiated version. Meaningless when `accepted` is false.
    pub version: u16,
    /// Responder's own supported range, so a rejected initiator can report it.
    pub min_version: u16,
    pub max_version: u16,
    /// Capabilities both sides advertised.
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `ERROR` body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    /// Tag of the message that failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<u16>,
}

/// `SHUTDOWN` body. An empty body is accepted as "no reason".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShutdownBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A ping the peer answers with a pong carrying the same request id.
pub fn ping(request_id: u32) -> Message {
    Message::request(PING, request_id, Bytes::new())
}

pub fn pong(ping: &Message) -> Message {
    ping.reply(PONG, ping.body.clone())
}

/// A graceful shutdown request.
pub fn shutdown(reason: Option<&str>) -> Result<Message, MessageError> {
    Message::json(
        SHUTDOWN,
        &ShutdownBody {
            reason: reason.map(str::to_owned),
        },
    )
}

/// Read the reason out of a `SHUTDOWN` message.
pub fn shutdown_reason(message: &Message) -> Option<String> {
    if message.body.is_empty() {
        return None;
    }
    message
        .parse_json::<ShutdownBody>()
        .ok()
        .and_then(|body| body.reason)
}

/// The `ERROR` reply to `request`.
pub fn error_reply(request: &Message, code: &str, message: &str) -> Result<Message, MessageError> {
    let body = ErrorBody {
        code: code.to_owned(),
        message: message.to_owned(),
        tag: Some(request.tag),
    };
    Ok(request.reply(ERROR, serde_json::to_vec(&body)?))
}
