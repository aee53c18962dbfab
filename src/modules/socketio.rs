//! Minimal Engine.IO v4 / Socket.IO v5 text framing, enough for a client
//! that joins rooms and listens for JSON events over the websocket transport.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Sent after the Engine.IO handshake to join the default namespace.
pub const CONNECT_DEFAULT_NAMESPACE: &str = "40";
pub const PONG: &str = "3";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("unknown engine.io packet type {0:?}")]
    UnknownPacket(char),
    #[error("unknown socket.io packet type {0:?}")]
    UnknownMessage(char),
    #[error("frame decode failed: {0}")]
    Decode(String),
    #[error("event frame carries no event name")]
    MissingEventName,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Open(Handshake),
    Close,
    Ping,
    Pong,
    Noop,
    /// Namespace connection acknowledged.
    Connect,
    Disconnect,
    ConnectError(String),
    Event { name: String, data: Value },
    /// Acks and binary packets; the panel never requests either.
    Ignored,
}

pub fn decode_frame(text: &str) -> Result<Frame, FrameError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(FrameError::Empty)?;
    let rest = chars.as_str();
    match kind {
        '0' => serde_json::from_str(rest)
            .map(Frame::Open)
            .map_err(|err| FrameError::Decode(err.to_string())),
        '1' => Ok(Frame::Close),
        '2' => Ok(Frame::Ping),
        '3' => Ok(Frame::Pong),
        '4' => decode_message(rest),
        '5' | '6' => Ok(Frame::Noop),
        other => Err(FrameError::UnknownPacket(other)),
    }
}

fn decode_message(text: &str) -> Result<Frame, FrameError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(FrameError::Empty)?;
    let body = strip_ack_id(strip_namespace(chars.as_str()));
    match kind {
        '0' => Ok(Frame::Connect),
        '1' => Ok(Frame::Disconnect),
        '2' => decode_event(body),
        '3' | '5' | '6' => Ok(Frame::Ignored),
        '4' => {
            let message = serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| body.to_string());
            Ok(Frame::ConnectError(message))
        }
        other => Err(FrameError::UnknownMessage(other)),
    }
}

fn strip_namespace(body: &str) -> &str {
    if body.starts_with('/') {
        match body.find(',') {
            Some(idx) => &body[idx + 1..],
            None => "",
        }
    } else {
        body
    }
}

fn strip_ack_id(body: &str) -> &str {
    body.trim_start_matches(|c: char| c.is_ascii_digit())
}

fn decode_event(body: &str) -> Result<Frame, FrameError> {
    let parts: Vec<Value> =
        serde_json::from_str(body).map_err(|err| FrameError::Decode(err.to_string()))?;
    let mut parts = parts.into_iter();
    let name = match parts.next() {
        Some(Value::String(name)) => name,
        _ => return Err(FrameError::MissingEventName),
    };
    let data = parts.next().unwrap_or(Value::Null);
    Ok(Frame::Event { name, data })
}

/// `42["name", data]` for the default namespace.
pub fn encode_event(name: &str, data: Option<&Value>) -> String {
    let mut parts = vec![Value::String(name.to_string())];
    if let Some(data) = data {
        parts.push(data.clone());
    }
    format!("42{}", Value::Array(parts))
}
