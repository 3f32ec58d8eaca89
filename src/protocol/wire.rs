//! JSON wire codec for both channels
//!
//! Endpoint fields (`port`, `renderPort`) only exist in-process and are not
//! encoded.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::ProtocolError;
use crate::protocol::control::{Request, Response};
use crate::protocol::render::RenderMessage;

fn encode<T: Serialize>(msg: &T) -> Result<Bytes, ProtocolError> {
    serde_json::to_vec(msg)
        .map(Bytes::from)
        .map_err(|e| ProtocolError::Encode(e.to_string()))
}

const REQUEST_TAGS: &[&str] = &[
    "initialize", "close", "config", "load-sfont", "unload-sfont", "start", "stop", "release",
    "event", "sysex", "finish",
];

const RESPONSE_TAGS: &[&str] = &[
    "initialize", "config", "load-sfont", "unload-sfont", "error", "stop", "reset", "rendered",
    "status",
];

const RENDER_TAGS: &[&str] = &[
    "render", "rendered", "status", "queue", "pause", "stop", "release",
];

/// Decode `bytes`, mapping a well-formed message with an unrecognised tag to `unknown`
fn decode<T: DeserializeOwned>(bytes: &[u8], known: &[&str], unknown: T) -> Result<T, ProtocolError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))?;
    match value.get("type").and_then(Value::as_str) {
        Some(tag) if !known.contains(&tag) => {
            tracing::debug!("Ignoring unknown message type {:?}", tag);
            Ok(unknown)
        }
        _ => serde_json::from_value(value).map_err(|e| ProtocolError::Decode(e.to_string())),
    }
}

pub fn encode_request(msg: &Request) -> Result<Bytes, ProtocolError> {
    encode(msg)
}

pub fn decode_request(bytes: &[u8]) -> Result<Request, ProtocolError> {
    decode(bytes, REQUEST_TAGS, Request::Unknown)
}

pub fn encode_response(msg: &Response) -> Result<Bytes, ProtocolError> {
    encode(msg)
}

pub fn decode_response(bytes: &[u8]) -> Result<Response, ProtocolError> {
    decode(bytes, RESPONSE_TAGS, Response::Unknown)
}

pub fn encode_render(msg: &RenderMessage) -> Result<Bytes, ProtocolError> {
    encode(msg)
}

pub fn decode_render(bytes: &[u8]) -> Result<RenderMessage, ProtocolError> {
    decode(bytes, RENDER_TAGS, RenderMessage::Unknown)
}
