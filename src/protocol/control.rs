//! Control channel messages
//!
//! Requests flow from the proxy to the backend; responses and push
//! notifications flow back. Each enum is closed: adding a kind means adding a
//! variant, and every dispatch site matches exhaustively. Tags the other side
//! does not know decode to `Unknown` and are ignored.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::audio::buffer::Transfer;
use crate::channel::Port;
use crate::protocol::event::SequencerEvent;
use crate::protocol::render::{RenderPort, StatusData};

/// Backend end of a control channel
pub type RemotePort = Port<Response, Request>;

/// Proxy end of a control channel
pub type ControlPort = Port<Request, Response>;

/// Id reserved for the initialization handshake
pub const INITIALIZE_ID: u32 = 0;

/// Tunable player options; absent fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigBase {
    /// Status/render pacing interval in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<f64>,
    /// Frames per render block
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frames_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gain: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel16_is_drums: Option<bool>,
}

/// Handshake request; carries the backend's end of the control channel
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Initialize {
    pub id: u32,
    /// Dependency locators to load before the engine starts
    pub deps: Vec<String>,
    pub interval: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frames_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_count: Option<u16>,
    #[serde(skip)]
    pub port: Option<RemotePort>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configure {
    pub id: u32,
    #[serde(flatten)]
    pub options: ConfigBase,
}

/// Request from the controlling side
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    #[serde(rename = "initialize")]
    Initialize(Initialize),

    #[serde(rename = "close")]
    Close,

    #[serde(rename = "config")]
    Configure(Configure),

    #[serde(rename = "load-sfont")]
    LoadSoundfont { id: u32, data: Transfer<u8> },

    #[serde(rename = "unload-sfont", rename_all = "camelCase")]
    UnloadSoundfont { id: u32, sfont_id: i32 },

    #[serde(rename = "start", rename_all = "camelCase")]
    Start {
        #[serde(skip)]
        render_port: Option<RenderPort>,
    },

    #[serde(rename = "stop")]
    Stop,

    #[serde(rename = "release", rename_all = "camelCase")]
    Release {
        #[serde(default)]
        reset_synth: bool,
    },

    /// `time` in milliseconds, `None` to apply immediately
    #[serde(rename = "event")]
    Event {
        data: SequencerEvent,
        time: Option<f64>,
    },

    #[serde(rename = "sysex")]
    SysEx {
        data: Transfer<u8>,
        time: Option<f64>,
    },

    #[serde(rename = "finish")]
    Finish { time: Option<f64> },

    #[serde(other)]
    Unknown,
}

/// Discriminant of a [`Request`], for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Initialize,
    Close,
    Configure,
    LoadSoundfont,
    UnloadSoundfont,
    Start,
    Stop,
    Release,
    Event,
    SysEx,
    Finish,
    Unknown,
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Initialize(_) => RequestKind::Initialize,
            Request::Close => RequestKind::Close,
            Request::Configure(_) => RequestKind::Configure,
            Request::LoadSoundfont { .. } => RequestKind::LoadSoundfont,
            Request::UnloadSoundfont { .. } => RequestKind::UnloadSoundfont,
            Request::Start { .. } => RequestKind::Start,
            Request::Stop => RequestKind::Stop,
            Request::Release { .. } => RequestKind::Release,
            Request::Event { .. } => RequestKind::Event,
            Request::SysEx { .. } => RequestKind::SysEx,
            Request::Finish { .. } => RequestKind::Finish,
            Request::Unknown => RequestKind::Unknown,
        }
    }

    /// Correlation id, present only on requests that expect a reply
    pub fn id(&self) -> Option<u32> {
        match self {
            Request::Initialize(init) => Some(init.id),
            Request::Configure(cfg) => Some(cfg.id),
            Request::LoadSoundfont { id, .. } | Request::UnloadSoundfont { id, .. } => Some(*id),
            Request::Close
            | Request::Start { .. }
            | Request::Stop
            | Request::Release { .. }
            | Request::Event { .. }
            | Request::SysEx { .. }
            | Request::Finish { .. }
            | Request::Unknown => None,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestKind::Initialize => "initialize",
            RequestKind::Close => "close",
            RequestKind::Configure => "config",
            RequestKind::LoadSoundfont => "load-sfont",
            RequestKind::UnloadSoundfont => "unload-sfont",
            RequestKind::Start => "start",
            RequestKind::Stop => "stop",
            RequestKind::Release => "release",
            RequestKind::Event => "event",
            RequestKind::SysEx => "sysex",
            RequestKind::Finish => "finish",
            RequestKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Kind half of the `(id, kind)` correlation key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplyKind {
    #[serde(rename = "initialize")]
    Initialize,
    #[serde(rename = "config")]
    Configure,
    #[serde(rename = "load-sfont")]
    LoadSoundfont,
    #[serde(rename = "unload-sfont")]
    UnloadSoundfont,
}

/// Data carried by a successful correlated reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyPayload {
    Empty,
    SoundfontId(i32),
}

/// Response or push notification from the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    #[serde(rename = "initialize")]
    Initialize { id: u32 },

    #[serde(rename = "config")]
    Configure { id: u32 },

    /// `data` is the id assigned to the loaded soundfont
    #[serde(rename = "load-sfont")]
    LoadSoundfont { id: u32, data: i32 },

    #[serde(rename = "unload-sfont")]
    UnloadSoundfont { id: u32 },

    /// A correlated request failed on the backend
    #[serde(rename = "error")]
    Failed {
        id: u32,
        request: ReplyKind,
        message: String,
    },

    #[serde(rename = "stop")]
    Stop,

    #[serde(rename = "reset")]
    Reset,

    #[serde(rename = "rendered")]
    Rendered { data: StatusData },

    #[serde(rename = "status")]
    Status { data: StatusData },

    #[serde(other)]
    Unknown,
}

impl Response {
    /// Build the success reply for `(id, kind)`
    pub fn reply(id: u32, kind: ReplyKind, payload: ReplyPayload) -> Self {
        match (kind, payload) {
            (ReplyKind::Initialize, _) => Response::Initialize { id },
            (ReplyKind::Configure, _) => Response::Configure { id },
            (ReplyKind::LoadSoundfont, ReplyPayload::SoundfontId(data)) => {
                Response::LoadSoundfont { id, data }
            }
            (ReplyKind::LoadSoundfont, ReplyPayload::Empty) => Response::LoadSoundfont { id, data: -1 },
            (ReplyKind::UnloadSoundfont, _) => Response::UnloadSoundfont { id },
        }
    }
}
