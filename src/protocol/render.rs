//! Render channel messages
//!
//! High-frequency traffic between an audio node and the backend: sample
//! plane exchange, queue control and status snapshots. Uncorrelated.

use serde::{Deserialize, Serialize};

use crate::audio::buffer::Planes;
use crate::channel::Port;

/// Either end of a render channel
pub type RenderPort = Port<RenderMessage, RenderMessage>;

/// Snapshot produced by the backend after rendering
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusData {
    /// Frames rendered since start
    pub out_frames: u64,
    pub sample_rate: f32,
    pub is_queue_empty: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum RenderMessage {
    /// Left/right planes; empty towards the backend, filled on the way back
    Render(Planes),

    Rendered(StatusData),

    Status(StatusData),

    /// Pause or resume block production
    Queue { pause: bool },

    /// Acknowledged pause; the backend echoes it back once applied
    Pause { id: u32, paused: bool },

    Stop,

    Release,

    #[serde(other)]
    Unknown,
}

impl RenderMessage {
    pub fn name(&self) -> &'static str {
        match self {
            RenderMessage::Render(_) => "render",
            RenderMessage::Rendered(_) => "rendered",
            RenderMessage::Status(_) => "status",
            RenderMessage::Queue { .. } => "queue",
            RenderMessage::Pause { .. } => "pause",
            RenderMessage::Stop => "stop",
            RenderMessage::Release => "release",
            RenderMessage::Unknown => "unknown",
        }
    }
}
