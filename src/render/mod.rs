//! Render channel strategies
//!
//! A render channel carries per-cycle sample blocks and status between an
//! audio node and the backend, independently of the control channel. Nodes
//! keep several blocks in flight so one is rendered remotely while another
//! plays locally.
//!
//! - [`pull::PullNode`]: serves a periodic platform callback in-step
//! - [`push::PushNode`]: an exchange task feeds a lock-free ring the callback drains
//! - [`stream`]: adapts an arbitrary [`stream::PlayStream`] sink

pub mod headless;
pub mod pull;
pub mod push;
pub mod stream;

#[cfg(feature = "cpal")]
pub mod cpal_output;

use serde::{Deserialize, Serialize};

use crate::channel::port_pair;
use crate::constants::{DEFAULT_IN_FLIGHT_BLOCKS, DEFAULT_INTERVAL_MS};
use crate::error::RenderError;
use crate::protocol::RenderPort;

pub use headless::{HeadlessContext, HeadlessFactory};
pub use pull::PullNode;
pub use push::PushNode;
pub use stream::{PlayStream, StreamHandle};

/// Per-node render settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RenderOptions {
    /// Blocks circulating between node and backend
    pub in_flight_blocks: usize,
    /// Block size for nodes that choose their own (push nodes, streams)
    pub block_frames: Option<usize>,
    /// Retry pacing for sinks that refuse audio, in milliseconds
    pub interval_ms: f64,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            in_flight_blocks: DEFAULT_IN_FLIGHT_BLOCKS,
            block_frames: None,
            interval_ms: DEFAULT_INTERVAL_MS,
        }
    }
}

/// Node produced by a factory plus the render port to hand to the backend
pub struct CreatedNode<N> {
    pub node: N,
    pub port: RenderPort,
}

/// Builds platform audio nodes wired to a fresh render channel
pub trait NodeFactory {
    type Context;
    type PullNode;
    type PushNode;

    fn create_pull_node(
        &self,
        ctx: &Self::Context,
        frame_count: usize,
        options: &RenderOptions,
    ) -> Result<CreatedNode<Self::PullNode>, RenderError>;

    fn create_push_node(
        &self,
        ctx: &Self::Context,
        options: &RenderOptions,
    ) -> Result<CreatedNode<Self::PushNode>, RenderError>;
}

/// Create an entangled render port pair: (node side, backend side)
pub fn render_channel() -> (RenderPort, RenderPort) {
    port_pair()
}

/// Copy frames from `block` starting at `cursor` into the outputs starting at `offset`
///
/// Returns the number of frames copied.
pub(crate) fn copy_block(
    block: &crate::audio::Planes,
    cursor: usize,
    left: &mut [f32],
    right: &mut [f32],
    offset: usize,
) -> usize {
    let block_len = block[0].len().min(block[1].len());
    let out_len = left.len().min(right.len());
    let n = block_len
        .saturating_sub(cursor)
        .min(out_len.saturating_sub(offset));
    left[offset..offset + n].copy_from_slice(&block[0].as_slice()[cursor..cursor + n]);
    right[offset..offset + n].copy_from_slice(&block[1].as_slice()[cursor..cursor + n]);
    n
}

/// Frames a block can supply
pub(crate) fn block_len(block: &crate::audio::Planes) -> usize {
    block[0].len().min(block[1].len())
}
