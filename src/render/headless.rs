//! Device-less node factory

use crate::constants::DEFAULT_PUSH_BLOCK_FRAMES;
use crate::error::RenderError;
use crate::render::{render_channel, CreatedNode, NodeFactory, PullNode, PushNode, RenderOptions};

/// Audio context for offline rendering
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadlessContext {
    pub sample_rate: f32,
}

/// Builds nodes whose `process` is driven by the caller instead of a device
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessFactory;

impl NodeFactory for HeadlessFactory {
    type Context = HeadlessContext;
    type PullNode = PullNode;
    type PushNode = PushNode;

    fn create_pull_node(
        &self,
        _ctx: &HeadlessContext,
        frame_count: usize,
        options: &RenderOptions,
    ) -> Result<CreatedNode<PullNode>, RenderError> {
        let (node_port, port) = render_channel();
        let node = PullNode::new(node_port, frame_count, options.in_flight_blocks)?;
        Ok(CreatedNode { node, port })
    }

    fn create_push_node(
        &self,
        _ctx: &HeadlessContext,
        options: &RenderOptions,
    ) -> Result<CreatedNode<PushNode>, RenderError> {
        let (node_port, port) = render_channel();
        let frames = options.block_frames.unwrap_or(DEFAULT_PUSH_BLOCK_FRAMES);
        let node = PushNode::spawn(node_port, frames, options.in_flight_blocks)?;
        Ok(CreatedNode { node, port })
    }
}
