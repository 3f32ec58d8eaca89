//! Nodes played through a cpal output device

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;

use crate::constants::{DEFAULT_CHANNELS, DEFAULT_PUSH_BLOCK_FRAMES};
use crate::error::RenderError;
use crate::render::{render_channel, CreatedNode, NodeFactory, PullNode, PushNode, RenderOptions};

/// Output device plus the rate the backend renders at
pub struct CpalContext {
    pub device: cpal::Device,
    pub sample_rate: f32,
}

/// Running output stream; dropping it stops playback
pub struct OutputNode {
    stream: cpal::Stream,
}

impl OutputNode {
    pub fn play(&self) -> Result<(), RenderError> {
        self.stream
            .play()
            .map_err(|e| RenderError::Stream(e.to_string()))
    }

    pub fn pause(&self) -> Result<(), RenderError> {
        self.stream
            .pause()
            .map_err(|e| RenderError::Stream(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CpalFactory;

fn build_stream<P>(ctx: &CpalContext, mut process: P) -> Result<OutputNode, RenderError>
where
    P: FnMut(&mut [f32], &mut [f32]) + Send + 'static,
{
    let config = StreamConfig {
        channels: DEFAULT_CHANNELS,
        sample_rate: cpal::SampleRate(ctx.sample_rate as u32),
        buffer_size: cpal::BufferSize::Default,
    };
    let channels = config.channels as usize;
    let mut left = Vec::new();
    let mut right = Vec::new();

    let stream = ctx
        .device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels;
                left.resize(frames, 0.0);
                right.resize(frames, 0.0);
                process(&mut left, &mut right);
                for (i, frame) in data.chunks_exact_mut(channels).enumerate() {
                    frame[0] = left[i];
                    frame[1] = right[i];
                }
            },
            |err| tracing::error!("Output stream error: {}", err),
            None,
        )
        .map_err(|e| RenderError::Stream(e.to_string()))?;

    let node = OutputNode { stream };
    node.play()?;
    Ok(node)
}

impl NodeFactory for CpalFactory {
    type Context = CpalContext;
    type PullNode = OutputNode;
    type PushNode = OutputNode;

    fn create_pull_node(
        &self,
        ctx: &CpalContext,
        frame_count: usize,
        options: &RenderOptions,
    ) -> Result<CreatedNode<OutputNode>, RenderError> {
        let (node_port, port) = render_channel();
        let mut pull = PullNode::new(node_port, frame_count, options.in_flight_blocks)?;
        let node = build_stream(ctx, move |left, right| {
            pull.process(left, right);
        })?;
        Ok(CreatedNode { node, port })
    }

    fn create_push_node(
        &self,
        ctx: &CpalContext,
        options: &RenderOptions,
    ) -> Result<CreatedNode<OutputNode>, RenderError> {
        let (node_port, port) = render_channel();
        let frames = options.block_frames.unwrap_or(DEFAULT_PUSH_BLOCK_FRAMES);
        let mut push = PushNode::spawn(node_port, frames, options.in_flight_blocks)?;
        let node = build_stream(ctx, move |left, right| {
            push.process(left, right);
        })?;
        Ok(CreatedNode { node, port })
    }
}
