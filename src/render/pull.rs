//! Pull-style node
//!
//! The platform calls [`PullNode::process`] once per audio period. Nothing
//! in here waits: blocks that have not arrived yet become silence.

use std::collections::VecDeque;

use crate::audio::{planes, Planes};
use crate::error::RenderError;
use crate::protocol::{RenderMessage, RenderPort, StatusData};
use crate::render::{block_len, copy_block};

pub struct PullNode {
    port: RenderPort,
    frame_count: usize,
    ready: VecDeque<Planes>,
    /// Block being played and the read cursor into it
    current: Option<(Planes, usize)>,
    status: Option<StatusData>,
    paused: bool,
    stopped: bool,
    underruns: u64,
    frames_played: u64,
}

impl PullNode {
    /// Wrap the node side of a render channel and prime `in_flight` blocks
    pub fn new(port: RenderPort, frame_count: usize, in_flight: usize) -> Result<Self, RenderError> {
        if frame_count == 0 {
            return Err(RenderError::InvalidFrameCount(frame_count));
        }
        for _ in 0..in_flight.max(1) {
            port.post(RenderMessage::Render(planes(frame_count)))
                .map_err(|_| RenderError::ChannelClosed)?;
        }
        Ok(Self {
            port,
            frame_count,
            ready: VecDeque::with_capacity(in_flight.max(1)),
            current: None,
            status: None,
            paused: false,
            stopped: false,
            underruns: 0,
            frames_played: 0,
        })
    }

    /// Fill one period of output; returns frames taken from rendered audio
    ///
    /// Any remainder is silence and counts as an underrun while playing.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) -> usize {
        self.drain_port();

        let len = left.len().min(right.len());
        let mut written = 0;
        while written < len {
            let next = self
                .current
                .take()
                .or_else(|| self.ready.pop_front().map(|block| (block, 0)));
            let Some((block, cursor)) = next else {
                break;
            };
            let n = copy_block(&block, cursor, left, right, written);
            written += n;
            if cursor + n < block_len(&block) {
                self.current = Some((block, cursor + n));
            } else {
                self.recycle(block);
            }
        }

        if written < len {
            left[written..len].fill(0.0);
            right[written..len].fill(0.0);
            if !self.stopped && !self.paused {
                self.underruns += 1;
                tracing::trace!("Pull node underrun: {} of {} frames", written, len);
            }
        }
        self.frames_played += written as u64;
        written
    }

    fn recycle(&mut self, block: Planes) {
        if self.stopped {
            return;
        }
        if self.port.post(RenderMessage::Render(block)).is_err() {
            self.stopped = true;
        }
    }

    fn drain_port(&mut self) {
        loop {
            match self.port.try_recv() {
                Ok(Some(RenderMessage::Render(block))) => self.ready.push_back(block),
                Ok(Some(RenderMessage::Status(status) | RenderMessage::Rendered(status))) => {
                    self.status = Some(status)
                }
                Ok(Some(RenderMessage::Pause { paused, .. })) => self.paused = paused,
                Ok(Some(RenderMessage::Stop | RenderMessage::Release)) => self.stopped = true,
                Ok(Some(RenderMessage::Queue { .. } | RenderMessage::Unknown)) => {}
                Ok(None) => break,
                Err(_) => {
                    self.stopped = true;
                    break;
                }
            }
        }
    }

    /// Ask the backend to hold block production
    pub fn pause(&mut self) {
        self.paused = true;
        let _ = self.port.post(RenderMessage::Queue { pause: true });
    }

    pub fn resume(&mut self) {
        self.paused = false;
        let _ = self.port.post(RenderMessage::Queue { pause: false });
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn underruns(&self) -> u64 {
        self.underruns
    }

    pub fn frames_played(&self) -> u64 {
        self.frames_played
    }

    /// Latest status snapshot received on the render channel
    pub fn last_status(&self) -> Option<StatusData> {
        self.status
    }
}

impl Drop for PullNode {
    fn drop(&mut self) {
        let _ = self.port.post(RenderMessage::Release);
    }
}
