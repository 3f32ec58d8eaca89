//! Push-style node
//!
//! An exchange task owns the render channel and keeps blocks in flight.
//! Filled blocks land in a lock-free ring that the audio callback drains;
//! consumed blocks return through a second ring and wake the task, which
//! sends them back to be rendered again. The callback never touches the
//! channel itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::audio::{planes, BlockRing, Planes};
use crate::error::RenderError;
use crate::protocol::{RenderMessage, RenderPort, StatusData};
use crate::render::{block_len, copy_block};

struct Shared {
    filled: BlockRing,
    empty: BlockRing,
    wake: Notify,
    stopped: AtomicBool,
    paused: AtomicBool,
    status: Mutex<Option<StatusData>>,
}

pub struct PushNode {
    shared: Arc<Shared>,
    tx: UnboundedSender<RenderMessage>,
    task: JoinHandle<()>,
    block_frames: usize,
    current: Option<(Planes, usize)>,
}

impl PushNode {
    /// Spawn the exchange task on the current tokio runtime
    pub fn spawn(port: RenderPort, block_frames: usize, in_flight: usize) -> Result<Self, RenderError> {
        if block_frames == 0 {
            return Err(RenderError::InvalidFrameCount(block_frames));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RenderError::NoRuntime(e.to_string()))?;

        let in_flight = in_flight.max(1);
        let shared = Arc::new(Shared {
            filled: BlockRing::new(in_flight),
            empty: BlockRing::new(in_flight),
            wake: Notify::new(),
            stopped: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            status: Mutex::new(None),
        });

        let (tx, rx) = port.split();
        for _ in 0..in_flight {
            tx.send(RenderMessage::Render(planes(block_frames)))
                .map_err(|_| RenderError::ChannelClosed)?;
        }

        let task = runtime.spawn(exchange(Arc::clone(&shared), tx.clone(), rx));
        Ok(Self {
            shared,
            tx,
            task,
            block_frames,
            current: None,
        })
    }

    /// Fill one callback's worth of output; returns frames taken from rendered audio
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) -> usize {
        let len = left.len().min(right.len());
        // Starvation only counts while playback is expected
        let counting = !self.is_stopped() && !self.shared.paused.load(Ordering::Relaxed);
        let mut written = 0;
        while written < len {
            let next = self.current.take().or_else(|| {
                let block = if counting {
                    self.shared.filled.pop()
                } else {
                    self.shared.filled.try_pop()
                };
                block.map(|block| (block, 0))
            });
            let Some((block, cursor)) = next else {
                break;
            };
            let n = copy_block(&block, cursor, left, right, written);
            written += n;
            if cursor + n < block_len(&block) {
                self.current = Some((block, cursor + n));
            } else {
                // Capacity equals the number of blocks in circulation
                let _ = self.shared.empty.push(block);
                self.shared.wake.notify_one();
            }
        }
        left[written..len].fill(0.0);
        right[written..len].fill(0.0);
        written
    }

    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Relaxed);
        let _ = self.tx.send(RenderMessage::Queue { pause: true });
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Relaxed);
        let _ = self.tx.send(RenderMessage::Queue { pause: false });
    }

    pub fn block_frames(&self) -> usize {
        self.block_frames
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Callbacks that found no rendered block waiting
    pub fn underruns(&self) -> usize {
        self.shared.filled.underrun_count()
    }

    pub fn buffered_blocks(&self) -> usize {
        self.shared.filled.len()
    }

    pub fn last_status(&self) -> Option<StatusData> {
        *self.shared.status.lock()
    }
}

impl Drop for PushNode {
    fn drop(&mut self) {
        let _ = self.tx.send(RenderMessage::Release);
        self.task.abort();
    }
}

async fn exchange(
    shared: Arc<Shared>,
    tx: UnboundedSender<RenderMessage>,
    mut rx: UnboundedReceiver<RenderMessage>,
) {
    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(RenderMessage::Render(block)) => {
                    if shared.filled.push(block).is_err() {
                        tracing::warn!("Push node ring full, dropping block");
                    }
                }
                Some(RenderMessage::Status(status) | RenderMessage::Rendered(status)) => {
                    *shared.status.lock() = Some(status);
                }
                Some(RenderMessage::Stop | RenderMessage::Release) | None => break,
                Some(RenderMessage::Queue { .. } | RenderMessage::Pause { .. } | RenderMessage::Unknown) => {}
            },
            _ = shared.wake.notified() => {
                while let Some(block) = shared.empty.try_pop() {
                    if tx.send(RenderMessage::Render(block)).is_err() {
                        shared.stopped.store(true, Ordering::Release);
                        return;
                    }
                }
            }
        }
    }
    tracing::debug!("Push node exchange finished");
    shared.stopped.store(true, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::render_channel;
    use std::time::Duration;

    async fn next_render(port: &mut RenderPort) -> Planes {
        loop {
            match tokio::time::timeout(Duration::from_secs(1), port.recv()).await {
                Ok(Some(RenderMessage::Render(block))) => return block,
                Ok(Some(_)) => continue,
                other => panic!("expected a render request, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_exchange_round_trip() {
        let (node_port, mut backend) = render_channel();
        let mut node = PushNode::spawn(node_port, 8, 2).unwrap();

        let mut first = next_render(&mut backend).await;
        let _second = next_render(&mut backend).await;
        first[0].as_mut_slice().fill(0.5);
        first[1].as_mut_slice().fill(-0.5);
        backend.post(RenderMessage::Render(first)).unwrap();

        // Wait for the exchange task to move the block into the ring
        for _ in 0..100 {
            if node.buffered_blocks() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let mut left = [0.0f32; 8];
        let mut right = [0.0f32; 8];
        assert_eq!(node.process(&mut left, &mut right), 8);
        assert_eq!(left, [0.5; 8]);
        assert_eq!(right, [-0.5; 8]);

        // The consumed block is sent back for another render
        let recycled = next_render(&mut backend).await;
        assert_eq!(block_len(&recycled), 8);
    }

    #[tokio::test]
    async fn test_stop_from_backend() {
        let (node_port, backend) = render_channel();
        let node = PushNode::spawn(node_port, 8, 1).unwrap();
        backend.post(RenderMessage::Stop).unwrap();

        for _ in 0..100 {
            if node.is_stopped() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(node.is_stopped());
    }

    #[tokio::test]
    async fn test_underrun_is_silent() {
        let (node_port, _backend) = render_channel();
        let mut node = PushNode::spawn(node_port, 4, 1).unwrap();
        let mut left = [1.0f32; 4];
        let mut right = [1.0f32; 4];
        assert_eq!(node.process(&mut left, &mut right), 0);
        assert_eq!(left, [0.0; 4]);
        assert_eq!(node.underruns(), 1);
    }

    #[tokio::test]
    async fn test_no_underruns_while_stopped_or_paused() {
        let (node_port, backend) = render_channel();
        let mut node = PushNode::spawn(node_port, 4, 1).unwrap();
        let mut left = [0.0f32; 4];
        let mut right = [0.0f32; 4];

        node.pause();
        node.process(&mut left, &mut right);
        assert_eq!(node.underruns(), 0);
        node.resume();
        node.process(&mut left, &mut right);
        assert_eq!(node.underruns(), 1);

        backend.post(RenderMessage::Stop).unwrap();
        for _ in 0..100 {
            if node.is_stopped() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(node.is_stopped());
        for _ in 0..3 {
            node.process(&mut left, &mut right);
        }
        assert_eq!(node.underruns(), 1);
    }

    #[test]
    fn test_requires_runtime() {
        let (node_port, _backend) = render_channel();
        assert!(matches!(
            PushNode::spawn(node_port, 4, 1),
            Err(RenderError::NoRuntime(_))
        ));
    }

    #[tokio::test]
    async fn test_pause_forwards_queue_control() {
        let (node_port, mut backend) = render_channel();
        let node = PushNode::spawn(node_port, 4, 1).unwrap();
        let _ = next_render(&mut backend).await;
        node.pause();
        match backend.recv().await {
            Some(RenderMessage::Queue { pause }) => assert!(pause),
            other => panic!("unexpected {:?}", other),
        }
    }
}
