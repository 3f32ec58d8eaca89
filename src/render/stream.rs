//! External stream adapter
//!
//! Wraps any sink implementing [`PlayStream`] behind the render channel
//! contract. A sink that refuses audio pauses the backend's queue until it
//! accepts again.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::audio::{planes, Planes};
use crate::error::RenderError;
use crate::protocol::{RenderMessage, RenderPort};
use crate::render::{render_channel, RenderOptions};

/// Destination for rendered audio supplied by the controlling side
pub trait PlayStream: Send + 'static {
    fn start(&mut self, _sample_rate: f32) {}

    /// Offer a block; return `false` when the sink cannot take it yet
    fn write(&mut self, left: &[f32], right: &[f32]) -> bool;

    fn stop(&mut self) {}
}

/// Handle to a running stream adapter
pub struct StreamHandle {
    tx: UnboundedSender<RenderMessage>,
    task: JoinHandle<()>,
}

impl StreamHandle {
    pub fn pause(&self) {
        let _ = self.tx.send(RenderMessage::Queue { pause: true });
    }

    pub fn resume(&self) {
        let _ = self.tx.send(RenderMessage::Queue { pause: false });
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the backend stops or releases the stream
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            if e.is_panic() {
                tracing::error!("Stream adapter panicked: {}", e);
            }
        }
    }
}

/// Start feeding `stream`; returns the handle and the backend's render port
pub fn spawn_stream<S: PlayStream>(
    mut stream: S,
    sample_rate: f32,
    frame_count: usize,
    options: &RenderOptions,
) -> Result<(StreamHandle, RenderPort), RenderError> {
    let frames = options.block_frames.unwrap_or(frame_count);
    if frames == 0 {
        return Err(RenderError::InvalidFrameCount(frames));
    }
    let runtime =
        tokio::runtime::Handle::try_current().map_err(|e| RenderError::NoRuntime(e.to_string()))?;

    let (node_port, backend_port) = render_channel();
    for _ in 0..options.in_flight_blocks.max(1) {
        node_port
            .post(RenderMessage::Render(planes(frames)))
            .map_err(|_| RenderError::ChannelClosed)?;
    }

    let retry = Duration::from_secs_f64(options.interval_ms.max(1.0) / 1000.0);
    let (tx, mut rx) = node_port.split();
    let task_tx = tx.clone();
    let task = runtime.spawn(async move {
        stream.start(sample_rate);
        let mut held = VecDeque::new();
        loop {
            let msg = match held.pop_front() {
                Some(block) => RenderMessage::Render(block),
                None => match rx.recv().await {
                    Some(msg) => msg,
                    None => break,
                },
            };
            match msg {
                RenderMessage::Render(block) => {
                    let delivery =
                        deliver(&mut stream, &block, &task_tx, &mut rx, &mut held, retry).await;
                    if delivery == Delivery::Stopped {
                        break;
                    }
                    if task_tx.send(RenderMessage::Render(block)).is_err() {
                        break;
                    }
                }
                RenderMessage::Stop | RenderMessage::Release => break,
                RenderMessage::Rendered(_)
                | RenderMessage::Status(_)
                | RenderMessage::Queue { .. }
                | RenderMessage::Pause { .. }
                | RenderMessage::Unknown => {}
            }
        }
        stream.stop();
        tracing::debug!("Stream adapter finished");
    });

    Ok((StreamHandle { tx, task }, backend_port))
}

#[derive(Debug, PartialEq, Eq)]
enum Delivery {
    Written,
    Stopped,
}

/// Write `block`, retrying while the sink refuses
///
/// The render port stays live during retries: blocks arriving meanwhile are
/// queued in `held`, and a stop, release or closed port abandons the block.
async fn deliver<S: PlayStream>(
    stream: &mut S,
    block: &Planes,
    tx: &UnboundedSender<RenderMessage>,
    rx: &mut UnboundedReceiver<RenderMessage>,
    held: &mut VecDeque<Planes>,
    retry: Duration,
) -> Delivery {
    if stream.write(block[0].as_slice(), block[1].as_slice()) {
        return Delivery::Written;
    }
    tracing::debug!("Stream sink full, pausing render queue");
    let _ = tx.send(RenderMessage::Queue { pause: true });
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + retry, retry);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if stream.write(block[0].as_slice(), block[1].as_slice()) {
                    break;
                }
            }
            msg = rx.recv() => match msg {
                Some(RenderMessage::Render(next)) => held.push_back(next),
                Some(RenderMessage::Stop | RenderMessage::Release) | None => {
                    tracing::debug!("Stream stopped while sink was full");
                    return Delivery::Stopped;
                }
                Some(_) => {}
            },
        }
    }
    let _ = tx.send(RenderMessage::Queue { pause: false });
    Delivery::Written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Transfer;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Sink {
        started: Option<f32>,
        written: Vec<f32>,
        refuse_next: usize,
        stopped: bool,
    }

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Sink>>);

    impl PlayStream for SharedSink {
        fn start(&mut self, sample_rate: f32) {
            self.0.lock().started = Some(sample_rate);
        }

        fn write(&mut self, left: &[f32], _right: &[f32]) -> bool {
            let mut sink = self.0.lock();
            if sink.refuse_next > 0 {
                sink.refuse_next -= 1;
                return false;
            }
            sink.written.extend_from_slice(left);
            true
        }

        fn stop(&mut self) {
            self.0.lock().stopped = true;
        }
    }

    fn filled(value: f32, frames: usize) -> Planes {
        [
            Transfer::new(vec![value; frames]),
            Transfer::new(vec![value; frames]),
        ]
    }

    #[tokio::test]
    async fn test_stream_receives_rendered_blocks() {
        let sink = SharedSink::default();
        let options = RenderOptions {
            in_flight_blocks: 1,
            ..Default::default()
        };
        let (handle, mut backend) = spawn_stream(sink.clone(), 22050.0, 4, &options).unwrap();

        match backend.recv().await {
            Some(RenderMessage::Render(block)) => assert_eq!(block[0].len(), 4),
            other => panic!("unexpected {:?}", other),
        }
        backend.post(RenderMessage::Render(filled(0.5, 4))).unwrap();

        // The block is written then sent back for refill
        match backend.recv().await {
            Some(RenderMessage::Render(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
        backend.post(RenderMessage::Stop).unwrap();
        handle.join().await;

        let sink = sink.0.lock();
        assert_eq!(sink.started, Some(22050.0));
        assert_eq!(sink.written, vec![0.5; 4]);
        assert!(sink.stopped);
    }

    #[tokio::test]
    async fn test_refused_write_pauses_queue() {
        let sink = SharedSink::default();
        sink.0.lock().refuse_next = 2;
        let options = RenderOptions {
            in_flight_blocks: 1,
            interval_ms: 1.0,
            ..Default::default()
        };
        let (_handle, mut backend) = spawn_stream(sink.clone(), 44100.0, 2, &options).unwrap();
        let _ = backend.recv().await;
        backend.post(RenderMessage::Render(filled(1.0, 2))).unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            match backend.recv().await {
                Some(msg) => seen.push(msg.name()),
                None => break,
            }
        }
        assert_eq!(seen, vec!["queue", "queue", "render"]);
        assert_eq!(sink.0.lock().written, vec![1.0, 1.0]);
    }

    #[tokio::test]
    async fn test_stop_reaches_refusing_sink() {
        let sink = SharedSink::default();
        sink.0.lock().refuse_next = usize::MAX;
        let options = RenderOptions {
            in_flight_blocks: 1,
            interval_ms: 1.0,
            ..Default::default()
        };
        let (handle, mut backend) = spawn_stream(sink.clone(), 44100.0, 2, &options).unwrap();
        let _ = backend.recv().await;
        backend.post(RenderMessage::Render(filled(1.0, 2))).unwrap();
        match backend.recv().await {
            Some(RenderMessage::Queue { pause }) => assert!(pause),
            other => panic!("unexpected {:?}", other),
        }

        backend.post(RenderMessage::Stop).unwrap();
        drop(backend);
        tokio::time::timeout(Duration::from_millis(500), handle.join())
            .await
            .expect("adapter should finish after stop");

        let sink = sink.0.lock();
        assert!(sink.stopped);
        assert!(sink.written.is_empty());
    }

    #[tokio::test]
    async fn test_blocks_arriving_during_retry_are_kept() {
        let sink = SharedSink::default();
        sink.0.lock().refuse_next = 3;
        let options = RenderOptions {
            in_flight_blocks: 2,
            interval_ms: 1.0,
            ..Default::default()
        };
        let (handle, mut backend) = spawn_stream(sink.clone(), 44100.0, 2, &options).unwrap();
        let _ = backend.recv().await;
        let _ = backend.recv().await;
        backend.post(RenderMessage::Render(filled(1.0, 2))).unwrap();
        backend.post(RenderMessage::Render(filled(2.0, 2))).unwrap();

        let mut returned = 0;
        while returned < 2 {
            match backend.recv().await {
                Some(RenderMessage::Render(_)) => returned += 1,
                Some(_) => {}
                None => panic!("adapter hung up"),
            }
        }
        backend.post(RenderMessage::Stop).unwrap();
        handle.join().await;
        assert_eq!(sink.0.lock().written, vec![1.0, 1.0, 2.0, 2.0]);
    }

    #[test]
    fn test_requires_runtime() {
        let result = spawn_stream(SharedSink::default(), 44100.0, 16, &RenderOptions::default());
        assert!(matches!(result, Err(RenderError::NoRuntime(_))));
    }
}
