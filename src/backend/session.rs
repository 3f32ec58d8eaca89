//! One player's conversation with the backend
//!
//! The control port and the render port are polled together so a slow
//! control request never delays the next block, and a busy render loop
//! never starves control traffic.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::audio::Planes;
use crate::backend::engine::SynthEngine;
use crate::constants::{DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE};
use crate::error::EngineError;
use crate::protocol::{
    Configure, Initialize, RemotePort, RenderMessage, RenderPort, ReplyKind, ReplyPayload,
    Request, Response, StatusData,
};

fn interval_from_ms(ms: f64) -> Duration {
    if ms.is_finite() && ms > 0.0 {
        Duration::from_secs_f64(ms / 1000.0)
    } else {
        Duration::ZERO
    }
}

struct Session<E> {
    engine: E,
    control: RemotePort,
    render: Option<RenderPort>,
    sample_rate: f32,
    status_interval: Duration,
    last_status: Option<Instant>,
    out_frames: u64,
    playing: bool,
    paused: bool,
    /// Blocks received while paused or stopped
    held: VecDeque<Planes>,
    /// Frame position at which a finish marker completes
    finish_at: Option<u64>,
}

/// Serve one connection until `close` or until the proxy goes away
pub async fn run<E: SynthEngine>(engine: E, mut init: Initialize) {
    let Some(control) = init.port.take() else {
        tracing::warn!("Initialize request without a control port, dropping connection");
        return;
    };
    let sample_rate = init.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
    let mut session = Session {
        engine,
        control,
        render: None,
        sample_rate,
        status_interval: interval_from_ms(init.interval),
        last_status: None,
        out_frames: 0,
        playing: false,
        paused: false,
        held: VecDeque::new(),
        finish_at: None,
    };

    let ready = session
        .engine
        .load_dependencies(&init.deps)
        .and_then(|_| {
            session
                .engine
                .initialize(sample_rate, init.channel_count.unwrap_or(DEFAULT_CHANNELS))
        })
        .map(|_| ReplyPayload::Empty);
    if let Some(frames) = init.frames_count {
        tracing::debug!("Session initialized with {} frames per block", frames);
    }
    session.reply(init.id, ReplyKind::Initialize, ready);

    session.run().await;
    tracing::debug!("Session ended after {} frames", session.out_frames);
}

async fn recv_render(port: &mut Option<RenderPort>) -> Option<RenderMessage> {
    match port {
        Some(port) => port.recv().await,
        None => std::future::pending().await,
    }
}

impl<E: SynthEngine> Session<E> {
    async fn run(&mut self) {
        loop {
            tokio::select! {
                request = self.control.recv() => {
                    let Some(request) = request else {
                        tracing::debug!("Control channel closed by proxy");
                        break;
                    };
                    if !self.handle_request(request) {
                        break;
                    }
                }
                msg = recv_render(&mut self.render) => match msg {
                    Some(msg) => self.handle_render(msg),
                    None => {
                        tracing::debug!("Render channel closed by node");
                        self.render = None;
                        self.held.clear();
                    }
                },
            }
        }
    }

    fn reply(&self, id: u32, kind: ReplyKind, outcome: Result<ReplyPayload, EngineError>) {
        let response = match outcome {
            Ok(payload) => Response::reply(id, kind, payload),
            Err(e) => {
                tracing::error!("Engine failed {:?} #{}: {}", kind, id, e);
                Response::Failed {
                    id,
                    request: kind,
                    message: e.to_string(),
                }
            }
        };
        let _ = self.control.post(response);
    }

    /// Returns `false` once the session should end
    fn handle_request(&mut self, request: Request) -> bool {
        tracing::debug!("Session request: {}", request.kind());
        match request {
            Request::Initialize(init) => {
                tracing::warn!("Session already initialized");
                self.reply(
                    init.id,
                    ReplyKind::Initialize,
                    Err(EngineError::InvalidConfig("already initialized".into())),
                );
            }
            Request::Close => return false,
            Request::Configure(Configure { id, options }) => {
                let outcome = self.engine.configure(&options);
                if outcome.is_ok() {
                    if let Some(interval) = options.interval {
                        self.status_interval = interval_from_ms(interval);
                    }
                }
                self.reply(id, ReplyKind::Configure, outcome.map(|_| ReplyPayload::Empty));
            }
            Request::LoadSoundfont { id, data } => {
                let outcome = self.engine.load_soundfont(data);
                self.reply(id, ReplyKind::LoadSoundfont, outcome.map(ReplyPayload::SoundfontId));
            }
            Request::UnloadSoundfont { id, sfont_id } => {
                let outcome = self.engine.unload_soundfont(sfont_id);
                self.reply(id, ReplyKind::UnloadSoundfont, outcome.map(|_| ReplyPayload::Empty));
            }
            Request::Start { render_port } => self.start(render_port),
            Request::Stop => self.stop(),
            Request::Release { reset_synth } => self.release(reset_synth),
            Request::Event { data, time } => self.engine.send_event(data, time),
            Request::SysEx { data, time } => self.engine.send_sysex(data, time),
            Request::Finish { time } => {
                let at = match time {
                    Some(ms) => (ms.max(0.0) * f64::from(self.sample_rate) / 1000.0) as u64,
                    None => self.out_frames,
                };
                self.finish_at = Some(at);
            }
            Request::Unknown => {}
        }
        true
    }

    fn start(&mut self, render_port: Option<RenderPort>) {
        if let Some(port) = render_port {
            if let Some(old) = self.render.replace(port) {
                let _ = old.post(RenderMessage::Release);
            }
            self.held.clear();
        }
        self.engine.start();
        self.out_frames = 0;
        self.last_status = None;
        self.finish_at = None;
        self.paused = false;
        self.playing = true;
        tracing::info!("Session started");
        self.serve_held();
    }

    fn stop(&mut self) {
        let was_playing = self.playing;
        self.playing = false;
        self.finish_at = None;
        let _ = self.control.post(Response::Stop);
        if let Some(render) = &self.render {
            let _ = render.post(RenderMessage::Stop);
        }
        if was_playing {
            tracing::info!("Session stopped at {} frames", self.out_frames);
        }
    }

    fn release(&mut self, reset_synth: bool) {
        self.playing = false;
        self.finish_at = None;
        self.held.clear();
        if let Some(render) = self.render.take() {
            let _ = render.post(RenderMessage::Release);
        }
        if reset_synth {
            self.engine.reset();
            let _ = self.control.post(Response::Reset);
        }
    }

    fn handle_render(&mut self, msg: RenderMessage) {
        match msg {
            RenderMessage::Render(block) => {
                if self.playing && !self.paused {
                    self.render_block(block);
                } else {
                    self.held.push_back(block);
                }
            }
            RenderMessage::Queue { pause } => self.set_paused(pause),
            RenderMessage::Pause { id, paused } => {
                self.set_paused(paused);
                if let Some(render) = &self.render {
                    let _ = render.post(RenderMessage::Pause { id, paused });
                }
            }
            RenderMessage::Release => {
                tracing::debug!("Node released its render channel");
                self.render = None;
                self.held.clear();
            }
            RenderMessage::Rendered(_)
            | RenderMessage::Status(_)
            | RenderMessage::Stop
            | RenderMessage::Unknown => {}
        }
    }

    fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        if !paused {
            self.serve_held();
        }
    }

    fn serve_held(&mut self) {
        while self.playing && !self.paused {
            let Some(block) = self.held.pop_front() else {
                break;
            };
            self.render_block(block);
        }
    }

    fn render_block(&mut self, mut block: Planes) {
        let [left, right] = &mut block;
        let frames = self.engine.render(left.as_mut_slice(), right.as_mut_slice());
        self.out_frames += frames as u64;

        let Some(render) = &self.render else {
            return;
        };
        if render.post(RenderMessage::Render(block)).is_err() {
            self.render = None;
            return;
        }

        let status = StatusData {
            out_frames: self.out_frames,
            sample_rate: self.sample_rate,
            is_queue_empty: self.engine.is_queue_empty(),
        };
        let _ = self.control.post(Response::Rendered { data: status });

        let now = Instant::now();
        let due = self
            .last_status
            .map_or(true, |last| now.duration_since(last) >= self.status_interval);
        if due {
            self.last_status = Some(now);
            let _ = self.control.post(Response::Status { data: status });
            if let Some(render) = &self.render {
                let _ = render.post(RenderMessage::Status(status));
            }
        }

        if let Some(at) = self.finish_at {
            if self.out_frames >= at && status.is_queue_empty {
                tracing::debug!("Finish marker reached at {} frames", self.out_frames);
                self.stop();
            }
        }
    }
}
