//! Player proxy
//!
//! The façade the controlling context talks to. It owns the control channel,
//! hands out correlation ids, wires render channels to the backend and routes
//! push notifications to hooks.
//!
//! Correlated operations register their pending reply and post the request
//! before returning, so the returned future only waits. Dropping it abandons
//! the wait; the late reply is then discarded as unmatched.

pub mod correlation;
pub mod timeout;

use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::audio::Transfer;
use crate::backend::{self, BackendLauncher};
use crate::channel::port_pair;
use crate::config::PlayerConfig;
use crate::error::{Error, ProtocolError, Result};
use crate::protocol::{
    ConfigBase, Configure, Initialize, RenderPort, ReplyKind, ReplyPayload, Request, Response,
    SequencerEvent, StatusData, SysExControl, INITIALIZE_ID,
};
use crate::render::stream::spawn_stream;
use crate::render::{NodeFactory, PlayStream, RenderOptions, StreamHandle};

use correlation::{CorrelationTable, PendingReply};
use timeout::guard_with_fallback;

/// Lifecycle as observed by the controlling side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Uninitialized,
    Ready,
    Started,
    Stopped,
    Released,
    Closed,
}

/// How [`PlayerProxy::wait_for_finish`] completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The backend reported the stop
    Stopped,
    /// The deadline passed; a stop was forced locally
    TimedOut,
}

type StatusHook = Arc<dyn Fn(StatusData) + Send + Sync>;
type SignalHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Hooks {
    on_queued: Option<StatusHook>,
    on_status: Option<StatusHook>,
    on_stop: Option<SignalHook>,
    on_reset: Option<SignalHook>,
}

struct Inner {
    tx: Mutex<Option<UnboundedSender<Request>>>,
    defers: CorrelationTable,
    msg_id: AtomicU32,
    frames_count: AtomicUsize,
    sample_rate: f32,
    state: Mutex<PlayerState>,
    hooks: Mutex<Hooks>,
    /// `true` while no playback is armed
    stopped: watch::Sender<bool>,
}

impl Inner {
    fn next_id(&self) -> u32 {
        loop {
            let id = self.msg_id.fetch_add(1, Ordering::Relaxed);
            if id != INITIALIZE_ID {
                return id;
            }
        }
    }

    fn post(&self, request: Request) -> Result<()> {
        let tx = self.tx.lock();
        let Some(tx) = tx.as_ref() else {
            return Err(Error::Closed);
        };
        tx.send(request).map_err(|_| Error::ChannelClosed)
    }

    /// Post a request nobody waits on
    fn post_quiet(&self, request: Request) {
        let kind = request.kind();
        if let Err(e) = self.post(request) {
            tracing::debug!("Dropped {} request: {}", kind, e);
        }
    }

    /// Register a pending reply and post the request built for its id
    fn request(&self, kind: ReplyKind, build: impl FnOnce(u32) -> Request) -> Result<PendingReply> {
        let id = self.next_id();
        let reply = self.defers.register(id, kind);
        if let Err(e) = self.post(build(id)) {
            self.defers.cancel(id, kind);
            return Err(e);
        }
        Ok(reply)
    }

    fn set_state(&self, state: PlayerState) {
        *self.state.lock() = state;
    }

    fn on_message(&self, response: Response) {
        match response {
            Response::Initialize { id } => self.settle(id, ReplyKind::Initialize, Ok(ReplyPayload::Empty)),
            Response::Configure { id } => self.settle(id, ReplyKind::Configure, Ok(ReplyPayload::Empty)),
            Response::LoadSoundfont { id, data } => {
                self.settle(id, ReplyKind::LoadSoundfont, Ok(ReplyPayload::SoundfontId(data)))
            }
            Response::UnloadSoundfont { id } => {
                self.settle(id, ReplyKind::UnloadSoundfont, Ok(ReplyPayload::Empty))
            }
            Response::Failed { id, request, message } => {
                self.settle(id, request, Err(Error::Remote { kind: request, message }))
            }
            Response::Stop => self.finish_stop(),
            Response::Reset => {
                let hook = self.hooks.lock().on_reset.clone();
                if let Some(hook) = hook {
                    hook();
                }
            }
            Response::Rendered { data } => {
                let hook = self.hooks.lock().on_queued.clone();
                if let Some(hook) = hook {
                    hook(data);
                }
            }
            Response::Status { data } => {
                let hook = self.hooks.lock().on_status.clone();
                if let Some(hook) = hook {
                    hook(data);
                }
            }
            Response::Unknown => {}
        }
    }

    fn settle(&self, id: u32, kind: ReplyKind, outcome: Result<ReplyPayload>) {
        if !self.defers.resolve(id, kind, outcome) {
            tracing::debug!("Discarding unmatched {:?} reply #{}", kind, id);
        }
    }

    /// Complete the armed stop; only the first call per start fires `on_stop`
    fn finish_stop(&self) {
        let armed = self.stopped.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        });
        if !armed {
            return;
        }
        {
            let mut state = self.state.lock();
            if *state == PlayerState::Started {
                *state = PlayerState::Stopped;
            }
        }
        tracing::info!("Player stopped");
        let hook = self.hooks.lock().on_stop.clone();
        if let Some(hook) = hook {
            hook();
        }
    }
}

async fn dispatch(inner: Weak<Inner>, mut rx: UnboundedReceiver<Response>) {
    while let Some(response) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.on_message(response);
    }
    if let Some(inner) = inner.upgrade() {
        let rejected = inner.defers.reject_all(|| Error::ChannelClosed);
        if rejected > 0 {
            tracing::warn!("Control channel closed with {} requests pending", rejected);
        }
        // No stop will arrive any more
        inner.stopped.send_replace(true);
    }
}

/// Controller for one synthesizer instance on a backend
pub struct PlayerProxy {
    inner: Arc<Inner>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl PlayerProxy {
    /// Connect to a backend and complete the initialization handshake
    ///
    /// With `share_backend` a live backend registered under the launcher's
    /// locator is reused; `dependencies` are only sent to fresh backends.
    pub async fn instantiate(
        share_backend: bool,
        launcher: &dyn BackendLauncher,
        dependencies: Vec<String>,
        interval: f64,
        frames_count: usize,
        sample_rate: f32,
        channel_count: Option<u16>,
    ) -> Result<Self> {
        let (backend, fresh) = backend::acquire(launcher, share_backend)?;
        let (port, remote) = port_pair();
        let (tx, rx) = port.split();
        let (stopped, _) = watch::channel(true);

        let inner = Arc::new(Inner {
            tx: Mutex::new(Some(tx)),
            defers: CorrelationTable::new(),
            msg_id: AtomicU32::new(INITIALIZE_ID + 1),
            frames_count: AtomicUsize::new(frames_count),
            sample_rate,
            state: Mutex::new(PlayerState::Uninitialized),
            hooks: Mutex::new(Hooks::default()),
            stopped,
        });
        let ready = inner.defers.register(INITIALIZE_ID, ReplyKind::Initialize);
        let dispatcher = tokio::spawn(dispatch(Arc::downgrade(&inner), rx));
        let proxy = Self {
            inner,
            dispatcher: Mutex::new(Some(dispatcher)),
        };

        backend.connect(Initialize {
            id: INITIALIZE_ID,
            deps: if fresh { dependencies } else { Vec::new() },
            interval,
            frames_count: Some(frames_count),
            sample_rate: Some(sample_rate),
            channel_count,
            port: Some(remote),
        })?;
        ready.await?;

        proxy.inner.set_state(PlayerState::Ready);
        tracing::info!(
            "Player ready on backend '{}' ({} Hz, {} frames)",
            backend.locator(),
            sample_rate,
            frames_count
        );
        Ok(proxy)
    }

    pub async fn from_config(config: &PlayerConfig, launcher: &dyn BackendLauncher) -> Result<Self> {
        config.validate()?;
        let render = &config.render;
        Self::instantiate(
            config.backend.share,
            launcher,
            config.backend.dependencies.clone(),
            render.interval_ms,
            render.frames_count,
            render.sample_rate,
            render.channel_count,
        )
        .await
    }

    pub fn state(&self) -> PlayerState {
        *self.inner.state.lock()
    }

    pub fn frames_count(&self) -> usize {
        self.inner.frames_count.load(Ordering::Relaxed)
    }

    pub fn sample_rate(&self) -> f32 {
        self.inner.sample_rate
    }

    /// Send a `config` request
    ///
    /// A new `frames_count` is cached immediately, before the backend
    /// acknowledges it, so render nodes created right after use it.
    pub fn configure(&self, options: ConfigBase) -> impl Future<Output = Result<()>> + Send + 'static {
        if let Some(frames) = options.frames_count {
            self.inner.frames_count.store(frames, Ordering::Relaxed);
        }
        let reply = self
            .inner
            .request(ReplyKind::Configure, |id| Request::Configure(Configure { id, options }));
        async move { reply?.await.map(|_| ()) }
    }

    /// Load a soundfont and get its id
    ///
    /// With `transfer` the buffer is moved out and `data` is left detached;
    /// otherwise the bytes are copied.
    pub fn load_soundfont(
        &self,
        data: &mut Transfer<u8>,
        transfer: bool,
    ) -> impl Future<Output = Result<i32>> + Send + 'static {
        let payload = if data.is_detached() {
            Err(Error::from(ProtocolError::Detached))
        } else if transfer {
            Ok(data.detach())
        } else {
            Ok(Transfer::copy_of(data.as_slice()))
        };
        let reply = payload.and_then(|data| {
            self.inner
                .request(ReplyKind::LoadSoundfont, move |id| Request::LoadSoundfont { id, data })
        });
        async move {
            match reply?.await? {
                ReplyPayload::SoundfontId(id) => Ok(id),
                ReplyPayload::Empty => Err(Error::from(ProtocolError::Decode(
                    "load-sfont reply without id".into(),
                ))),
            }
        }
    }

    pub fn unload_soundfont(&self, sfont_id: i32) -> impl Future<Output = Result<()>> + Send + 'static {
        let reply = self.inner.request(ReplyKind::UnloadSoundfont, |id| {
            Request::UnloadSoundfont { id, sfont_id }
        });
        async move { reply?.await.map(|_| ()) }
    }

    /// Start rendering into a pull node built by `factory`
    pub fn start_with_pull_node<F: NodeFactory>(
        &self,
        factory: &F,
        ctx: &F::Context,
        options: &RenderOptions,
    ) -> Result<F::PullNode> {
        let created = factory.create_pull_node(ctx, self.frames_count(), options)?;
        self.start(Some(created.port))?;
        Ok(created.node)
    }

    /// Start rendering into a push node built by `factory`
    pub fn start_with_push_node<F: NodeFactory>(
        &self,
        factory: &F,
        ctx: &F::Context,
        options: &RenderOptions,
    ) -> Result<F::PushNode> {
        let created = factory.create_push_node(ctx, options)?;
        self.start(Some(created.port))?;
        Ok(created.node)
    }

    /// Start rendering into an external sink
    pub fn start_for_stream<S: PlayStream>(
        &self,
        stream: S,
        options: &RenderOptions,
    ) -> Result<StreamHandle> {
        let (handle, port) = spawn_stream(stream, self.sample_rate(), self.frames_count(), options)?;
        self.start(Some(port))?;
        Ok(handle)
    }

    /// Start when the render path was wired out of band
    pub fn start_with_existing_connection(&self) -> Result<()> {
        self.start(None)
    }

    fn start(&self, render_port: Option<RenderPort>) -> Result<()> {
        self.inner.stopped.send_replace(false);
        if let Err(e) = self.inner.post(Request::Start { render_port }) {
            self.inner.stopped.send_replace(true);
            return Err(e);
        }
        self.inner.set_state(PlayerState::Started);
        tracing::info!("Player started");
        Ok(())
    }

    pub fn stop(&self) {
        self.inner.post_quiet(Request::Stop);
    }

    pub fn release_player(&self, reset_synth: bool) {
        self.inner.post_quiet(Request::Release { reset_synth });
        let mut state = self.inner.state.lock();
        if *state != PlayerState::Closed {
            *state = PlayerState::Released;
        }
    }

    /// Wait for the armed playback to stop
    ///
    /// With a timeout, expiry posts one `stop` and completes the stop locally,
    /// so the wait settles by the deadline whether or not the backend answers.
    pub fn wait_for_finish(
        &self,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<FinishReason>> + Send + 'static {
        let mut stopped = self.inner.stopped.subscribe();
        let inner = Arc::downgrade(&self.inner);
        async move {
            let wait = async move { stopped.wait_for(|s| *s).await.map(|_| ()) };
            let Some(deadline) = timeout else {
                wait.await.map_err(|_| Error::ChannelClosed)?;
                return Ok(FinishReason::Stopped);
            };
            let outcome = guard_with_fallback(wait, deadline, || {
                if let Some(inner) = inner.upgrade() {
                    tracing::warn!("No stop within {:?}, forcing stop", deadline);
                    inner.post_quiet(Request::Stop);
                    inner.finish_stop();
                }
            })
            .await;
            match outcome {
                Ok(Ok(())) => Ok(FinishReason::Stopped),
                Ok(Err(_)) => Err(Error::ChannelClosed),
                Err(Error::Timeout(_)) => Ok(FinishReason::TimedOut),
                Err(e) => Err(e),
            }
        }
    }

    /// Schedule an event; `None` applies it immediately
    pub fn send_event(&self, event: SequencerEvent, time_ms: Option<f64>) {
        self.inner.post_quiet(Request::Event {
            data: event,
            time: time_ms,
        });
    }

    pub fn send_event_now(&self, event: SequencerEvent) {
        self.send_event(event, None);
    }

    /// Send a copy of `data` as a system-exclusive message
    pub fn send_sysex(&self, data: &[u8], time_ms: Option<f64>) {
        self.inner.post_quiet(Request::SysEx {
            data: Transfer::copy_of(data),
            time: time_ms,
        });
    }

    pub fn send_sysex_now(&self, data: &[u8]) {
        self.send_sysex(data, None);
    }

    pub fn send_sysex_control(&self, control: &SysExControl, time_ms: Option<f64>) {
        self.inner.post_quiet(control.to_request(time_ms));
    }

    /// Mark the end of the song; the backend stops once it is rendered
    pub fn send_finish_marker(&self, time_ms: Option<f64>) {
        self.inner.post_quiet(Request::Finish { time: time_ms });
    }

    pub fn send_finish_marker_now(&self) {
        self.send_finish_marker(None);
    }

    pub fn set_on_queued(&self, hook: impl Fn(StatusData) + Send + Sync + 'static) {
        self.inner.hooks.lock().on_queued = Some(Arc::new(hook));
    }

    pub fn set_on_status(&self, hook: impl Fn(StatusData) + Send + Sync + 'static) {
        self.inner.hooks.lock().on_status = Some(Arc::new(hook));
    }

    pub fn set_on_stop(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.inner.hooks.lock().on_stop = Some(Arc::new(hook));
    }

    pub fn set_on_reset(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.inner.hooks.lock().on_reset = Some(Arc::new(hook));
    }

    pub fn clear_hooks(&self) {
        *self.inner.hooks.lock() = Hooks::default();
    }

    /// Send `close` and sever the control channel
    ///
    /// Pending requests fail with [`Error::Closed`] and stop waiters are
    /// released.
    pub fn close(&self) {
        let Some(tx) = self.inner.tx.lock().take() else {
            return;
        };
        let _ = tx.send(Request::Close);
        drop(tx);
        if let Some(dispatcher) = self.dispatcher.lock().take() {
            dispatcher.abort();
        }
        let rejected = self.inner.defers.reject_all(|| Error::Closed);
        if rejected > 0 {
            tracing::debug!("Rejected {} pending requests on close", rejected);
        }
        self.inner.stopped.send_replace(true);
        self.inner.set_state(PlayerState::Closed);
        tracing::info!("Player closed");
    }
}

impl Drop for PlayerProxy {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.get_mut().take() {
            dispatcher.abort();
        }
    }
}
