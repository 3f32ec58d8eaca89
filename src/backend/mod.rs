//! Remote execution context
//!
//! A backend accepts `initialize` handshakes, each carrying the remote end of
//! a fresh control channel, and runs one [`session`] per connection on its own
//! thread. Backends launched with sharing enabled are registered by locator
//! and reused by later players.

pub mod engine;
pub mod session;
pub mod tone;

use std::sync::{Arc, LazyLock};
use std::thread;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinSet;

use crate::error::{Error, Result};
use crate::protocol::Initialize;

pub use engine::SynthEngine;
pub use tone::ToneEngine;

/// Connection handle to a running backend
#[derive(Debug, Clone)]
pub struct Backend {
    locator: Arc<str>,
    tx: UnboundedSender<Initialize>,
}

impl Backend {
    /// Create a backend handle plus the receiver its connections arrive on
    pub fn channel(locator: &str) -> (Self, UnboundedReceiver<Initialize>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                locator: Arc::from(locator),
                tx,
            },
            rx,
        )
    }

    /// Hand a handshake (and the control endpoint inside it) to the backend
    pub fn connect(&self, init: Initialize) -> Result<()> {
        self.tx
            .send(init)
            .map_err(|_| Error::Backend(format!("backend '{}' is not running", self.locator)))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }
}

/// Knows how to bring a backend up
pub trait BackendLauncher: Send + Sync {
    /// Key under which shared backends are registered
    fn locator(&self) -> &str;

    fn launch(&self) -> Result<Backend>;
}

/// Runs sessions for engines built by `factory` on a dedicated thread
pub struct EngineBackend<F> {
    locator: String,
    factory: Arc<F>,
}

impl<F, E> EngineBackend<F>
where
    F: Fn() -> E + Send + Sync + 'static,
    E: SynthEngine,
{
    pub fn new(locator: impl Into<String>, factory: F) -> Self {
        Self {
            locator: locator.into(),
            factory: Arc::new(factory),
        }
    }
}

impl<F, E> BackendLauncher for EngineBackend<F>
where
    F: Fn() -> E + Send + Sync + 'static,
    E: SynthEngine,
{
    fn locator(&self) -> &str {
        &self.locator
    }

    fn launch(&self) -> Result<Backend> {
        let (backend, mut connections) = Backend::channel(&self.locator);
        let factory = self.factory.clone();
        let name = self.locator.clone();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;

        thread::Builder::new()
            .name(format!("synth-backend-{}", self.locator))
            .spawn(move || {
                runtime.block_on(async move {
                    let mut sessions = JoinSet::new();
                    loop {
                        tokio::select! {
                            init = connections.recv() => {
                                let Some(init) = init else { break };
                                tracing::debug!("Backend '{}' accepted a connection", name);
                                sessions.spawn(session::run(factory(), init));
                            }
                            Some(done) = sessions.join_next() => {
                                if let Err(e) = done {
                                    tracing::error!("Backend session failed: {}", e);
                                }
                            }
                        }
                    }
                    while let Some(done) = sessions.join_next().await {
                        if let Err(e) = done {
                            tracing::error!("Backend session failed: {}", e);
                        }
                    }
                    tracing::info!("Backend '{}' shut down", name);
                });
            })
            .map_err(|e| Error::Backend(e.to_string()))?;

        tracing::info!("Launched backend '{}'", self.locator);
        Ok(backend)
    }
}

static SHARED: LazyLock<DashMap<String, Backend>> = LazyLock::new(DashMap::new);

/// Get a backend for `launcher`; the flag is `true` when it was freshly launched
pub(crate) fn acquire(launcher: &dyn BackendLauncher, share: bool) -> Result<(Backend, bool)> {
    if !share {
        return Ok((launcher.launch()?, true));
    }
    match SHARED.entry(launcher.locator().to_string()) {
        Entry::Occupied(mut entry) => {
            if entry.get().is_closed() {
                tracing::debug!("Shared backend '{}' is gone, relaunching", launcher.locator());
                let backend = launcher.launch()?;
                entry.insert(backend.clone());
                Ok((backend, true))
            } else {
                Ok((entry.get().clone(), false))
            }
        }
        Entry::Vacant(entry) => {
            let backend = launcher.launch()?;
            entry.insert(backend.clone());
            Ok((backend, true))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counting {
        locator: String,
        launches: parking_lot::Mutex<usize>,
        connections: parking_lot::Mutex<Vec<UnboundedReceiver<Initialize>>>,
    }

    impl BackendLauncher for Counting {
        fn locator(&self) -> &str {
            &self.locator
        }

        fn launch(&self) -> Result<Backend> {
            *self.launches.lock() += 1;
            let (backend, rx) = Backend::channel(&self.locator);
            self.connections.lock().push(rx);
            Ok(backend)
        }
    }

    #[test]
    fn test_shared_backend_is_reused() {
        let launcher = Counting {
            locator: "test-shared-reuse".into(),
            ..Default::default()
        };
        let (_, fresh) = acquire(&launcher, true).unwrap();
        assert!(fresh);
        let (backend, fresh) = acquire(&launcher, true).unwrap();
        assert!(!fresh);
        assert_eq!(backend.locator(), "test-shared-reuse");
        assert_eq!(*launcher.launches.lock(), 1);
    }

    #[test]
    fn test_unshared_always_launches() {
        let launcher = Counting {
            locator: "test-unshared".into(),
            ..Default::default()
        };
        assert!(acquire(&launcher, false).unwrap().1);
        assert!(acquire(&launcher, false).unwrap().1);
        assert_eq!(*launcher.launches.lock(), 2);
    }

    #[test]
    fn test_connect_fails_when_backend_gone() {
        let (backend, rx) = Backend::channel("gone");
        drop(rx);
        assert!(backend.is_closed());
        assert!(matches!(
            backend.connect(Initialize::default()),
            Err(Error::Backend(_))
        ));
    }

    #[test]
    fn test_shared_backend_relaunched_when_closed() {
        let launcher = Counting {
            locator: "test-shared-relaunch".into(),
            ..Default::default()
        };
        acquire(&launcher, true).unwrap();
        launcher.connections.lock().clear();
        let (backend, fresh) = acquire(&launcher, true).unwrap();
        assert!(fresh);
        assert!(!backend.is_closed());
        assert_eq!(*launcher.launches.lock(), 2);
    }

    #[test]
    fn test_engine_backend_launches_thread() {
        let launcher = EngineBackend::new("test-engine", ToneEngine::new);
        let backend = launcher.launch().unwrap();
        assert!(!backend.is_closed());
        assert_eq!(launcher.locator(), "test-engine");
    }
}
