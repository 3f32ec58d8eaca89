//! Entangled message ports
//!
//! A [`Port`] is one end of a bidirectional, in-order message pipe. Messages
//! are moved into the channel, so anything posted (including transferred
//! buffers) is owned by the receiving side from that point on.

use std::fmt;

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

/// Returned when the other end of a port has been dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

impl fmt::Display for Disconnected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("port disconnected")
    }
}

impl std::error::Error for Disconnected {}

/// One endpoint of a message channel: posts `S`, receives `R`
pub struct Port<S, R> {
    tx: UnboundedSender<S>,
    rx: UnboundedReceiver<R>,
}

/// Create two entangled ports
pub fn port_pair<A, B>() -> (Port<A, B>, Port<B, A>) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        Port { tx: a_tx, rx: b_rx },
        Port { tx: b_tx, rx: a_rx },
    )
}

impl<S, R> Port<S, R> {
    /// Post a message without blocking
    pub fn post(&self, msg: S) -> Result<(), Disconnected> {
        self.tx.send(msg).map_err(|_| Disconnected)
    }

    /// Wait for the next message; `None` once the other side is gone
    pub async fn recv(&mut self) -> Option<R> {
        self.rx.recv().await
    }

    /// Poll for a message without waiting (safe to call from an audio callback)
    pub fn try_recv(&mut self) -> Result<Option<R>, Disconnected> {
        match self.rx.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Disconnected),
        }
    }

    /// Whether the receiving side of the other end has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Separate the sending and receiving halves
    pub fn split(self) -> (UnboundedSender<S>, UnboundedReceiver<R>) {
        (self.tx, self.rx)
    }
}

impl<S, R> fmt::Debug for Port<S, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}
