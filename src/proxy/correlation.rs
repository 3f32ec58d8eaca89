//! Outstanding request table
//!
//! Entries are keyed by the exact `(id, kind)` pair and matched by identity,
//! never by arrival position. The list is scanned linearly; only a handful of
//! control requests are ever in flight at once.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::protocol::{ReplyKind, ReplyPayload};

struct Pending {
    id: u32,
    kind: ReplyKind,
    resolver: oneshot::Sender<Result<ReplyPayload>>,
}

/// Pending correlated requests awaiting a reply
#[derive(Default)]
pub struct CorrelationTable {
    pending: Mutex<Vec<Pending>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `(id, kind)` and get the future its reply settles
    pub fn register(&self, id: u32, kind: ReplyKind) -> PendingReply {
        let (resolver, rx) = oneshot::channel();
        self.pending.lock().push(Pending { id, kind, resolver });
        PendingReply { id, kind, rx }
    }

    /// Settle the first entry matching `(id, kind)`; returns false when nothing matched
    pub fn resolve(&self, id: u32, kind: ReplyKind, outcome: Result<ReplyPayload>) -> bool {
        let entry = {
            let mut pending = self.pending.lock();
            match pending.iter().position(|p| p.id == id && p.kind == kind) {
                Some(index) => pending.remove(index),
                None => return false,
            }
        };
        // The waiter may have been dropped; the entry is consumed either way
        let _ = entry.resolver.send(outcome);
        true
    }

    /// Drop an entry without settling it
    pub fn cancel(&self, id: u32, kind: ReplyKind) -> bool {
        let mut pending = self.pending.lock();
        match pending.iter().position(|p| p.id == id && p.kind == kind) {
            Some(index) => {
                pending.remove(index);
                true
            }
            None => false,
        }
    }

    /// Reject every outstanding entry; returns how many were rejected
    pub fn reject_all(&self, reason: impl Fn() -> Error) -> usize {
        let drained: Vec<Pending> = std::mem::take(&mut *self.pending.lock());
        let count = drained.len();
        for entry in drained {
            let _ = entry.resolver.send(Err(reason()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

/// Future settled by the matching reply
#[derive(Debug)]
pub struct PendingReply {
    id: u32,
    kind: ReplyKind,
    rx: oneshot::Receiver<Result<ReplyPayload>>,
}

impl PendingReply {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn kind(&self) -> ReplyKind {
        self.kind
    }
}

impl Future for PendingReply {
    type Output = Result<ReplyPayload>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::ChannelClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}
