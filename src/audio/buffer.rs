//! Transferable buffers and the lock-free block ring
//!
//! [`Transfer`] models a buffer whose ownership moves across a channel
//! boundary. Moving it into a message consumes it at compile time; when the
//! caller only holds `&mut`, [`Transfer::detach`] takes the contents and
//! leaves a detached, empty sentinel behind so later reads see nothing.

use std::fmt;

use crossbeam::queue::ArrayQueue;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::ProtocolError;

/// Move-only buffer handed across a channel
pub struct Transfer<T = u8> {
    data: Vec<T>,
    detached: bool,
}

impl<T> Transfer<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self {
            data,
            detached: false,
        }
    }

    /// Take the contents, leaving this handle detached
    pub fn detach(&mut self) -> Transfer<T> {
        let data = std::mem::take(&mut self.data);
        self.detached = true;
        Transfer::new(data)
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// Length in elements; a detached buffer reports 0
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }
}

impl<T: Clone> Transfer<T> {
    /// Fresh buffer holding a copy of `data`
    pub fn copy_of(data: &[T]) -> Self {
        Self::new(data.to_vec())
    }

    /// Copy the contents into a new buffer, leaving this one usable
    pub fn try_copy(&self) -> Result<Self, ProtocolError> {
        if self.detached {
            return Err(ProtocolError::Detached);
        }
        Ok(Self::copy_of(&self.data))
    }
}

impl<T: Clone + Default> Transfer<T> {
    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![T::default(); len])
    }
}

impl<T> From<Vec<T>> for Transfer<T> {
    fn from(data: Vec<T>) -> Self {
        Self::new(data)
    }
}

impl<T> fmt::Debug for Transfer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("len", &self.data.len())
            .field("detached", &self.detached)
            .finish()
    }
}

impl<T: Serialize> Serialize for Transfer<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.data.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Transfer<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<T>::deserialize(deserializer).map(Transfer::new)
    }
}

/// Left/right sample planes exchanged on the render channel
pub type Planes = [Transfer<f32>; 2];

/// Allocate a silent plane pair of `frames` samples each
pub fn planes(frames: usize) -> Planes {
    [Transfer::zeroed(frames), Transfer::zeroed(frames)]
}

/// Lock-free ring of rendered blocks
pub struct BlockRing {
    queue: ArrayQueue<Planes>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl BlockRing {
    /// Create a new ring with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push a block; hands it back if the ring is full
    pub fn push(&self, block: Planes) -> Result<(), Planes> {
        self.queue.push(block).map_err(|block| {
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
            block
        })
    }

    /// Pop a block, counting an underrun when empty
    pub fn pop(&self) -> Option<Planes> {
        let block = self.queue.pop();
        if block.is_none() {
            self.underrun_count.fetch_add(1, Ordering::Relaxed);
        }
        block
    }

    /// Pop without counting underrun
    pub fn try_pop(&self) -> Option<Planes> {
        self.queue.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }

    /// Get fill level as a fraction of capacity
    pub fn fill_level(&self) -> f32 {
        self.len() as f32 / self.capacity() as f32
    }
}
