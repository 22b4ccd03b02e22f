//! Per-feed frame buffer.
//!
//! A queue with one producer (the capture loop) and one consumer (the reader).
//! Neither side ever blocks. When the queue is full the producer evicts the
//! oldest frame through its own receiver handle, so survivors keep their
//! arrival order.

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

use crate::frame::Frame;

/// Buffer sizing. `Unbounded` never evicts and is only valid for finite sources.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferCapacity {
    Bounded(NonZeroUsize),
    Unbounded,
}

impl BufferCapacity {
    pub fn frames(n: usize) -> Option<Self> {
        NonZeroUsize::new(n).map(Self::Bounded)
    }

    pub fn limit(&self) -> Option<usize> {
        match self {
            Self::Bounded(n) => Some(n.get()),
            Self::Unbounded => None,
        }
    }
}

pub struct FrameBuffer {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
    capacity: BufferCapacity,
}

impl FrameBuffer {
    pub fn new(capacity: BufferCapacity) -> Self {
        let (tx, rx) = match capacity {
            BufferCapacity::Bounded(n) => crossbeam_channel::bounded(n.get()),
            BufferCapacity::Unbounded => crossbeam_channel::unbounded(),
        };
        Self { tx, rx, capacity }
    }

    /// Enqueue a frame, evicting the oldest one if the buffer is full.
    ///
    /// Returns `true` if a frame was evicted to make room.
    pub fn push(&self, frame: Frame) -> bool {
        self.push_with(frame, || {})
    }

    /// `push`, running `on_full` each time the queue is found full.
    fn push_with(&self, frame: Frame, mut on_full: impl FnMut()) -> bool {
        let mut pending = frame;
        let mut evicted = false;
        let mut retried = false;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => return evicted,
                Err(TrySendError::Full(frame)) => {
                    pending = frame;
                    on_full();
                    // The reader may have freed a slot since; evict only if it is still full.
                    if !retried {
                        retried = true;
                        continue;
                    }
                    if self.rx.try_recv().is_ok() {
                        evicted = true;
                    }
                }
                // Both ends live in `self`, so the channel cannot disconnect.
                Err(TrySendError::Disconnected(_)) => return evicted,
            }
        }
    }

    /// Next frame in arrival order, or `None` when empty.
    pub fn pop_if_available(&self) -> Option<Frame> {
        match self.rx.try_recv() {
            Ok(frame) => Some(frame),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn occupancy(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Drop every buffered frame. Returns how many were discarded.
    pub fn clear(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub fn capacity(&self) -> BufferCapacity {
        self.capacity
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
