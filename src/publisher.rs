//! Latest-frame slot shared between the pipeline and stream viewers.
//!
//! The slot holds an `Arc<Frame>`. Publishing builds the new `Arc` outside the
//! lock and only swaps the pointer inside it, so the writer holds the lock for a
//! pointer store and readers hold it for a refcount bump. A reader therefore gets
//! either the previous or the new frame, never a mix.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::frame::Frame;

/// A frame as published, with its publish sequence number (starting at 1).
#[derive(Clone, Debug)]
pub struct PublishedFrame {
    pub sequence: u64,
    pub frame: Arc<Frame>,
}

#[derive(Debug, Default)]
pub struct FramePublisher {
    slot: RwLock<Option<PublishedFrame>>,
    sequence: AtomicU64,
}

impl FramePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held frame. Returns the new sequence number.
    pub fn publish(&self, frame: Frame) -> u64 {
        let frame = Arc::new(frame);
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        let sequence = self.sequence.load(Ordering::SeqCst) + 1;
        *slot = Some(PublishedFrame { sequence, frame });
        self.sequence.store(sequence, Ordering::SeqCst);
        sequence
    }

    /// Most recently published frame, `None` before the first publish.
    pub fn snapshot(&self) -> Option<PublishedFrame> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sequence number of the latest publish (0 = nothing published yet).
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
