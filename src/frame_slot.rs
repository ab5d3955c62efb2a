//! Single-slot, latest-wins exchange between the stream reader and the
//! frame processor.
//!
//! The reader never waits on the processor: `publish` replaces whatever is
//! pending. The processor always gets the newest frame and never sees the
//! ones that were overwritten in between.

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

/// One complete encoded JPEG as cut out of the stream.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Bytes,
    /// Reader-side frame counter
    pub index: u64,
}

impl RawFrame {
    pub fn new(data: Bytes, index: u64) -> Self {
        Self { data, index }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SlotStats {
    pub published: u64,
    pub dropped: u64,
    pub taken: u64,
}

pub struct LatestFrameSlot {
    slot: Mutex<Option<RawFrame>>,
    notify: Notify,
    published: AtomicU64,
    dropped: AtomicU64,
    taken: AtomicU64,
}

impl LatestFrameSlot {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            taken: AtomicU64::new(0),
        }
    }

    /// Store `frame`, discarding any frame that was not taken yet.
    pub fn publish(&self, frame: RawFrame) {
        let previous = self.slot.lock().replace(frame);
        if previous.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.published.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
    }

    /// Wait for a frame published since the last take and return the newest.
    pub async fn take_latest(&self) -> RawFrame {
        loop {
            let notified = self.notify.notified();
            if let Some(frame) = self.try_take() {
                return frame;
            }
            notified.await;
        }
    }

    pub fn try_take(&self) -> Option<RawFrame> {
        let frame = self.slot.lock().take();
        if frame.is_some() {
            self.taken.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    /// Drop a pending frame without consuming it. Returns true if one was pending.
    pub fn clear(&self) -> bool {
        let had = self.slot.lock().take().is_some();
        if had {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        had
    }

    pub fn is_pending(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub fn stats(&self) -> SlotStats {
        SlotStats {
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            taken: self.taken.load(Ordering::Relaxed),
        }
    }
}

impl Default for LatestFrameSlot {
    fn default() -> Self {
        Self::new()
    }
}
