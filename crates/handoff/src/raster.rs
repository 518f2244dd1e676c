use std::sync::{Arc, Mutex, MutexGuard};

use crate::frame::RasterFrame;

#[derive(Debug, Default)]
struct Slot {
    frame: Option<Arc<RasterFrame>>,
    generation: u64,
    closed: bool,
}

/// Latest raster paint, shared between the paint callback and the renderer.
///
/// The slot is swapped under its lock and never mutated in place; readers
/// clone the `Arc` and release the lock immediately.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    slot: Mutex<Slot>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replaces the current frame. Returns the new generation, or the
    /// unchanged one when the buffer has been cleared for good.
    pub fn publish(&self, frame: RasterFrame) -> u64 {
        let frame = Arc::new(frame);
        let (previous, generation) = {
            let mut slot = self.lock();
            if slot.closed {
                return slot.generation;
            }
            slot.generation += 1;
            (slot.frame.replace(frame), slot.generation)
        };
        // The old frame may be the last reference; free it outside the lock.
        drop(previous);
        generation
    }

    /// Newest frame and its generation; the generation changes on every
    /// publish so consumers can skip redundant uploads.
    pub fn latest(&self) -> Option<(u64, Arc<RasterFrame>)> {
        let slot = self.lock();
        slot.frame.as_ref().map(|frame| (slot.generation, Arc::clone(frame)))
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Empties the slot and refuses every later publish.
    pub fn clear(&self) {
        let previous = {
            let mut slot = self.lock();
            slot.closed = true;
            slot.frame.take()
        };
        drop(previous);
    }
}
