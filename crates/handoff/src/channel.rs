//! Bounded handoff of GPU frames from the paint callback to the render loop.
//!
//! The producer is the browser engine's compositor thread and must never be
//! stalled indefinitely, so `offer` waits at most a bounded timeout and
//! drops the frame when the consumer is behind. The consumer is the host
//! render thread and never waits at all.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender, TryRecvError};

use crate::device::SharedResource;
use crate::frame::GpuFrame;

/// Default time the producer may block before a frame is dropped.
pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_millis(50);

/// Number of frames that may be in flight between producer and consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelCapacity {
    /// One frame in flight.
    #[default]
    Single,
    /// One frame being copied while another waits to be displayed.
    Double,
}

impl ChannelCapacity {
    pub fn frames(self) -> usize {
        match self {
            ChannelCapacity::Single => 1,
            ChannelCapacity::Double => 2,
        }
    }

    pub fn from_frames(frames: usize) -> Option<Self> {
        match frames {
            1 => Some(ChannelCapacity::Single),
            2 => Some(ChannelCapacity::Double),
            _ => None,
        }
    }
}

/// Result of handing a frame to the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    Enqueued,
    /// The consumer did not make room in time; the frame was disposed.
    Dropped,
    /// The channel is closed; the frame was disposed.
    Rejected,
}

/// Counter snapshot. Every offered frame ends up in exactly one of
/// `delivered`, `backpressure_drops`, `superseded`, `rejected`, `drained`,
/// or is still queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandoffStats {
    pub offered: u64,
    pub delivered: u64,
    pub backpressure_drops: u64,
    pub superseded: u64,
    pub rejected: u64,
    pub drained: u64,
}

impl HandoffStats {
    /// Frames accounted for so far, excluding those still queued.
    pub fn settled(&self) -> u64 {
        self.delivered + self.backpressure_drops + self.superseded + self.rejected + self.drained
    }
}

#[derive(Debug, Default)]
struct Counters {
    offered: AtomicU64,
    delivered: AtomicU64,
    backpressure_drops: AtomicU64,
    superseded: AtomicU64,
    rejected: AtomicU64,
    drained: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }
}

pub struct HandoffChannel<R> {
    sender: Sender<GpuFrame<R>>,
    receiver: Receiver<GpuFrame<R>>,
    capacity: ChannelCapacity,
    closed: AtomicBool,
    counters: Counters,
}

impl<R: SharedResource> HandoffChannel<R> {
    pub fn new(capacity: ChannelCapacity) -> Self {
        let (sender, receiver) = bounded(capacity.frames());
        Self {
            sender,
            receiver,
            capacity,
            closed: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    pub fn capacity(&self) -> ChannelCapacity {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Frames currently waiting for the consumer.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Hands a frame to the consumer, blocking for at most `timeout`.
    ///
    /// Producer ownership ends here on every path: the frame is either
    /// queued or disposed before this returns.
    pub fn offer(&self, frame: GpuFrame<R>, timeout: Duration) -> OfferOutcome {
        Counters::bump(&self.counters.offered);
        if self.is_closed() {
            Counters::bump(&self.counters.rejected);
            drop(frame);
            return OfferOutcome::Rejected;
        }

        match self.sender.send_timeout(frame, timeout) {
            Ok(()) => {
                // `close` may have drained between the check above and the
                // send; make sure nothing lingers in a closed channel.
                if self.is_closed() {
                    self.drain();
                }
                OfferOutcome::Enqueued
            }
            Err(SendTimeoutError::Timeout(frame)) => {
                Counters::bump(&self.counters.backpressure_drops);
                tracing::trace!(
                    handle = ?frame.handle(),
                    timeout_ms = timeout.as_millis() as u64,
                    "handoff channel full; dropping frame"
                );
                drop(frame);
                OfferOutcome::Dropped
            }
            Err(SendTimeoutError::Disconnected(frame)) => {
                Counters::bump(&self.counters.rejected);
                drop(frame);
                OfferOutcome::Rejected
            }
        }
    }

    /// Takes the newest ready frame without blocking.
    ///
    /// Older frames queued behind it are disposed as superseded.
    pub fn take_latest(&self) -> Option<GpuFrame<R>> {
        let mut latest = None;
        loop {
            match self.receiver.try_recv() {
                Ok(frame) => {
                    if let Some(stale) = latest.replace(frame) {
                        Counters::bump(&self.counters.superseded);
                        drop::<GpuFrame<R>>(stale);
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        if latest.is_some() {
            Counters::bump(&self.counters.delivered);
        }
        latest
    }

    /// Closes the channel and disposes queued frames. Returns how many were
    /// drained. Calling it again is harmless.
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        self.drain()
    }

    fn drain(&self) -> usize {
        let mut drained = 0;
        while let Ok(frame) = self.receiver.try_recv() {
            drop(frame);
            drained += 1;
        }
        Counters::add(&self.counters.drained, drained as u64);
        drained
    }

    pub fn stats(&self) -> HandoffStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        HandoffStats {
            offered: load(&self.counters.offered),
            delivered: load(&self.counters.delivered),
            backpressure_drops: load(&self.counters.backpressure_drops),
            superseded: load(&self.counters.superseded),
            rejected: load(&self.counters.rejected),
            drained: load(&self.counters.drained),
        }
    }
}

impl<R> Drop for HandoffChannel<R> {
    fn drop(&mut self) {
        // Queued frames are released by the receiver; make closure visible
        // to any diagnostics that still hold stats.
        self.closed.store(true, Ordering::Release);
    }
}
