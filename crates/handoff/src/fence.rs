use std::fmt;

/// A point on a shared GPU fence's monotonic counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FenceValue(pub u64);

impl FenceValue {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FenceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Producer-side counter for the fence shared with the host device.
///
/// Values start at 1 so that a freshly created fence (which reads 0) is
/// never mistaken for a completed copy.
#[derive(Debug, Default)]
pub struct FenceTimeline {
    last: u64,
}

impl FenceTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the next value. A reserved value is never handed out twice,
    /// even if signalling it fails.
    pub fn advance(&mut self) -> FenceValue {
        self.last = self.last.saturating_add(1);
        FenceValue(self.last)
    }

    pub fn last(&self) -> Option<FenceValue> {
        (self.last > 0).then_some(FenceValue(self.last))
    }
}

/// Fence attached by the browser engine to a shared texture.
///
/// When present, the engine's compositor may still be writing the source
/// texture; the producer device must wait for `value` on its own queue
/// before copying from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFence {
    pub handle: crate::device::SharedHandle,
    pub value: FenceValue,
}
