//! Producer-side copy of the browser's shared texture into a transfer-owned
//! texture the host device can open after the callback returns.

use crate::color::{ColorPipeline, ColorSpace};
use crate::device::{ProducerDevice, ShareFlags, SharedHandle, SharedResource, TextureDesc};
use crate::error::HandoffError;
use crate::fence::{FenceTimeline, SourceFence};
use crate::frame::{GpuFrame, PixelFormat};

/// Arguments of the accelerated paint callback.
///
/// `handle` is only valid until the callback returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceleratedPaint {
    pub handle: SharedHandle,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub fence: Option<SourceFence>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NullHandle,
    EmptyExtent,
}

#[derive(Debug)]
pub enum RelayOutcome<R: SharedResource> {
    Copied(GpuFrame<R>),
    Skipped(SkipReason),
}

pub struct SharedTextureRelay<P: ProducerDevice> {
    device: P,
    timeline: Option<FenceTimeline>,
    host_space: ColorSpace,
}

impl<P: ProducerDevice> SharedTextureRelay<P> {
    /// `fenced` selects whether each copy is followed by a signal on the
    /// device's shared fence.
    pub fn new(device: P, host_space: ColorSpace, fenced: bool) -> Self {
        Self {
            device,
            timeline: fenced.then(FenceTimeline::new),
            host_space,
        }
    }

    pub fn is_fenced(&self) -> bool {
        self.timeline.is_some()
    }

    pub fn device(&self) -> &P {
        &self.device
    }

    /// Copies the engine texture and returns the transfer-owned copy.
    ///
    /// Copy, signal and flush are all issued before this returns, so a frame
    /// handed on from here never refers to work that was not submitted.
    pub fn relay(&mut self, paint: &AcceleratedPaint) -> Result<RelayOutcome<P::Resource>, HandoffError> {
        if paint.handle.is_null() {
            return Ok(RelayOutcome::Skipped(SkipReason::NullHandle));
        }
        if paint.width == 0 || paint.height == 0 {
            return Ok(RelayOutcome::Skipped(SkipReason::EmptyExtent));
        }

        let source = self.device.open_source(paint.handle)?;
        let described = self.device.describe(&source);
        if let Some(fence) = paint.fence {
            self.device.wait_source(fence)?;
        }

        let desc = TextureDesc {
            width: described.width,
            height: described.height,
            format: ColorPipeline::transfer_format(described.format, self.host_space),
        };
        let target = self.device.create_shared(&desc, ShareFlags::SHARED)?;
        self.device.copy(&source, &target)?;
        drop(source);

        let fence = match self.timeline.as_mut() {
            Some(timeline) => {
                let value = timeline.advance();
                self.device.signal(value)?;
                Some(value)
            }
            None => None,
        };
        self.device.flush()?;

        tracing::trace!(
            handle = ?paint.handle,
            width = desc.width,
            height = desc.height,
            format = %desc.format,
            fence = ?fence,
            "relayed accelerated paint"
        );
        Ok(RelayOutcome::Copied(GpuFrame::new(target, fence)))
    }
}
