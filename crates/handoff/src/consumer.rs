//! Render-thread side of the handoff: binds the newest frame as a host
//! surface and keeps it bound until something newer arrives.

use crate::channel::HandoffChannel;
use crate::color::ColorSpace;
use crate::device::{HostDevice, SharedResource};
use crate::diagnostics::DiagnosticsSink;
use crate::error::HandoffError;
use crate::frame::{GpuFrame, PixelFormat};
use crate::quirks::ResourceOpenPath;
use crate::raster::FrameBuffer;

/// Where the surface being drawn came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameSource {
    SharedTexture,
    Raster,
}

/// Result of one acquire step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    Surface(FrameSource),
    Nothing,
    DeviceLost,
}

// Field order matters: the host surface is released before the producer
// resource it was opened from.
struct Bound<S, R> {
    surface: S,
    frame: GpuFrame<R>,
    /// Raster generation current when the frame was bound; a later raster
    /// paint supersedes it.
    raster_generation: u64,
}

struct RasterSurface<S> {
    generation: u64,
    surface: S,
}

pub struct FrameConsumer<H: HostDevice, R> {
    open_path: ResourceOpenPath,
    color_space: ColorSpace,
    bound: Option<Bound<H::Surface, R>>,
    raster: Option<RasterSurface<H::Surface>>,
    lost: bool,
}

impl<H: HostDevice, R: SharedResource> FrameConsumer<H, R> {
    pub fn new(host: &H) -> Self {
        let open_path = ResourceOpenPath::detect(host.capabilities(), host.runtime_version());
        tracing::debug!(
            ?open_path,
            runtime = %host.runtime_version(),
            "selected shared resource open path"
        );
        Self {
            open_path,
            color_space: host.color_space(),
            bound: None,
            raster: None,
            lost: false,
        }
    }

    pub fn open_path(&self) -> ResourceOpenPath {
        self.open_path
    }

    pub fn is_lost(&self) -> bool {
        self.lost
    }

    /// Raster uploads are typed so that the sampler decodes sRGB whenever the
    /// host pipeline is linear.
    pub fn raster_format(&self) -> PixelFormat {
        match self.color_space {
            ColorSpace::Linear => PixelFormat::Bgra8UnormSrgb,
            ColorSpace::Gamma => PixelFormat::Bgra8Unorm,
        }
    }

    /// Brings the bound surface up to date without blocking.
    ///
    /// Transient failures are reported and leave the previous surface bound.
    /// Device loss releases everything and latches the consumer.
    pub fn acquire(
        &mut self,
        host: &mut H,
        channel: &HandoffChannel<R>,
        raster: &FrameBuffer,
        diagnostics: &dyn DiagnosticsSink,
    ) -> Acquired {
        if self.lost {
            return Acquired::DeviceLost;
        }

        if let Some(frame) = channel.take_latest() {
            if let Err(err) = self.bind(host, frame, raster.generation()) {
                return self.fail(err, diagnostics);
            }
        }

        let raster_newer = self
            .bound
            .as_ref()
            .map_or(true, |bound| raster.generation() > bound.raster_generation);
        if raster_newer {
            if let Err(err) = self.refresh_raster(host, raster) {
                return self.fail(err, diagnostics);
            }
            let superseded = matches!(
                (&self.bound, &self.raster),
                (Some(bound), Some(current)) if current.generation > bound.raster_generation
            );
            if superseded {
                self.drop_shared("raster paint");
            }
        }

        match self.current() {
            Some((_, source)) => Acquired::Surface(source),
            None => Acquired::Nothing,
        }
    }

    /// The surface to draw: the bound shared texture, else the raster copy.
    pub fn current(&self) -> Option<(&H::Surface, FrameSource)> {
        if let Some(bound) = &self.bound {
            return Some((&bound.surface, FrameSource::SharedTexture));
        }
        self.raster
            .as_ref()
            .map(|raster| (&raster.surface, FrameSource::Raster))
    }

    /// Releases the bound shared frame, if any, so the raster copy is drawn
    /// instead. Used when the producer device is gone.
    pub fn release_shared(&mut self) {
        self.drop_shared("producer lost");
    }

    fn drop_shared(&mut self, reason: &'static str) {
        if let Some(bound) = self.bound.take() {
            tracing::debug!(handle = ?bound.frame.handle(), reason, "released shared frame");
        }
    }

    fn bind(
        &mut self,
        host: &mut H,
        frame: GpuFrame<R>,
        raster_generation: u64,
    ) -> Result<(), HandoffError> {
        let desc = frame.desc();
        let surface = self.open_path.open(host, frame.handle(), &desc)?;
        if let Some(value) = frame.fence() {
            // Queued on the sampling device ahead of any draw that uses the
            // surface; the CPU does not wait here.
            host.wait_fence(value)?;
        }
        tracing::trace!(handle = ?frame.handle(), fence = ?frame.fence(), "bound shared frame");
        self.bound = Some(Bound {
            surface,
            frame,
            raster_generation,
        });
        Ok(())
    }

    fn refresh_raster(&mut self, host: &mut H, raster: &FrameBuffer) -> Result<(), HandoffError> {
        let Some((generation, frame)) = raster.latest() else {
            return Ok(());
        };
        if self
            .raster
            .as_ref()
            .is_some_and(|current| current.generation == generation)
        {
            return Ok(());
        }
        let surface = host.upload_raster(&frame, self.raster_format())?;
        self.raster = Some(RasterSurface {
            generation,
            surface,
        });
        Ok(())
    }

    /// Handles an error raised while using the host device.
    pub fn fail(&mut self, err: HandoffError, diagnostics: &dyn DiagnosticsSink) -> Acquired {
        diagnostics.report(&err);
        if err.is_device_loss() {
            self.release();
            self.lost = true;
            return Acquired::DeviceLost;
        }
        match self.current() {
            Some((_, source)) => Acquired::Surface(source),
            None => Acquired::Nothing,
        }
    }

    /// Drops every host surface and the frame backing the bound one.
    pub fn release(&mut self) {
        self.bound = None;
        self.raster = None;
    }
}
