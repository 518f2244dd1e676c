//! Wiring between the browser's paint callbacks and the host render loop.
//!
//! [`connect`] probes both devices once, picks a [`PaintPath`], and returns
//! the two halves: a [`PaintSink`] that is cloned into the engine's paint
//! callbacks and a [`Presenter`] owned by the render thread.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::channel::{ChannelCapacity, HandoffChannel, HandoffStats, OfferOutcome, DEFAULT_ENQUEUE_TIMEOUT};
use crate::color::{ColorPipeline, ColorSpace, DrawPass, SurfaceOrigin};
use crate::consumer::{Acquired, FrameConsumer, FrameSource};
use crate::device::{DeviceCapabilities, HostDevice, ProducerDevice};
use crate::diagnostics::DiagnosticsSink;
use crate::error::HandoffError;
use crate::frame::RasterFrame;
use crate::raster::FrameBuffer;
use crate::relay::{AcceleratedPaint, RelayOutcome, SharedTextureRelay};
use crate::size::{BrowserHost, SizeCoordinator, SizeMode, Viewport};

/// How browser frames reach the host, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaintPath {
    /// CPU buffers uploaded by the host; accelerated paints are ignored.
    RasterOnly,
    /// Shared textures, ordered by the producer's flush only.
    SharedTexture,
    /// Shared textures with a producer signal and host GPU-side wait.
    FencedSharedTexture,
}

impl PaintPath {
    pub fn probe(producer: DeviceCapabilities, host: DeviceCapabilities, wants_fences: bool) -> Self {
        if !(producer.shared_resources && host.shared_resources) {
            PaintPath::RasterOnly
        } else if wants_fences && producer.shared_fences && host.shared_fences {
            PaintPath::FencedSharedTexture
        } else {
            PaintPath::SharedTexture
        }
    }

    pub fn accepts_accelerated(self) -> bool {
        !matches!(self, PaintPath::RasterOnly)
    }

    pub fn is_fenced(self) -> bool {
        matches!(self, PaintPath::FencedSharedTexture)
    }
}

impl fmt::Display for PaintPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PaintPath::RasterOnly => "raster",
            PaintPath::SharedTexture => "shared-texture",
            PaintPath::FencedSharedTexture => "fenced-shared-texture",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PresenterOptions {
    pub capacity: ChannelCapacity,
    pub enqueue_timeout: Duration,
    pub use_fences: bool,
    /// Row order the host sampler must assume for browser surfaces.
    pub origin: SurfaceOrigin,
    pub size_mode: SizeMode,
    pub scale_factor: f32,
}

impl Default for PresenterOptions {
    fn default() -> Self {
        Self {
            capacity: ChannelCapacity::Single,
            enqueue_timeout: DEFAULT_ENQUEUE_TIMEOUT,
            use_fences: true,
            origin: SurfaceOrigin::TopLeft,
            size_mode: SizeMode::RenderView,
            scale_factor: 1.0,
        }
    }
}

/// Counters for both paint paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineStats {
    pub handoff: HandoffStats,
    /// Raster paints published so far.
    pub raster_frames: u64,
    /// Accelerated paints ignored because the path is raster only or the
    /// producer device is gone.
    pub accelerated_ignored: u64,
}

struct Shared<P: ProducerDevice> {
    path: PaintPath,
    channel: HandoffChannel<P::Resource>,
    raster: FrameBuffer,
    relay: Mutex<Option<SharedTextureRelay<P>>>,
    enqueue_timeout: Duration,
    diagnostics: Arc<dyn DiagnosticsSink>,
    accelerated_ignored: AtomicU64,
    producer_lost: AtomicBool,
    disposed: AtomicBool,
}

impl<P: ProducerDevice> Shared<P> {
    fn relay(&self) -> MutexGuard<'_, Option<SharedTextureRelay<P>>> {
        self.relay.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn accelerated(&self, paint: AcceleratedPaint) -> Result<(), HandoffError> {
        let mut relay = self.relay();
        let Some(active) = relay.as_mut() else {
            self.accelerated_ignored.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        };

        match active.relay(&paint) {
            Ok(RelayOutcome::Copied(frame)) => {
                // Release the device before a potentially blocking offer so
                // teardown is never held up behind it.
                drop(relay);
                if self.channel.offer(frame, self.enqueue_timeout) == OfferOutcome::Rejected {
                    tracing::trace!("accelerated paint after close; frame released");
                }
                Ok(())
            }
            Ok(RelayOutcome::Skipped(reason)) => {
                tracing::trace!(?reason, "accelerated paint skipped");
                Ok(())
            }
            Err(err) => {
                if err.is_device_loss() {
                    let device = relay.take();
                    drop(relay);
                    self.producer_lost.store(true, Ordering::Release);
                    self.channel.close();
                    drop(device);
                }
                Err(err)
            }
        }
    }

    fn stats(&self) -> PipelineStats {
        PipelineStats {
            handoff: self.channel.stats(),
            raster_frames: self.raster.generation(),
            accelerated_ignored: self.accelerated_ignored.load(Ordering::Relaxed),
        }
    }
}

/// Producer-side entry points, safe to call from any engine thread.
///
/// Nothing escapes these calls: errors and panics are reported to the
/// diagnostics sink and the paint is dropped.
pub struct PaintSink<P: ProducerDevice> {
    shared: Arc<Shared<P>>,
}

impl<P: ProducerDevice> Clone for PaintSink<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P: ProducerDevice> PaintSink<P> {
    /// `buffer` is only borrowed for the duration of the call.
    pub fn on_raster_paint(&self, buffer: &[u8], width: u32, height: u32) {
        self.guarded(|| {
            if self.shared.disposed.load(Ordering::Acquire) {
                return Ok(());
            }
            let frame = RasterFrame::copy_from(buffer, width, height)?;
            self.shared.raster.publish(frame);
            Ok(())
        });
    }

    pub fn on_accelerated_paint(&self, paint: AcceleratedPaint) {
        if !self.shared.path.accepts_accelerated() {
            self.shared.accelerated_ignored.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.guarded(|| self.shared.accelerated(paint));
    }

    pub fn paint_path(&self) -> PaintPath {
        self.shared.path
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.stats()
    }

    fn guarded(&self, paint: impl FnOnce() -> Result<(), HandoffError>) {
        let err = match panic::catch_unwind(AssertUnwindSafe(paint)) {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err,
            Err(payload) => HandoffError::CallbackPanic(panic_message(payload.as_ref())),
        };
        self.shared.diagnostics.report(&err);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Presented { source: FrameSource, pass: DrawPass },
    /// Nothing has been painted yet.
    NoFrame,
    /// The draw failed transiently; try again next frame.
    Skipped,
    /// The host device is gone; the presenter must be rebuilt.
    DeviceLost,
    Disposed,
}

/// Host-side half, owned by the render thread.
pub struct Presenter<H: HostDevice, P: ProducerDevice> {
    shared: Arc<Shared<P>>,
    consumer: FrameConsumer<H, P::Resource>,
    size: SizeCoordinator,
    browser: Box<dyn BrowserHost>,
    color_space: ColorSpace,
    origin: SurfaceOrigin,
    disposed: bool,
}

/// Builds the producer and host halves of the pipeline.
///
/// `producer` is `None` when the embedding only receives raster paints.
pub fn connect<P, H>(
    producer: Option<P>,
    host: &mut H,
    browser: Box<dyn BrowserHost>,
    options: PresenterOptions,
    diagnostics: Arc<dyn DiagnosticsSink>,
) -> (PaintSink<P>, Presenter<H, P>)
where
    P: ProducerDevice,
    H: HostDevice,
{
    let producer_caps = producer
        .as_ref()
        .map(ProducerDevice::capabilities)
        .unwrap_or(DeviceCapabilities::NONE);
    let mut path = PaintPath::probe(producer_caps, host.capabilities(), options.use_fences);

    if path.is_fenced() {
        let opened = match producer.as_ref().and_then(ProducerDevice::fence_handle) {
            Some(handle) => host.open_fence(handle).map_err(HandoffError::from),
            None => Err(HandoffError::Configuration("producer exposes no shared fence".into())),
        };
        if let Err(err) = opened {
            diagnostics.report(&HandoffError::Configuration(format!(
                "falling back to unfenced shared textures: {err}"
            )));
            path = PaintPath::SharedTexture;
        }
    }
    if path == PaintPath::RasterOnly && producer.is_some() {
        diagnostics.report(&HandoffError::Configuration(
            "devices cannot share textures".into(),
        ));
    }

    let color_space = host.color_space();
    let relay = match path {
        PaintPath::RasterOnly => None,
        _ => producer.map(|device| SharedTextureRelay::new(device, color_space, path.is_fenced())),
    };
    tracing::info!(
        %path,
        %color_space,
        capacity = options.capacity.frames(),
        timeout_ms = options.enqueue_timeout.as_millis() as u64,
        "browser frame handoff connected"
    );

    let shared = Arc::new(Shared {
        path,
        channel: HandoffChannel::new(options.capacity),
        raster: FrameBuffer::new(),
        relay: Mutex::new(relay),
        enqueue_timeout: options.enqueue_timeout,
        diagnostics,
        accelerated_ignored: AtomicU64::new(0),
        producer_lost: AtomicBool::new(false),
        disposed: AtomicBool::new(false),
    });
    let presenter = Presenter {
        shared: Arc::clone(&shared),
        consumer: FrameConsumer::new(host),
        size: SizeCoordinator::new(options.size_mode, options.scale_factor),
        browser,
        color_space,
        origin: options.origin,
        disposed: false,
    };
    (PaintSink { shared }, presenter)
}

impl<H: HostDevice, P: ProducerDevice> Presenter<H, P> {
    /// Draws the newest available frame into `target`. Safe to call every
    /// host frame; never blocks on the producer.
    pub fn render(&mut self, host: &mut H, target: &H::Target, viewport: Viewport) -> RenderOutcome {
        if self.disposed {
            return RenderOutcome::Disposed;
        }
        self.size.update(viewport, self.browser.as_mut());
        if self.shared.producer_lost.load(Ordering::Acquire) {
            // Frames from the lost producer cannot be trusted; fall back to
            // raster paints or nothing.
            self.consumer.release_shared();
        }

        let diagnostics = self.shared.diagnostics.as_ref();
        match self
            .consumer
            .acquire(host, &self.shared.channel, &self.shared.raster, diagnostics)
        {
            Acquired::DeviceLost => return self.device_lost(),
            Acquired::Nothing => return RenderOutcome::NoFrame,
            Acquired::Surface(_) => {}
        }

        let Some((surface, source)) = self.consumer.current() else {
            return RenderOutcome::NoFrame;
        };
        let pass = ColorPipeline::draw_pass(host.surface_format(surface), self.color_space, self.origin);
        let drawn = host.draw(surface, target, &pass);

        match drawn {
            Ok(()) => RenderOutcome::Presented { source, pass },
            Err(err) => match self.consumer.fail(err.into(), diagnostics) {
                Acquired::DeviceLost => self.device_lost(),
                _ => RenderOutcome::Skipped,
            },
        }
    }

    fn device_lost(&mut self) -> RenderOutcome {
        if !self.shared.channel.is_closed() {
            self.shared.channel.close();
        }
        RenderOutcome::DeviceLost
    }

    pub fn set_scale_factor(&mut self, scale_factor: f32) {
        self.size.set_scale_factor(scale_factor);
    }

    pub fn size(&self) -> &SizeCoordinator {
        &self.size
    }

    pub fn paint_path(&self) -> PaintPath {
        self.shared.path
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.stats()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Tears the pipeline down: close the channel, drain it, drop host
    /// surfaces, then release the producer device. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.shared.disposed.store(true, Ordering::Release);

        let drained = self.shared.channel.close();
        self.consumer.release();
        self.shared.raster.clear();
        let relay = self.shared.relay().take();
        drop(relay);

        tracing::debug!(drained, "browser frame handoff disposed");
    }
}

impl<H: HostDevice, P: ProducerDevice> Drop for Presenter<H, P> {
    fn drop(&mut self) {
        self.dispose();
    }
}
