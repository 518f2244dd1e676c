//! Hand-off of browser frames from an out-of-process web engine to a host
//! render loop.
//!
//! The engine paints on its own compositor thread, either into a CPU buffer
//! or into a GPU texture shared through an OS handle. This crate moves those
//! frames to the host render thread, which owns a different GPU device:
//!
//! * raster paints are copied into a [`FrameBuffer`] slot;
//! * accelerated paints are copied on a private producer device by the
//!   [`SharedTextureRelay`], optionally followed by a fence signal, and sent
//!   through a bounded [`HandoffChannel`];
//! * the [`Presenter`] takes the newest frame, opens it on the host device,
//!   queues a GPU-side fence wait and draws it with the right
//!   [`ColorPass`].
//!
//! GPU work goes through the [`ProducerDevice`] and [`HostDevice`] traits so
//! the core runs unchanged against real back ends and the recording mocks in
//! the `testing` module (enabled by the `testing` feature).

pub mod channel;
pub mod color;
pub mod consumer;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod fence;
pub mod frame;
pub mod presenter;
pub mod quirks;
pub mod raster;
pub mod relay;
pub mod size;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use channel::{ChannelCapacity, HandoffChannel, HandoffStats, OfferOutcome, DEFAULT_ENQUEUE_TIMEOUT};
pub use color::{linear_to_srgb, srgb_to_linear, ColorPass, ColorPipeline, ColorSpace, DrawPass, SurfaceOrigin};
pub use consumer::{Acquired, FrameConsumer, FrameSource};
pub use device::{
    DeviceCapabilities, DeviceError, HostDevice, NullProducer, NullResource, ProducerDevice, ShareFlags,
    SharedHandle, SharedResource, TextureDesc,
};
pub use diagnostics::{DiagnosticsSink, RecordingSink, TracingSink};
pub use error::{ErrorClass, HandoffError};
pub use fence::{FenceTimeline, FenceValue, SourceFence};
pub use frame::{Frame, GpuFrame, PixelFormat, RasterFrame, RASTER_BYTES_PER_PIXEL};
pub use presenter::{connect, PaintPath, PaintSink, PipelineStats, Presenter, PresenterOptions, RenderOutcome};
pub use quirks::{OpenApi, ResourceOpenPath, RuntimeVersion, REFERENCE_FIX_SINCE};
pub use raster::FrameBuffer;
pub use relay::{AcceleratedPaint, RelayOutcome, SharedTextureRelay, SkipReason};
pub use size::{BrowserHost, DeviceSize, SizeChange, SizeCoordinator, SizeMode, Viewport};
