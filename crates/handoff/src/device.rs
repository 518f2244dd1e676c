//! Seams between the handoff core and the two GPU devices it spans.
//!
//! ```text
//!   browser compositor ──▶ ProducerDevice (callback thread)
//!                              open ─▶ copy ─▶ signal(fence)
//!                                                   │ SharedResource
//!                                                   ▼
//!                          HostDevice (render thread)
//!                              open ─▶ wait(fence) ─▶ draw
//! ```
//!
//! The producer device is private to the paint callback and never touches
//! host resources. The host device belongs to the host engine; the core only
//! borrows it for the duration of a `render` call.

use std::fmt;

use crate::color::{ColorSpace, DrawPass};
use crate::fence::{FenceValue, SourceFence};
use crate::frame::{PixelFormat, RasterFrame};
use crate::quirks::{OpenApi, RuntimeVersion};

/// OS-level handle of a GPU resource that another device may open.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SharedHandle(u64);

impl SharedHandle {
    pub const NULL: SharedHandle = SharedHandle(0);

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for SharedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedHandle({:#x})", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// What a device can do across device/process boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceCapabilities {
    /// Can open or create textures shared with another device.
    pub shared_resources: bool,
    /// Can signal or wait on a fence shared with another device.
    pub shared_fences: bool,
    /// Offers the versioned ("open shared resource 1") entry point.
    pub versioned_open: bool,
}

impl DeviceCapabilities {
    pub const NONE: DeviceCapabilities = DeviceCapabilities {
        shared_resources: false,
        shared_fences: false,
        versioned_open: false,
    };
}

/// Creation flags for a texture that another device will open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareFlags {
    pub shared: bool,
    /// Keyed-mutex sharing; the handoff synchronises with fences instead.
    pub keyed_mutex: bool,
}

impl ShareFlags {
    pub const SHARED: ShareFlags = ShareFlags {
        shared: true,
        keyed_mutex: false,
    };
}

/// Errors raised by device implementations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("shared handle {0:?} cannot be opened")]
    InvalidHandle(SharedHandle),
    #[error("device busy: {0}")]
    Busy(String),
    #[error("device lost: {0}")]
    Lost(String),
    #[error("operation unsupported by device: {0}")]
    Unsupported(String),
    #[error("native error: {0}")]
    Native(String),
}

/// A GPU resource whose handle can be opened by the host device.
///
/// Dropping the value releases the native resource; this is the only
/// release path, so ownership alone guarantees a single release.
pub trait SharedResource: Send + 'static {
    fn shared_handle(&self) -> SharedHandle;
    fn desc(&self) -> TextureDesc;
}

/// The producer-side device owned by the paint callback path.
pub trait ProducerDevice: Send + 'static {
    /// Engine-owned texture opened for the duration of one callback.
    type Source;
    /// Transfer-owned copy handed to the host.
    type Resource: SharedResource;

    fn capabilities(&self) -> DeviceCapabilities;

    /// Handle of the fence this device signals, if it created one.
    fn fence_handle(&self) -> Option<SharedHandle>;

    fn open_source(&mut self, handle: SharedHandle) -> Result<Self::Source, DeviceError>;

    fn describe(&self, source: &Self::Source) -> TextureDesc;

    /// Queues a GPU-side wait for the engine's own fence.
    fn wait_source(&mut self, fence: SourceFence) -> Result<(), DeviceError>;

    /// Allocates a texture created with explicit sharing flags.
    fn create_shared(
        &mut self,
        desc: &TextureDesc,
        flags: ShareFlags,
    ) -> Result<Self::Resource, DeviceError>;

    fn copy(&mut self, source: &Self::Source, target: &Self::Resource) -> Result<(), DeviceError>;

    /// Queues a signal of the shared fence after previously queued work.
    fn signal(&mut self, value: FenceValue) -> Result<(), DeviceError>;

    /// Submits queued commands without waiting for them.
    fn flush(&mut self) -> Result<(), DeviceError>;
}

/// The host engine's device, used from the render thread only.
pub trait HostDevice {
    /// Host texture object wrapping a native texture.
    type Surface;
    /// Render target the presenter draws into.
    type Target: ?Sized;

    fn capabilities(&self) -> DeviceCapabilities;

    fn runtime_version(&self) -> RuntimeVersion;

    /// Color encoding the host expects in its render targets.
    fn color_space(&self) -> ColorSpace;

    /// Opens the producer's shared fence; called once at construction.
    fn open_fence(&mut self, handle: SharedHandle) -> Result<(), DeviceError>;

    fn open_shared(
        &mut self,
        handle: SharedHandle,
        desc: &TextureDesc,
        api: OpenApi,
    ) -> Result<Self::Surface, DeviceError>;

    /// Drops one native reference held on behalf of `surface`.
    ///
    /// Only used by the versioned-open compatibility path.
    fn release_reference(&mut self, _surface: &Self::Surface) {}

    /// Queues a GPU-side wait on the shared fence. Must not block the caller.
    fn wait_fence(&mut self, value: FenceValue) -> Result<(), DeviceError>;

    fn upload_raster(
        &mut self,
        frame: &RasterFrame,
        format: PixelFormat,
    ) -> Result<Self::Surface, DeviceError>;

    fn surface_format(&self, surface: &Self::Surface) -> PixelFormat;

    /// Samples `surface` into `target` using the given pass.
    fn draw(
        &mut self,
        surface: &Self::Surface,
        target: &Self::Target,
        pass: &DrawPass,
    ) -> Result<(), DeviceError>;
}

/// Resource type of [`NullProducer`]; it can never be constructed.
#[derive(Debug)]
pub enum NullResource {}

impl SharedResource for NullResource {
    fn shared_handle(&self) -> SharedHandle {
        match *self {}
    }

    fn desc(&self) -> TextureDesc {
        match *self {}
    }
}

/// Producer for hosts that only support raster paints.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProducer;

impl ProducerDevice for NullProducer {
    type Source = NullResource;
    type Resource = NullResource;

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities::NONE
    }

    fn fence_handle(&self) -> Option<SharedHandle> {
        None
    }

    fn open_source(&mut self, _handle: SharedHandle) -> Result<Self::Source, DeviceError> {
        Err(DeviceError::Unsupported("raster-only producer".into()))
    }

    fn describe(&self, source: &Self::Source) -> TextureDesc {
        match *source {}
    }

    fn wait_source(&mut self, _fence: SourceFence) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("raster-only producer".into()))
    }

    fn create_shared(
        &mut self,
        _desc: &TextureDesc,
        _flags: ShareFlags,
    ) -> Result<Self::Resource, DeviceError> {
        Err(DeviceError::Unsupported("raster-only producer".into()))
    }

    fn copy(&mut self, source: &Self::Source, _target: &Self::Resource) -> Result<(), DeviceError> {
        match *source {}
    }

    fn signal(&mut self, _value: FenceValue) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("raster-only producer".into()))
    }

    fn flush(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}
