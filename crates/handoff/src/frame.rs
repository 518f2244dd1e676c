use std::fmt;
use std::sync::Arc;

use crate::device::{SharedHandle, SharedResource, TextureDesc};
use crate::error::HandoffError;
use crate::fence::FenceValue;

/// Bytes per BGRA8 texel delivered by the raster paint callback.
pub const RASTER_BYTES_PER_PIXEL: usize = 4;

/// Pixel formats the browser compositor and the host exchange.
///
/// Only formats that can back a shareable 2D texture are listed. The sRGB
/// variants describe how the GPU *samples* the bytes, not how they were
/// written: the browser always writes sRGB-encoded, premultiplied color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Rgb10a2Unorm,
    Rgba16Float,
}

impl PixelFormat {
    pub fn is_srgb(self) -> bool {
        matches!(self, PixelFormat::Bgra8UnormSrgb | PixelFormat::Rgba8UnormSrgb)
    }

    /// Returns true when sampling this format yields linear values.
    ///
    /// sRGB-typed formats are decoded by the sampler and float formats store
    /// linear values to begin with.
    pub fn samples_linear(self) -> bool {
        self.is_srgb() || matches!(self, PixelFormat::Rgba16Float)
    }

    /// The sRGB-typed sibling of this format, if the format family has one.
    pub fn to_srgb(self) -> Option<PixelFormat> {
        match self {
            PixelFormat::Bgra8Unorm | PixelFormat::Bgra8UnormSrgb => Some(PixelFormat::Bgra8UnormSrgb),
            PixelFormat::Rgba8Unorm | PixelFormat::Rgba8UnormSrgb => Some(PixelFormat::Rgba8UnormSrgb),
            PixelFormat::Rgb10a2Unorm | PixelFormat::Rgba16Float => None,
        }
    }

    /// The plain UNORM sibling of an sRGB-typed format; identity otherwise.
    pub fn without_srgb(self) -> PixelFormat {
        match self {
            PixelFormat::Bgra8UnormSrgb => PixelFormat::Bgra8Unorm,
            PixelFormat::Rgba8UnormSrgb => PixelFormat::Rgba8Unorm,
            other => other,
        }
    }

    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgba16Float => 8,
            _ => 4,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Bgra8Unorm => "bgra8unorm",
            PixelFormat::Bgra8UnormSrgb => "bgra8unorm-srgb",
            PixelFormat::Rgba8Unorm => "rgba8unorm",
            PixelFormat::Rgba8UnormSrgb => "rgba8unorm-srgb",
            PixelFormat::Rgb10a2Unorm => "rgb10a2unorm",
            PixelFormat::Rgba16Float => "rgba16float",
        };
        f.write_str(name)
    }
}

/// A CPU-side frame from the non-accelerated paint path.
///
/// Tightly packed BGRA8 (row stride = `width * 4`), premultiplied alpha,
/// sRGB encoded. The pixel payload is shared behind an `Arc` so the render
/// thread can keep displaying a frame while the producer publishes the next.
#[derive(Clone)]
pub struct RasterFrame {
    width: u32,
    height: u32,
    pixels: Arc<[u8]>,
}

impl RasterFrame {
    /// Copies a paint buffer into an owned frame.
    ///
    /// The buffer handed to the paint callback is only valid for the duration
    /// of the callback, so the copy is mandatory.
    pub fn copy_from(buffer: &[u8], width: u32, height: u32) -> Result<Self, HandoffError> {
        let expected = expected_len(width, height)?;
        if buffer.len() < expected {
            return Err(HandoffError::InvalidFrame(format!(
                "raster buffer holds {} bytes, {}x{} BGRA8 needs {}",
                buffer.len(),
                width,
                height,
                expected
            )));
        }
        Ok(Self {
            width,
            height,
            pixels: Arc::from(&buffer[..expected]),
        })
    }

    /// Takes ownership of an already packed buffer.
    pub fn from_vec(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self, HandoffError> {
        let expected = expected_len(width, height)?;
        if pixels.len() != expected {
            return Err(HandoffError::InvalidFrame(format!(
                "raster buffer holds {} bytes, {}x{} BGRA8 needs exactly {}",
                pixels.len(),
                width,
                height,
                expected
            )));
        }
        Ok(Self {
            width,
            height,
            pixels: Arc::from(pixels),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> u32 {
        self.width * RASTER_BYTES_PER_PIXEL as u32
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

impl fmt::Debug for RasterFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

fn expected_len(width: u32, height: u32) -> Result<usize, HandoffError> {
    if width == 0 || height == 0 {
        return Err(HandoffError::InvalidFrame(format!(
            "raster frame has empty extent {width}x{height}"
        )));
    }
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|texels| texels.checked_mul(RASTER_BYTES_PER_PIXEL))
        .ok_or_else(|| {
            HandoffError::InvalidFrame(format!("raster frame {width}x{height} overflows"))
        })
}

/// A frame living in GPU memory, owned through its shared resource.
///
/// Ownership of `resource` is the baton: whoever holds the `GpuFrame` is the
/// only party allowed to release it, and releasing happens exactly once when
/// the frame is dropped.
pub struct GpuFrame<R> {
    resource: R,
    desc: TextureDesc,
    fence: Option<FenceValue>,
}

impl<R: SharedResource> GpuFrame<R> {
    pub fn new(resource: R, fence: Option<FenceValue>) -> Self {
        let desc = resource.desc();
        Self {
            resource,
            desc,
            fence,
        }
    }

    pub fn handle(&self) -> SharedHandle {
        self.resource.shared_handle()
    }

    pub fn desc(&self) -> TextureDesc {
        self.desc
    }

    pub fn format(&self) -> PixelFormat {
        self.desc.format
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    /// Fence value the producer device signals once the copy into this
    /// frame's resource has completed.
    pub fn fence(&self) -> Option<FenceValue> {
        self.fence
    }

    pub fn resource(&self) -> &R {
        &self.resource
    }

    /// Releases the native resource now rather than at end of scope.
    pub fn dispose(self) {
        drop(self);
    }
}

impl<R: SharedResource> fmt::Debug for GpuFrame<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuFrame")
            .field("handle", &self.handle())
            .field("desc", &self.desc)
            .field("fence", &self.fence)
            .finish()
    }
}

/// Either flavour of frame the browser can paint.
#[derive(Debug)]
pub enum Frame<R: SharedResource> {
    Raster(RasterFrame),
    Gpu(GpuFrame<R>),
}

impl<R: SharedResource> Frame<R> {
    pub fn width(&self) -> u32 {
        match self {
            Frame::Raster(frame) => frame.width(),
            Frame::Gpu(frame) => frame.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Frame::Raster(frame) => frame.height(),
            Frame::Gpu(frame) => frame.height(),
        }
    }
}
