//! In-process texture sharing on a single wgpu device.
//!
//! wgpu has no portable cross-device handle export, so this back end lets the
//! producer and the host share one device and queue. A
//! [`SharedTextureRegistry`] stands in for the OS handle table: textures and
//! fences are published under non-null [`SharedHandle`]s that either side can
//! resolve.
//!
//! Fences are queue ordered. A value is recorded as signalled once the work
//! preceding it has been submitted; since both sides submit to the same queue,
//! any later submission executes after that work.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{bail, Result};
use handoff::{
    AcceleratedPaint, DeviceCapabilities, DeviceError, FenceValue, OpenApi, PixelFormat, ProducerDevice,
    RuntimeVersion, ShareFlags, SharedHandle, SharedResource, SourceFence, TextureDesc,
};

use crate::context::GpuContext;
use crate::host::{pixel_format, texture_format, SharedTextureImporter};

const SHARING_CAPABILITIES: DeviceCapabilities = DeviceCapabilities {
    shared_resources: true,
    shared_fences: true,
    versioned_open: false,
};

#[derive(Debug, Default)]
struct Registry {
    last_handle: u64,
    textures: HashMap<u64, wgpu::Texture>,
    fences: HashMap<u64, u64>,
}

impl Registry {
    fn allocate(&mut self) -> SharedHandle {
        self.last_handle += 1;
        SharedHandle::from_raw(self.last_handle)
    }
}

/// Handle table shared by every party on one device.
#[derive(Debug, Clone, Default)]
pub struct SharedTextureRegistry {
    inner: Arc<Mutex<Registry>>,
}

impl SharedTextureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publishes `texture` and returns the handle other parties open it by.
    pub fn share(&self, texture: wgpu::Texture) -> SharedHandle {
        let mut registry = self.lock();
        let handle = registry.allocate();
        registry.textures.insert(handle.raw(), texture);
        handle
    }

    /// Withdraws a texture handle. Textures already resolved stay valid.
    pub fn revoke(&self, handle: SharedHandle) -> bool {
        self.lock().textures.remove(&handle.raw()).is_some()
    }

    pub fn resolve(&self, handle: SharedHandle) -> Option<wgpu::Texture> {
        self.lock().textures.get(&handle.raw()).cloned()
    }

    /// Number of textures currently published.
    pub fn shared_textures(&self) -> usize {
        self.lock().textures.len()
    }

    pub fn create_fence(&self) -> SharedHandle {
        let mut registry = self.lock();
        let handle = registry.allocate();
        registry.fences.insert(handle.raw(), 0);
        handle
    }

    pub fn has_fence(&self, fence: SharedHandle) -> bool {
        self.lock().fences.contains_key(&fence.raw())
    }

    /// Records `value` on `fence`. Values must increase.
    pub fn signal(&self, fence: SharedHandle, value: FenceValue) -> Result<(), DeviceError> {
        let mut registry = self.lock();
        let current = registry
            .fences
            .get_mut(&fence.raw())
            .ok_or(DeviceError::InvalidHandle(fence))?;
        if value.get() <= *current {
            return Err(DeviceError::Native(format!(
                "fence {fence:?} signalled with {value} after {current}"
            )));
        }
        *current = value.get();
        Ok(())
    }

    /// Highest value signalled on `fence`.
    pub fn completed(&self, fence: SharedHandle) -> Option<FenceValue> {
        self.lock().fences.get(&fence.raw()).map(|&value| FenceValue(value))
    }

    fn require_signalled(&self, fence: SharedHandle, value: FenceValue) -> Result<(), DeviceError> {
        match self.completed(fence) {
            None => Err(DeviceError::InvalidHandle(fence)),
            Some(done) if done >= value => Ok(()),
            Some(done) => Err(DeviceError::Busy(format!(
                "fence {fence:?} at {done}, waiting for {value} that was never submitted"
            ))),
        }
    }
}

/// Engine texture opened for one paint callback.
pub struct EngineTexture {
    texture: wgpu::Texture,
    format: PixelFormat,
}

/// Transfer-owned copy produced by [`WgpuProducer`]; dropping it withdraws
/// its handle.
pub struct RegisteredTexture {
    handle: SharedHandle,
    desc: TextureDesc,
    registry: SharedTextureRegistry,
    texture: wgpu::Texture,
}

impl SharedResource for RegisteredTexture {
    fn shared_handle(&self) -> SharedHandle {
        self.handle
    }

    fn desc(&self) -> TextureDesc {
        self.desc
    }
}

impl Drop for RegisteredTexture {
    fn drop(&mut self) {
        self.registry.revoke(self.handle);
    }
}

/// [`ProducerDevice`] that copies engine textures on the host's device.
pub struct WgpuProducer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    registry: SharedTextureRegistry,
    fence: SharedHandle,
    lost: Arc<AtomicBool>,
    pending: Vec<wgpu::CommandBuffer>,
    pending_signal: Option<FenceValue>,
}

impl WgpuProducer {
    pub fn new(context: &GpuContext, registry: SharedTextureRegistry) -> Self {
        let fence = registry.create_fence();
        Self {
            device: context.device.clone(),
            queue: context.queue.clone(),
            registry,
            fence,
            lost: context.lost_flag(),
            pending: Vec::new(),
            pending_signal: None,
        }
    }

    fn check_lost(&self) -> Result<(), DeviceError> {
        if self.lost.load(Ordering::SeqCst) {
            Err(DeviceError::Lost("wgpu device lost".into()))
        } else {
            Ok(())
        }
    }
}

impl ProducerDevice for WgpuProducer {
    type Source = EngineTexture;
    type Resource = RegisteredTexture;

    fn capabilities(&self) -> DeviceCapabilities {
        SHARING_CAPABILITIES
    }

    fn fence_handle(&self) -> Option<SharedHandle> {
        Some(self.fence)
    }

    fn open_source(&mut self, handle: SharedHandle) -> Result<EngineTexture, DeviceError> {
        self.check_lost()?;
        let texture = self
            .registry
            .resolve(handle)
            .ok_or(DeviceError::InvalidHandle(handle))?;
        let format = pixel_format(texture.format()).ok_or_else(|| {
            DeviceError::Unsupported(format!("engine texture format {:?}", texture.format()))
        })?;
        Ok(EngineTexture { texture, format })
    }

    fn describe(&self, source: &EngineTexture) -> TextureDesc {
        TextureDesc {
            width: source.texture.width(),
            height: source.texture.height(),
            format: source.format,
        }
    }

    fn wait_source(&mut self, fence: SourceFence) -> Result<(), DeviceError> {
        self.check_lost()?;
        self.registry.require_signalled(fence.handle, fence.value)
    }

    fn create_shared(&mut self, desc: &TextureDesc, flags: ShareFlags) -> Result<RegisteredTexture, DeviceError> {
        self.check_lost()?;
        if !flags.shared {
            return Err(DeviceError::Unsupported("texture must be shareable".into()));
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("browser transfer texture"),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(desc.format),
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let handle = self.registry.share(texture.clone());
        Ok(RegisteredTexture {
            handle,
            desc: *desc,
            registry: self.registry.clone(),
            texture,
        })
    }

    fn copy(&mut self, source: &EngineTexture, target: &RegisteredTexture) -> Result<(), DeviceError> {
        self.check_lost()?;
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("browser transfer copy"),
        });
        // Formats may differ only in their sRGB view, which copies allow.
        encoder.copy_texture_to_texture(
            source.texture.as_image_copy(),
            target.texture.as_image_copy(),
            wgpu::Extent3d {
                width: target.desc.width,
                height: target.desc.height,
                depth_or_array_layers: 1,
            },
        );
        let commands = encoder.finish();
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(DeviceError::Native(err.to_string()));
        }
        self.pending.push(commands);
        Ok(())
    }

    fn signal(&mut self, value: FenceValue) -> Result<(), DeviceError> {
        self.check_lost()?;
        self.pending_signal = Some(value);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DeviceError> {
        self.check_lost()?;
        if !self.pending.is_empty() {
            self.queue.submit(self.pending.drain(..));
        }
        if let Some(value) = self.pending_signal.take() {
            self.registry.signal(self.fence, value)?;
        }
        Ok(())
    }
}

/// [`SharedTextureImporter`] resolving handles published by a
/// [`WgpuProducer`] on the same device.
pub struct RegistryImporter {
    registry: SharedTextureRegistry,
    fence: Option<SharedHandle>,
}

impl RegistryImporter {
    pub fn new(registry: SharedTextureRegistry) -> Self {
        Self { registry, fence: None }
    }
}

impl SharedTextureImporter for RegistryImporter {
    fn capabilities(&self) -> DeviceCapabilities {
        SHARING_CAPABILITIES
    }

    fn runtime_version(&self) -> RuntimeVersion {
        RuntimeVersion::default()
    }

    fn open_fence(&mut self, _device: &wgpu::Device, handle: SharedHandle) -> Result<(), DeviceError> {
        if !self.registry.has_fence(handle) {
            return Err(DeviceError::InvalidHandle(handle));
        }
        self.fence = Some(handle);
        Ok(())
    }

    fn import(
        &mut self,
        _device: &wgpu::Device,
        handle: SharedHandle,
        desc: &TextureDesc,
        _api: OpenApi,
    ) -> Result<wgpu::Texture, DeviceError> {
        let texture = self
            .registry
            .resolve(handle)
            .ok_or(DeviceError::InvalidHandle(handle))?;
        if texture.width() != desc.width
            || texture.height() != desc.height
            || texture.format() != texture_format(desc.format)
        {
            return Err(DeviceError::Native(format!(
                "shared texture {handle:?} is {}x{} {:?}, expected {}x{} {}",
                texture.width(),
                texture.height(),
                texture.format(),
                desc.width,
                desc.height,
                desc.format
            )));
        }
        Ok(texture)
    }

    fn wait_fence(&mut self, _queue: &wgpu::Queue, value: FenceValue) -> Result<(), DeviceError> {
        let fence = self
            .fence
            .ok_or_else(|| DeviceError::Unsupported("no shared fence opened".into()))?;
        self.registry.require_signalled(fence, value)
    }
}

/// Engine-side texture a synthetic browser paints into before announcing an
/// accelerated paint.
pub struct EngineCanvas {
    device: wgpu::Device,
    queue: wgpu::Queue,
    registry: SharedTextureRegistry,
    current: Option<(SharedHandle, wgpu::Texture)>,
}

impl EngineCanvas {
    pub fn new(context: &GpuContext, registry: SharedTextureRegistry) -> Self {
        Self {
            device: context.device.clone(),
            queue: context.queue.clone(),
            registry,
            current: None,
        }
    }

    /// Writes tightly packed `pixels` into the canvas, reallocating it when
    /// the size or format changes, and returns the paint to announce.
    pub fn paint(&mut self, pixels: &[u8], width: u32, height: u32, format: PixelFormat) -> Result<AcceleratedPaint> {
        let bytes_per_row = width * format.bytes_per_pixel();
        let expected = bytes_per_row as usize * height as usize;
        if width == 0 || height == 0 || pixels.len() != expected {
            bail!(
                "canvas paint of {} bytes does not match {width}x{height} {format}",
                pixels.len()
            );
        }

        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let reuse = self
            .current
            .as_ref()
            .is_some_and(|(_, texture)| texture.size() == size && texture.format() == texture_format(format));
        if !reuse {
            if let Some((handle, _)) = self.current.take() {
                self.registry.revoke(handle);
            }
            let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("engine canvas"),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: texture_format(format),
                usage: wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            let handle = self.registry.share(texture.clone());
            tracing::debug!(?handle, width, height, %format, "allocated engine canvas");
            self.current = Some((handle, texture));
        }

        let Some((handle, texture)) = &self.current else {
            bail!("engine canvas missing after allocation");
        };
        self.queue.write_texture(
            texture.as_image_copy(),
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(height),
            },
            size,
        );
        Ok(AcceleratedPaint {
            handle: *handle,
            format,
            width,
            height,
            fence: None,
        })
    }
}

impl Drop for EngineCanvas {
    fn drop(&mut self) {
        if let Some((handle, _)) = self.current.take() {
            self.registry.revoke(handle);
        }
    }
}
