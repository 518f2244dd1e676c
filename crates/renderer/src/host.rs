//! `handoff::HostDevice` on top of a wgpu device.
//!
//! Raster frames are uploaded with plain texture writes. Shared textures need
//! platform interop that wgpu does not expose portably (D3D11/D3D12 shared
//! handles, Vulkan external memory, ...), so importing them and waiting on
//! the shared fence is delegated to a [`SharedTextureImporter`]. Without an
//! importer the host reports no sharing capabilities and the pipeline runs
//! raster only.

use handoff::{
    ColorSpace, DeviceCapabilities, DeviceError, DrawPass, FenceValue, HostDevice, OpenApi, PixelFormat,
    RasterFrame, RuntimeVersion, SharedHandle, TextureDesc,
};
use wgpu::util::{DeviceExt, TextureDataOrder};

use crate::context::GpuContext;
use crate::pipeline::{PresentPipelines, PresentUniforms};

/// Platform back end that turns shared handles into wgpu textures.
pub trait SharedTextureImporter {
    fn capabilities(&self) -> DeviceCapabilities;

    fn runtime_version(&self) -> RuntimeVersion;

    fn open_fence(&mut self, device: &wgpu::Device, handle: SharedHandle) -> Result<(), DeviceError>;

    fn import(
        &mut self,
        device: &wgpu::Device,
        handle: SharedHandle,
        desc: &TextureDesc,
        api: OpenApi,
    ) -> Result<wgpu::Texture, DeviceError>;

    /// Drops one native reference on an imported texture.
    fn release_reference(&mut self, _texture: &wgpu::Texture) {}

    /// Queues a wait for `value` on `queue` ahead of later submissions.
    fn wait_fence(&mut self, queue: &wgpu::Queue, value: FenceValue) -> Result<(), DeviceError>;
}

/// A browser frame as a sampleable wgpu texture.
pub struct WgpuSurface {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    format: PixelFormat,
}

impl WgpuSurface {
    fn new(texture: wgpu::Texture, format: PixelFormat) -> Self {
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            format,
        }
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }
}

pub struct WgpuHost {
    context: GpuContext,
    pipelines: PresentPipelines,
    importer: Option<Box<dyn SharedTextureImporter>>,
}

impl WgpuHost {
    pub fn new(context: GpuContext) -> Self {
        let pipelines = PresentPipelines::new(&context.device, context.target_format);
        Self {
            context,
            pipelines,
            importer: None,
        }
    }

    pub fn with_importer(mut self, importer: Box<dyn SharedTextureImporter>) -> Self {
        self.importer = Some(importer);
        self
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    fn check_lost(&self) -> Result<(), DeviceError> {
        if self.context.is_lost() {
            Err(DeviceError::Lost("wgpu device lost".into()))
        } else {
            Ok(())
        }
    }

    fn importer(&mut self) -> Result<&mut Box<dyn SharedTextureImporter>, DeviceError> {
        self.importer
            .as_mut()
            .ok_or_else(|| DeviceError::Unsupported("no shared texture importer installed".into()))
    }
}

impl HostDevice for WgpuHost {
    type Surface = WgpuSurface;
    type Target = wgpu::TextureView;

    fn capabilities(&self) -> DeviceCapabilities {
        self.importer
            .as_ref()
            .map(|importer| importer.capabilities())
            .unwrap_or(DeviceCapabilities::NONE)
    }

    fn runtime_version(&self) -> RuntimeVersion {
        self.importer
            .as_ref()
            .map(|importer| importer.runtime_version())
            .unwrap_or_default()
    }

    fn color_space(&self) -> ColorSpace {
        self.context.color_space
    }

    fn open_fence(&mut self, handle: SharedHandle) -> Result<(), DeviceError> {
        self.check_lost()?;
        let device = self.context.device.clone();
        self.importer()?.open_fence(&device, handle)
    }

    fn open_shared(
        &mut self,
        handle: SharedHandle,
        desc: &TextureDesc,
        api: OpenApi,
    ) -> Result<WgpuSurface, DeviceError> {
        self.check_lost()?;
        let device = self.context.device.clone();
        let texture = self.importer()?.import(&device, handle, desc, api)?;
        Ok(WgpuSurface::new(texture, desc.format))
    }

    fn release_reference(&mut self, surface: &WgpuSurface) {
        if let Some(importer) = self.importer.as_mut() {
            importer.release_reference(&surface.texture);
        }
    }

    fn wait_fence(&mut self, value: FenceValue) -> Result<(), DeviceError> {
        self.check_lost()?;
        let queue = self.context.queue.clone();
        self.importer()?.wait_fence(&queue, value)
    }

    fn upload_raster(&mut self, frame: &RasterFrame, format: PixelFormat) -> Result<WgpuSurface, DeviceError> {
        self.check_lost()?;
        let texture_format = texture_format(format);
        let texture = self.context.device.create_texture_with_data(
            &self.context.queue,
            &wgpu::TextureDescriptor {
                label: Some("browser raster frame"),
                size: wgpu::Extent3d {
                    width: frame.width(),
                    height: frame.height(),
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: texture_format,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            TextureDataOrder::LayerMajor,
            frame.pixels(),
        );
        Ok(WgpuSurface::new(texture, format))
    }

    fn surface_format(&self, surface: &WgpuSurface) -> PixelFormat {
        surface.format
    }

    fn draw(&mut self, surface: &WgpuSurface, target: &wgpu::TextureView, pass: &DrawPass) -> Result<(), DeviceError> {
        self.check_lost()?;
        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let bind_group = self
            .pipelines
            .bind_group(device, &surface.view, PresentUniforms::new(pass.origin));
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("present encoder"),
        });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("present pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            render_pass.set_pipeline(self.pipelines.pipeline(pass.pass));
            render_pass.set_bind_group(0, &bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }
        self.context.queue.submit(Some(encoder.finish()));

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(DeviceError::Native(err.to_string()));
        }
        self.check_lost()
    }
}

/// wgpu format backing a handoff pixel format.
pub fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        PixelFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        PixelFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        PixelFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        PixelFormat::Rgb10a2Unorm => wgpu::TextureFormat::Rgb10a2Unorm,
        PixelFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
    }
}

/// Inverse of [`texture_format`] for formats the handoff can carry.
pub fn pixel_format(format: wgpu::TextureFormat) -> Option<PixelFormat> {
    Some(match format {
        wgpu::TextureFormat::Bgra8Unorm => PixelFormat::Bgra8Unorm,
        wgpu::TextureFormat::Bgra8UnormSrgb => PixelFormat::Bgra8UnormSrgb,
        wgpu::TextureFormat::Rgba8Unorm => PixelFormat::Rgba8Unorm,
        wgpu::TextureFormat::Rgba8UnormSrgb => PixelFormat::Rgba8UnormSrgb,
        wgpu::TextureFormat::Rgb10a2Unorm => PixelFormat::Rgb10a2Unorm,
        wgpu::TextureFormat::Rgba16Float => PixelFormat::Rgba16Float,
        _ => return None,
    })
}
