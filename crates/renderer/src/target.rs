use std::path::Path;
use std::sync::mpsc;

use anyhow::{anyhow, Context, Result};

use crate::context::GpuContext;

/// Render target texture that can be read back to the CPU.
pub struct OffscreenTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl OffscreenTarget {
    pub fn new(context: &GpuContext, width: u32, height: u32) -> Result<Self> {
        let max = context.adapter_profile.max_texture_dimension;
        if width == 0 || height == 0 || width > max || height > max {
            anyhow::bail!("offscreen target {width}x{height} outside 1..={max}");
        }
        let texture = context.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("offscreen target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: context.target_format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(Self {
            texture,
            view,
            width,
            height,
        })
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Clears the target to transparent black.
    pub fn clear(&self, context: &GpuContext) {
        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("offscreen clear"),
            });
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("offscreen clear pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        context.queue.submit(Some(encoder.finish()));
    }

    /// Copies the target into tightly packed RGBA8 rows (premultiplied).
    pub fn read_rgba(&self, context: &GpuContext) -> Result<Vec<u8>> {
        let padded_row = padded_bytes_per_row(self.width);
        let buffer = context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("offscreen readback"),
            size: u64::from(padded_row) * u64::from(self.height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("offscreen readback encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        context.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        context
            .device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| anyhow!("failed to wait for readback: {err}"))?;
        receiver
            .recv()
            .context("readback callback dropped")?
            .context("failed to map readback buffer")?;

        let pixels = {
            let mapped = slice.get_mapped_range();
            unpad_rows(&mapped, self.width, self.height, padded_row)
        };
        buffer.unmap();
        Ok(pixels)
    }

    /// Writes the target as a straight-alpha PNG.
    pub fn save_png(&self, context: &GpuContext, path: &Path) -> Result<()> {
        let mut pixels = self.read_rgba(context)?;
        unpremultiply(&mut pixels);
        let image = image::RgbaImage::from_raw(self.width, self.height, pixels)
            .ok_or_else(|| anyhow!("readback size does not match {}x{}", self.width, self.height))?;
        image
            .save_with_format(path, image::ImageFormat::Png)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), width = self.width, height = self.height, "exported frame");
        Ok(())
    }
}

/// Row pitch satisfying wgpu's copy alignment for an RGBA8 texture.
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

fn unpad_rows(data: &[u8], width: u32, height: u32, padded_row: u32) -> Vec<u8> {
    let row = (width * 4) as usize;
    let mut pixels = Vec::with_capacity(row * height as usize);
    for chunk in data.chunks(padded_row as usize).take(height as usize) {
        pixels.extend_from_slice(&chunk[..row]);
    }
    pixels
}

/// Converts premultiplied RGBA8 to straight alpha in place.
pub fn unpremultiply(pixels: &mut [u8]) {
    for texel in pixels.chunks_exact_mut(4) {
        let alpha = u32::from(texel[3]);
        if alpha == 0 || alpha == 255 {
            continue;
        }
        for channel in &mut texel[..3] {
            *channel = ((u32::from(*channel) * 255 + alpha / 2) / alpha).min(255) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_padded_to_copy_alignment() {
        assert_eq!(padded_bytes_per_row(1), 256);
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
    }

    #[test]
    fn unpad_drops_row_padding() {
        let padded_row = padded_bytes_per_row(2);
        let mut data = vec![0u8; (padded_row * 2) as usize];
        data[..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        data[padded_row as usize..padded_row as usize + 8].copy_from_slice(&[9; 8]);
        let pixels = unpad_rows(&data, 2, 2, padded_row);
        assert_eq!(pixels.len(), 16);
        assert_eq!(&pixels[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&pixels[8..], &[9; 8]);
    }

    #[test]
    fn unpremultiply_restores_straight_color() {
        let mut pixels = [64, 32, 0, 128, 10, 20, 30, 0, 200, 100, 50, 255];
        unpremultiply(&mut pixels);
        assert_eq!(&pixels[..4], &[128, 64, 0, 128]);
        assert_eq!(&pixels[4..8], &[10, 20, 30, 0]);
        assert_eq!(&pixels[8..], &[200, 100, 50, 255]);
    }
}
