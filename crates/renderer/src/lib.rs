//! wgpu host side of the web frame handoff.
//!
//! ```text
//!   browser thread                      host render thread
//!   PaintSink ──▶ HandoffChannel ──▶ Presenter::render(WgpuHost, view)
//!                                              │
//!                                              └─▶ PresentPipelines ─▶ OffscreenTarget
//! ```
//!
//! [`GpuContext`] owns the device and queue. [`WgpuHost`] implements
//! [`handoff::HostDevice`] on it: raster frames become textures through
//! queue uploads, shared textures go through an optional
//! [`SharedTextureImporter`], and every surface is composited with one of the
//! [`PresentPipelines`] chosen by the presenter's color plan.
//!
//! The in-process sharing back end runs the accelerated path in
//! process: a [`WgpuProducer`] copies engine textures on the host's own device
//! and a [`RegistryImporter`] hands the copies to [`WgpuHost`].

mod compile;
mod context;
mod host;
mod pipeline;
mod shared;
mod target;

pub use context::{target_format, AdapterProfile, GpuContext, GpuMemoryMode, GpuOptions, GpuPowerPreference};
pub use host::{pixel_format, texture_format, SharedTextureImporter, WgpuHost, WgpuSurface};
pub use pipeline::{PresentPipelines, PresentUniforms, PREMULTIPLIED_BLEND};
pub use shared::{
    EngineCanvas, EngineTexture, RegisteredTexture, RegistryImporter, SharedTextureRegistry, WgpuProducer,
};
pub use target::{padded_bytes_per_row, unpremultiply, OffscreenTarget};
