//! Color encoding decisions for presenting browser frames.
//!
//! Browser frames are always sRGB encoded with premultiplied alpha. Whether
//! the host needs them converted depends on the host pipeline and on how the
//! surface format makes the sampler interpret the bytes.

use std::fmt;

use crate::frame::PixelFormat;

/// Encoding the host expects in its render targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorSpace {
    /// Targets hold gamma-encoded values; browser bytes can be copied through.
    Gamma,
    /// Targets hold linear values; sRGB content must be decoded first.
    #[default]
    Linear,
}

impl fmt::Display for ColorSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ColorSpace::Gamma => "gamma",
            ColorSpace::Linear => "linear",
        })
    }
}

/// Row order of a surface as seen by the sampler.
///
/// Shared textures from the browser are top-left; some hosts address
/// textures bottom-left and must flip rows when sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SurfaceOrigin {
    #[default]
    TopLeft,
    BottomLeft,
}

impl SurfaceOrigin {
    pub fn flip_y(self) -> bool {
        matches!(self, SurfaceOrigin::BottomLeft)
    }
}

/// Shader pass used to draw a surface into the host target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorPass {
    /// Sample and write unchanged.
    Blit,
    /// Decode sRGB to linear in the shader.
    Linearize,
    /// Encode linear samples to sRGB in the shader.
    Encode,
}

/// Everything a host needs to draw one surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawPass {
    pub pass: ColorPass,
    pub origin: SurfaceOrigin,
    /// Browser content is premultiplied; blending uses (One, OneMinusSrcAlpha).
    pub premultiplied: bool,
}

impl DrawPass {
    pub fn new(pass: ColorPass, origin: SurfaceOrigin) -> Self {
        Self {
            pass,
            origin,
            premultiplied: true,
        }
    }
}

pub struct ColorPipeline;

impl ColorPipeline {
    /// Picks the pass that makes sampled values match the host encoding.
    pub fn plan(source: PixelFormat, host: ColorSpace) -> ColorPass {
        match (host, source.samples_linear()) {
            (ColorSpace::Linear, true) | (ColorSpace::Gamma, false) => ColorPass::Blit,
            (ColorSpace::Linear, false) => ColorPass::Linearize,
            (ColorSpace::Gamma, true) => ColorPass::Encode,
        }
    }

    pub fn draw_pass(source: PixelFormat, host: ColorSpace, origin: SurfaceOrigin) -> DrawPass {
        DrawPass::new(Self::plan(source, host), origin)
    }

    /// Format a shared copy should be created with so that sampling it in
    /// `host` needs as little shader work as possible.
    pub fn transfer_format(source: PixelFormat, host: ColorSpace) -> PixelFormat {
        match host {
            ColorSpace::Linear => source.to_srgb().unwrap_or(source.without_srgb()),
            ColorSpace::Gamma => source.without_srgb(),
        }
    }
}

/// sRGB electro-optical transfer function for one channel in `[0, 1]`.
pub fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// Inverse of [`srgb_to_linear`].
pub fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_matches_encodings() {
        use PixelFormat::*;
        assert_eq!(ColorPipeline::plan(Bgra8UnormSrgb, ColorSpace::Linear), ColorPass::Blit);
        assert_eq!(ColorPipeline::plan(Bgra8Unorm, ColorSpace::Linear), ColorPass::Linearize);
        assert_eq!(ColorPipeline::plan(Bgra8Unorm, ColorSpace::Gamma), ColorPass::Blit);
        assert_eq!(ColorPipeline::plan(Rgba16Float, ColorSpace::Gamma), ColorPass::Encode);
    }

    #[test]
    fn transfer_format_prefers_hardware_decode() {
        use PixelFormat::*;
        assert_eq!(ColorPipeline::transfer_format(Bgra8Unorm, ColorSpace::Linear), Bgra8UnormSrgb);
        assert_eq!(ColorPipeline::transfer_format(Rgb10a2Unorm, ColorSpace::Linear), Rgb10a2Unorm);
        assert_eq!(ColorPipeline::transfer_format(Rgba8UnormSrgb, ColorSpace::Gamma), Rgba8Unorm);
    }

    #[test]
    fn srgb_round_trip() {
        let linear = srgb_to_linear(0.5);
        assert!((linear - 0.214).abs() < 1e-3, "{linear}");
        let encoded = linear_to_srgb(0.5);
        assert!((encoded - 0.735).abs() < 1e-3, "{encoded}");
        assert!((srgb_to_linear(encoded) - 0.5).abs() < 1e-3);
    }

    #[test]
    fn transfer_is_continuous_at_threshold() {
        let below = srgb_to_linear(0.04045);
        let above = srgb_to_linear(0.040_46);
        assert!((above - below).abs() < 1e-4);
        assert_eq!(srgb_to_linear(0.0), 0.0);
        assert!((srgb_to_linear(1.0) - 1.0).abs() < 1e-6);
    }
}
