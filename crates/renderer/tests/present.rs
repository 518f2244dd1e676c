//! Presents raster and accelerated paints through a real wgpu device.
//! Skipped when the machine has no usable adapter.

use std::sync::Arc;

use handoff::testing::MockBrowser;
use handoff::{
    connect, ColorPass, ColorSpace, FrameSource, NullProducer, PaintPath, PixelFormat, PresenterOptions,
    RecordingSink, RenderOutcome, Viewport,
};
use renderer::{
    EngineCanvas, GpuContext, GpuOptions, OffscreenTarget, RegistryImporter, SharedTextureRegistry, WgpuHost,
    WgpuProducer,
};

fn host(color_space: ColorSpace) -> Option<WgpuHost> {
    let options = GpuOptions {
        color_space,
        ..GpuOptions::default()
    };
    match GpuContext::headless(options) {
        Ok(context) => Some(WgpuHost::new(context)),
        Err(err) => {
            eprintln!("skipping GPU test: {err:#}");
            None
        }
    }
}

fn solid_bgra(width: u32, height: u32, bgra: [u8; 4]) -> Vec<u8> {
    bgra.repeat((width * height) as usize)
}

fn present_solid(color_space: ColorSpace, bgra: [u8; 4]) -> Option<Vec<u8>> {
    let mut host = host(color_space)?;
    let target = OffscreenTarget::new(host.context(), 8, 4).expect("target");
    let (sink, mut presenter) = connect::<NullProducer, WgpuHost>(
        None,
        &mut host,
        Box::new(MockBrowser::new()),
        PresenterOptions::default(),
        Arc::new(RecordingSink::new()),
    );

    sink.on_raster_paint(&solid_bgra(8, 4, bgra), 8, 4);
    target.clear(host.context());
    let outcome = presenter.render(&mut host, target.view(), Viewport::new(8.0, 4.0));
    assert!(matches!(outcome, RenderOutcome::Presented { .. }), "{outcome:?}");

    let pixels = target.read_rgba(host.context()).expect("readback");
    presenter.dispose();
    Some(pixels)
}

fn assert_close(actual: &[u8], expected: [u8; 4], tolerance: u8) {
    for texel in actual.chunks_exact(4) {
        for (a, e) in texel.iter().zip(expected) {
            assert!(a.abs_diff(e) <= tolerance, "texel {texel:?} expected {expected:?}");
        }
    }
}

#[test]
fn raster_paint_reaches_linear_target_unchanged() {
    let Some(pixels) = present_solid(ColorSpace::Linear, [32, 128, 200, 255]) else {
        return;
    };
    assert_eq!(pixels.len(), 8 * 4 * 4);
    assert_close(&pixels, [200, 128, 32, 255], 2);
}

#[test]
fn raster_paint_reaches_gamma_target_unchanged() {
    let Some(pixels) = present_solid(ColorSpace::Gamma, [32, 128, 200, 255]) else {
        return;
    };
    assert_close(&pixels, [200, 128, 32, 255], 1);
}

/// Presents one accelerated paint of `pixels` through the in-process
/// sharing back end and returns the pass used and the target contents.
fn present_accelerated(format: PixelFormat, pixels: &[u8]) -> Option<(ColorPass, Vec<u8>)> {
    let options = GpuOptions {
        color_space: ColorSpace::Linear,
        ..GpuOptions::default()
    };
    let context = match GpuContext::headless(options) {
        Ok(context) => context,
        Err(err) => {
            eprintln!("skipping GPU test: {err:#}");
            return None;
        }
    };
    let registry = SharedTextureRegistry::new();
    let producer = WgpuProducer::new(&context, registry.clone());
    let mut canvas = EngineCanvas::new(&context, registry.clone());
    let mut host = WgpuHost::new(context).with_importer(Box::new(RegistryImporter::new(registry.clone())));
    let target = OffscreenTarget::new(host.context(), 8, 4).expect("target");

    let diagnostics = Arc::new(RecordingSink::new());
    let (sink, mut presenter) = connect(
        Some(producer),
        &mut host,
        Box::new(MockBrowser::new()),
        PresenterOptions::default(),
        diagnostics.clone(),
    );
    assert_eq!(presenter.paint_path(), PaintPath::FencedSharedTexture);

    let paint = canvas.paint(pixels, 8, 4, format).expect("canvas paint");
    sink.on_accelerated_paint(paint);
    assert!(diagnostics.reports().is_empty(), "{:?}", diagnostics.reports());
    assert_eq!(sink.stats().handoff.offered, 1);

    target.clear(host.context());
    let outcome = presenter.render(&mut host, target.view(), Viewport::new(8.0, 4.0));
    let RenderOutcome::Presented {
        source: FrameSource::SharedTexture,
        pass,
    } = outcome
    else {
        panic!("expected a shared frame, got {outcome:?}");
    };
    let read = target.read_rgba(host.context()).expect("readback");

    // Only the engine canvas stays published once the transfer copy is gone.
    presenter.dispose();
    assert_eq!(registry.shared_textures(), 1);
    drop(canvas);
    assert_eq!(registry.shared_textures(), 0);
    Some((pass.pass, read))
}

/// Packs straight 10-bit channels into `Rgb10a2Unorm` texels.
fn solid_rgb10a2(texels: usize, rgb: [u32; 3]) -> Vec<u8> {
    let packed = rgb[0] | rgb[1] << 10 | rgb[2] << 20 | 3 << 30;
    packed.to_le_bytes().repeat(texels)
}

#[test]
fn accelerated_bgra_paint_decodes_in_hardware() {
    let texels = solid_bgra(8, 4, [32, 128, 200, 255]);
    let Some((pass, pixels)) = present_accelerated(PixelFormat::Bgra8Unorm, &texels) else {
        return;
    };
    // The transfer copy is typed sRGB, so the sampler decodes it.
    assert_eq!(pass, ColorPass::Blit);
    assert_close(&pixels, [200, 128, 32, 255], 2);
}

#[test]
fn accelerated_paint_without_srgb_view_is_linearized() {
    // 200/255, 128/255 and 32/255 in 10-bit sRGB.
    let texels = solid_rgb10a2(8 * 4, [802, 514, 128]);
    let Some((pass, pixels)) = present_accelerated(PixelFormat::Rgb10a2Unorm, &texels) else {
        return;
    };
    assert_eq!(pass, ColorPass::Linearize);
    assert_close(&pixels, [200, 128, 32, 255], 2);
}

#[test]
fn empty_pipeline_leaves_target_clear() {
    let Some(mut host) = host(ColorSpace::Linear) else {
        return;
    };
    let target = OffscreenTarget::new(host.context(), 4, 4).expect("target");
    let (_sink, mut presenter) = connect::<NullProducer, WgpuHost>(
        None,
        &mut host,
        Box::new(MockBrowser::new()),
        PresenterOptions::default(),
        Arc::new(RecordingSink::new()),
    );

    target.clear(host.context());
    let outcome = presenter.render(&mut host, target.view(), Viewport::new(4.0, 4.0));
    assert_eq!(outcome, RenderOutcome::NoFrame);
    assert_close(&target.read_rgba(host.context()).expect("readback"), [0, 0, 0, 0], 0);
}

#[test]
fn rejects_zero_sized_target() {
    let Some(host) = host(ColorSpace::Gamma) else {
        return;
    };
    assert!(OffscreenTarget::new(host.context(), 0, 16).is_err());
}
