//! Stand-in for the browser engine: a compositor thread that paints BGRA8
//! frames at the size the host last requested, either as raster buffers or
//! into a shared GPU canvas.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use handoff::{BrowserHost, PaintSink, PixelFormat, RASTER_BYTES_PER_PIXEL};
use renderer::{EngineCanvas, WgpuProducer};

#[derive(Debug, Default)]
struct ViewState {
    /// Logical view size packed as `width << 32 | height`.
    size: AtomicU64,
    scale_bits: AtomicU64,
    screen_info_changes: AtomicU64,
}

impl ViewState {
    fn set_size(&self, width: u32, height: u32) {
        self.size
            .store((u64::from(width) << 32) | u64::from(height), Ordering::Release);
    }

    fn size(&self) -> (u32, u32) {
        let packed = self.size.load(Ordering::Acquire);
        ((packed >> 32) as u32, packed as u32)
    }

    fn set_scale(&self, scale: f32) {
        self.scale_bits.store(u64::from(scale.to_bits()), Ordering::Release);
    }

    fn scale(&self) -> f32 {
        f32::from_bits(self.scale_bits.load(Ordering::Acquire) as u32)
    }

    /// Device pixel size the engine paints at.
    fn paint_size(&self) -> (u32, u32) {
        let (width, height) = self.size();
        let scale = self.scale();
        let axis = |logical: u32| ((logical as f32 * scale).round() as u32).max(1);
        (axis(width), axis(height))
    }
}

/// Browser-side view of the synthetic engine, handed to the presenter.
#[derive(Debug, Clone)]
pub struct SyntheticBrowser {
    state: Arc<ViewState>,
}

impl SyntheticBrowser {
    pub fn new(logical_width: u32, logical_height: u32, scale: f32) -> Self {
        let state = ViewState::default();
        state.set_size(logical_width.max(1), logical_height.max(1));
        state.set_scale(scale);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn logical_size(&self) -> (u32, u32) {
        self.state.size()
    }

    pub fn screen_info_changes(&self) -> u64 {
        self.state.screen_info_changes.load(Ordering::Acquire)
    }
}

impl BrowserHost for SyntheticBrowser {
    fn request_resize(&mut self, width: u32, height: u32) {
        tracing::debug!(width, height, "browser view resized");
        self.state.set_size(width.max(1), height.max(1));
    }

    fn notify_screen_info_changed(&mut self) {
        self.state.screen_info_changes.fetch_add(1, Ordering::AcqRel);
    }
}

/// Running paint thread; stop it with [`PaintThread::stop`].
pub struct PaintThread {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<u64>,
}

impl PaintThread {
    /// Paints through `canvas` as accelerated paints when given, as raster
    /// paints otherwise.
    pub fn spawn(
        sink: PaintSink<WgpuProducer>,
        browser: &SyntheticBrowser,
        fps: f32,
        mut canvas: Option<EngineCanvas>,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let state = Arc::clone(&browser.state);
        let interval = Duration::from_secs_f32(1.0 / fps);
        let flag = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("browser-paint".into())
            .spawn(move || {
                let mut painted = 0u64;
                let mut pixels = Vec::new();
                while !flag.load(Ordering::Acquire) {
                    let (width, height) = state.paint_size();
                    paint_gradient(&mut pixels, width, height, painted);
                    match canvas.as_mut() {
                        Some(canvas) => match canvas.paint(&pixels, width, height, PixelFormat::Bgra8Unorm) {
                            Ok(paint) => sink.on_accelerated_paint(paint),
                            Err(err) => tracing::warn!(error = %err, "failed to paint engine canvas"),
                        },
                        None => sink.on_raster_paint(&pixels, width, height),
                    }
                    painted += 1;
                    thread::sleep(interval);
                }
                painted
            })
            .context("failed to spawn paint thread")?;

        Ok(Self { stop, handle })
    }

    /// Stops painting and returns the number of paints issued.
    pub fn stop(self) -> Result<u64> {
        self.stop.store(true, Ordering::Release);
        self.handle
            .join()
            .map_err(|_| anyhow!("paint thread panicked"))
    }
}

/// Fills `pixels` with a premultiplied BGRA8 diagonal gradient scrolled by
/// `phase`, with a translucent band across the middle rows.
pub fn paint_gradient(pixels: &mut Vec<u8>, width: u32, height: u32, phase: u64) {
    let len = width as usize * height as usize * RASTER_BYTES_PER_PIXEL;
    pixels.resize(len, 0);

    let band = height / 3..height - height / 3;
    let shift = (phase % 256) as u32;
    for (y, row) in pixels
        .chunks_exact_mut(width as usize * RASTER_BYTES_PER_PIXEL)
        .enumerate()
    {
        let y = y as u32;
        let alpha: u32 = if band.contains(&y) { 160 } else { 255 };
        for (x, texel) in row.chunks_exact_mut(RASTER_BYTES_PER_PIXEL).enumerate() {
            let x = x as u32;
            let red = (x * 255 / width.max(1) + shift) % 256;
            let green = (y * 255 / height.max(1)) % 256;
            let blue = (255 + shift - red.min(255)) % 256;
            let premultiply = |channel: u32| ((channel * alpha + 127) / 255) as u8;
            texel[0] = premultiply(blue);
            texel[1] = premultiply(green);
            texel[2] = premultiply(red);
            texel[3] = alpha as u8;
        }
    }
}
