//! `webtex run` and `webtex probe`: wires a config, a headless wgpu host and
//! the synthetic browser into one handoff pipeline.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use bridgeconfig::BridgeConfig;
use handoff::{
    connect, FrameSource, HostDevice, NullProducer, PaintPath, PipelineStats, ProducerDevice, RenderOutcome,
    TracingSink, Viewport,
};
use renderer::{
    EngineCanvas, GpuContext, GpuOptions, GpuPowerPreference, OffscreenTarget, RegistryImporter,
    SharedTextureImporter, SharedTextureRegistry, WgpuHost, WgpuProducer,
};
use tracing_subscriber::EnvFilter;

use crate::cli::{GpuArgs, PowerArg, ProbeArgs, RunArgs};
use crate::paths::load_config;
use crate::producer::{PaintThread, SyntheticBrowser};

pub fn initialise_tracing() {
    let default_filter = "warn,webtex=info,handoff=info,renderer=info,naga=error,wgpu=error,wgpu_core=error,wgpu_hal=error";
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Per-outcome counts of the host loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HostTally {
    pub raster: u32,
    pub shared: u32,
    pub no_frame: u32,
    pub skipped: u32,
}

impl HostTally {
    pub fn record(&mut self, outcome: &RenderOutcome) {
        match outcome {
            RenderOutcome::Presented {
                source: FrameSource::Raster,
                ..
            } => self.raster += 1,
            RenderOutcome::Presented {
                source: FrameSource::SharedTexture,
                ..
            } => self.shared += 1,
            RenderOutcome::NoFrame => self.no_frame += 1,
            RenderOutcome::Skipped => self.skipped += 1,
            RenderOutcome::DeviceLost | RenderOutcome::Disposed => {}
        }
    }

    pub fn presented(&self) -> u32 {
        self.raster + self.shared
    }
}

pub fn run(args: RunArgs) -> Result<()> {
    let (config, source) = load_config(args.config.as_deref())?;
    let mut options = config.to_presenter_options();
    if let Some(scale) = args.scale {
        options.scale_factor = scale;
    }
    tracing::info!(
        config = %source.as_ref().map(|path| path.display().to_string()).unwrap_or_else(|| "(defaults)".into()),
        "loaded configuration"
    );

    let context = GpuContext::headless(gpu_options(&config, args.gpu)).context("failed to initialise GPU host")?;
    let (mut host, producer, canvas) = if args.accelerated {
        let registry = SharedTextureRegistry::new();
        let producer = WgpuProducer::new(&context, registry.clone());
        let canvas = EngineCanvas::new(&context, registry.clone());
        let host = WgpuHost::new(context).with_importer(Box::new(RegistryImporter::new(registry)));
        (host, Some(producer), Some(canvas))
    } else {
        (WgpuHost::new(context), None, None)
    };
    let (width, height) = args.size;
    let target = OffscreenTarget::new(host.context(), width, height)?;

    let scale = options.scale_factor;
    let browser = SyntheticBrowser::new(
        (width as f32 / scale).ceil() as u32,
        (height as f32 / scale).ceil() as u32,
        scale,
    );
    let (sink, mut presenter) = connect::<WgpuProducer, WgpuHost>(
        producer,
        &mut host,
        Box::new(browser.clone()),
        options,
        Arc::new(TracingSink),
    );
    let painter = PaintThread::spawn(sink, &browser, args.producer_fps, canvas)?;

    let viewport = Viewport::new(width as f32, height as f32);
    let frame_interval = Duration::from_secs_f32(1.0 / args.host_fps);
    let mut tally = HostTally::default();
    let started = Instant::now();
    let mut lost = false;

    for _ in 0..args.frames {
        let frame_start = Instant::now();
        target.clear(host.context());
        let outcome = presenter.render(&mut host, target.view(), viewport);
        tally.record(&outcome);
        if outcome == RenderOutcome::DeviceLost {
            lost = true;
            break;
        }
        if let Some(rest) = frame_interval.checked_sub(frame_start.elapsed()) {
            thread::sleep(rest);
        }
    }

    let painted = painter.stop()?;
    let (view_width, view_height) = browser.logical_size();
    tracing::debug!(
        view_width,
        view_height,
        screen_info_changes = browser.screen_info_changes(),
        "final browser view"
    );
    let stats = presenter.stats();
    log_summary(&tally, &stats, painted, started.elapsed(), presenter.paint_path());

    if lost {
        presenter.dispose();
        bail!("host GPU device was lost");
    }

    if let Some(path) = &args.export {
        if tally.presented() == 0 {
            bail!("no browser frame was presented; nothing to export");
        }
        target.save_png(host.context(), path)?;
        println!("Exported {}", path.display());
    }

    presenter.dispose();
    Ok(())
}

fn log_summary(tally: &HostTally, stats: &PipelineStats, painted: u64, elapsed: Duration, path: PaintPath) {
    tracing::info!(
        %path,
        painted,
        raster_frames = stats.raster_frames,
        presented = tally.presented(),
        raster = tally.raster,
        shared = tally.shared,
        no_frame = tally.no_frame,
        skipped = tally.skipped,
        offered = stats.handoff.offered,
        delivered = stats.handoff.delivered,
        backpressure_drops = stats.handoff.backpressure_drops,
        superseded = stats.handoff.superseded,
        accelerated_ignored = stats.accelerated_ignored,
        elapsed_ms = elapsed.as_millis() as u64,
        "handoff run finished"
    );
    println!(
        "painted {painted} frames, presented {} ({} raster, {} shared), {} empty, {} skipped",
        tally.presented(),
        tally.raster,
        tally.shared,
        tally.no_frame,
        tally.skipped
    );
}

pub fn probe(args: ProbeArgs) -> Result<()> {
    let (config, _) = load_config(args.config.as_deref())?;
    let context = GpuContext::headless(gpu_options(&config, args.gpu)).context("failed to initialise GPU host")?;
    let registry = SharedTextureRegistry::new();
    let in_process = WgpuProducer::new(&context, registry.clone()).capabilities();
    let host = WgpuHost::new(context);
    let profile = &host.context().adapter_profile;
    let host_caps = host.capabilities();
    let path = PaintPath::probe(NullProducer.capabilities(), host_caps, config.handoff.fences);
    let shared_path = PaintPath::probe(
        in_process,
        RegistryImporter::new(registry).capabilities(),
        config.handoff.fences,
    );

    println!("Adapter:");
    println!("  name:        {}", profile.name);
    println!("  backend:     {:?}", profile.backend);
    println!("  type:        {:?}", profile.device_type);
    println!("  driver:      {} {}", profile.driver, profile.driver_info);
    println!("  max texture: {}", profile.max_texture_dimension);
    println!("Host:");
    println!("  color space: {}", host.color_space());
    println!("  target:      {:?}", host.context().target_format);
    println!("  runtime:     {}", host.runtime_version());
    println!(
        "  sharing:     resources={} fences={}",
        host_caps.shared_resources, host_caps.shared_fences
    );
    println!("Paint path:    {path}");
    println!("  --accelerated: {shared_path}");
    Ok(())
}

fn gpu_options(config: &BridgeConfig, gpu: GpuArgs) -> GpuOptions {
    GpuOptions {
        power: match gpu.power {
            PowerArg::Low => GpuPowerPreference::Low,
            PowerArg::High => GpuPowerPreference::High,
        },
        color_space: config.color_space(),
        force_fallback_adapter: gpu.fallback_adapter,
        ..GpuOptions::default()
    }
}
