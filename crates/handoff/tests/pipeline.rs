use std::sync::Arc;

use handoff::testing::{
    DisposeLedger, HostCommand, MockBrowser, MockHost, MockProducer, MockTarget, ProducerCommand,
    ProducerControls, SurfaceContent, MOCK_PRODUCER_FENCE,
};
use handoff::{
    connect, AcceleratedPaint, ChannelCapacity, ColorPass, ColorSpace, DeviceCapabilities, DiagnosticsSink,
    DrawPass, ErrorClass, FenceValue, FrameSource, NullProducer, OpenApi, PaintPath, PaintSink, PixelFormat,
    Presenter, PresenterOptions, RecordingSink, RenderOutcome, RuntimeVersion, SharedHandle, SurfaceOrigin,
    TextureDesc, Viewport,
};

const VIEWPORT: Viewport = Viewport {
    width: 16.0,
    height: 8.0,
};

const BLIT: DrawPass = DrawPass {
    pass: ColorPass::Blit,
    origin: SurfaceOrigin::TopLeft,
    premultiplied: true,
};

struct Rig {
    ledger: DisposeLedger,
    host: MockHost,
    controls: ProducerControls,
    producer_log: handoff::testing::CommandLog<ProducerCommand>,
    browser: MockBrowser,
    diagnostics: Arc<RecordingSink>,
    sink: PaintSink<MockProducer>,
    presenter: Presenter<MockHost, MockProducer>,
}

impl Rig {
    fn new(host: MockHost) -> Self {
        Self::build(host, |producer| producer, PresenterOptions::default())
    }

    fn build(
        mut host: MockHost,
        configure: impl FnOnce(MockProducer) -> MockProducer,
        options: PresenterOptions,
    ) -> Self {
        let ledger = DisposeLedger::new();
        let producer = configure(MockProducer::new(&ledger));
        let controls = producer.controls();
        let producer_log = producer.log();
        let browser = MockBrowser::new();
        let diagnostics = Arc::new(RecordingSink::new());
        let (sink, presenter) = connect(
            Some(producer),
            &mut host,
            Box::new(browser.clone()),
            options,
            diagnostics.clone() as Arc<dyn DiagnosticsSink>,
        );
        Self {
            ledger,
            host,
            controls,
            producer_log,
            browser,
            diagnostics,
            sink,
            presenter,
        }
    }

    fn render(&mut self) -> RenderOutcome {
        self.presenter.render(&mut self.host, &MockTarget, VIEWPORT)
    }

    fn host_commands(&self) -> Vec<HostCommand> {
        self.host.log().commands()
    }
}

fn paint(handle: u64) -> AcceleratedPaint {
    AcceleratedPaint {
        handle: SharedHandle::from_raw(handle),
        format: PixelFormat::Bgra8Unorm,
        width: 16,
        height: 8,
        fence: None,
    }
}

fn shared(id: u64) -> SurfaceContent {
    SurfaceContent::Shared(SharedHandle::from_raw(id))
}

#[test]
fn fenced_frames_are_waited_on_before_sampling() {
    let mut rig = Rig::new(MockHost::new(ColorSpace::Linear));
    assert_eq!(rig.presenter.paint_path(), PaintPath::FencedSharedTexture);

    rig.sink.on_accelerated_paint(paint(0x10));
    assert_eq!(
        rig.render(),
        RenderOutcome::Presented {
            source: FrameSource::SharedTexture,
            pass: BLIT
        }
    );
    rig.sink.on_accelerated_paint(paint(0x11));
    rig.render();

    assert_eq!(
        rig.host_commands(),
        vec![
            HostCommand::OpenFence(MOCK_PRODUCER_FENCE),
            HostCommand::Open {
                surface: 1,
                handle: SharedHandle::from_raw(0x1000),
                api: OpenApi::Versioned
            },
            HostCommand::WaitFence(FenceValue(1)),
            HostCommand::Draw {
                surface: 1,
                wraps: shared(0x1000),
                pass: BLIT
            },
            HostCommand::Open {
                surface: 2,
                handle: SharedHandle::from_raw(0x1001),
                api: OpenApi::Versioned
            },
            HostCommand::WaitFence(FenceValue(2)),
            HostCommand::DropSurface { surface: 1 },
            HostCommand::Draw {
                surface: 2,
                wraps: shared(0x1001),
                pass: BLIT
            },
        ]
    );
    assert_eq!(rig.ledger.disposals(0x1000), 1);
    assert_eq!(rig.ledger.disposals(0x1001), 0);

    let signals: Vec<_> = rig
        .producer_log
        .commands()
        .into_iter()
        .filter(|c| matches!(c, ProducerCommand::Signal(_)))
        .collect();
    assert_eq!(
        signals,
        vec![
            ProducerCommand::Signal(FenceValue(1)),
            ProducerCommand::Signal(FenceValue(2))
        ]
    );
}

#[test]
fn last_surface_stays_bound_without_new_frames() {
    let mut rig = Rig::new(MockHost::new(ColorSpace::Linear));
    rig.sink.on_accelerated_paint(paint(0x10));
    for _ in 0..3 {
        assert!(matches!(rig.render(), RenderOutcome::Presented { .. }));
    }
    let commands = rig.host_commands();
    let opens = commands
        .iter()
        .filter(|c| matches!(c, HostCommand::Open { .. }))
        .count();
    let draws = commands
        .iter()
        .filter(|c| matches!(c, HostCommand::Draw { surface: 1, .. }))
        .count();
    assert_eq!(opens, 1);
    assert_eq!(draws, 3);
}

#[test]
fn transient_open_failure_keeps_last_good_frame() {
    let mut rig = Rig::new(MockHost::new(ColorSpace::Linear));
    rig.sink.on_accelerated_paint(paint(0x10));
    rig.render();

    rig.host.fail_next_opens(1);
    rig.sink.on_accelerated_paint(paint(0x11));
    let outcome = rig.render();

    assert!(matches!(
        outcome,
        RenderOutcome::Presented {
            source: FrameSource::SharedTexture,
            ..
        }
    ));
    assert!(matches!(
        rig.host_commands().last(),
        Some(HostCommand::Draw { surface: 1, .. })
    ));
    assert_eq!(rig.diagnostics.count(ErrorClass::Transient), 1);
    assert_eq!(rig.ledger.disposals(0x1001), 1);
    assert_eq!(rig.ledger.disposals(0x1000), 0);
}

#[test]
fn host_device_loss_latches_and_releases_everything() {
    let mut rig = Rig::new(MockHost::new(ColorSpace::Linear));
    rig.sink.on_accelerated_paint(paint(0x10));
    rig.render();

    rig.host.lose_device();
    rig.sink.on_accelerated_paint(paint(0x11));
    assert_eq!(rig.render(), RenderOutcome::DeviceLost);
    assert_eq!(rig.diagnostics.count(ErrorClass::DeviceLoss), 1);
    assert_eq!(rig.ledger.live(), 0);

    rig.sink.on_accelerated_paint(paint(0x12));
    assert_eq!(rig.render(), RenderOutcome::DeviceLost);
    assert_eq!(rig.sink.stats().handoff.rejected, 1);
    assert_eq!(rig.ledger.live(), 0);
    rig.ledger.assert_all_disposed_once();
}

#[test]
fn producer_device_loss_stops_accelerated_paints_only() {
    let mut rig = Rig::new(MockHost::new(ColorSpace::Linear));
    rig.controls.lose_device();
    rig.sink.on_accelerated_paint(paint(0x10));
    assert_eq!(rig.diagnostics.count(ErrorClass::DeviceLoss), 1);

    rig.sink.on_accelerated_paint(paint(0x11));
    assert_eq!(rig.sink.stats().accelerated_ignored, 1);

    rig.sink.on_raster_paint(&[0x80; 16 * 8 * 4], 16, 8);
    assert!(matches!(
        rig.render(),
        RenderOutcome::Presented {
            source: FrameSource::Raster,
            ..
        }
    ));
}

#[test]
fn producer_loss_after_bind_falls_back_to_raster() {
    let mut rig = Rig::new(MockHost::new(ColorSpace::Linear));
    rig.sink.on_accelerated_paint(paint(0x10));
    assert!(matches!(
        rig.render(),
        RenderOutcome::Presented {
            source: FrameSource::SharedTexture,
            ..
        }
    ));

    rig.controls.lose_device();
    rig.sink.on_accelerated_paint(paint(0x11));
    assert_eq!(rig.diagnostics.count(ErrorClass::DeviceLoss), 1);

    // The frame from the lost device is no longer drawn.
    assert_eq!(rig.render(), RenderOutcome::NoFrame);
    assert_eq!(rig.ledger.disposals(0x1000), 1);

    rig.sink.on_raster_paint(&[0x80; 16 * 8 * 4], 16, 8);
    assert!(matches!(
        rig.render(),
        RenderOutcome::Presented {
            source: FrameSource::Raster,
            ..
        }
    ));
    rig.ledger.assert_all_disposed_once();
}

#[test]
fn newest_paint_wins_across_paths() {
    let mut rig = Rig::new(MockHost::new(ColorSpace::Linear));
    rig.sink.on_accelerated_paint(paint(0x10));
    rig.render();

    rig.sink.on_raster_paint(&[0x80; 16 * 8 * 4], 16, 8);
    assert!(matches!(
        rig.render(),
        RenderOutcome::Presented {
            source: FrameSource::Raster,
            ..
        }
    ));
    assert_eq!(rig.ledger.disposals(0x1000), 1);
    assert!(matches!(
        rig.render(),
        RenderOutcome::Presented {
            source: FrameSource::Raster,
            ..
        }
    ));

    rig.sink.on_accelerated_paint(paint(0x11));
    assert!(matches!(
        rig.render(),
        RenderOutcome::Presented {
            source: FrameSource::SharedTexture,
            ..
        }
    ));
}

#[test]
fn failing_fence_open_downgrades_to_unfenced_path() {
    let mut rig = Rig::new(MockHost::new(ColorSpace::Linear).with_failing_fence_open());
    assert_eq!(rig.presenter.paint_path(), PaintPath::SharedTexture);
    assert_eq!(rig.diagnostics.count(ErrorClass::Configuration), 1);

    rig.sink.on_accelerated_paint(paint(0x10));
    assert!(matches!(rig.render(), RenderOutcome::Presented { .. }));
    assert!(!rig
        .host_commands()
        .iter()
        .any(|c| matches!(c, HostCommand::WaitFence(_))));
    assert!(!rig
        .producer_log
        .commands()
        .iter()
        .any(|c| matches!(c, ProducerCommand::Signal(_))));
}

#[test]
fn fences_can_be_turned_off() {
    let options = PresenterOptions {
        use_fences: false,
        ..PresenterOptions::default()
    };
    let rig = Rig::build(MockHost::new(ColorSpace::Linear), |p| p, options);
    assert_eq!(rig.presenter.paint_path(), PaintPath::SharedTexture);
    assert!(rig.host_commands().is_empty());
}

#[test]
fn missing_sharing_support_selects_raster_only() {
    let mut rig = Rig::new(MockHost::new(ColorSpace::Gamma).with_capabilities(DeviceCapabilities::NONE));
    assert_eq!(rig.presenter.paint_path(), PaintPath::RasterOnly);
    assert_eq!(rig.diagnostics.count(ErrorClass::Configuration), 1);

    rig.sink.on_accelerated_paint(paint(0x10));
    assert_eq!(rig.sink.stats().accelerated_ignored, 1);
    assert_eq!(rig.ledger.created(), 0);
    assert_eq!(rig.render(), RenderOutcome::NoFrame);
}

#[test]
fn raster_frames_are_uploaded_once_per_paint() {
    let mut host = MockHost::new(ColorSpace::Linear);
    let diagnostics = Arc::new(RecordingSink::new());
    let (sink, mut presenter) = connect::<NullProducer, _>(
        None,
        &mut host,
        Box::new(MockBrowser::new()),
        PresenterOptions::default(),
        diagnostics.clone(),
    );
    assert_eq!(presenter.paint_path(), PaintPath::RasterOnly);
    assert!(diagnostics.reports().is_empty());
    assert_eq!(presenter.render(&mut host, &MockTarget, VIEWPORT), RenderOutcome::NoFrame);

    sink.on_raster_paint(&[0xff; 2 * 2 * 4], 2, 2);
    for _ in 0..3 {
        assert_eq!(
            presenter.render(&mut host, &MockTarget, VIEWPORT),
            RenderOutcome::Presented {
                source: FrameSource::Raster,
                pass: BLIT
            }
        );
    }
    sink.on_raster_paint(&[0x00; 4 * 2 * 4], 4, 2);
    presenter.render(&mut host, &MockTarget, VIEWPORT);

    let uploads: Vec<_> = host
        .log()
        .commands()
        .into_iter()
        .filter(|c| matches!(c, HostCommand::Upload { .. } | HostCommand::DropSurface { .. }))
        .collect();
    assert_eq!(
        uploads,
        vec![
            HostCommand::Upload {
                surface: 1,
                width: 2,
                height: 2,
                format: PixelFormat::Bgra8UnormSrgb
            },
            HostCommand::Upload {
                surface: 2,
                width: 4,
                height: 2,
                format: PixelFormat::Bgra8UnormSrgb
            },
            HostCommand::DropSurface { surface: 1 },
        ]
    );
    assert_eq!(sink.stats().raster_frames, 2);
}

#[test]
fn short_raster_buffer_is_reported_not_raised() {
    let mut host = MockHost::new(ColorSpace::Gamma);
    let diagnostics = Arc::new(RecordingSink::new());
    let (sink, mut presenter) = connect::<NullProducer, _>(
        None,
        &mut host,
        Box::new(MockBrowser::new()),
        PresenterOptions::default(),
        diagnostics.clone(),
    );
    sink.on_raster_paint(&[0; 3], 2, 2);
    assert_eq!(diagnostics.count(ErrorClass::InvalidFrame), 1);
    assert_eq!(presenter.render(&mut host, &MockTarget, VIEWPORT), RenderOutcome::NoFrame);
}

#[test]
fn linear_host_linearizes_formats_without_srgb_view() {
    let mut rig = Rig::build(
        MockHost::new(ColorSpace::Linear),
        |producer| {
            producer.with_source_desc(TextureDesc {
                width: 16,
                height: 8,
                format: PixelFormat::Rgb10a2Unorm,
            })
        },
        PresenterOptions::default(),
    );
    rig.sink.on_accelerated_paint(paint(0x10));
    let RenderOutcome::Presented { pass, .. } = rig.render() else {
        panic!("expected a presented frame");
    };
    assert_eq!(pass.pass, ColorPass::Linearize);
    assert!(pass.premultiplied);
}

#[test]
fn surface_origin_is_passed_through() {
    let options = PresenterOptions {
        origin: SurfaceOrigin::BottomLeft,
        ..PresenterOptions::default()
    };
    let mut rig = Rig::build(MockHost::new(ColorSpace::Gamma), |p| p, options);
    rig.sink.on_accelerated_paint(paint(0x10));
    let RenderOutcome::Presented { pass, .. } = rig.render() else {
        panic!("expected a presented frame");
    };
    assert_eq!(pass.origin, SurfaceOrigin::BottomLeft);
    assert_eq!(pass.pass, ColorPass::Blit);
}

#[test]
fn newer_runtimes_get_reference_fix() {
    let mut rig = Rig::new(MockHost::new(ColorSpace::Linear).with_runtime_version(RuntimeVersion::new(4, 2, 0)));
    rig.sink.on_accelerated_paint(paint(0x10));
    rig.render();
    let commands = rig.host_commands();
    let open = commands
        .iter()
        .position(|c| matches!(c, HostCommand::Open { surface: 1, .. }))
        .expect("open");
    assert_eq!(commands[open + 1], HostCommand::ReleaseReference { surface: 1 });
}

#[test]
fn hosts_without_versioned_open_use_legacy_api() {
    let caps = DeviceCapabilities {
        shared_resources: true,
        shared_fences: true,
        versioned_open: false,
    };
    let mut rig = Rig::new(MockHost::new(ColorSpace::Linear).with_capabilities(caps));
    rig.sink.on_accelerated_paint(paint(0x10));
    rig.render();
    assert!(rig.host_commands().iter().any(|c| matches!(
        c,
        HostCommand::Open {
            api: OpenApi::Legacy,
            ..
        }
    )));
    assert!(!rig
        .host_commands()
        .iter()
        .any(|c| matches!(c, HostCommand::ReleaseReference { .. })));
}

#[test]
fn panicking_paint_is_contained() {
    let mut rig = Rig::new(MockHost::new(ColorSpace::Linear));
    rig.controls.panic_next_open();
    rig.sink.on_accelerated_paint(paint(0x10));

    let reports = rig.diagnostics.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].class(), ErrorClass::Panic);
    assert!(reports[0].to_string().contains("mock producer panicked"));

    rig.sink.on_accelerated_paint(paint(0x11));
    assert!(matches!(rig.render(), RenderOutcome::Presented { .. }));
}

#[test]
fn dispose_drains_queue_and_is_idempotent() {
    let options = PresenterOptions {
        capacity: ChannelCapacity::Double,
        ..PresenterOptions::default()
    };
    let mut rig = Rig::build(MockHost::new(ColorSpace::Linear), |p| p, options);
    rig.sink.on_accelerated_paint(paint(0x10));
    rig.sink.on_accelerated_paint(paint(0x11));
    rig.sink.on_raster_paint(&[0; 4], 1, 1);
    assert_eq!(rig.ledger.live(), 2);

    rig.presenter.dispose();
    rig.presenter.dispose();
    assert_eq!(rig.ledger.live(), 0);
    assert_eq!(rig.sink.stats().handoff.drained, 2);
    assert_eq!(rig.render(), RenderOutcome::Disposed);

    rig.sink.on_accelerated_paint(paint(0x12));
    rig.sink.on_raster_paint(&[0; 4], 1, 1);
    let stats = rig.sink.stats();
    assert_eq!(stats.accelerated_ignored, 1);
    assert_eq!(stats.raster_frames, 1);
    assert_eq!(rig.ledger.live(), 0);
    rig.ledger.assert_all_disposed_once();
}

#[test]
fn unchanged_viewport_resizes_browser_once() {
    let mut rig = Rig::new(MockHost::new(ColorSpace::Linear));
    for _ in 0..5 {
        rig.render();
    }
    assert_eq!(rig.browser.resizes(), vec![(16, 8)]);

    rig.presenter.set_scale_factor(2.0);
    rig.render();
    rig.render();
    assert_eq!(rig.browser.screen_info_changes(), 1);
    assert_eq!(rig.browser.resizes(), vec![(16, 8), (8, 4)]);
}
