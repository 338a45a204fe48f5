use ki_engine::{
    rendering::LayerView,
    runtime::{SwapchainHandle, WaitStatus, XrRuntime},
    simulator::{
        HeadlessHost, RecordingGraphics, SimulatedCall, SimulatedRuntime, SimulatedSpace,
        SimulatedSwapchain, SimulatorSettings,
    },
    xr, Engine, EngineBuilder, FrameOutcome, KiError, RenderConfig, ShouldRenderPolicy,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn engine_with(
    config: RenderConfig,
    settings: SimulatorSettings,
) -> Engine<SimulatedRuntime, RecordingGraphics> {
    init_logging();
    EngineBuilder::new()
        .config(config)
        .build(SimulatedRuntime::new(settings), RecordingGraphics::default())
        .unwrap()
}

fn engine() -> Engine<SimulatedRuntime, RecordingGraphics> {
    engine_with(RenderConfig::default(), SimulatorSettings::default())
}

fn outcome(engine: &mut Engine<SimulatedRuntime, RecordingGraphics>) -> FrameOutcome {
    engine.update().unwrap().outcome
}

#[test]
pub fn test_hundred_frames() {
    let mut engine = engine();
    let mut host = HeadlessHost::with_frame_limit(100);
    engine.run(&mut host).unwrap();

    let submitted = engine.xr_context.runtime().submitted_frames();
    assert_eq!(submitted.len(), 100);
    for pair in submitted.windows(2) {
        assert!(pair[1].display_time.as_nanos() > pair[0].display_time.as_nanos());
    }
    for frame in submitted {
        assert_eq!(frame.views.len(), 2);
        let indices: Vec<u32> = frame.views.iter().map(|v| v.image_array_index).collect();
        assert_eq!(indices, vec![0, 1]);
    }

    let graphics = &engine.render_context.graphics;
    assert_eq!(graphics.draw_count(), 200);
    let layers: Vec<u32> = graphics.bound_targets().iter().map(|(_, l)| *l).collect();
    assert!(layers.chunks(2).all(|eyes| eyes == [0, 1]));

    engine.shutdown().unwrap();
}

#[test]
pub fn test_submitted_views_match_located_views() {
    let mut engine = engine();
    assert!(matches!(
        outcome(&mut engine),
        FrameOutcome::Submitted { view_count: 2, .. }
    ));

    let located = engine.xr_context.views().to_vec();
    let submitted = &engine.xr_context.runtime().submitted_frames()[0];
    for (view, layer_view) in located.iter().zip(&submitted.views) {
        assert_eq!(view.pose.position.x, layer_view.pose.position.x);
        assert_eq!(view.fov.angle_left, layer_view.fov.angle_left);
        assert_eq!(layer_view.image_rect.extent.width, 1440);
        assert_eq!(layer_view.image_rect.extent.height, 1600);
    }
}

#[test]
pub fn test_zero_timeout_on_unsignaled_image() {
    let config = RenderConfig {
        image_wait_timeout_ms: Some(0),
        ..Default::default()
    };
    let settings = SimulatorSettings {
        image_signal_latency_ns: 1_000_000,
        ..Default::default()
    };
    let mut engine = engine_with(config, settings);

    // The frame is still ended, just without a layer
    assert!(matches!(outcome(&mut engine), FrameOutcome::Empty { .. }));
    assert!(engine.xr_context.runtime().submitted_frames()[0]
        .views
        .is_empty());
    assert_eq!(engine.render_context.graphics.draw_count(), 0);

    // The timed out image is still ours, and is picked up once the runtime signals it
    let swapchain = engine.xr_context.swapchain().unwrap();
    assert_eq!(swapchain.outstanding(), 1);
    assert_eq!(swapchain.pending_wait(), Some(0));

    engine.xr_context.runtime_mut().set_image_signal_latency(0);
    assert!(matches!(
        outcome(&mut engine),
        FrameOutcome::Submitted { .. }
    ));
    assert_eq!(engine.xr_context.swapchain().unwrap().outstanding(), 0);
}

#[test]
pub fn test_always_render_ignores_should_render() {
    let mut engine = engine();
    engine.xr_context.runtime_mut().skip_rendering_next(3);
    for _ in 0..3 {
        assert!(matches!(
            outcome(&mut engine),
            FrameOutcome::Submitted { .. }
        ));
    }
    assert_eq!(engine.render_context.graphics.draw_count(), 6);
}

#[test]
pub fn test_honor_runtime_skips_gpu_work() {
    let config = RenderConfig {
        should_render: ShouldRenderPolicy::HonorRuntime,
        ..Default::default()
    };
    let mut engine = engine_with(config, SimulatorSettings::default());

    // READY, then SYNCHRONIZED: the session is not visible yet
    assert!(matches!(outcome(&mut engine), FrameOutcome::Empty { .. }));
    assert!(matches!(outcome(&mut engine), FrameOutcome::Empty { .. }));
    // VISIBLE
    assert!(matches!(
        outcome(&mut engine),
        FrameOutcome::Submitted { .. }
    ));
    assert_eq!(engine.render_context.graphics.draw_count(), 2);

    engine.xr_context.runtime_mut().skip_rendering_next(2);
    assert!(matches!(outcome(&mut engine), FrameOutcome::Empty { .. }));
    assert!(matches!(outcome(&mut engine), FrameOutcome::Empty { .. }));
    assert!(matches!(
        outcome(&mut engine),
        FrameOutcome::Submitted { .. }
    ));

    // Skipped GPU work never skips ending the frame
    assert_eq!(engine.xr_context.runtime().submitted_frames().len(), 6);
    assert_eq!(engine.render_context.graphics.draw_count(), 4);
}

#[test]
pub fn test_untracked_views_end_frame_without_layers() {
    let mut engine = engine();
    engine.xr_context.runtime_mut().lose_tracking_next(1);
    assert!(matches!(outcome(&mut engine), FrameOutcome::Empty { .. }));
    assert!(matches!(
        outcome(&mut engine),
        FrameOutcome::Submitted { .. }
    ));
}

#[test]
pub fn test_transient_failures_skip_one_frame() {
    let mut engine = engine();
    assert!(matches!(
        outcome(&mut engine),
        FrameOutcome::Submitted { .. }
    ));

    let runtime = engine.xr_context.runtime_mut();
    runtime.fail_next(
        SimulatedCall::WaitFrame,
        xr::sys::Result::ERROR_RUNTIME_FAILURE,
    );
    assert!(matches!(outcome(&mut engine), FrameOutcome::Skipped));

    engine.xr_context.runtime_mut().fail_next(
        SimulatedCall::BeginFrame,
        xr::sys::Result::ERROR_RUNTIME_FAILURE,
    );
    assert!(matches!(outcome(&mut engine), FrameOutcome::Skipped));

    engine.xr_context.runtime_mut().fail_next(
        SimulatedCall::EndFrame,
        xr::sys::Result::ERROR_RUNTIME_FAILURE,
    );
    assert!(matches!(outcome(&mut engine), FrameOutcome::Dropped { .. }));

    engine.xr_context.runtime_mut().fail_next(
        SimulatedCall::LocateViews,
        xr::sys::Result::ERROR_RUNTIME_FAILURE,
    );
    assert!(matches!(outcome(&mut engine), FrameOutcome::Empty { .. }));

    assert!(matches!(
        outcome(&mut engine),
        FrameOutcome::Submitted { .. }
    ));
    // Skipped and dropped frames are never submitted
    assert_eq!(engine.xr_context.runtime().submitted_frames().len(), 3);
}

#[test]
pub fn test_failed_release_recovers_next_frame() {
    let mut engine = engine();
    assert!(matches!(
        outcome(&mut engine),
        FrameOutcome::Submitted { .. }
    ));

    engine.xr_context.runtime_mut().fail_next(
        SimulatedCall::ReleaseImage,
        xr::sys::Result::ERROR_RUNTIME_FAILURE,
    );
    assert!(matches!(outcome(&mut engine), FrameOutcome::Empty { .. }));
    assert_eq!(engine.xr_context.swapchain().unwrap().outstanding(), 1);

    // The held image goes back to the runtime before the next one is acquired
    for _ in 0..5 {
        assert!(matches!(
            outcome(&mut engine),
            FrameOutcome::Submitted { view_count: 2, .. }
        ));
        assert_eq!(engine.xr_context.swapchain().unwrap().outstanding(), 0);
    }
    assert_eq!(engine.xr_context.runtime().submitted_frames().len(), 7);
}

#[test]
pub fn test_exit_flow() {
    let mut engine = engine();
    for _ in 0..4 {
        assert!(matches!(
            outcome(&mut engine),
            FrameOutcome::Submitted { .. }
        ));
    }

    engine.xr_context.runtime_mut().request_exit();
    let mut host = HeadlessHost::default();
    engine.run(&mut host).unwrap();

    // STOPPING, IDLE, EXITING
    assert_eq!(host.frames(), 3);
    assert_eq!(
        engine.xr_context.state(),
        ki_engine::contexts::FrameLoopState::Ended
    );
    assert_eq!(engine.xr_context.runtime().submitted_frames().len(), 4);
    engine.shutdown().unwrap();
}

#[test]
pub fn test_loss_pending_stops_the_engine() {
    let mut engine = engine();
    outcome(&mut engine);
    engine.xr_context.runtime_mut().lose_instance();
    for _ in 0..3 {
        outcome(&mut engine);
    }
    assert!(matches!(engine.update(), Err(KiError::ShuttingDown)));
}

#[test]
pub fn test_quit_request() {
    let mut engine = engine();
    outcome(&mut engine);
    engine.request_quit();
    assert!(matches!(engine.update(), Err(KiError::ShuttingDown)));
}

#[test]
pub fn test_invalid_config_is_rejected() {
    let config = RenderConfig {
        near: 1.0,
        far: 0.5,
        ..Default::default()
    };
    let result = EngineBuilder::new()
        .config(config)
        .build(SimulatedRuntime::default(), RecordingGraphics::default());
    assert!(matches!(result, Err(KiError::Config(_))));
}

/// A runtime whose swapchain hands out an image index it does not have.
struct BrokenSwapchainRuntime(SimulatedRuntime);

struct BrokenSwapchain(SimulatedSwapchain);

impl SwapchainHandle for BrokenSwapchain {
    type Image = u32;

    fn images(&self) -> &[u32] {
        self.0.images()
    }

    fn acquire(&mut self) -> xr::Result<u32> {
        self.0.acquire()?;
        Ok(self.0.images().len() as u32)
    }

    fn wait(&mut self, timeout: xr::Duration) -> xr::Result<WaitStatus> {
        self.0.wait(timeout)
    }

    fn release(&mut self) -> xr::Result<()> {
        self.0.release()
    }
}

impl XrRuntime for BrokenSwapchainRuntime {
    type Space = SimulatedSpace;
    type Swapchain = BrokenSwapchain;

    fn recommended_view_extent(&self) -> xr::Result<xr::Extent2Di> {
        self.0.recommended_view_extent()
    }

    fn create_reference_space(&mut self) -> xr::Result<SimulatedSpace> {
        self.0.create_reference_space()
    }

    fn create_swapchain(
        &mut self,
        extent: xr::Extent2Di,
        array_size: u32,
    ) -> xr::Result<BrokenSwapchain> {
        self.0.create_swapchain(extent, array_size).map(BrokenSwapchain)
    }

    fn poll_session_state(&mut self) -> xr::Result<Option<xr::SessionState>> {
        self.0.poll_session_state()
    }

    fn begin_session(&mut self) -> xr::Result<()> {
        self.0.begin_session()
    }

    fn wait_frame(&mut self) -> xr::Result<xr::FrameState> {
        self.0.wait_frame()
    }

    fn begin_frame(&mut self) -> xr::Result<()> {
        self.0.begin_frame()
    }

    fn locate_views(
        &mut self,
        space: &SimulatedSpace,
        display_time: xr::Time,
    ) -> xr::Result<(xr::ViewStateFlags, Vec<xr::View>)> {
        self.0.locate_views(space, display_time)
    }

    fn end_frame(
        &mut self,
        display_time: xr::Time,
        space: &SimulatedSpace,
        swapchain: &BrokenSwapchain,
        views: &[LayerView],
    ) -> xr::Result<()> {
        self.0.end_frame(display_time, space, &swapchain.0, views)
    }

    fn end_session(&mut self) -> xr::Result<()> {
        self.0.end_session()
    }
}

#[test]
pub fn test_protocol_violation_is_fatal() {
    init_logging();
    let mut engine = EngineBuilder::new()
        .build(
            BrokenSwapchainRuntime(SimulatedRuntime::default()),
            RecordingGraphics::default(),
        )
        .unwrap();

    let error = engine
        .run(&mut HeadlessHost::with_frame_limit(10))
        .unwrap_err();
    assert!(matches!(
        error,
        KiError::ProtocolViolation {
            call: "xrAcquireSwapchainImage",
            ..
        }
    ));

    // The frame that failed was still ended
    let submitted = engine.xr_context.runtime().0.submitted_frames();
    assert_eq!(submitted.len(), 1);
    assert!(submitted[0].views.is_empty());
}
