use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::sleep,
    time::Duration,
};

use anyhow::Context;
use log::{debug, error, info, warn};
use openxr::{self as xr, SessionState};

use crate::{
    config::{RenderConfig, ShouldRenderPolicy},
    contexts::{FrameLoopState, GraphicsProvider, RenderContext, XrContext},
    rendering::LayerView,
    runtime::{SwapchainHandle, XrRuntime},
    util::FrameCounter,
    KiError, KiResult,
};

/// How long to sleep between polls while the session is not running
const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// The window system the engine runs inside.
pub trait HostWindow {
    /// Pump the window system's event queue
    fn poll_events(&mut self);

    /// Whether the user has asked to close the application
    fn should_close(&self) -> bool;
}

/// Builder for [`Engine`].
#[derive(Debug, Default)]
pub struct EngineBuilder {
    config: RenderConfig,
    handle_ctrl_c: bool,
}

impl EngineBuilder {
    /// Create an `EngineBuilder`
    pub fn new() -> Self {
        Default::default()
    }

    /// Set the render configuration
    pub fn config(mut self, config: RenderConfig) -> Self {
        self.config = config;
        self
    }

    /// Stop the engine when Ctrl-C is pressed. Only one engine per process may do this.
    pub fn handle_ctrl_c(mut self, handle_ctrl_c: bool) -> Self {
        self.handle_ctrl_c = handle_ctrl_c;
        self
    }

    /// Build the `Engine` around a runtime whose session has been created
    pub fn build<R, P>(self, runtime: R, graphics: P) -> KiResult<Engine<R, P>>
    where
        R: XrRuntime,
        P: GraphicsProvider<Image = <R::Swapchain as SwapchainHandle>::Image>,
    {
        self.config.validate()?;
        let should_quit = Arc::new(AtomicBool::from(false));

        if self.handle_ctrl_c {
            let should_quit = should_quit.clone();
            ctrlc::set_handler(move || should_quit.store(true, Ordering::Relaxed))
                .context("Unable to register the Ctrl-C handler")?;
        }

        info!("[KI_ENGINE] Config: {:?}", self.config);
        Ok(Engine {
            should_quit,
            xr_context: XrContext::new(runtime, &self.config),
            render_context: RenderContext::new(graphics, &self.config),
            config: self.config,
            frame_counter: Default::default(),
        })
    }
}

/// What happened during one call to [`Engine::update`].
#[derive(Debug, Clone, Copy)]
pub enum FrameOutcome {
    /// The session is not running, so no frame was attempted
    Idle,
    /// `wait_frame` or `begin_frame` failed; no frame was started
    Skipped,
    /// The frame was ended without a layer
    Empty {
        /// The display time the frame was ended for
        display_time: xr::Time,
    },
    /// The projection layer was submitted
    Submitted {
        /// The display time the layer was submitted for
        display_time: xr::Time,
        /// The number of views in the layer
        view_count: usize,
    },
    /// The runtime rejected the frame
    Dropped {
        /// The display time the frame was ended for
        display_time: xr::Time,
    },
}

/// The result of calling `update()` on Engine.
#[derive(Debug, Clone, Copy)]
pub struct TickData {
    /// The previous XR state.
    pub previous_state: SessionState,
    /// The current XR state.
    pub current_state: SessionState,
    /// What happened to this tick's frame
    pub outcome: FrameOutcome,
}

/// The engine: a session with an XR runtime and a renderer for it.
pub struct Engine<R, P>
where
    R: XrRuntime,
    P: GraphicsProvider<Image = <R::Swapchain as SwapchainHandle>::Image>,
{
    should_quit: Arc<AtomicBool>,
    /// The session and frame state machine
    pub xr_context: XrContext<R>,
    /// The per-eye renderer
    pub render_context: RenderContext<P>,
    config: RenderConfig,
    frame_counter: FrameCounter,
}

impl<R, P> Engine<R, P>
where
    R: XrRuntime,
    P: GraphicsProvider<Image = <R::Swapchain as SwapchainHandle>::Image>,
{
    /// The configuration the engine was built with
    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Ask the engine to stop at the next call to `update`
    pub fn request_quit(&self) {
        self.should_quit.store(true, Ordering::Release);
    }

    /// Frames per second over the last complete second
    pub fn frame_rate(&self) -> Option<usize> {
        self.frame_counter.last_rate()
    }

    /// Handle at most one session event, then run one frame if the session is running.
    ///
    /// Returns [`KiError::ShuttingDown`] once the runtime or the user wants to stop.
    pub fn update(&mut self) -> KiResult<TickData> {
        if self.should_quit.load(Ordering::Acquire) {
            info!("[KI_ENGINE] KI Engine is now exiting!");
            return Err(KiError::ShuttingDown);
        }

        let previous_state = self.xr_context.session_state();
        let current_state = self.xr_context.poll_session_state()?;
        let tick = |outcome| TickData {
            previous_state,
            current_state,
            outcome,
        };

        match current_state {
            SessionState::EXITING | SessionState::LOSS_PENDING => {
                info!("[KI_ENGINE] Runtime reported {current_state:?}, exiting");
                return Err(KiError::ShuttingDown);
            }
            SessionState::STOPPING if self.xr_context.is_running() => {
                info!("[KI_ENGINE] Session is stopping");
                self.xr_context.end_session()?;
                return Ok(tick(FrameOutcome::Idle));
            }
            SessionState::READY if self.xr_context.state() == FrameLoopState::Created => {
                self.xr_context.begin_session()?;
            }
            _ => {}
        }

        if !self.xr_context.is_running() {
            return Ok(tick(FrameOutcome::Idle));
        }

        let outcome = self.run_frame()?;
        if !matches!(outcome, FrameOutcome::Skipped) {
            self.frame_counter.tick();
        }
        Ok(tick(outcome))
    }

    /// Call `update` until `host` closes, the runtime exits or a fatal error occurs.
    pub fn run<H: HostWindow>(&mut self, host: &mut H) -> KiResult<()> {
        while !host.should_close() {
            host.poll_events();
            match self.update() {
                Ok(TickData {
                    outcome: FrameOutcome::Idle,
                    ..
                }) => sleep(IDLE_SLEEP),
                Ok(_) => {}
                Err(KiError::ShuttingDown) => return Ok(()),
                Err(e) if e.is_fatal() => {
                    error!("[KI_ENGINE] !!FATAL ERROR!! {e}");
                    return Err(e);
                }
                Err(e) => warn!("[KI_ENGINE] {e}"),
            }
        }
        info!("[KI_ENGINE] Host window closed");
        Ok(())
    }

    /// Tear down the swapchain, reference space and session, in that order
    pub fn shutdown(self) -> KiResult<()> {
        info!(
            "[KI_ENGINE] Shutting down after {} frames",
            self.xr_context.submitted_frames()
        );
        let Engine {
            xr_context,
            render_context,
            ..
        } = self;
        drop(render_context);
        xr_context.shutdown()
    }

    fn run_frame(&mut self) -> KiResult<FrameOutcome> {
        let frame_state = match self.xr_context.wait_frame() {
            Ok(frame_state) => frame_state,
            Err(e) if !e.is_fatal() => {
                warn!("[KI_ENGINE] Skipping frame: {e}");
                return Ok(FrameOutcome::Skipped);
            }
            Err(e) => return Err(e),
        };
        match self.xr_context.begin_frame() {
            Ok(()) => {}
            Err(e) if !e.is_fatal() => {
                warn!("[KI_ENGINE] Skipping frame: {e}");
                return Ok(FrameOutcome::Skipped);
            }
            Err(e) => return Err(e),
        }

        // Once begun, the frame is always ended.
        let layer_views = match self.render_views(&frame_state) {
            Ok(layer_views) => layer_views,
            Err(e) if !e.is_fatal() => {
                warn!("[KI_ENGINE] Ending frame without layers: {e}");
                Vec::new()
            }
            Err(e) => {
                if let Err(end_error) = self.xr_context.end_frame(&[]) {
                    warn!("[KI_ENGINE] Unable to end the frame: {end_error}");
                }
                return Err(e);
            }
        };

        let display_time = frame_state.predicted_display_time;
        match self.xr_context.end_frame(&layer_views) {
            Ok(()) if layer_views.is_empty() => Ok(FrameOutcome::Empty { display_time }),
            Ok(()) => Ok(FrameOutcome::Submitted {
                display_time,
                view_count: layer_views.len(),
            }),
            Err(e) if !e.is_fatal() => {
                warn!("[KI_ENGINE] Frame was dropped: {e}");
                Ok(FrameOutcome::Dropped { display_time })
            }
            Err(e) => Err(e),
        }
    }

    fn render_views(&mut self, frame_state: &xr::FrameState) -> KiResult<Vec<LayerView>> {
        let views = self.xr_context.locate_views()?.to_vec();
        if !self.xr_context.views_valid() {
            debug!("[KI_ENGINE] Views are not tracked, ending frame without layers");
            return Ok(Vec::new());
        }
        if !frame_state.should_render && self.config.should_render == ShouldRenderPolicy::HonorRuntime
        {
            debug!("[KI_ENGINE] Runtime asked us not to render");
            return Ok(Vec::new());
        }

        let mut layer_views = Vec::with_capacity(views.len());
        for (eye, view) in views.iter().enumerate() {
            let target = self.xr_context.acquire_writable(eye)?;
            let rendered = self.render_context.render_eye(eye, view, &target);
            self.xr_context.release_image()?;
            layer_views.push(rendered?);
        }
        Ok(layer_views)
    }
}
