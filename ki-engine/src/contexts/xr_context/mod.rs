use log::{debug, info, warn};
use openxr::{self as xr, SessionState, ViewStateFlags};

use crate::{
    config::RenderConfig,
    rendering::{LayerSubmitter, LayerView, RenderTarget, SwapchainManager},
    runtime::{SwapchainHandle, XrRuntime},
    util::is_view_valid,
    KiError, KiResult, VIEW_COUNT,
};

/// Where the session is in its lifecycle.
///
/// A context only exists once its session has been created, so there is no uninitialized state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLoopState {
    /// The session exists but has not been begun
    Created,
    /// The session is running, between frames
    Begun,
    /// `wait_frame` returned; the frame has not been begun
    WaitingFrame,
    /// The frame has begun and must be ended
    FrameActive,
    /// The session has been ended
    Ended,
}

type ManagedSwapchain<R> = SwapchainManager<<R as XrRuntime>::Swapchain>;

/// Owns the session and everything created from it.
///
/// Fields are declared in reverse creation order, so the swapchain and reference space are
/// destroyed before the session.
pub struct XrContext<R: XrRuntime> {
    swapchain: Option<ManagedSwapchain<R>>,
    reference_space: Option<R::Space>,
    runtime: R,
    state: FrameLoopState,
    session_state: SessionState,
    frame_state: Option<xr::FrameState>,
    views: Vec<xr::View>,
    view_state_flags: ViewStateFlags,
    submitter: LayerSubmitter,
    image_wait_timeout: xr::Duration,
}

impl<R: XrRuntime> XrContext<R> {
    /// Wrap a runtime whose session has just been created
    pub fn new(runtime: R, config: &RenderConfig) -> Self {
        Self {
            swapchain: None,
            reference_space: None,
            runtime,
            state: FrameLoopState::Created,
            session_state: SessionState::IDLE,
            frame_state: None,
            views: vec![Default::default(); VIEW_COUNT as usize],
            view_state_flags: ViewStateFlags::EMPTY,
            submitter: LayerSubmitter::new(),
            image_wait_timeout: config.image_wait_timeout(),
        }
    }

    /// The runtime
    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// The runtime, mutably
    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }

    /// Where the session is in its lifecycle
    pub fn state(&self) -> FrameLoopState {
        self.state
    }

    /// The last session state reported by the runtime
    pub fn session_state(&self) -> SessionState {
        self.session_state
    }

    /// Whether the session has been begun and not yet ended
    pub fn is_running(&self) -> bool {
        matches!(
            self.state,
            FrameLoopState::Begun | FrameLoopState::WaitingFrame | FrameLoopState::FrameActive
        )
    }

    /// The frame state of the current frame, if a frame has been waited on
    pub fn frame_state(&self) -> Option<&xr::FrameState> {
        self.frame_state.as_ref()
    }

    /// The eye views located for the current frame
    pub fn views(&self) -> &[xr::View] {
        &self.views
    }

    /// Whether the views located for the current frame are usable
    pub fn views_valid(&self) -> bool {
        is_view_valid(&self.view_state_flags)
    }

    /// The swapchain, once the session has begun
    pub fn swapchain(&self) -> Option<&ManagedSwapchain<R>> {
        self.swapchain.as_ref()
    }

    /// Frames accepted by the runtime so far
    pub fn submitted_frames(&self) -> usize {
        self.submitter.submitted_frames()
    }

    /// Poll for at most one session state change, returning the current session state
    pub fn poll_session_state(&mut self) -> KiResult<SessionState> {
        if let Some(new_state) = self
            .runtime
            .poll_session_state()
            .map_err(KiError::runtime("xrPollEvent"))?
        {
            info!("[KI_POLL_EVENT] State is now {new_state:?}");
            self.session_state = new_state;
        }
        Ok(self.session_state)
    }

    /// Begin the session, then create the reference space and the stereo swapchain.
    pub fn begin_session(&mut self) -> KiResult<()> {
        self.expect_state("xrBeginSession", FrameLoopState::Created)?;

        info!("[KI_XR] Beginning session..");
        self.runtime
            .begin_session()
            .map_err(KiError::unavailable("xrBeginSession"))?;
        self.state = FrameLoopState::Begun;

        let reference_space = self
            .runtime
            .create_reference_space()
            .map_err(KiError::unavailable("xrCreateReferenceSpace"))?;
        let extent = self
            .runtime
            .recommended_view_extent()
            .map_err(KiError::unavailable("xrEnumerateViewConfigurationViews"))?;
        let handle = self
            .runtime
            .create_swapchain(extent, VIEW_COUNT)
            .map_err(KiError::unavailable("xrCreateSwapchain"))?;
        info!(
            "[KI_XR] Swapchain is {}x{} with {} images",
            extent.width,
            extent.height,
            handle.images().len()
        );

        self.reference_space = Some(reference_space);
        self.swapchain = Some(SwapchainManager::new(handle, extent));
        info!("[KI_XR] ..done!");
        Ok(())
    }

    /// Block until the runtime wants the next frame.
    ///
    /// On failure no frame is in flight and the context stays `Begun`.
    pub fn wait_frame(&mut self) -> KiResult<xr::FrameState> {
        self.expect_state("xrWaitFrame", FrameLoopState::Begun)?;
        let frame_state = self
            .runtime
            .wait_frame()
            .map_err(KiError::runtime("xrWaitFrame"))?;
        debug!(
            "[KI_XR] Frame predicted for {} (should_render: {})",
            frame_state.predicted_display_time.as_nanos(),
            frame_state.should_render
        );

        self.frame_state = Some(frame_state);
        self.state = FrameLoopState::WaitingFrame;
        Ok(frame_state)
    }

    /// Mark the start of the frame returned by the last `wait_frame`.
    ///
    /// On failure the frame is abandoned and the context goes back to `Begun`.
    pub fn begin_frame(&mut self) -> KiResult<()> {
        self.expect_state("xrBeginFrame", FrameLoopState::WaitingFrame)?;
        if let Err(result) = self.runtime.begin_frame() {
            self.state = FrameLoopState::Begun;
            self.frame_state = None;
            return Err(KiError::runtime("xrBeginFrame")(result));
        }
        self.state = FrameLoopState::FrameActive;
        Ok(())
    }

    /// Locate both eyes at the current frame's predicted display time
    pub fn locate_views(&mut self) -> KiResult<&[xr::View]> {
        self.expect_state("xrLocateViews", FrameLoopState::FrameActive)?;
        let display_time = self.current_display_time("xrLocateViews")?;
        let space = self.reference_space.as_ref().ok_or_else(|| {
            KiError::protocol("xrLocateViews", "the reference space has not been created")
        })?;

        let (view_state_flags, views) = self
            .runtime
            .locate_views(space, display_time)
            .map_err(KiError::runtime("xrLocateViews"))?;
        if views.len() != VIEW_COUNT as usize {
            return Err(KiError::protocol(
                "xrLocateViews",
                format!("runtime located {} views", views.len()),
            ));
        }

        self.view_state_flags = view_state_flags;
        self.views = views;
        Ok(&self.views)
    }

    /// Get the layer of a writable swapchain image for `eye`.
    ///
    /// Releases any image an earlier frame failed to hand back. Then acquires a new image unless
    /// one is still waiting from a timed out call, and waits for it with the configured timeout.
    pub fn acquire_writable(
        &mut self,
        eye: usize,
    ) -> KiResult<RenderTarget<<R::Swapchain as SwapchainHandle>::Image>> {
        self.expect_state("xrAcquireSwapchainImage", FrameLoopState::FrameActive)?;
        let timeout = self.image_wait_timeout;
        let swapchain = self.swapchain_mut("xrAcquireSwapchainImage")?;

        let stale = swapchain.release_written()?;
        if stale > 0 {
            debug!("[KI_XR] Released {stale} image(s) held over from an earlier frame");
        }
        if swapchain.pending_wait().is_none() {
            swapchain.acquire()?;
        }
        swapchain.wait_ready(timeout)?;
        swapchain.writable_image(eye)
    }

    /// Hand the image rendered this frame back to the runtime
    pub fn release_image(&mut self) -> KiResult<()> {
        self.expect_state("xrReleaseSwapchainImage", FrameLoopState::FrameActive)?;
        self.swapchain_mut("xrReleaseSwapchainImage")?
            .release()
            .map(|_| ())
    }

    /// End the current frame. An empty `views` ends it without a layer.
    ///
    /// The frame is over whether or not the runtime accepts it.
    pub fn end_frame(&mut self, views: &[LayerView]) -> KiResult<()> {
        self.expect_state("xrEndFrame", FrameLoopState::FrameActive)?;
        let frame_state = self
            .frame_state
            .take()
            .ok_or_else(|| KiError::protocol("xrEndFrame", "no frame has been waited on"))?;
        self.state = FrameLoopState::Begun;

        let (Some(space), Some(swapchain)) = (self.reference_space.as_ref(), self.swapchain.as_ref())
        else {
            return Err(KiError::protocol(
                "xrEndFrame",
                "the session has no reference space or swapchain",
            ));
        };

        self.submitter.submit(
            &mut self.runtime,
            &frame_state,
            space,
            swapchain,
            self.views.len(),
            views,
        )
    }

    /// End the running session
    pub fn end_session(&mut self) -> KiResult<()> {
        self.expect_state("xrEndSession", FrameLoopState::Begun)?;
        self.runtime
            .end_session()
            .map_err(KiError::runtime("xrEndSession"))?;
        self.state = FrameLoopState::Ended;
        Ok(())
    }

    /// Destroy the swapchain, then the reference space, then the session
    pub fn shutdown(mut self) -> KiResult<()> {
        if self.state == FrameLoopState::FrameActive {
            warn!("[KI_XR] Shutting down with a frame in flight, ending it");
            if let Err(e) = self.end_frame(&[]) {
                warn!("[KI_XR] Unable to end the frame: {e}");
            }
        }
        if self.is_running() && self.session_state == SessionState::STOPPING {
            self.end_session()?;
        }

        info!("[KI_XR] Destroying swapchain..");
        drop(self.swapchain.take());
        info!("[KI_XR] Destroying reference space..");
        drop(self.reference_space.take());
        info!("[KI_XR] Destroying session..");
        drop(self);
        info!("[KI_XR] ..done!");
        Ok(())
    }

    fn expect_state(&self, call: &'static str, expected: FrameLoopState) -> KiResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(KiError::protocol(
                call,
                format!("expected {expected:?}, but the session is {:?}", self.state),
            ))
        }
    }

    fn current_display_time(&self, call: &'static str) -> KiResult<xr::Time> {
        self.frame_state
            .as_ref()
            .map(|f| f.predicted_display_time)
            .ok_or_else(|| KiError::protocol(call, "no frame has been waited on"))
    }

    fn swapchain_mut(&mut self, call: &'static str) -> KiResult<&mut ManagedSwapchain<R>> {
        self.swapchain
            .as_mut()
            .ok_or_else(|| KiError::protocol(call, "the swapchain has not been created"))
    }
}
