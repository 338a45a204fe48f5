use std::{cell::Cell, collections::VecDeque, rc::Rc};

use glam::{vec3, Affine3A, Quat, Vec3};
use log::{debug, info};
use openxr::{self as xr, sys::Result as XrResult, SessionState, ViewStateFlags};

use crate::{
    rendering::LayerView,
    runtime::{SwapchainHandle, WaitStatus, XrRuntime},
    util::posef_from_affine,
    SWAPCHAIN_LENGTH, VIEW_COUNT,
};

/// How the simulated headset behaves.
#[derive(Debug, Clone)]
pub struct SimulatorSettings {
    /// Recommended per-eye image size
    pub extent: xr::Extent2Di,
    /// Time between predicted display times, in nanoseconds
    pub display_period_ns: i64,
    /// Field of view of the left eye. The right eye gets the mirror image.
    pub left_eye_fov: xr::Fovf,
    /// Distance between the eyes, in meters
    pub ipd: f32,
    /// Head position in the reference space
    pub head_position: Vec3,
    /// Head orientation in the reference space
    pub head_orientation: Quat,
    /// Number of images in the swapchain
    pub image_count: usize,
    /// How long after acquisition an image becomes writable, in nanoseconds
    pub image_signal_latency_ns: i64,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            extent: xr::Extent2Di {
                width: 1440,
                height: 1600,
            },
            // 90Hz
            display_period_ns: 11_111_111,
            left_eye_fov: xr::Fovf {
                angle_left: -0.942,
                angle_right: 0.698,
                angle_up: 0.698,
                angle_down: -0.873,
            },
            ipd: 0.064,
            head_position: vec3(0.0, 1.6, 0.0),
            head_orientation: Quat::IDENTITY,
            image_count: SWAPCHAIN_LENGTH,
            image_signal_latency_ns: 0,
        }
    }
}

/// The runtime calls a test can make fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedCall {
    /// `xrPollEvent`
    PollEvent,
    /// `xrBeginSession`
    BeginSession,
    /// `xrCreateReferenceSpace`
    CreateReferenceSpace,
    /// `xrCreateSwapchain`
    CreateSwapchain,
    /// `xrWaitFrame`
    WaitFrame,
    /// `xrBeginFrame`
    BeginFrame,
    /// `xrLocateViews`
    LocateViews,
    /// `xrReleaseSwapchainImage`
    ReleaseImage,
    /// `xrEndFrame`
    EndFrame,
    /// `xrEndSession`
    EndSession,
}

/// A frame the simulated compositor accepted.
#[derive(Debug, Clone)]
pub struct SubmittedFrame {
    /// The display time the frame was submitted for
    pub display_time: xr::Time,
    /// The projection views of the frame's single layer; empty when no layer was submitted
    pub views: Vec<LayerView>,
}

/// The reference space of a [`SimulatedRuntime`]. Poses are reported directly in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedSpace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FramePhase {
    Idle,
    Waited,
    Begun,
}

/// A deterministic XR runtime that lives in-process.
///
/// The session becomes READY straight away. Once begun it walks through SYNCHRONIZED,
/// VISIBLE and FOCUSED, one state per poll. Display times advance by exactly one display period
/// per `wait_frame`, so a test can reason about every frame.
pub struct SimulatedRuntime {
    settings: SimulatorSettings,
    events: VecDeque<SessionState>,
    session_state: SessionState,
    session_running: bool,
    phase: FramePhase,
    display_time: i64,
    frame_display_time: Option<i64>,
    failures: Vec<(SimulatedCall, XrResult)>,
    skip_rendering: usize,
    lost_tracking: usize,
    submitted_frames: Vec<SubmittedFrame>,
    released_images: Rc<Cell<usize>>,
    image_signal_latency: Rc<Cell<i64>>,
    release_failure: Rc<Cell<Option<XrResult>>>,
}

impl Default for SimulatedRuntime {
    fn default() -> Self {
        Self::new(SimulatorSettings::default())
    }
}

impl SimulatedRuntime {
    /// Create a simulated runtime with the given settings
    pub fn new(settings: SimulatorSettings) -> Self {
        let image_signal_latency = Rc::new(Cell::new(settings.image_signal_latency_ns));
        Self {
            settings,
            events: VecDeque::from([SessionState::READY]),
            session_state: SessionState::IDLE,
            session_running: false,
            phase: FramePhase::Idle,
            display_time: 0,
            frame_display_time: None,
            failures: Vec::new(),
            skip_rendering: 0,
            lost_tracking: 0,
            submitted_frames: Vec::new(),
            released_images: Default::default(),
            image_signal_latency,
            release_failure: Default::default(),
        }
    }

    /// The settings this runtime was created with
    pub fn settings(&self) -> &SimulatorSettings {
        &self.settings
    }

    /// The last session state the application has been told about
    pub fn session_state(&self) -> SessionState {
        self.session_state
    }

    /// Every frame the compositor has accepted, in submission order
    pub fn submitted_frames(&self) -> &[SubmittedFrame] {
        &self.submitted_frames
    }

    /// Make the next call to `call` fail with `result`
    pub fn fail_next(&mut self, call: SimulatedCall, result: XrResult) {
        match call {
            // Released through the swapchain, which shares this slot
            SimulatedCall::ReleaseImage => self.release_failure.set(Some(result)),
            _ => self.failures.push((call, result)),
        }
    }

    /// Report `should_render == false` for the next `frames` frames
    pub fn skip_rendering_next(&mut self, frames: usize) {
        self.skip_rendering = frames;
    }

    /// Report untracked views for the next `frames` calls to `locate_views`
    pub fn lose_tracking_next(&mut self, frames: usize) {
        self.lost_tracking = frames;
    }

    /// Change how long swapchain images take to become writable, in nanoseconds
    pub fn set_image_signal_latency(&mut self, latency_ns: i64) {
        self.image_signal_latency.set(latency_ns);
    }

    /// Move the simulated head
    pub fn set_head_pose(&mut self, orientation: Quat, position: Vec3) {
        self.settings.head_orientation = orientation;
        self.settings.head_position = position;
    }

    /// Behave as if the user asked the runtime to quit the application
    pub fn request_exit(&mut self) {
        info!("[KI_SIMULATOR] Exit requested");
        self.events.push_back(SessionState::STOPPING);
    }

    /// Behave as if the runtime is about to lose the instance
    pub fn lose_instance(&mut self) {
        self.events.push_back(SessionState::LOSS_PENDING);
    }

    fn check_failure(&mut self, call: SimulatedCall) -> xr::Result<()> {
        match self.failures.iter().position(|(c, _)| *c == call) {
            Some(i) => {
                let (_, result) = self.failures.remove(i);
                debug!("[KI_SIMULATOR] Failing {call:?} with {result:?}");
                Err(result)
            }
            None => Ok(()),
        }
    }

    fn check_running(&self) -> xr::Result<()> {
        if self.session_running {
            Ok(())
        } else {
            Err(XrResult::ERROR_SESSION_NOT_RUNNING)
        }
    }

    fn eye_views(&self) -> Vec<xr::View> {
        let settings = &self.settings;
        let head =
            Affine3A::from_rotation_translation(settings.head_orientation, settings.head_position);
        let left = settings.left_eye_fov;
        let right = xr::Fovf {
            angle_left: -left.angle_right,
            angle_right: -left.angle_left,
            ..left
        };

        [(-0.5, left), (0.5, right)]
            .into_iter()
            .map(|(side, fov)| {
                let eye = head * Affine3A::from_translation(vec3(side * settings.ipd, 0.0, 0.0));
                xr::View {
                    pose: posef_from_affine(eye),
                    fov,
                }
            })
            .collect()
    }

    fn check_layer(&self, views: &[LayerView]) -> xr::Result<()> {
        if views.len() != VIEW_COUNT as usize {
            return Err(XrResult::ERROR_VALIDATION_FAILURE);
        }
        let extent = self.settings.extent;
        for (i, view) in views.iter().enumerate() {
            let rect = view.image_rect;
            if view.image_array_index != i as u32
                || rect.offset.x < 0
                || rect.offset.y < 0
                || rect.offset.x + rect.extent.width > extent.width
                || rect.offset.y + rect.extent.height > extent.height
            {
                return Err(XrResult::ERROR_VALIDATION_FAILURE);
            }
        }
        if self.released_images.get() == 0 {
            return Err(XrResult::ERROR_LAYER_INVALID);
        }
        Ok(())
    }
}

impl XrRuntime for SimulatedRuntime {
    type Space = SimulatedSpace;
    type Swapchain = SimulatedSwapchain;

    fn recommended_view_extent(&self) -> xr::Result<xr::Extent2Di> {
        Ok(self.settings.extent)
    }

    fn create_reference_space(&mut self) -> xr::Result<SimulatedSpace> {
        self.check_failure(SimulatedCall::CreateReferenceSpace)?;
        Ok(SimulatedSpace)
    }

    fn create_swapchain(
        &mut self,
        extent: xr::Extent2Di,
        array_size: u32,
    ) -> xr::Result<SimulatedSwapchain> {
        self.check_failure(SimulatedCall::CreateSwapchain)?;
        if array_size == 0 || extent.width <= 0 || extent.height <= 0 {
            return Err(XrResult::ERROR_VALIDATION_FAILURE);
        }
        Ok(SimulatedSwapchain::new(
            self.settings.image_count,
            self.image_signal_latency.clone(),
            self.released_images.clone(),
            self.release_failure.clone(),
        ))
    }

    fn poll_session_state(&mut self) -> xr::Result<Option<SessionState>> {
        self.check_failure(SimulatedCall::PollEvent)?;
        let next = self.events.pop_front();
        if let Some(state) = next {
            debug!("[KI_SIMULATOR] Session state: {state:?}");
            self.session_state = state;
        }
        Ok(next)
    }

    fn begin_session(&mut self) -> xr::Result<()> {
        self.check_failure(SimulatedCall::BeginSession)?;
        if self.session_state != SessionState::READY {
            return Err(XrResult::ERROR_SESSION_NOT_READY);
        }
        if self.session_running {
            return Err(XrResult::ERROR_SESSION_RUNNING);
        }
        self.session_running = true;
        self.events.extend([
            SessionState::SYNCHRONIZED,
            SessionState::VISIBLE,
            SessionState::FOCUSED,
        ]);
        Ok(())
    }

    fn wait_frame(&mut self) -> xr::Result<xr::FrameState> {
        self.check_running()?;
        if self.phase == FramePhase::Waited {
            return Err(XrResult::ERROR_CALL_ORDER_INVALID);
        }
        self.check_failure(SimulatedCall::WaitFrame)?;

        self.display_time += self.settings.display_period_ns;
        self.frame_display_time = Some(self.display_time);
        self.phase = FramePhase::Waited;

        let visible = matches!(
            self.session_state,
            SessionState::VISIBLE | SessionState::FOCUSED
        );
        let should_render = visible && self.skip_rendering == 0;
        self.skip_rendering = self.skip_rendering.saturating_sub(1);

        Ok(xr::FrameState {
            predicted_display_time: xr::Time::from_nanos(self.display_time),
            predicted_display_period: xr::Duration::from_nanos(self.settings.display_period_ns),
            should_render,
        })
    }

    fn begin_frame(&mut self) -> xr::Result<()> {
        self.check_running()?;
        if self.phase != FramePhase::Waited {
            return Err(XrResult::ERROR_CALL_ORDER_INVALID);
        }
        if let Err(result) = self.check_failure(SimulatedCall::BeginFrame) {
            self.phase = FramePhase::Idle;
            return Err(result);
        }
        self.phase = FramePhase::Begun;
        Ok(())
    }

    fn locate_views(
        &mut self,
        _space: &SimulatedSpace,
        display_time: xr::Time,
    ) -> xr::Result<(ViewStateFlags, Vec<xr::View>)> {
        self.check_running()?;
        self.check_failure(SimulatedCall::LocateViews)?;
        if display_time.as_nanos() <= 0 {
            return Err(XrResult::ERROR_TIME_INVALID);
        }

        let flags = if self.lost_tracking > 0 {
            self.lost_tracking -= 1;
            ViewStateFlags::EMPTY
        } else {
            ViewStateFlags::ORIENTATION_VALID
                | ViewStateFlags::POSITION_VALID
                | ViewStateFlags::ORIENTATION_TRACKED
                | ViewStateFlags::POSITION_TRACKED
        };

        Ok((flags, self.eye_views()))
    }

    fn end_frame(
        &mut self,
        display_time: xr::Time,
        _space: &SimulatedSpace,
        _swapchain: &SimulatedSwapchain,
        views: &[LayerView],
    ) -> xr::Result<()> {
        self.check_running()?;
        if self.phase != FramePhase::Begun {
            return Err(XrResult::ERROR_CALL_ORDER_INVALID);
        }
        self.phase = FramePhase::Idle;
        self.check_failure(SimulatedCall::EndFrame)?;

        if self.frame_display_time != Some(display_time.as_nanos()) {
            return Err(XrResult::ERROR_TIME_INVALID);
        }
        if !views.is_empty() {
            self.check_layer(views)?;
        }

        self.submitted_frames.push(SubmittedFrame {
            display_time,
            views: views.to_vec(),
        });
        Ok(())
    }

    fn end_session(&mut self) -> xr::Result<()> {
        self.check_failure(SimulatedCall::EndSession)?;
        self.check_running()?;
        if self.session_state != SessionState::STOPPING {
            return Err(XrResult::ERROR_SESSION_NOT_STOPPING);
        }
        self.session_running = false;
        self.phase = FramePhase::Idle;
        self.events
            .extend([SessionState::IDLE, SessionState::EXITING]);
        Ok(())
    }
}

/// The swapchain of a [`SimulatedRuntime`]. Images are plain numbers starting at 1.
#[derive(Debug)]
pub struct SimulatedSwapchain {
    images: Vec<u32>,
    next_image: usize,
    // (index, waited) in acquisition order
    acquired: VecDeque<(u32, bool)>,
    signal_latency: Rc<Cell<i64>>,
    released: Rc<Cell<usize>>,
    release_failure: Rc<Cell<Option<XrResult>>>,
}

impl SimulatedSwapchain {
    fn new(
        image_count: usize,
        signal_latency: Rc<Cell<i64>>,
        released: Rc<Cell<usize>>,
        release_failure: Rc<Cell<Option<XrResult>>>,
    ) -> Self {
        Self {
            images: (1..=image_count as u32).collect(),
            next_image: 0,
            acquired: VecDeque::new(),
            signal_latency,
            released,
            release_failure,
        }
    }

    /// A swapchain that is not attached to any runtime
    pub fn detached(image_count: usize) -> Self {
        Self::new(
            image_count,
            Default::default(),
            Default::default(),
            Default::default(),
        )
    }

    /// Make the next otherwise valid release fail with `result`. The image stays acquired.
    pub fn fail_next_release(&mut self, result: XrResult) {
        self.release_failure.set(Some(result));
    }

    /// Change how long images take to become writable, in nanoseconds
    pub fn set_signal_latency(&mut self, latency_ns: i64) {
        self.signal_latency.set(latency_ns);
    }

    /// How many images have been handed back to the runtime
    pub fn released_count(&self) -> usize {
        self.released.get()
    }
}

impl SwapchainHandle for SimulatedSwapchain {
    type Image = u32;

    fn images(&self) -> &[u32] {
        &self.images
    }

    fn acquire(&mut self) -> xr::Result<u32> {
        if self.acquired.len() == self.images.len() {
            return Err(XrResult::ERROR_CALL_ORDER_INVALID);
        }
        let index = self.next_image as u32;
        self.next_image = (self.next_image + 1) % self.images.len();
        self.acquired.push_back((index, false));
        Ok(index)
    }

    fn wait(&mut self, timeout: xr::Duration) -> xr::Result<WaitStatus> {
        let pending = self
            .acquired
            .iter_mut()
            .find(|(_, waited)| !*waited)
            .ok_or(XrResult::ERROR_CALL_ORDER_INVALID)?;

        if timeout.as_nanos() < self.signal_latency.get() {
            return Ok(WaitStatus::TimedOut);
        }
        pending.1 = true;
        Ok(WaitStatus::Ready)
    }

    fn release(&mut self) -> xr::Result<()> {
        match self.acquired.front() {
            Some((_, true)) => {
                if let Some(result) = self.release_failure.take() {
                    debug!("[KI_SIMULATOR] Failing release with {result:?}");
                    return Err(result);
                }
                self.acquired.pop_front();
                self.released.set(self.released.get() + 1);
                Ok(())
            }
            _ => Err(XrResult::ERROR_CALL_ORDER_INVALID),
        }
    }
}
