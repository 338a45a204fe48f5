//! Everything the engine needs from an XR runtime, and nothing more.
//!
//! Calls return raw [`openxr::Result`] codes; [`crate::XrContext`] decides which of them are
//! fatal.

use openxr as xr;

use crate::rendering::LayerView;

mod openxr_runtime;
pub use openxr_runtime::{GraphicsBinding, OpenXrRuntime, OpenXrRuntimeBuilder, OpenXrSwapchain};

/// Whether a swapchain image became writable within the requested timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// The runtime has finished with the image; it may be rendered into
    Ready,
    /// The runtime did not signal the image in time
    TimedOut,
}

/// A swapchain as the runtime sees it: a fixed pool of array images lent to the application.
pub trait SwapchainHandle {
    /// The graphics API's handle for a swapchain image
    type Image: Copy + std::fmt::Debug;

    /// Every image in the pool, indexed by the values `acquire` returns
    fn images(&self) -> &[Self::Image];

    /// Ask the runtime for the next image to render into
    fn acquire(&mut self) -> xr::Result<u32>;

    /// Block until the oldest acquired image is writable or `timeout` elapses
    fn wait(&mut self, timeout: xr::Duration) -> xr::Result<WaitStatus>;

    /// Hand the oldest waited image back to the runtime
    fn release(&mut self) -> xr::Result<()>;
}

/// A live session with an XR runtime.
pub trait XrRuntime {
    /// Reference space handle
    type Space;
    /// Swapchain handle
    type Swapchain: SwapchainHandle;

    /// The recommended per-eye image size for the stereo view configuration
    fn recommended_view_extent(&self) -> xr::Result<xr::Extent2Di>;

    /// Create the fixed reference space all poses are reported against
    fn create_reference_space(&mut self) -> xr::Result<Self::Space>;

    /// Create an sRGB swapchain of `array_size` layers, single sample, single mip
    fn create_swapchain(
        &mut self,
        extent: xr::Extent2Di,
        array_size: u32,
    ) -> xr::Result<Self::Swapchain>;

    /// The next session state change, if one is pending
    fn poll_session_state(&mut self) -> xr::Result<Option<xr::SessionState>>;

    /// Begin the session with the stereo view configuration
    fn begin_session(&mut self) -> xr::Result<()>;

    /// Block until the runtime wants the next frame
    fn wait_frame(&mut self) -> xr::Result<xr::FrameState>;

    /// Mark the start of rendering for the frame returned by `wait_frame`
    fn begin_frame(&mut self) -> xr::Result<()>;

    /// Locate both eyes at `display_time`
    fn locate_views(
        &mut self,
        space: &Self::Space,
        display_time: xr::Time,
    ) -> xr::Result<(xr::ViewStateFlags, Vec<xr::View>)>;

    /// Submit the frame. An empty `views` submits no layers at all.
    fn end_frame(
        &mut self,
        display_time: xr::Time,
        space: &Self::Space,
        swapchain: &Self::Swapchain,
        views: &[LayerView],
    ) -> xr::Result<()>;

    /// End the running session
    fn end_session(&mut self) -> xr::Result<()>;
}
