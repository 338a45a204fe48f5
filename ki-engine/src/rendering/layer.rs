use log::warn;
use openxr as xr;

use crate::{
    rendering::SwapchainManager,
    runtime::XrRuntime,
    KiError, KiResult,
};

/// One eye's entry in the projection layer.
#[derive(Debug, Clone, Copy)]
pub struct LayerView {
    /// The pose the eye was rendered from
    pub pose: xr::Posef,
    /// The field of view the eye was rendered with
    pub fov: xr::Fovf,
    /// The region of the swapchain layer that holds the eye's image
    pub image_rect: xr::Rect2Di,
    /// The swapchain layer that holds the eye's image
    pub image_array_index: u32,
}

impl LayerView {
    /// Describe an eye that was rendered into the whole of swapchain layer `eye`
    pub fn new(view: &xr::View, extent: xr::Extent2Di, eye: usize) -> Self {
        Self {
            pose: view.pose,
            fov: view.fov,
            image_rect: xr::Rect2Di {
                offset: xr::Offset2Di { x: 0, y: 0 },
                extent,
            },
            image_array_index: eye as u32,
        }
    }
}

/// Hands finished frames to the compositor.
#[derive(Debug, Default)]
pub struct LayerSubmitter {
    last_display_time: Option<xr::Time>,
    submitted_frames: usize,
}

impl LayerSubmitter {
    /// Create a new submitter
    pub fn new() -> Self {
        Self::default()
    }

    /// How many frames have been accepted by the runtime
    pub fn submitted_frames(&self) -> usize {
        self.submitted_frames
    }

    /// The display time of the last accepted frame
    pub fn last_display_time(&self) -> Option<xr::Time> {
        self.last_display_time
    }

    /// End the frame described by `frame_state`.
    ///
    /// `views` holds one entry per located eye, in located order, or nothing at all to end
    /// the frame without a layer. A layer may only be submitted once every swapchain image
    /// has been released.
    pub fn submit<R: XrRuntime>(
        &mut self,
        runtime: &mut R,
        frame_state: &xr::FrameState,
        space: &R::Space,
        swapchain: &SwapchainManager<R::Swapchain>,
        located_views: usize,
        views: &[LayerView],
    ) -> KiResult<()> {
        if !views.is_empty() {
            if views.len() != located_views {
                return Err(KiError::protocol(
                    "xrEndFrame",
                    format!(
                        "{} projection views for {located_views} located views",
                        views.len()
                    ),
                ));
            }
            if let Some((eye, view)) = views
                .iter()
                .enumerate()
                .find(|(eye, view)| view.image_array_index != *eye as u32)
            {
                return Err(KiError::protocol(
                    "xrEndFrame",
                    format!(
                        "view {eye} points at swapchain layer {}",
                        view.image_array_index
                    ),
                ));
            }
            if swapchain.outstanding() > 0 {
                return Err(KiError::protocol(
                    "xrEndFrame",
                    format!("{} swapchain images are still held", swapchain.outstanding()),
                ));
            }
        }

        let display_time = frame_state.predicted_display_time;
        if let Some(last) = self.last_display_time {
            if display_time.as_nanos() <= last.as_nanos() {
                warn!(
                    "[KI_XR] Display time went from {} to {}",
                    last.as_nanos(),
                    display_time.as_nanos()
                );
            }
        }

        runtime
            .end_frame(display_time, space, swapchain.handle(), views)
            .map_err(KiError::runtime("xrEndFrame"))?;
        self.last_display_time = Some(display_time);
        self.submitted_frames += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{SimulatedRuntime, SimulatedSpace, SimulatedSwapchain};

    fn running_runtime() -> (SimulatedRuntime, SwapchainManager<SimulatedSwapchain>) {
        let mut runtime = SimulatedRuntime::default();
        runtime.poll_session_state().unwrap();
        runtime.begin_session().unwrap();
        let extent = runtime.recommended_view_extent().unwrap();
        let swapchain = SwapchainManager::new(runtime.create_swapchain(extent, 2).unwrap(), extent);
        (runtime, swapchain)
    }

    fn render_frame(
        runtime: &mut SimulatedRuntime,
        swapchain: &mut SwapchainManager<SimulatedSwapchain>,
    ) -> (xr::FrameState, Vec<LayerView>) {
        let frame_state = runtime.wait_frame().unwrap();
        runtime.begin_frame().unwrap();
        let (_, views) = runtime
            .locate_views(&SimulatedSpace, frame_state.predicted_display_time)
            .unwrap();

        swapchain.acquire().unwrap();
        swapchain.wait_ready(xr::Duration::INFINITE).unwrap();
        swapchain.release().unwrap();

        let layer_views = views
            .iter()
            .enumerate()
            .map(|(eye, view)| LayerView::new(view, swapchain.extent(), eye))
            .collect();
        (frame_state, layer_views)
    }

    #[test]
    pub fn test_submit_projection_layer() {
        let (mut runtime, mut swapchain) = running_runtime();
        let mut submitter = LayerSubmitter::new();

        let (frame_state, views) = render_frame(&mut runtime, &mut swapchain);
        submitter
            .submit(&mut runtime, &frame_state, &SimulatedSpace, &swapchain, 2, &views)
            .unwrap();

        assert_eq!(submitter.submitted_frames(), 1);
        let submitted = &runtime.submitted_frames()[0];
        assert_eq!(
            submitted.display_time.as_nanos(),
            frame_state.predicted_display_time.as_nanos()
        );
        assert_eq!(submitted.views.len(), 2);
        assert_eq!(submitted.views[1].image_array_index, 1);
        assert_eq!(submitted.views[1].image_rect.extent.height, 1600);
    }

    #[test]
    pub fn test_submit_without_layers() {
        let (mut runtime, swapchain) = running_runtime();
        let mut submitter = LayerSubmitter::new();

        let frame_state = runtime.wait_frame().unwrap();
        runtime.begin_frame().unwrap();
        submitter
            .submit(&mut runtime, &frame_state, &SimulatedSpace, &swapchain, 2, &[])
            .unwrap();
        assert!(runtime.submitted_frames()[0].views.is_empty());
    }

    #[test]
    pub fn test_mismatched_views_are_rejected() {
        let (mut runtime, mut swapchain) = running_runtime();
        let mut submitter = LayerSubmitter::new();

        let (frame_state, mut views) = render_frame(&mut runtime, &mut swapchain);
        views.swap(0, 1);
        assert!(matches!(
            submitter.submit(&mut runtime, &frame_state, &SimulatedSpace, &swapchain, 2, &views),
            Err(KiError::ProtocolViolation { .. })
        ));

        assert!(matches!(
            submitter.submit(
                &mut runtime,
                &frame_state,
                &SimulatedSpace,
                &swapchain,
                2,
                &views[..1]
            ),
            Err(KiError::ProtocolViolation { .. })
        ));
        assert!(runtime.submitted_frames().is_empty());
    }

    #[test]
    pub fn test_held_image_blocks_submission() {
        let (mut runtime, mut swapchain) = running_runtime();
        let mut submitter = LayerSubmitter::new();

        let (frame_state, views) = render_frame(&mut runtime, &mut swapchain);
        swapchain.acquire().unwrap();
        assert!(matches!(
            submitter.submit(&mut runtime, &frame_state, &SimulatedSpace, &swapchain, 2, &views),
            Err(KiError::ProtocolViolation { .. })
        ));
    }
}
