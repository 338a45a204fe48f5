use std::collections::VecDeque;

use log::trace;
use openxr as xr;

use crate::{
    runtime::{SwapchainHandle, WaitStatus},
    KiError, KiResult, VIEW_COUNT,
};

/// Where a swapchain image is in its acquire / wait / release cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageState {
    /// Owned by the runtime
    Available,
    /// Lent to us, but the runtime may still be reading from it
    Acquired,
    /// Safe to render into
    Ready,
}

/// One layer of a swapchain image, ready to be rendered into.
#[derive(Debug, Clone, Copy)]
pub struct RenderTarget<I> {
    /// Index of the image within the swapchain
    pub image_index: u32,
    /// The graphics API's handle for the image
    pub image: I,
    /// The array layer, which is also the eye index
    pub array_layer: u32,
    /// Size of the layer in pixels
    pub extent: xr::Extent2Di,
}

/// Owns the stereo swapchain and enforces the acquire, wait, release order on it.
///
/// Every image handed out must be waited on before it is written and released before the frame
/// that uses it is submitted. Calls out of that order are reported as
/// [`KiError::ProtocolViolation`] and never reach the runtime.
pub struct SwapchainManager<S: SwapchainHandle> {
    handle: S,
    extent: xr::Extent2Di,
    states: Vec<ImageState>,
    // Acquired, not yet released, oldest first
    outstanding: VecDeque<u32>,
}

impl<S: SwapchainHandle> SwapchainManager<S> {
    /// Take ownership of a freshly created swapchain
    pub fn new(handle: S, extent: xr::Extent2Di) -> Self {
        let states = vec![ImageState::Available; handle.images().len()];
        Self {
            handle,
            extent,
            states,
            outstanding: VecDeque::new(),
        }
    }

    /// The underlying swapchain
    pub fn handle(&self) -> &S {
        &self.handle
    }

    /// Size of each array layer
    pub fn extent(&self) -> xr::Extent2Di {
        self.extent
    }

    /// Number of images the runtime allocated
    pub fn image_count(&self) -> usize {
        self.states.len()
    }

    /// Where image `index` is in its cycle
    pub fn image_state(&self, index: u32) -> Option<ImageState> {
        self.states.get(index as usize).copied()
    }

    /// Number of images acquired and not yet released
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// The oldest image that has been acquired but not yet waited on
    pub fn pending_wait(&self) -> Option<u32> {
        self.outstanding
            .iter()
            .copied()
            .find(|i| self.states[*i as usize] == ImageState::Acquired)
    }

    /// Acquire the next image from the runtime
    pub fn acquire(&mut self) -> KiResult<u32> {
        let index = self
            .handle
            .acquire()
            .map_err(KiError::runtime("xrAcquireSwapchainImage"))?;

        match self.states.get(index as usize) {
            Some(ImageState::Available) => {}
            Some(state) => {
                return Err(KiError::protocol(
                    "xrAcquireSwapchainImage",
                    format!("runtime returned image {index}, which is still {state:?}"),
                ))
            }
            None => {
                return Err(KiError::protocol(
                    "xrAcquireSwapchainImage",
                    format!(
                        "runtime returned image {index} but the swapchain only has {}",
                        self.states.len()
                    ),
                ))
            }
        }

        trace!("[KI_SWAPCHAIN] Acquired image {index}");
        self.states[index as usize] = ImageState::Acquired;
        self.outstanding.push_back(index);
        Ok(index)
    }

    /// Wait for the oldest acquired image to become writable.
    ///
    /// On [`KiError::Timeout`] the image stays acquired and may be waited on again.
    pub fn wait_ready(&mut self, timeout: xr::Duration) -> KiResult<u32> {
        let index = self.pending_wait().ok_or_else(|| {
            KiError::protocol("xrWaitSwapchainImage", "no image is waiting to be written")
        })?;

        match self
            .handle
            .wait(timeout)
            .map_err(KiError::runtime("xrWaitSwapchainImage"))?
        {
            WaitStatus::Ready => {
                self.states[index as usize] = ImageState::Ready;
                Ok(index)
            }
            WaitStatus::TimedOut => Err(KiError::Timeout {
                call: "xrWaitSwapchainImage",
            }),
        }
    }

    /// Release the oldest outstanding image back to the runtime
    pub fn release(&mut self) -> KiResult<u32> {
        let index = *self.outstanding.front().ok_or_else(|| {
            KiError::protocol("xrReleaseSwapchainImage", "no image has been acquired")
        })?;
        if self.states[index as usize] != ImageState::Ready {
            return Err(KiError::protocol(
                "xrReleaseSwapchainImage",
                format!("image {index} has not been waited on"),
            ));
        }

        self.handle
            .release()
            .map_err(KiError::runtime("xrReleaseSwapchainImage"))?;
        self.outstanding.pop_front();
        self.states[index as usize] = ImageState::Available;
        trace!("[KI_SWAPCHAIN] Released image {index}");
        Ok(index)
    }

    /// Release every written image still held because an earlier release failed.
    ///
    /// Returns how many were released.
    pub fn release_written(&mut self) -> KiResult<usize> {
        let mut released = 0;
        while self
            .outstanding
            .front()
            .is_some_and(|i| self.states[*i as usize] == ImageState::Ready)
        {
            self.release()?;
            released += 1;
        }
        Ok(released)
    }

    /// The layer of the most recently waited image that belongs to `eye`
    pub fn writable_image(&self, eye: usize) -> KiResult<RenderTarget<S::Image>> {
        if eye >= VIEW_COUNT as usize {
            return Err(KiError::protocol(
                "writable_image",
                format!("there is no eye {eye}"),
            ));
        }
        let image_index = self
            .outstanding
            .iter()
            .rev()
            .copied()
            .find(|i| self.states[*i as usize] == ImageState::Ready)
            .ok_or_else(|| KiError::protocol("writable_image", "no image is ready to be written"))?;

        Ok(RenderTarget {
            image_index,
            image: self.handle.images()[image_index as usize],
            array_layer: eye as u32,
            extent: self.extent,
        })
    }
}
