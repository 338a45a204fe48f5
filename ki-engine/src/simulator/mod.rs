mod graphics;
mod runtime;

pub use graphics::{GraphicsCommand, RecordingGraphics};
pub use runtime::{
    SimulatedCall, SimulatedRuntime, SimulatedSpace, SimulatedSwapchain, SimulatorSettings,
    SubmittedFrame,
};

use crate::HostWindow;

/// A host with no window: it never has events and closes after a fixed number of frames.
#[derive(Debug, Default, Clone)]
pub struct HeadlessHost {
    frame_limit: Option<usize>,
    frames: usize,
}

impl HeadlessHost {
    /// Close after `frames` iterations of the frame loop
    pub fn with_frame_limit(frames: usize) -> Self {
        Self {
            frame_limit: Some(frames),
            frames: 0,
        }
    }

    /// How many iterations of the frame loop have run
    pub fn frames(&self) -> usize {
        self.frames
    }
}

impl HostWindow for HeadlessHost {
    fn poll_events(&mut self) {
        self.frames += 1;
    }

    fn should_close(&self) -> bool {
        self.frame_limit.map_or(false, |limit| self.frames >= limit)
    }
}
