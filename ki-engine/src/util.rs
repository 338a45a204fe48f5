use std::time::Instant;

use glam::{Affine3A, Quat, Vec3};
use log::info;
use openxr::{Posef, ViewStateFlags};

#[inline]
/// Convert a `Posef` from OpenXR into an Affine3
pub fn affine_from_posef(pose: Posef) -> Affine3A {
    let translation: Vec3 = mint::Vector3::from(pose.position).into();
    let rotation: Quat = mint::Quaternion::from(pose.orientation).into();

    Affine3A::from_rotation_translation(rotation, translation)
}

#[inline]
/// Convert a [`glam::Affine3A`] into a [`openxr::Posef`]
pub fn posef_from_affine(transform: Affine3A) -> Posef {
    let (_, rotation, translation) = transform.to_scale_rotation_translation();
    Posef {
        orientation: mint::Quaternion::from(rotation).into(),
        position: mint::Vector3::from(translation).into(),
    }
}

/// Check to see if the current Xr View is valid
pub fn is_view_valid(view_flags: &ViewStateFlags) -> bool {
    view_flags.contains(ViewStateFlags::POSITION_VALID)
        && view_flags.contains(ViewStateFlags::ORIENTATION_VALID)
}

#[derive(Debug)]
/// Counts frames handed to the compositor and reports the rate once a second.
///
/// This is the application's loop rate, not the headset's refresh rate.
pub struct FrameCounter {
    frames: usize,
    last_update: Instant,
    last_rate: Option<usize>,
}

impl FrameCounter {
    /// Create a new frame counter
    pub fn new() -> Self {
        Self {
            frames: 0,
            last_update: Instant::now(),
            last_rate: None,
        }
    }

    /// Count a frame
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    fn tick_at(&mut self, now: Instant) {
        self.frames += 1;
        if (now - self.last_update).as_secs_f32() >= 1.0 {
            info!("[KI_PERF] FPS: {}", self.frames);
            self.last_rate = Some(self.frames);
            self.frames = 0;
            self.last_update = now;
        }
    }

    /// The frame count of the last complete second, if one has elapsed
    pub fn last_rate(&self) -> Option<usize> {
        self.last_rate
    }
}

impl Default for FrameCounter {
    fn default() -> Self {
        Self::new()
    }
}
