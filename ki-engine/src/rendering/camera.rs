use glam::{Affine3A, Mat4, Quat, Vec3};
use openxr::View;

use crate::util::affine_from_posef;

#[derive(Debug, Clone)]
/// The Camera, or View, for a single eye.
pub struct Camera {
    /// The eye's pose in the reference space
    pub space_from_view: Affine3A,
    /// The view matrix
    pub view_from_space: Mat4,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            space_from_view: Affine3A::IDENTITY,
            view_from_space: Mat4::IDENTITY,
        }
    }
}

impl Camera {
    /// Update the camera from an OpenXR view
    pub fn update(&mut self, view: &View) -> Mat4 {
        self.space_from_view = affine_from_posef(view.pose);
        self.view_from_space = self.build_matrix();
        self.view_from_space
    }

    /// Get the camera's position in the reference space
    pub fn position_in_space(&self) -> Vec3 {
        self.space_from_view.translation.into()
    }

    /// Build the camera's view matrix
    pub fn build_matrix(&self) -> Mat4 {
        Mat4::from(self.space_from_view.inverse())
    }
}

/// World-to-eye transform: the inverse of rotating by `orientation`, then translating by `position`.
pub fn view_from_pose(orientation: Quat, position: Vec3) -> Mat4 {
    Mat4::from(Affine3A::from_rotation_translation(orientation, position).inverse())
}
