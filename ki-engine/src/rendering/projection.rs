use glam::{Mat4, Vec4};
use openxr as xr;

use crate::{KiError, KiResult};

/// A field of view described by four half-angles, in radians.
///
/// Left and down are usually negative. Headset lenses produce asymmetric frustums, so the
/// angles are not assumed to mirror each other.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Fov {
    /// Angle of the left side of the frustum
    pub angle_left: f32,
    /// Angle of the right side of the frustum
    pub angle_right: f32,
    /// Angle of the top side of the frustum
    pub angle_up: f32,
    /// Angle of the bottom side of the frustum
    pub angle_down: f32,
}

impl Fov {
    /// A frustum that is symmetric in both axes
    pub fn symmetric(half_angle: f32) -> Self {
        Self {
            angle_left: -half_angle,
            angle_right: half_angle,
            angle_up: half_angle,
            angle_down: -half_angle,
        }
    }
}

impl From<xr::Fovf> for Fov {
    fn from(fov: xr::Fovf) -> Self {
        Self {
            angle_left: fov.angle_left,
            angle_right: fov.angle_right,
            angle_up: fov.angle_up,
            angle_down: fov.angle_down,
        }
    }
}

impl From<Fov> for xr::Fovf {
    fn from(fov: Fov) -> Self {
        xr::Fovf {
            angle_left: fov.angle_left,
            angle_right: fov.angle_right,
            angle_up: fov.angle_up,
            angle_down: fov.angle_down,
        }
    }
}

/// Build a right-handed off-axis perspective projection.
///
/// View-space depth `-near` lands on clip-space `z/w == -1` and `-far` on `z/w == +1`.
pub fn projection_from_fov(fov: Fov, near: f32, far: f32) -> KiResult<Mat4> {
    let tan_left = fov.angle_left.tan();
    let tan_right = fov.angle_right.tan();
    let tan_up = fov.angle_up.tan();
    let tan_down = fov.angle_down.tan();

    let tan_width = tan_right - tan_left;
    let tan_height = tan_up - tan_down;
    if tan_width == 0.0 || tan_height == 0.0 || !tan_width.is_finite() || !tan_height.is_finite()
    {
        return Err(KiError::DegenerateFrustum { fov });
    }

    let depth = far - near;
    Ok(Mat4::from_cols(
        Vec4::new(2.0 / tan_width, 0.0, 0.0, 0.0),
        Vec4::new(0.0, 2.0 / tan_height, 0.0, 0.0),
        Vec4::new(
            (tan_right + tan_left) / tan_width,
            (tan_up + tan_down) / tan_height,
            -(far + near) / depth,
            -1.0,
        ),
        Vec4::new(0.0, 0.0, -(2.0 * far * near) / depth, 0.0),
    ))
}
