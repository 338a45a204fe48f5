//! A spinning cube, drawn through KI Engine.

use glam::{vec4, Mat4, Vec3};
use ki_engine::{rendering::RenderTarget, GraphicsProvider, KiError, KiResult};
use log::trace;

/// Cube corners, half a unit from the origin
pub const CUBE_VERTICES: [Vec3; 8] = [
    Vec3::new(-0.5, -0.5, -0.5),
    Vec3::new(0.5, -0.5, -0.5),
    Vec3::new(0.5, 0.5, -0.5),
    Vec3::new(-0.5, 0.5, -0.5),
    Vec3::new(-0.5, -0.5, 0.5),
    Vec3::new(0.5, -0.5, 0.5),
    Vec3::new(0.5, 0.5, 0.5),
    Vec3::new(-0.5, 0.5, 0.5),
];

/// Two triangles per face
#[rustfmt::skip]
pub const CUBE_INDICES: [u16; 36] = [
    0, 1, 2, 2, 3, 0, // back
    4, 5, 6, 6, 7, 4, // front
    3, 2, 6, 6, 7, 3, // top
    0, 1, 5, 5, 4, 0, // bottom
    1, 2, 6, 6, 5, 1, // right
    0, 3, 7, 7, 4, 0, // left
];

/// What the renderer has drawn so far.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrawStats {
    /// Number of draw calls
    pub draws: usize,
    /// Number of triangles submitted
    pub triangles: usize,
    /// Number of transformed vertices that landed inside the clip volume
    pub visible_vertices: usize,
    /// Number of draw calls per array layer
    pub draws_per_layer: [usize; 2],
}

/// Draws the cube by transforming it on the CPU. Good enough to check what each eye sees
/// without a GPU.
#[derive(Debug, Default)]
pub struct CubeRenderer {
    target: Option<RenderTarget<u32>>,
    program_active: bool,
    mvp: Mat4,
    /// Running totals
    pub stats: DrawStats,
}

impl CubeRenderer {
    /// Create a renderer with no target bound
    pub fn new() -> Self {
        Self::default()
    }

    /// How many cube corners `mvp` puts inside the clip volume
    pub fn visible_vertices(mvp: &Mat4) -> usize {
        CUBE_VERTICES
            .iter()
            .map(|v| *mvp * vec4(v.x, v.y, v.z, 1.0))
            .filter(|clip| {
                clip.w > 0.0
                    && clip.x.abs() <= clip.w
                    && clip.y.abs() <= clip.w
                    && clip.z.abs() <= clip.w
            })
            .count()
    }
}

impl GraphicsProvider for CubeRenderer {
    type Image = u32;

    fn bind_render_target(&mut self, target: &RenderTarget<u32>) -> KiResult<()> {
        if target.array_layer as usize >= self.stats.draws_per_layer.len() {
            return Err(KiError::Other(anyhow::anyhow!(
                "image {} has no layer {}",
                target.image,
                target.array_layer
            )));
        }
        self.target = Some(*target);
        Ok(())
    }

    fn clear(&mut self, _color: [f32; 4]) -> KiResult<()> {
        Ok(())
    }

    fn use_program(&mut self) -> KiResult<()> {
        self.program_active = true;
        Ok(())
    }

    fn set_matrix_uniform(&mut self, mvp: &Mat4) -> KiResult<()> {
        self.mvp = *mvp;
        Ok(())
    }

    fn draw(&mut self) -> KiResult<()> {
        let target = match (self.program_active, self.target) {
            (true, Some(target)) => target,
            _ => {
                return Err(KiError::Other(anyhow::anyhow!(
                    "draw called without a program and a render target"
                )))
            }
        };

        let visible = Self::visible_vertices(&self.mvp);
        trace!(
            "[CUBEWORLD] Image {} layer {}: {visible} corners visible",
            target.image,
            target.array_layer
        );
        self.stats.draws += 1;
        self.stats.triangles += CUBE_INDICES.len() / 3;
        self.stats.visible_vertices += visible;
        self.stats.draws_per_layer[target.array_layer as usize] += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ki_engine::{
        contexts::render_context::model_matrix,
        rendering::{projection_from_fov, view_from_pose, Fov},
        xr,
    };

    use super::*;

    #[test]
    pub fn test_cube_in_front_of_the_eye_is_visible() {
        let projection = projection_from_fov(Fov::symmetric(0.8), 0.1, 50.0).unwrap();
        let view = view_from_pose(glam::Quat::IDENTITY, Vec3::ZERO);
        let mvp = projection * view * model_matrix(0.5);
        assert_eq!(CubeRenderer::visible_vertices(&mvp), 8);

        // Turned around, the cube is behind us
        let view = view_from_pose(glam::Quat::from_rotation_y(std::f32::consts::PI), Vec3::ZERO);
        let mvp = projection * view * model_matrix(0.5);
        assert_eq!(CubeRenderer::visible_vertices(&mvp), 0);
    }

    #[test]
    pub fn test_draw_needs_a_target() {
        let mut renderer = CubeRenderer::new();
        renderer.use_program().unwrap();
        assert!(renderer.draw().is_err());

        renderer
            .bind_render_target(&RenderTarget {
                image_index: 0,
                image: 1,
                array_layer: 1,
                extent: xr::Extent2Di {
                    width: 1440,
                    height: 1600,
                },
            })
            .unwrap();
        renderer.draw().unwrap();
        assert_eq!(renderer.stats.draws_per_layer, [0, 1]);
        assert_eq!(renderer.stats.triangles, 12);
    }
}
