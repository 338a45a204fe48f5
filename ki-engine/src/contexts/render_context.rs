use std::time::Instant;

use glam::{vec3, Mat4};
use log::warn;
use openxr as xr;

use crate::{
    config::RenderConfig,
    rendering::{projection_from_fov, Camera, LayerView, RenderTarget},
    KiError, KiResult, VIEW_COUNT,
};

/// Background color of the scene
pub const CLEAR_COLOR: [f32; 4] = [0.02, 0.02, 0.03, 1.0];

/// Everything the renderer needs from the graphics API.
///
/// Shader compilation and geometry upload happen before the engine starts; the provider
/// only has to make them current and draw.
pub trait GraphicsProvider {
    /// The graphics API's handle for a swapchain image
    type Image: Copy + std::fmt::Debug;

    /// Bind one layer of `target` as the color target, along with a depth target of the same
    /// size, and set the viewport to cover it
    fn bind_render_target(&mut self, target: &RenderTarget<Self::Image>) -> KiResult<()>;

    /// Clear the bound color and depth targets
    fn clear(&mut self, color: [f32; 4]) -> KiResult<()>;

    /// Make the scene's shader program current
    fn use_program(&mut self) -> KiResult<()>;

    /// Upload the model-view-projection matrix
    fn set_matrix_uniform(&mut self, mvp: &Mat4) -> KiResult<()>;

    /// Draw the scene's geometry
    fn draw(&mut self) -> KiResult<()>;
}

/// Renders the scene once per eye.
pub struct RenderContext<P: GraphicsProvider> {
    /// The graphics API
    pub graphics: P,
    /// One camera per eye
    pub cameras: Vec<Camera>,
    near: f32,
    far: f32,
    start: Instant,
}

impl<P: GraphicsProvider> RenderContext<P> {
    /// Create a render context using the clip planes in `config`
    pub fn new(graphics: P, config: &RenderConfig) -> Self {
        Self {
            graphics,
            cameras: vec![Default::default(); VIEW_COUNT as usize],
            near: config.near,
            far: config.far,
            start: Instant::now(),
        }
    }

    /// Render the scene for `eye` into `target` and describe the result for the compositor.
    ///
    /// An eye with a degenerate frustum is drawn with an identity projection rather than
    /// failing the frame.
    pub fn render_eye(
        &mut self,
        eye: usize,
        view: &xr::View,
        target: &RenderTarget<P::Image>,
    ) -> KiResult<LayerView> {
        if eye >= self.cameras.len() {
            return Err(KiError::protocol(
                "render_eye",
                format!("there is no eye {eye}"),
            ));
        }

        self.graphics.bind_render_target(target)?;
        self.graphics.clear(CLEAR_COLOR)?;

        let projection = match projection_from_fov(view.fov.into(), self.near, self.far) {
            Ok(projection) => projection,
            Err(e) => {
                warn!("[KI_RENDER] Eye {eye}: {e}, using an identity projection");
                Mat4::IDENTITY
            }
        };
        let view_from_space = self.cameras[eye].update(view);
        let model = model_matrix(self.start.elapsed().as_secs_f32());
        let mvp = projection * view_from_space * model;

        self.graphics.use_program()?;
        self.graphics.set_matrix_uniform(&mvp)?;
        self.graphics.draw()?;

        Ok(LayerView::new(view, target.extent, eye))
    }
}

/// Place the scene two meters in front of the origin and spin it `t` radians.
pub fn model_matrix(t: f32) -> Mat4 {
    Mat4::from_translation(vec3(0.0, 0.0, -2.0))
        * Mat4::from_scale(vec3(0.2, 0.2, 0.2))
        * Mat4::from_axis_angle(vec3(0.3, 1.0, 0.5).normalize(), t)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use glam::{vec4, Quat, Vec4};

    use super::*;
    use crate::{
        rendering::{view_from_pose, Fov},
        simulator::{GraphicsCommand, RecordingGraphics},
        util::posef_from_affine,
    };

    fn target(eye: u32) -> RenderTarget<u32> {
        RenderTarget {
            image_index: 0,
            image: 1,
            array_layer: eye,
            extent: xr::Extent2Di {
                width: 1440,
                height: 1600,
            },
        }
    }

    fn eye_view(position: glam::Vec3, fov: Fov) -> xr::View {
        xr::View {
            pose: posef_from_affine(glam::Affine3A::from_translation(position)),
            fov: fov.into(),
        }
    }

    #[test]
    pub fn test_render_eye_issues_draw_in_order() {
        let mut render_context =
            RenderContext::new(RecordingGraphics::default(), &RenderConfig::default());
        let view = eye_view(vec3(-0.032, 1.6, 0.0), Fov::symmetric(0.8));

        let layer_view = render_context.render_eye(1, &view, &target(1)).unwrap();
        assert_eq!(layer_view.image_array_index, 1);
        assert_eq!(layer_view.image_rect.extent.width, 1440);
        assert_eq!(layer_view.image_rect.offset.x, 0);

        let commands = &render_context.graphics.commands;
        assert_eq!(commands.len(), 5);
        assert_eq!(
            commands[0],
            GraphicsCommand::BindRenderTarget {
                image: 1,
                layer: 1,
                width: 1440,
                height: 1600
            }
        );
        assert_eq!(commands[1], GraphicsCommand::Clear(CLEAR_COLOR));
        assert_eq!(commands[2], GraphicsCommand::UseProgram);
        assert!(matches!(commands[3], GraphicsCommand::SetMatrixUniform(_)));
        assert_eq!(commands[4], GraphicsCommand::Draw);
    }

    #[test]
    pub fn test_mvp_is_projection_view_model() {
        let mut render_context =
            RenderContext::new(RecordingGraphics::default(), &RenderConfig::default());
        let fov = Fov {
            angle_left: -0.942,
            angle_right: 0.698,
            angle_up: 0.698,
            angle_down: -0.873,
        };
        let position = vec3(0.032, 1.6, 0.0);
        render_context
            .render_eye(0, &eye_view(position, fov), &target(0))
            .unwrap();

        let mvp = render_context.graphics.last_matrix().unwrap();
        let view_projection =
            projection_from_fov(fov, 0.1, 50.0).unwrap() * view_from_pose(Quat::IDENTITY, position);
        let model = view_projection.inverse() * mvp;

        // Whatever the spin, the scene's origin sits two meters in front of the reference origin
        let origin = model * vec4(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(origin, vec4(0.0, 0.0, -2.0, 1.0), epsilon = 1e-3);
    }

    #[test]
    pub fn test_degenerate_frustum_uses_identity_projection() {
        let mut render_context =
            RenderContext::new(RecordingGraphics::default(), &RenderConfig::default());
        let view = eye_view(glam::Vec3::ZERO, Fov::default());

        render_context.render_eye(0, &view, &target(0)).unwrap();
        let mvp = render_context.graphics.last_matrix().unwrap();
        let model = model_matrix(0.0);
        // No perspective divide with an identity projection
        assert_relative_eq!(mvp.row(3), Vec4::W, epsilon = 1e-6);
        assert_relative_eq!(mvp.w_axis.z, model.w_axis.z, epsilon = 1e-6);
    }

    #[test]
    pub fn test_render_eye_rejects_third_eye() {
        let mut render_context =
            RenderContext::new(RecordingGraphics::default(), &RenderConfig::default());
        let view = eye_view(glam::Vec3::ZERO, Fov::symmetric(0.5));
        assert!(render_context
            .render_eye(2, &view, &target(0))
            .unwrap_err()
            .is_fatal());
        assert!(render_context.graphics.commands.is_empty());
    }
}
