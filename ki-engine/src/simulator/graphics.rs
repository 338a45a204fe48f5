use glam::Mat4;

use crate::{contexts::GraphicsProvider, rendering::RenderTarget, KiResult};

/// A draw call, as seen by [`RecordingGraphics`].
#[derive(Debug, Clone, PartialEq)]
pub enum GraphicsCommand {
    /// The scene program was made current
    UseProgram,
    /// The MVP uniform was uploaded
    SetMatrixUniform(Mat4),
    /// A swapchain image layer became the render target
    BindRenderTarget {
        /// Swapchain image
        image: u32,
        /// Array layer within the image
        layer: u32,
        /// Viewport width
        width: i32,
        /// Viewport height
        height: i32,
    },
    /// The render target was cleared
    Clear([f32; 4]),
    /// The scene was drawn
    Draw,
}

/// A [`GraphicsProvider`] that records what it was asked to do instead of doing it.
///
/// Meant for tests and short headless runs: every command is kept, so memory grows with the
/// number of frames rendered.
#[derive(Debug, Default, Clone)]
pub struct RecordingGraphics {
    /// Every command, in order
    pub commands: Vec<GraphicsCommand>,
}

impl RecordingGraphics {
    /// The render targets that were bound, as `(image, layer)`
    pub fn bound_targets(&self) -> Vec<(u32, u32)> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                GraphicsCommand::BindRenderTarget { image, layer, .. } => Some((*image, *layer)),
                _ => None,
            })
            .collect()
    }

    /// How many times the scene was drawn
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, GraphicsCommand::Draw))
            .count()
    }

    /// The last MVP matrix that was uploaded
    pub fn last_matrix(&self) -> Option<Mat4> {
        self.commands.iter().rev().find_map(|c| match c {
            GraphicsCommand::SetMatrixUniform(m) => Some(*m),
            _ => None,
        })
    }
}

impl GraphicsProvider for RecordingGraphics {
    type Image = u32;

    fn bind_render_target(&mut self, target: &RenderTarget<u32>) -> KiResult<()> {
        self.commands.push(GraphicsCommand::BindRenderTarget {
            image: target.image,
            layer: target.array_layer,
            width: target.extent.width,
            height: target.extent.height,
        });
        Ok(())
    }

    fn clear(&mut self, color: [f32; 4]) -> KiResult<()> {
        self.commands.push(GraphicsCommand::Clear(color));
        Ok(())
    }

    fn use_program(&mut self) -> KiResult<()> {
        self.commands.push(GraphicsCommand::UseProgram);
        Ok(())
    }

    fn set_matrix_uniform(&mut self, mvp: &Mat4) -> KiResult<()> {
        self.commands.push(GraphicsCommand::SetMatrixUniform(*mvp));
        Ok(())
    }

    fn draw(&mut self) -> KiResult<()> {
        self.commands.push(GraphicsCommand::Draw);
        Ok(())
    }
}
