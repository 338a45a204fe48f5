/// The frame renderer
pub mod render_context;
/// The session and frame state machine
pub mod xr_context;

pub use render_context::{GraphicsProvider, RenderContext};
pub use xr_context::{FrameLoopState, XrContext};
