/// The virtual camera, one per eye
pub mod camera;

/// Composition layer records and submission
pub mod layer;

/// Off-axis projection for asymmetric eye frustums
pub mod projection;

/// Acquire/wait/release bookkeeping for the swapchain
pub mod swapchain;

pub use camera::{view_from_pose, Camera};
pub use layer::{LayerSubmitter, LayerView};
pub use projection::{projection_from_fov, Fov};
pub use swapchain::{ImageState, RenderTarget, SwapchainManager};
