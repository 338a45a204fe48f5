#![deny(missing_docs)]

//! KI Engine drives a stereoscopic head-mounted display through OpenXR.
//!
//! It negotiates a session with the XR runtime, allocates one double-array swapchain
//! (one array layer per eye) and, on every display refresh, locates both eyes, renders
//! the scene into the matching swapchain layer and submits a single projection layer
//! back to the compositor.
//!
//! # Getting started
//! Build an [`Engine`] from a runtime (either [`runtime::OpenXrRuntime`] or the
//! in-process [`simulator::SimulatedRuntime`]) and a [`GraphicsProvider`] that knows how to
//! draw into a swapchain image, then hand it a [`HostWindow`]:
//!
//! ```no_run
//! use ki_engine::{simulator::{HeadlessHost, RecordingGraphics, SimulatedRuntime}, EngineBuilder};
//!
//! let mut engine = EngineBuilder::new()
//!     .build(SimulatedRuntime::default(), RecordingGraphics::default())
//!     .unwrap();
//! engine.run(&mut HeadlessHost::with_frame_limit(100)).unwrap();
//! engine.shutdown().unwrap();
//! ```

pub use openxr as xr;

pub use config::{RenderConfig, ShouldRenderPolicy};
pub use contexts::{GraphicsProvider, RenderContext, XrContext};
pub use engine::{Engine, EngineBuilder, FrameOutcome, HostWindow, TickData};
pub use ki_error::KiError;

/// Configuration for the frame loop and projection
pub mod config;
/// The session/frame state machine and the per-eye renderer
pub mod contexts;
mod engine;
mod ki_error;
/// Pose and projection math, swapchain bookkeeping and layer submission
pub mod rendering;
/// The boundary between the engine and an XR runtime
pub mod runtime;
/// A deterministic in-process XR runtime and graphics recorder
pub mod simulator;
/// Kitchen sink utility functions
pub mod util;

/// KI Engine result type
pub type KiResult<T> = std::result::Result<T, KiError>;

/// Number of views
pub const VIEW_COUNT: u32 = 2;

/// Swapchain length used by the simulator
pub const SWAPCHAIN_LENGTH: usize = 3;

/// OpenXR view type
pub const VIEW_TYPE: xr::ViewConfigurationType = xr::ViewConfigurationType::PRIMARY_STEREO;

/// OpenXR blend mode
pub const BLEND_MODE: xr::EnvironmentBlendMode = xr::EnvironmentBlendMode::OPAQUE;

/// OpenXR API version requested from the runtime. SteamVR only supports 1.0.
pub const API_VERSION: xr::Version = xr::Version::new(1, 0, 0);
