use openxr::sys::Result as OpenXRResult;
use thiserror::Error;

use crate::rendering::Fov;

/// Everything that can go wrong while driving the headset.
///
/// Only [`KiError::ProtocolViolation`] and [`KiError::RuntimeUnavailable`] are fatal; the rest
/// cost at most one frame.
#[derive(Error, Debug)]
pub enum KiError {
    /// A session, frame or swapchain call was made out of order
    #[error("Protocol violation in {call}: {detail}")]
    ProtocolViolation {
        /// The call that was made out of order
        call: &'static str,
        /// What the state machine expected instead
        detail: String,
    },
    /// A bounded wait did not complete in time
    #[error("{call} timed out")]
    Timeout {
        /// The call that timed out
        call: &'static str,
    },
    /// The eye frustum has zero width or height
    #[error("The field of view {fov:?} describes a frustum with zero width or height")]
    DegenerateFrustum {
        /// The offending field of view
        fov: Fov,
    },
    /// Instance, system or session setup failed
    #[error("The OpenXR runtime is unavailable: {call} returned {result:?}")]
    RuntimeUnavailable {
        /// The setup call that failed
        call: &'static str,
        /// The result code reported by the runtime
        result: OpenXRResult,
    },
    /// A per-frame runtime call failed
    #[error("There was a problem with an OpenXR operation: {call} returned {result:?}")]
    Runtime {
        /// The per-frame call that failed
        call: &'static str,
        /// The result code reported by the runtime
        result: OpenXRResult,
    },
    /// The configuration could not be used
    #[error("Invalid configuration: {0}")]
    Config(String),
    /// The runtime or the user asked us to stop
    #[error("The engine is shutting down")]
    ShuttingDown,
    /// I/O
    #[error(transparent)]
    IO(#[from] std::io::Error),
    /// Anything else
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KiError {
    /// Fatal errors abort the session; everything else skips a frame at most.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            KiError::ProtocolViolation { .. } | KiError::RuntimeUnavailable { .. }
        )
    }

    pub(crate) fn protocol(call: &'static str, detail: impl Into<String>) -> Self {
        KiError::ProtocolViolation {
            call,
            detail: detail.into(),
        }
    }

    /// Wrap a failed setup call.
    pub(crate) fn unavailable(call: &'static str) -> impl FnOnce(OpenXRResult) -> Self {
        move |result| KiError::RuntimeUnavailable { call, result }
    }

    /// Wrap a failed per-frame call.
    pub(crate) fn runtime(call: &'static str) -> impl FnOnce(OpenXRResult) -> Self {
        move |result| KiError::Runtime { call, result }
    }
}
