use std::path::Path;

use openxr as xr;
use serde::{Deserialize, Serialize};

use crate::{KiError, KiResult};

/// What to do when the runtime says the frame will not be displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShouldRenderPolicy {
    /// Render both eyes regardless of the runtime's `should_render` flag
    #[default]
    Always,
    /// Locate the eyes but skip GPU work, ending the frame with no layers
    HonorRuntime,
}

/// Policy knobs for the frame loop. Every field has a default, so `{}` is a valid config.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// View-space near clip distance
    pub near: f32,
    /// View-space far clip distance
    pub far: f32,
    /// Whether to honor the runtime's `should_render` flag
    pub should_render: ShouldRenderPolicy,
    /// How long to wait for a swapchain image to become writable. `None` waits forever.
    pub image_wait_timeout_ms: Option<u64>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            near: 0.1,
            far: 50.0,
            should_render: ShouldRenderPolicy::Always,
            image_wait_timeout_ms: None,
        }
    }
}

impl RenderConfig {
    /// Parse and validate a JSON config
    pub fn from_json_str(json: &str) -> KiResult<Self> {
        let config: RenderConfig = serde_json::from_str(json)
            .map_err(|e| KiError::Config(format!("Unable to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file
    pub fn from_path<P: AsRef<Path>>(path: P) -> KiResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check the clip planes describe a usable depth range and the timeout fits an OpenXR duration
    pub fn validate(&self) -> KiResult<()> {
        if !self.near.is_finite() || !self.far.is_finite() {
            return Err(KiError::Config(format!(
                "clip distances must be finite, got near {} and far {}",
                self.near, self.far
            )));
        }
        if self.near <= 0.0 {
            return Err(KiError::Config(format!(
                "near must be greater than zero, got {}",
                self.near
            )));
        }
        if self.far <= self.near {
            return Err(KiError::Config(format!(
                "far ({}) must be greater than near ({})",
                self.far, self.near
            )));
        }
        if let Some(ms) = self.image_wait_timeout_ms {
            if timeout_nanos(ms).is_none() {
                return Err(KiError::Config(format!(
                    "image_wait_timeout_ms ({ms}) is too large"
                )));
            }
        }
        Ok(())
    }

    /// The swapchain image wait timeout as an OpenXR duration
    pub fn image_wait_timeout(&self) -> xr::Duration {
        match self.image_wait_timeout_ms {
            Some(ms) => timeout_nanos(ms).map_or(xr::Duration::INFINITE, xr::Duration::from_nanos),
            None => xr::Duration::INFINITE,
        }
    }
}

fn timeout_nanos(ms: u64) -> Option<i64> {
    i64::try_from(ms).ok()?.checked_mul(1_000_000)
}
