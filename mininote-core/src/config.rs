//! Engine configuration.
//!
//! Every field has a default, so an empty TOML document (or no file at all)
//! yields a working configuration:
//!
//! ```toml
//! [render]
//! scale_threshold = 0.05
//! max_surface_pixels = 16777216
//! workers = 2
//! visible_margin = 1
//!
//! [ink]
//! stroke_budget_per_page = 2000
//! min_pressure_factor = 0.25
//! default_color = 0x000000FF
//! default_width = 2.0
//!
//! [capture]
//! policy = "stylus_only"
//! ```

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    /// Relative scale difference within which a cached surface is reused.
    /// `0.0` reuses only exact matches.
    pub scale_threshold: f64,
    /// Largest surface, in pixels, a single page render may allocate
    pub max_surface_pixels: u64,
    /// Background render threads
    pub workers: usize,
    /// Pages kept around the visible range on each side
    pub visible_margin: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            scale_threshold: 0.0,
            max_surface_pixels: 64 * 1024 * 1024,
            workers: 2,
            visible_margin: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InkConfig {
    /// Strokes per page beyond which a warning is logged
    pub stroke_budget_per_page: usize,
    /// Width factor at zero pressure; full pressure is always 1.0
    pub min_pressure_factor: f32,
    /// RGBA, `0xRRGGBBAA`
    pub default_color: u32,
    pub default_width: f32,
}

impl Default for InkConfig {
    fn default() -> Self {
        InkConfig {
            stroke_budget_per_page: 2000,
            min_pressure_factor: 0.25,
            default_color: 0x0000_00FF,
            default_width: 2.0,
        }
    }
}

/// Which pointers may draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CapturePolicy {
    /// Any pointer draws; missing pressure defaults to 0.5
    #[default]
    AnyInput,
    /// Only stylus pointers draw
    StylusOnly,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    pub policy: CapturePolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub render: RenderConfig,
    pub ink: InkConfig,
    pub capture: CaptureConfig,
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        let config: EngineConfig =
            toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        log::debug!("loading configuration from {}", path.display());
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> EngineResult<()> {
        let render = &self.render;
        if !render.scale_threshold.is_finite() || render.scale_threshold < 0.0 {
            return Err(EngineError::Config(format!(
                "render.scale_threshold must be a non-negative number, got {}",
                render.scale_threshold
            )));
        }
        if render.max_surface_pixels == 0 {
            return Err(EngineError::Config("render.max_surface_pixels must be positive".into()));
        }
        if render.workers == 0 {
            return Err(EngineError::Config("render.workers must be at least 1".into()));
        }
        let ink = &self.ink;
        if !(0.0..=1.0).contains(&ink.min_pressure_factor) {
            return Err(EngineError::Config(format!(
                "ink.min_pressure_factor must be within 0..=1, got {}",
                ink.min_pressure_factor
            )));
        }
        if !ink.default_width.is_finite() || ink.default_width <= 0.0 {
            return Err(EngineError::Config(format!(
                "ink.default_width must be positive, got {}",
                ink.default_width
            )));
        }
        Ok(())
    }
}
