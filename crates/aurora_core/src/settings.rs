//! Render settings tree.
//!
//! Settings are read once, before rendering starts, from a JSON document.
//! Every field has a default so partial documents are accepted.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::system::ColorMode;

/// Errors that can occur while reading or validating settings.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid image resolution {width}x{height}")]
    InvalidResolution { width: u32, height: u32 },

    #[error("Invalid denoiser setting: {0}")]
    InvalidDenoiser(String),
}

pub type SettingsResult<T> = Result<T, SettingsError>;

/// Parameters of the Bayesian collaborative denoiser.
///
/// Defaults follow the reference parameters of the BCD paper.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenoiserSettings {
    /// Number of histogram bins per channel
    pub histogram_bins: usize,

    /// Patches whose histogram distance is at most this are similar
    pub histogram_distance_threshold: f64,

    /// Patch side is `2 * patch_radius + 1`
    pub patch_radius: u32,

    /// Search window side is `2 * search_window_radius + 1`
    pub search_window_radius: u32,

    /// Number of pyramid levels, finest included
    pub number_of_scales: u32,

    /// Denoise every scale and merge coarse results into finer ones.
    /// When false only the finest scale is denoised.
    pub multiscale_merge: bool,
}

impl Default for DenoiserSettings {
    fn default() -> Self {
        Self {
            histogram_bins: 16,
            histogram_distance_threshold: 1.0,
            patch_radius: 1,
            search_window_radius: 6,
            number_of_scales: 3,
            multiscale_merge: false,
        }
    }
}

impl DenoiserSettings {
    /// Check the parameters on their own, independent of any image.
    pub fn validate(&self) -> SettingsResult<()> {
        let invalid = |msg: String| Err(SettingsError::InvalidDenoiser(msg));
        if self.histogram_bins == 0 {
            return invalid("histogram_bins must be > 0".to_string());
        }
        if !self.histogram_distance_threshold.is_finite() || self.histogram_distance_threshold < 0.0 {
            return invalid(format!(
                "histogram_distance_threshold must be finite and >= 0, got {}",
                self.histogram_distance_threshold
            ));
        }
        if self.search_window_radius == 0 {
            return invalid("search_window_radius must be > 0".to_string());
        }
        if self.search_window_radius < self.patch_radius {
            return invalid(format!(
                "search_window_radius ({}) must be >= patch_radius ({})",
                self.search_window_radius, self.patch_radius
            ));
        }
        if self.number_of_scales == 0 {
            return invalid("number_of_scales must be >= 1".to_string());
        }
        Ok(())
    }

    /// Number of scales that are actually denoised.
    pub fn processed_scales(&self) -> u32 {
        if self.multiscale_merge {
            self.number_of_scales
        } else {
            1
        }
    }

    /// Check that every processed scale of an image of `width`x`height`
    /// still has pixels whose whole patch fits inside the image.
    pub fn validate_for_resolution(&self, width: u32, height: u32) -> SettingsResult<()> {
        self.validate()?;
        let min_side = 2 * self.patch_radius + 1;
        let shift = self.processed_scales() - 1;
        let (coarse_w, coarse_h) = (width >> shift, height >> shift);
        if coarse_w < min_side || coarse_h < min_side {
            return Err(SettingsError::InvalidDenoiser(format!(
                "scale {} of a {}x{} image is {}x{}, smaller than a {}x{} patch",
                shift, width, height, coarse_w, coarse_h, min_side, min_side
            )));
        }
        Ok(())
    }
}

/// System-level settings consumed by the renderer core.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSettings {
    pub color_mode: ColorMode,
    pub image_width: u32,
    pub image_height: u32,
    /// Worker threads, 0 lets rayon decide
    pub num_threads: usize,
    pub denoiser: DenoiserSettings,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            color_mode: ColorMode::Rgb,
            image_width: 1920,
            image_height: 1080,
            num_threads: 0,
            denoiser: DenoiserSettings::default(),
        }
    }
}

impl SystemSettings {
    /// Parse settings from a JSON string and validate them.
    pub fn from_json_str(json: &str) -> SettingsResult<Self> {
        let settings: SystemSettings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read settings from a JSON file and validate them.
    pub fn from_path<P: AsRef<Path>>(path: P) -> SettingsResult<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        log::debug!("Read settings from {}", path.as_ref().display());
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> SettingsResult<()> {
        if self.image_width == 0 || self.image_height == 0 {
            return Err(SettingsError::InvalidResolution {
                width: self.image_width,
                height: self.image_height,
            });
        }
        self.denoiser.validate_for_resolution(self.image_width, self.image_height)
    }
}
