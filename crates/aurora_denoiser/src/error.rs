//! Errors reported by a denoise call before any work starts.

use aurora_core::SettingsError;
use aurora_math::UVec2;
use thiserror::Error;

/// A caller violated the preconditions of `denoise`.
#[derive(Error, Debug)]
pub enum DenoiseError {
    #[error("At least 2 samples per pixel are needed, got {0}")]
    NotEnoughSamples(u32),

    #[error("Statistics resolution {statistics:?} does not match image resolution {image:?}")]
    ResolutionMismatch { statistics: UVec2, image: UVec2 },

    #[error("Statistics carry {statistics} channels, the color mode needs {expected}")]
    ChannelMismatch { statistics: usize, expected: usize },

    #[error("Statistics carry {statistics} histogram bins, the denoiser expects {expected}")]
    HistogramBinMismatch { statistics: usize, expected: usize },

    #[error("Invalid denoiser settings: {0}")]
    Settings(#[from] SettingsError),
}

pub type DenoiseResult<T> = Result<T, DenoiseError>;
