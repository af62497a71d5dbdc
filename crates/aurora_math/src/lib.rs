//! Aurora math - numeric types shared by the renderer core and the denoiser.

// Re-export glam for convenience
pub use glam::*;

mod rect;
mod spectrum;

pub use rect::{pixel_at, pixel_index, PixelRect};
pub use spectrum::{
    clamp_covariance, covariance_factor_count, factors_to_matrix, Float, Matrix, Spectrum,
    SymmetricSolver,
};
