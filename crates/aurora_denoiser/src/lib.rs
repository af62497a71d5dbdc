//! Aurora Denoiser - Bayesian collaborative denoising of Monte Carlo renders.
//!
//! Removes sampling noise from per-pixel sample statistics by comparing
//! patch histograms inside a search window and filtering groups of similar
//! patches with an empirical Bayes estimate, optionally over several scales.

mod denoiser;
mod error;
mod estimate;
mod geometry;
mod marker;
mod mask;
mod parameters;
mod similarity;

pub use denoiser::{make_denoiser, BayesianCollaborativeDenoiser, Denoiser};
pub use error::{DenoiseError, DenoiseResult};
pub use estimate::{
    denoise_only_main_patch, denoise_pixels, denoise_selected_patches, denoise_tile, ChunkAccumulator,
    DenoiseContext, DenoiseScratch,
};
pub use geometry::{PatchGeometry, CHUNK_TILE_ORDER, TILES_PER_CHUNK_AXIS};
pub use marker::PixelMarker;
pub use mask::SimilarPatchMask;
pub use parameters::{downscale_average, upscale_add, Parameters};
pub use similarity::{calc_histogram_distance, calc_histogram_patch_distance, select_similar_patches};

/// Re-export the collaborators a caller needs
pub use aurora_core::{ColorMode, DenoiserSettings, SampleStatistics, System, SystemSettings};
