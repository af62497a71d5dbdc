//! Aurora Core - the renderer-side state a post-process consumes.
//!
//! This crate provides:
//!
//! - **System**: color mode, image resolution and the worker thread pool
//! - **Sample statistics**: per-pixel sums, squares, cross products and histograms
//! - **Settings**: the JSON settings tree, including denoiser parameters
//!
//! # Example
//!
//! ```ignore
//! use aurora_core::{SampleStatistics, System, SystemSettings};
//!
//! let settings = SystemSettings::from_path("render.json")?;
//! let system = System::new(&settings)?;
//! let statistics = SampleStatistics::new(
//!     system.image_resolution(),
//!     system.dimension(),
//!     settings.denoiser.histogram_bins);
//! ```

pub mod settings;
pub mod statistics;
pub mod system;

// Re-export commonly used types
pub use settings::{DenoiserSettings, SettingsError, SettingsResult, SystemSettings};
pub use statistics::SampleStatistics;
pub use system::{ColorMode, System, SystemError, SystemResult, SPECTRA_SIZE};
