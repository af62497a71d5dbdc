//! Rendering system: color mode, image resolution and worker threads.

use aurora_math::UVec2;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::settings::SystemSettings;

/// Number of wavelength samples carried per pixel in spectral mode.
pub const SPECTRA_SIZE: usize = 16;

/// How color is sampled by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    /// Three RGB channels
    #[default]
    Rgb,
    /// `SPECTRA_SIZE` wavelength samples
    Spectra,
}

impl ColorMode {
    /// Number of channels per sample.
    pub fn dimension(self) -> usize {
        match self {
            ColorMode::Rgb => 3,
            ColorMode::Spectra => SPECTRA_SIZE,
        }
    }
}

/// Errors that can occur while setting up the system.
#[derive(Error, Debug)]
pub enum SystemError {
    #[error("Failed to build worker thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Invalid settings: {0}")]
    Settings(#[from] crate::settings::SettingsError),
}

pub type SystemResult<T> = Result<T, SystemError>;

/// Shared state of one rendering session.
///
/// Owns the worker pool every parallel stage runs on.
pub struct System {
    color_mode: ColorMode,
    image_resolution: UVec2,
    thread_pool: ThreadPool,
}

impl System {
    /// Create a system from validated settings.
    pub fn new(settings: &SystemSettings) -> SystemResult<Self> {
        settings.validate()?;
        let thread_pool = ThreadPoolBuilder::new()
            .num_threads(settings.num_threads)
            .thread_name(|i| format!("aurora-worker-{i}"))
            .build()?;
        log::info!(
            "System ready: {}x{}, {:?}, {} worker threads",
            settings.image_width,
            settings.image_height,
            settings.color_mode,
            thread_pool.current_num_threads()
        );
        Ok(Self {
            color_mode: settings.color_mode,
            image_resolution: UVec2::new(settings.image_width, settings.image_height),
            thread_pool,
        })
    }

    pub fn color_mode(&self) -> ColorMode {
        self.color_mode
    }

    pub fn image_resolution(&self) -> UVec2 {
        self.image_resolution
    }

    /// Channels per sample for the current color mode.
    pub fn dimension(&self) -> usize {
        self.color_mode.dimension()
    }

    pub fn num_of_threads(&self) -> usize {
        self.thread_pool.current_num_threads()
    }

    /// Run `op` on the worker pool; parallel iterators inside it use the pool.
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.thread_pool.install(op)
    }

    /// Length of the index range each worker gets when `total` items are
    /// split evenly across the pool. Never zero.
    pub fn range_job_len(&self, total: usize) -> usize {
        total.div_ceil(self.num_of_threads()).max(1)
    }
}
