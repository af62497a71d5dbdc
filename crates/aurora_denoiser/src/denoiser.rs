//! Multiscale Bayesian collaborative denoiser.
//!
//! Builds a pyramid of [`Parameters`] from the renderer's sample statistics,
//! runs the tiled collaborative estimation on every processed scale and
//! writes the finest result back into the statistics.
//!
//! Each scale is processed in 9 tile steps. Within a step every chunk
//! denoises the same tile in parallel, collecting its estimates in a
//! private accumulator; the accumulators are folded in chunk order once
//! the step completes, so results do not depend on thread scheduling.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use aurora_core::{ColorMode, DenoiserSettings, SampleStatistics, System, SystemSettings, SPECTRA_SIZE};
use aurora_math::UVec2;
use rayon::prelude::*;

use crate::error::{DenoiseError, DenoiseResult};
use crate::estimate::{denoise_tile, ChunkAccumulator, DenoiseContext, DenoiseScratch};
use crate::geometry::{PatchGeometry, CHUNK_TILE_ORDER};
use crate::marker::PixelMarker;
use crate::parameters::{for_each_range_mut, Parameters};

/// A post-process removing sampling noise from accumulated statistics.
pub trait Denoiser: Send + Sync {
    /// Denoise the statistics accumulated over `cycle` samples per pixel
    /// and store the result in their denoised table.
    fn denoise(&self, system: &System, cycle: u32, statistics: &mut SampleStatistics) -> DenoiseResult<()>;

    /// Number of histogram bins the renderer must accumulate.
    fn histogram_bins(&self) -> usize;
}

/// Create the denoiser configured in `settings`.
pub fn make_denoiser(settings: &SystemSettings) -> DenoiseResult<Box<dyn Denoiser>> {
    Ok(Box::new(BayesianCollaborativeDenoiser::new(&settings.denoiser)?))
}

/// Bayesian collaborative denoiser (Boughida and Boubekeur, 2017).
#[derive(Debug, Clone)]
pub struct BayesianCollaborativeDenoiser {
    settings: DenoiserSettings,
    geometry: PatchGeometry,
}

impl BayesianCollaborativeDenoiser {
    pub fn new(settings: &DenoiserSettings) -> DenoiseResult<Self> {
        settings.validate()?;
        Ok(Self {
            settings: settings.clone(),
            geometry: PatchGeometry::from_settings(settings),
        })
    }

    pub fn settings(&self) -> &DenoiserSettings {
        &self.settings
    }

    pub fn geometry(&self) -> &PatchGeometry {
        &self.geometry
    }

    fn check_preconditions(&self, system: &System, cycle: u32, statistics: &SampleStatistics) -> DenoiseResult<()> {
        if cycle < 2 {
            return Err(DenoiseError::NotEnoughSamples(cycle));
        }
        let resolution = system.image_resolution();
        if statistics.resolution() != resolution {
            return Err(DenoiseError::ResolutionMismatch {
                statistics: statistics.resolution(),
                image: resolution,
            });
        }
        if statistics.channels() != system.dimension() {
            return Err(DenoiseError::ChannelMismatch {
                statistics: statistics.channels(),
                expected: system.dimension(),
            });
        }
        if statistics.histogram_bins() != self.settings.histogram_bins {
            return Err(DenoiseError::HistogramBinMismatch {
                statistics: statistics.histogram_bins(),
                expected: self.settings.histogram_bins,
            });
        }
        self.settings.validate_for_resolution(resolution.x, resolution.y)?;
        Ok(())
    }

    fn denoise_multiscale<const N: usize>(&self, system: &System, cycle: u32, statistics: &mut SampleStatistics) {
        let num_of_scales = self.settings.number_of_scales as usize;
        let mut pyramid: Vec<Parameters<N>> = Vec::with_capacity(num_of_scales);
        pyramid.push(Parameters::init(system, cycle, self.settings.histogram_bins, statistics));
        for scale in 1..num_of_scales {
            let low = Parameters::downscale_of(system, &pyramid[scale - 1]);
            pyramid.push(low);
        }
        log::debug!(
            "Built {} scales, coarsest {:?}",
            pyramid.len(),
            pyramid.last().map(|p| p.resolution())
        );

        log::debug!("{} samples per finest pixel", pyramid[0].num_of_samples());

        let singular_systems = AtomicUsize::new(0);
        let processed = self.settings.processed_scales() as usize;
        for scale in (0..processed).rev() {
            let (finer, coarser) = pyramid.split_at_mut(scale + 1);
            let parameters = &mut finer[scale];
            self.denoise_scale(system, scale, parameters, &singular_systems);
            if scale + 1 < processed {
                parameters.merge(system, &mut coarser[0]);
            }
        }

        let singular = singular_systems.load(Ordering::Relaxed);
        if singular > 0 {
            log::warn!("{singular} covariance systems were singular; their values were left unshrunk");
        }
        aggregate_final(system, &pyramid[0], statistics);
    }

    /// Run every tile step over one scale and normalize its estimates.
    ///
    /// Returns the number of estimates each pixel received.
    fn denoise_scale<const N: usize>(
        &self,
        system: &System,
        scale: usize,
        parameters: &mut Parameters<N>,
        singular_systems: &AtomicUsize,
    ) -> Vec<u32> {
        let resolution = parameters.resolution();
        let mut estimates_counter = vec![0u32; parameters.num_of_pixels()];
        let mut marker = PixelMarker::new(parameters.num_of_pixels());

        let chunk_resolution = self.geometry.chunk_resolution(resolution);
        let num_of_chunks = (chunk_resolution.x * chunk_resolution.y) as usize;
        for (tile_number, &tile_position) in CHUNK_TILE_ORDER.iter().enumerate() {
            let accumulators = {
                let context = DenoiseContext {
                    parameters: &*parameters,
                    geometry: self.geometry,
                    threshold: self.settings.histogram_distance_threshold,
                    marker: &marker,
                    singular_systems,
                };
                self.denoise_chunks(system, &context, chunk_resolution, tile_position, num_of_chunks)
            };
            for accumulator in &accumulators {
                accumulator.merge_into(
                    resolution,
                    &mut parameters.denoised_value_table,
                    &mut estimates_counter,
                    &mut marker,
                );
            }
            log::debug!(
                "scale {scale}, tile[{tile_number}]: {} of {} pixels marked",
                marker.count(),
                parameters.num_of_pixels()
            );
        }

        parameters.aggregate(system, &estimates_counter);
        estimates_counter
    }

    /// Denoise the tile at `tile_position` of every chunk in parallel.
    fn denoise_chunks<const N: usize>(
        &self,
        system: &System,
        context: &DenoiseContext<'_, N>,
        chunk_resolution: UVec2,
        tile_position: UVec2,
        num_of_chunks: usize,
    ) -> Vec<ChunkAccumulator<N>> {
        let geometry = &self.geometry;
        let resolution = context.parameters.resolution();
        system.install(|| {
            (0..num_of_chunks)
                .into_par_iter()
                .map_init(
                    || DenoiseScratch::new(geometry),
                    |scratch, chunk_number| {
                        let chunk_position = geometry.chunk_position(chunk_resolution, chunk_number);
                        let tile = geometry.make_chunk_tile(resolution, chunk_position, tile_position);
                        let mut accumulator = ChunkAccumulator::new(geometry.tile_footprint(resolution, &tile));
                        denoise_tile(context, scratch, &mut accumulator, &tile);
                        accumulator
                    },
                )
                .collect()
        })
    }
}

impl Denoiser for BayesianCollaborativeDenoiser {
    fn denoise(&self, system: &System, cycle: u32, statistics: &mut SampleStatistics) -> DenoiseResult<()> {
        self.check_preconditions(system, cycle, statistics)?;

        let start = Instant::now();
        let resolution = system.image_resolution();
        log::info!(
            "Denoising {}x{} ({:?}, {} samples, {} scales)",
            resolution.x,
            resolution.y,
            system.color_mode(),
            cycle,
            self.settings.processed_scales()
        );
        match system.color_mode() {
            ColorMode::Rgb => self.denoise_multiscale::<3>(system, cycle, statistics),
            ColorMode::Spectra => self.denoise_multiscale::<SPECTRA_SIZE>(system, cycle, statistics),
        }
        log::info!("Denoised in {:?}", start.elapsed());
        Ok(())
    }

    fn histogram_bins(&self) -> usize {
        self.settings.histogram_bins
    }
}

/// Copy the finest scale's estimate into the statistics.
fn aggregate_final<const N: usize>(system: &System, parameters: &Parameters<N>, statistics: &mut SampleStatistics) {
    let table = &parameters.denoised_value_table;
    for_each_range_mut(system, statistics.denoised_table_mut(), N, |range, rows| {
        rows.copy_from_slice(&table[range.start * N..range.end * N]);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use aurora_math::{Float, PixelRect};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn make_system(resolution: UVec2, num_threads: usize, color_mode: ColorMode, denoiser: &DenoiserSettings) -> System {
        let settings = SystemSettings {
            color_mode,
            image_width: resolution.x,
            image_height: resolution.y,
            num_threads,
            denoiser: denoiser.clone(),
        };
        System::new(&settings).unwrap()
    }

    fn make_statistics(
        resolution: UVec2,
        channels: usize,
        bins: usize,
        cycle: u32,
        mut sample: impl FnMut(UVec2) -> Vec<Float>,
    ) -> SampleStatistics {
        let mut stats = SampleStatistics::new(resolution, channels, bins);
        for p in PixelRect::from_resolution(resolution).iter() {
            for _ in 0..cycle {
                let s = sample(p);
                stats.add_sample(p, &s);
            }
        }
        stats
    }

    fn small_settings() -> DenoiserSettings {
        DenoiserSettings {
            histogram_bins: 8,
            histogram_distance_threshold: 1.0,
            patch_radius: 1,
            search_window_radius: 3,
            number_of_scales: 1,
            multiscale_merge: false,
        }
    }

    fn gradient(p: UVec2, width: u32) -> [Float; 3] {
        let t = p.x as Float / width as Float;
        [0.2 + 0.5 * t, 0.6 - 0.3 * t, 0.4]
    }

    fn mse(stats: &SampleStatistics, width: u32, value: impl Fn(usize) -> Vec<Float>) -> Float {
        let mut error = 0.0;
        for p in PixelRect::from_resolution(stats.resolution()).iter() {
            let index = (p.x + width * p.y) as usize;
            let truth = gradient(p, width);
            for (v, t) in value(index).iter().zip(truth) {
                error += (v - t).powi(2);
            }
        }
        error / (stats.num_of_pixels() * 3) as Float
    }

    #[test]
    fn test_constant_image_is_preserved() {
        let resolution = UVec2::new(64, 64);
        let settings = small_settings();
        let system = make_system(resolution, 4, ColorMode::Rgb, &settings);
        let mut stats = make_statistics(resolution, 3, 8, 16, |_| vec![0.5; 3]);

        let denoiser = BayesianCollaborativeDenoiser::new(&settings).unwrap();
        denoiser.denoise(&system, 16, &mut stats).unwrap();

        for index in 0..stats.num_of_pixels() {
            for &v in stats.denoised(index) {
                assert!((v - 0.5).abs() < 1e-9, "pixel {index}: {v}");
            }
        }

        let mut parameters = Parameters::<3>::init(&system, 16, 8, &stats);
        let singular = AtomicUsize::new(0);
        let counter = denoiser.denoise_scale(&system, 0, &mut parameters, &singular);
        assert!(counter.iter().all(|&c| c > 0));
        assert_eq!(singular.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_identical_pixels_stay_bounded() {
        // Every pixel sees the same samples, so the group covariance is zero
        // while the per-pixel sample covariance is not
        let mut rng = StdRng::seed_from_u64(11);
        let samples: Vec<Vec<Float>> = (0..8).map(|_| (0..3).map(|_| rng.gen::<Float>()).collect()).collect();
        let mut expected = [0.0; 3];
        for sample in &samples {
            for (e, v) in expected.iter_mut().zip(sample) {
                *e += v / samples.len() as Float;
            }
        }

        let resolution = UVec2::new(32, 32);
        for threshold in [1.0, Float::MAX] {
            let settings = DenoiserSettings {
                histogram_distance_threshold: threshold,
                ..small_settings()
            };
            let system = make_system(resolution, 2, ColorMode::Rgb, &settings);
            let mut stats = SampleStatistics::new(resolution, 3, 8);
            for p in PixelRect::from_resolution(resolution).iter() {
                for sample in &samples {
                    stats.add_sample(p, sample);
                }
            }

            let denoiser = BayesianCollaborativeDenoiser::new(&settings).unwrap();
            denoiser.denoise(&system, 8, &mut stats).unwrap();

            for index in 0..stats.num_of_pixels() {
                for (v, e) in stats.denoised(index).iter().zip(expected) {
                    assert!((v - e).abs() < 1e-6, "threshold {threshold}, pixel {index}: {v} != {e}");
                }
            }
        }
    }

    #[test]
    fn test_zero_threshold_noise_free_is_identity() {
        let resolution = UVec2::new(24, 20);
        let settings = DenoiserSettings {
            histogram_distance_threshold: 0.0,
            ..small_settings()
        };
        let system = make_system(resolution, 3, ColorMode::Rgb, &settings);
        let mut stats = make_statistics(resolution, 3, 8, 4, |p| gradient(p, resolution.x).to_vec());

        let denoiser = BayesianCollaborativeDenoiser::new(&settings).unwrap();
        denoiser.denoise(&system, 4, &mut stats).unwrap();

        for p in PixelRect::from_resolution(resolution).iter() {
            let index = (p.x + resolution.x * p.y) as usize;
            for (v, t) in stats.denoised(index).iter().zip(gradient(p, resolution.x)) {
                assert!((v - t).abs() < 1e-9, "pixel {p:?}: {v} != {t}");
            }
        }
    }

    #[test]
    fn test_every_pixel_receives_an_estimate() {
        let mut rng = StdRng::seed_from_u64(5);
        for (pr, sr, w, h) in [(1, 3, 37, 29), (2, 2, 11, 40), (0, 1, 7, 5), (1, 4, 20, 9)] {
            let settings = DenoiserSettings {
                patch_radius: pr,
                search_window_radius: sr,
                ..small_settings()
            };
            let resolution = UVec2::new(w, h);
            let system = make_system(resolution, 2, ColorMode::Rgb, &settings);
            let stats = make_statistics(resolution, 3, 8, 4, |_| {
                (0..3).map(|_| rng.gen_range(0.0..1.0)).collect()
            });

            let denoiser = BayesianCollaborativeDenoiser::new(&settings).unwrap();
            let mut parameters = Parameters::<3>::init(&system, 4, 8, &stats);
            let singular = AtomicUsize::new(0);
            let counter = denoiser.denoise_scale(&system, 0, &mut parameters, &singular);
            assert!(
                counter.iter().all(|&c| c > 0),
                "unestimated pixel for pr={pr} sr={sr} {w}x{h}"
            );
        }
    }

    #[test]
    fn test_noisy_gradient_error_is_reduced() {
        let resolution = UVec2::new(48, 48);
        let settings = DenoiserSettings {
            histogram_bins: 16,
            histogram_distance_threshold: 2.0,
            patch_radius: 1,
            search_window_radius: 4,
            number_of_scales: 1,
            multiscale_merge: false,
        };
        let system = make_system(resolution, 4, ColorMode::Rgb, &settings);
        let mut rng = StdRng::seed_from_u64(42);
        let cycle = 16;
        let mut stats = make_statistics(resolution, 3, 16, cycle, |p| {
            gradient(p, resolution.x)
                .iter()
                .map(|v| v + rng.gen_range(-0.3..0.3))
                .collect()
        });

        let raw_error = mse(&stats, resolution.x, |i| {
            stats.sample(i).iter().map(|s| s / cycle as Float).collect()
        });
        let denoiser = BayesianCollaborativeDenoiser::new(&settings).unwrap();
        denoiser.denoise(&system, cycle, &mut stats).unwrap();
        let denoised_error = mse(&stats, resolution.x, |i| stats.denoised(i).to_vec());

        assert!(
            denoised_error < raw_error,
            "denoised mse {denoised_error} should be below raw mse {raw_error}"
        );
    }

    #[test]
    fn test_result_independent_of_thread_count() {
        let resolution = UVec2::new(40, 33);
        let settings = small_settings();
        let mut rng = StdRng::seed_from_u64(9);
        let stats = make_statistics(resolution, 3, 8, 8, |p| {
            gradient(p, resolution.x)
                .iter()
                .map(|v| v + rng.gen_range(-0.2..0.2))
                .collect()
        });

        let denoiser = BayesianCollaborativeDenoiser::new(&settings).unwrap();
        let mut results = Vec::new();
        for threads in [1, 4] {
            let system = make_system(resolution, threads, ColorMode::Rgb, &settings);
            let mut stats = stats.clone();
            denoiser.denoise(&system, 8, &mut stats).unwrap();
            results.push(stats);
        }
        for index in 0..results[0].num_of_pixels() {
            assert_eq!(results[0].denoised(index), results[1].denoised(index), "pixel {index}");
        }
    }

    #[test]
    fn test_multiscale_merge_preserves_constant_image() {
        let resolution = UVec2::new(64, 48);
        let settings = DenoiserSettings {
            number_of_scales: 3,
            multiscale_merge: true,
            ..small_settings()
        };
        let system = make_system(resolution, 4, ColorMode::Rgb, &settings);
        let mut stats = make_statistics(resolution, 3, 8, 4, |_| vec![0.25, 0.5, 1.0]);

        let denoiser = BayesianCollaborativeDenoiser::new(&settings).unwrap();
        denoiser.denoise(&system, 4, &mut stats).unwrap();

        for index in 0..stats.num_of_pixels() {
            for (v, t) in stats.denoised(index).iter().zip([0.25, 0.5, 1.0]) {
                assert!((v - t).abs() < 1e-9, "pixel {index}: {v} != {t}");
            }
        }
    }

    #[test]
    fn test_spectral_dimension() {
        let resolution = UVec2::new(12, 10);
        let settings = DenoiserSettings {
            histogram_bins: 4,
            search_window_radius: 2,
            ..small_settings()
        };
        let system = make_system(resolution, 2, ColorMode::Spectra, &settings);
        assert_eq!(system.dimension(), SPECTRA_SIZE);
        let mut stats = make_statistics(resolution, SPECTRA_SIZE, 4, 4, |_| vec![0.25; SPECTRA_SIZE]);

        let denoiser = make_denoiser(&SystemSettings {
            denoiser: settings,
            ..Default::default()
        })
        .unwrap();
        denoiser.denoise(&system, 4, &mut stats).unwrap();

        for index in 0..stats.num_of_pixels() {
            assert!(stats.denoised(index).iter().all(|v| (v - 0.25).abs() < 1e-9));
        }
    }

    #[test]
    fn test_precondition_errors() {
        let resolution = UVec2::new(16, 16);
        let settings = small_settings();
        let system = make_system(resolution, 1, ColorMode::Rgb, &settings);
        let denoiser = BayesianCollaborativeDenoiser::new(&settings).unwrap();
        assert_eq!(denoiser.histogram_bins(), 8);

        let mut stats = make_statistics(resolution, 3, 8, 1, |_| vec![0.5; 3]);
        assert!(matches!(
            denoiser.denoise(&system, 1, &mut stats),
            Err(DenoiseError::NotEnoughSamples(1))
        ));

        let mut stats = SampleStatistics::new(UVec2::new(8, 16), 3, 8);
        assert!(matches!(
            denoiser.denoise(&system, 4, &mut stats),
            Err(DenoiseError::ResolutionMismatch { .. })
        ));

        let mut stats = SampleStatistics::new(resolution, SPECTRA_SIZE, 8);
        assert!(matches!(
            denoiser.denoise(&system, 4, &mut stats),
            Err(DenoiseError::ChannelMismatch { statistics: 16, expected: 3 })
        ));

        let mut stats = SampleStatistics::new(resolution, 3, 4);
        assert!(matches!(
            denoiser.denoise(&system, 4, &mut stats),
            Err(DenoiseError::HistogramBinMismatch { statistics: 4, expected: 8 })
        ));

        // Three scales of a 16x16 image end at 4x4, smaller than a 5x5 patch
        let coarse = BayesianCollaborativeDenoiser::new(&DenoiserSettings {
            patch_radius: 2,
            number_of_scales: 3,
            multiscale_merge: true,
            ..small_settings()
        })
        .unwrap();
        let mut stats = SampleStatistics::new(resolution, 3, 8);
        assert!(matches!(
            coarse.denoise(&system, 4, &mut stats),
            Err(DenoiseError::Settings(_))
        ));

        let invalid = DenoiserSettings {
            histogram_bins: 0,
            ..small_settings()
        };
        assert!(matches!(
            BayesianCollaborativeDenoiser::new(&invalid),
            Err(DenoiseError::Settings(_))
        ));
    }
}
