//! Per-scale denoising inputs and output.
//!
//! One `Parameters` exists per pyramid level. The finest level is built from
//! the renderer's sample statistics, coarser ones by 2x2 box averaging.
//! Every table is a flat array with a fixed number of scalars per pixel so
//! parallel jobs can own disjoint index ranges of it.

use std::ops::Range;

use aurora_core::{SampleStatistics, System};
use aurora_math::{covariance_factor_count, pixel_at, pixel_index, Float, Spectrum, UVec2};
use rayon::prelude::*;

/// Upsampling weight of the co-located low resolution pixel.
const MAIN_WEIGHT: Float = 9.0 / 16.0;
/// Upsampling weight of each axis-adjacent low resolution pixel.
const ADJACENT_WEIGHT: Float = 3.0 / 16.0;
/// Upsampling weight of the diagonal low resolution pixel.
const DIAGONAL_WEIGHT: Float = 1.0 / 16.0;

/// Denoising tables of one scale for `N`-channel samples.
#[derive(Debug, Clone)]
pub struct Parameters<const N: usize> {
    resolution: UVec2,
    num_of_samples: u32,
    histogram_bins: usize,
    /// Expected sample value, `N` per pixel
    pub(crate) sample_value_table: Vec<Float>,
    /// Histograms, bin-major: `(bin * pixels + pixel) * N + channel`
    pub(crate) histogram_table: Vec<Float>,
    /// Covariance of the expected value, compressed upper triangle per pixel
    pub(crate) covariance_factor_table: Vec<Float>,
    /// Accumulated, then normalized, denoised value, `N` per pixel
    pub(crate) denoised_value_table: Vec<Float>,
}

impl<const N: usize> Parameters<N> {
    /// Scalars per pixel in the covariance table.
    pub const COVARIANCE_STRIDE: usize = covariance_factor_count(N);

    fn allocate(resolution: UVec2, num_of_samples: u32, histogram_bins: usize) -> Self {
        let pixels = resolution.x as usize * resolution.y as usize;
        Self {
            resolution,
            num_of_samples,
            histogram_bins,
            sample_value_table: vec![0.0; pixels * N],
            histogram_table: vec![0.0; histogram_bins * pixels * N],
            covariance_factor_table: vec![0.0; pixels * Self::COVARIANCE_STRIDE],
            denoised_value_table: vec![0.0; pixels * N],
        }
    }

    /// Build the finest scale from statistics accumulated over `cycle` samples.
    ///
    /// Expected values are `sum / n`. Covariance factors are the unbiased
    /// covariance of that mean, `(Σab - Σa·Σb / n) / (n (n - 1))`.
    pub fn init(system: &System, cycle: u32, histogram_bins: usize, statistics: &SampleStatistics) -> Self {
        assert!(cycle >= 2, "the covariance needs at least 2 samples, got {cycle}");
        debug_assert_eq!(statistics.channels(), N);
        debug_assert_eq!(statistics.histogram_bins(), histogram_bins);

        let mut parameters = Self::allocate(statistics.resolution(), cycle, histogram_bins);
        let k = 1.0 / cycle as Float;
        let k1 = 1.0 / (cycle - 1) as Float;

        for_each_range_mut(system, &mut parameters.sample_value_table, N, |range, rows| {
            for (pixel, value) in range.zip(rows.chunks_exact_mut(N)) {
                for (v, &sum) in value.iter_mut().zip(statistics.sample(pixel)) {
                    *v = k * sum;
                }
            }
        });

        for_each_range_mut(
            system,
            &mut parameters.covariance_factor_table,
            Self::COVARIANCE_STRIDE,
            |range, rows| {
                for (pixel, factors) in range.zip(rows.chunks_exact_mut(Self::COVARIANCE_STRIDE)) {
                    let sum = statistics.sample(pixel);
                    let squared = statistics.sample_squared(pixel);
                    let mut offset = 0;
                    for a in 0..N {
                        for b in a..N {
                            let product = if a == b {
                                squared[a]
                            } else {
                                statistics.cross_product(pixel, a, b)
                            };
                            factors[offset] = (product - k * sum[a] * sum[b]) * (k * k1);
                            offset += 1;
                        }
                    }
                }
            },
        );

        let pixels = parameters.num_of_pixels();
        for_each_range_mut(system, &mut parameters.histogram_table, N, |range, rows| {
            for (index, dst) in range.zip(rows.chunks_exact_mut(N)) {
                let (bin, pixel) = (index / pixels, index % pixels);
                dst.copy_from_slice(statistics.histogram(pixel, bin));
            }
        });

        parameters
    }

    /// Build the next coarser scale: half the resolution (rounded down),
    /// every table 2x2 box averaged.
    pub fn downscale_of(system: &System, high: &Parameters<N>) -> Self {
        let resolution = UVec2::new(high.resolution.x >> 1, high.resolution.y >> 1);
        let mut low = Self::allocate(resolution, high.num_of_samples, high.histogram_bins);

        for_each_range_mut(system, &mut low.sample_value_table, N, |range, rows| {
            downscale_average(high.resolution, &high.sample_value_table, resolution, rows, range, N);
        });

        let (high_plane, low_plane) = (high.num_of_pixels() * N, low.num_of_pixels() * N);
        if low_plane > 0 {
            for (bin, dst) in low.histogram_table.chunks_exact_mut(low_plane).enumerate() {
                let src = &high.histogram_table[bin * high_plane..(bin + 1) * high_plane];
                for_each_range_mut(system, dst, N, |range, rows| {
                    downscale_average(high.resolution, src, resolution, rows, range, N);
                });
            }
        }

        let stride = Self::COVARIANCE_STRIDE;
        for_each_range_mut(system, &mut low.covariance_factor_table, stride, |range, rows| {
            downscale_average(high.resolution, &high.covariance_factor_table, resolution, rows, range, stride);
        });

        low
    }

    pub fn resolution(&self) -> UVec2 {
        self.resolution
    }

    pub fn num_of_pixels(&self) -> usize {
        self.resolution.x as usize * self.resolution.y as usize
    }

    pub fn num_of_samples(&self) -> u32 {
        self.num_of_samples
    }

    pub fn histogram_bins(&self) -> usize {
        self.histogram_bins
    }

    #[inline]
    pub fn sample_value(&self, pixel_index: usize) -> Spectrum<N> {
        Spectrum::from_column_slice(&self.sample_value_table[pixel_index * N..(pixel_index + 1) * N])
    }

    #[inline]
    pub fn covariance_factors(&self, pixel_index: usize) -> &[Float] {
        let stride = Self::COVARIANCE_STRIDE;
        &self.covariance_factor_table[pixel_index * stride..(pixel_index + 1) * stride]
    }

    /// One bin of a pixel's histogram, one count per channel.
    #[inline]
    pub fn histogram(&self, bin: usize, pixel_index: usize) -> &[Float] {
        let begin = (bin * self.num_of_pixels() + pixel_index) * N;
        &self.histogram_table[begin..begin + N]
    }

    #[inline]
    pub fn denoised_value(&self, pixel_index: usize) -> Spectrum<N> {
        Spectrum::from_column_slice(&self.denoised_value_table[pixel_index * N..(pixel_index + 1) * N])
    }

    /// Turn the accumulated estimates into averages.
    ///
    /// Every pixel must have received at least one estimate.
    pub fn aggregate(&mut self, system: &System, estimates_counter: &[u32]) {
        debug_assert_eq!(estimates_counter.len(), self.num_of_pixels());
        for_each_range_mut(system, &mut self.denoised_value_table, N, |range, rows| {
            for (pixel, value) in range.zip(rows.chunks_exact_mut(N)) {
                let count = estimates_counter[pixel];
                assert!(count > 0, "pixel {pixel} received no estimate");
                let k = 1.0 / count as Float;
                value.iter_mut().for_each(|v| *v *= k);
            }
        });
    }

    /// Merge a denoised coarser scale into this one.
    ///
    /// Replaces the low frequencies of this scale's estimate with the
    /// coarser estimate: `high += up(low) - up(down(high))`. The coarser
    /// scale's expected values are reused as scratch for `down(high)`.
    pub fn merge(&mut self, system: &System, low: &mut Parameters<N>) {
        debug_assert_eq!(low.resolution, UVec2::new(self.resolution.x >> 1, self.resolution.y >> 1));
        let negated: Vec<Float> = self.denoised_value_table.iter().map(|v| -v).collect();

        let (high_res, low_res) = (self.resolution, low.resolution);
        for_each_range_mut(system, &mut low.sample_value_table, N, |range, rows| {
            downscale_average(high_res, &negated, low_res, rows, range, N);
        });

        let low_denoised = &low.denoised_value_table;
        let low_negated = &low.sample_value_table;
        for_each_range_mut(system, &mut self.denoised_value_table, N, |range, rows| {
            upscale_add(low_res, low_denoised, high_res, rows, range.clone(), N);
            upscale_add(low_res, low_negated, high_res, rows, range, N);
        });
    }
}

/// Split `table` into one contiguous range of pixels per worker and run
/// `job` on each in parallel. `job` receives the pixel range and the rows
/// of those pixels, `stride` scalars each.
pub(crate) fn for_each_range_mut<F>(system: &System, table: &mut [Float], stride: usize, job: F)
where
    F: Fn(Range<usize>, &mut [Float]) + Send + Sync,
{
    debug_assert!(stride > 0 && table.len() % stride == 0);
    let len = system.range_job_len(table.len() / stride);
    system.install(|| {
        table
            .par_chunks_mut(len * stride)
            .enumerate()
            .for_each(|(job_id, rows)| {
                let begin = job_id * len;
                job(begin..begin + rows.len() / stride, rows);
            });
    });
}

/// 2x2 box average of `high` into the `range` of low resolution pixels held
/// by `low_rows`. Pixels past an odd border are clamped to the last column/row.
pub fn downscale_average(
    high_res: UVec2,
    high: &[Float],
    low_res: UVec2,
    low_rows: &mut [Float],
    range: Range<usize>,
    stride: usize,
) {
    for (low_index, dst) in range.zip(low_rows.chunks_exact_mut(stride)) {
        let low_pixel = pixel_at(low_index, low_res);
        dst.fill(0.0);
        for offset_y in 0..2 {
            for offset_x in 0..2 {
                let high_pixel = UVec2::new(
                    (2 * low_pixel.x + offset_x).min(high_res.x - 1),
                    (2 * low_pixel.y + offset_y).min(high_res.y - 1),
                );
                let src = pixel_index(high_pixel, high_res) * stride;
                for (d, s) in dst.iter_mut().zip(&high[src..src + stride]) {
                    *d += s;
                }
            }
        }
        dst.iter_mut().for_each(|d| *d *= 0.25);
    }
}

/// Add the bilinear upsampling of `low` to the `range` of high resolution
/// pixels held by `high_rows`.
///
/// Each high pixel blends its co-located low pixel (9/16), the two low
/// pixels adjacent on the side the high pixel leans to (3/16 each) and the
/// diagonal one between them (1/16). Neighbors are clamped at the border.
pub fn upscale_add(
    low_res: UVec2,
    low: &[Float],
    high_res: UVec2,
    high_rows: &mut [Float],
    range: Range<usize>,
    stride: usize,
) {
    let neighbor = |high: u32, low_max: u32| -> u32 {
        let p = (high >> 1).min(low_max);
        if high % 2 == 1 {
            (p + 1).min(low_max)
        } else {
            p.saturating_sub(1)
        }
    };

    let last = low_res - UVec2::ONE;
    for (high_index, dst) in range.zip(high_rows.chunks_exact_mut(stride)) {
        let high_pixel = pixel_at(high_index, high_res);
        let p1 = UVec2::new((high_pixel.x >> 1).min(last.x), (high_pixel.y >> 1).min(last.y));
        let p2 = UVec2::new(neighbor(high_pixel.x, last.x), neighbor(high_pixel.y, last.y));

        let taps = [
            (MAIN_WEIGHT, p1),
            (ADJACENT_WEIGHT, UVec2::new(p1.x, p2.y)),
            (ADJACENT_WEIGHT, UVec2::new(p2.x, p1.y)),
            (DIAGONAL_WEIGHT, p2),
        ];
        for (weight, pixel) in taps {
            let src = pixel_index(pixel, low_res) * stride;
            for (d, s) in dst.iter_mut().zip(&low[src..src + stride]) {
                *d += weight * s;
            }
        }
    }
}
