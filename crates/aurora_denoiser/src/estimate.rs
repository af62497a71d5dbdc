//! Collaborative estimation of the patches around one main pixel.
//!
//! For every offset inside a patch the similar neighbors form a group of
//! noisy observations. The group is filtered twice with an empirical Bayes
//! shrinkage: the first pass gives a pilot estimate whose statistics drive
//! the second pass over the raw values.

use std::sync::atomic::{AtomicUsize, Ordering};

use aurora_math::{
    clamp_covariance, factors_to_matrix, pixel_index, Float, Matrix, PixelRect, Spectrum, SymmetricSolver, UVec2,
};

use crate::geometry::PatchGeometry;
use crate::marker::PixelMarker;
use crate::mask::SimilarPatchMask;
use crate::parameters::Parameters;
use crate::similarity::select_similar_patches;

/// Read-only state shared by every chunk of a tile step.
pub struct DenoiseContext<'a, const N: usize> {
    pub parameters: &'a Parameters<N>,
    pub geometry: PatchGeometry,
    pub threshold: Float,
    /// Pixels estimated as patch centers in earlier tile steps of this scale
    pub marker: &'a PixelMarker,
    /// Number of shrinkage systems that could not be solved
    pub singular_systems: &'a AtomicUsize,
}

impl<const N: usize> DenoiseContext<'_, N> {
    #[inline]
    fn source_index(&self, neighbor: UVec2, offset: UVec2) -> usize {
        pixel_index(self.geometry.patch_pixel(neighbor, offset), self.parameters.resolution())
    }
}

/// Per-worker scratch buffers, reused across main pixels.
pub struct DenoiseScratch<const N: usize> {
    mask: SimilarPatchMask,
    /// Staged values, indexed by position inside the search window
    staging: Vec<Spectrum<N>>,
}

impl<const N: usize> DenoiseScratch<N> {
    pub fn new(geometry: &PatchGeometry) -> Self {
        let capacity = geometry.num_of_search_window_pixels();
        Self {
            mask: SimilarPatchMask::with_capacity(capacity),
            staging: vec![Spectrum::zeros(); capacity],
        }
    }
}

/// Estimates produced by one chunk during one tile step.
///
/// Covers every pixel the chunk's tile can write to; folded into the
/// scale's tables after the step, in chunk order.
pub struct ChunkAccumulator<const N: usize> {
    region: PixelRect,
    values: Vec<Float>,
    counts: Vec<u32>,
    marks: PixelMarker,
}

impl<const N: usize> ChunkAccumulator<N> {
    pub fn new(region: PixelRect) -> Self {
        let pixels = region.pixel_count();
        Self {
            region,
            values: vec![0.0; pixels * N],
            counts: vec![0; pixels],
            marks: PixelMarker::new(pixels),
        }
    }

    pub fn region(&self) -> PixelRect {
        self.region
    }

    #[inline]
    pub fn add(&mut self, pixel: UVec2, value: &Spectrum<N>) {
        let local = self.region.local_index(pixel);
        for (dst, v) in self.values[local * N..(local + 1) * N].iter_mut().zip(value.iter()) {
            *dst += v;
        }
        self.counts[local] += 1;
    }

    #[inline]
    pub fn mark(&mut self, pixel: UVec2) {
        let local = self.region.local_index(pixel);
        self.marks.mark(local);
    }

    #[inline]
    pub fn is_marked(&self, pixel: UVec2) -> bool {
        self.region.contains(pixel) && self.marks.is_marked(self.region.local_index(pixel))
    }

    /// Number of estimates recorded for `pixel` by this chunk.
    pub fn count(&self, pixel: UVec2) -> u32 {
        if self.region.contains(pixel) {
            self.counts[self.region.local_index(pixel)]
        } else {
            0
        }
    }

    /// Add the estimates, counts and marks into the scale's tables.
    pub fn merge_into(
        &self,
        resolution: UVec2,
        denoised: &mut [Float],
        estimates_counter: &mut [u32],
        marker: &mut PixelMarker,
    ) {
        for (local, pixel) in self.region.iter().enumerate() {
            let count = self.counts[local];
            if count == 0 {
                continue;
            }
            let index = pixel_index(pixel, resolution);
            for (dst, v) in denoised[index * N..(index + 1) * N]
                .iter_mut()
                .zip(&self.values[local * N..(local + 1) * N])
            {
                *dst += v;
            }
            estimates_counter[index] += count;
            if self.marks.is_marked(local) {
                marker.mark(index);
            }
        }
    }
}

/// Denoise every main pixel of `tile` not yet estimated as a patch center.
pub fn denoise_tile<const N: usize>(
    context: &DenoiseContext<'_, N>,
    scratch: &mut DenoiseScratch<N>,
    accumulator: &mut ChunkAccumulator<N>,
    tile: &PixelRect,
) {
    let resolution = context.parameters.resolution();
    for main in tile.iter() {
        if context.marker.is_marked(pixel_index(main, resolution)) || accumulator.is_marked(main) {
            continue;
        }
        denoise_pixels(context, scratch, accumulator, main);
    }
}

/// Denoise the patches similar to the patch centered on `main`.
pub fn denoise_pixels<const N: usize>(
    context: &DenoiseContext<'_, N>,
    scratch: &mut DenoiseScratch<N>,
    accumulator: &mut ChunkAccumulator<N>,
    main: UVec2,
) {
    let window = select_similar_patches(
        context.parameters,
        &context.geometry,
        context.threshold,
        main,
        &mut scratch.mask,
    );
    if scratch.mask.count() <= context.geometry.patch_dimension(N) {
        denoise_only_main_patch(context, &scratch.mask, &window, accumulator, main);
    } else {
        denoise_selected_patches(context, scratch, &window, accumulator);
    }
}

/// Too few similar patches to estimate a covariance: average them and
/// estimate the main patch only.
pub fn denoise_only_main_patch<const N: usize>(
    context: &DenoiseContext<'_, N>,
    mask: &SimilarPatchMask,
    window: &PixelRect,
    accumulator: &mut ChunkAccumulator<N>,
    main: UVec2,
) {
    let geometry = &context.geometry;
    let k = 1.0 / mask.count() as Float;
    for n in 0..geometry.num_of_patch_pixels() {
        let offset = geometry.patch_offset(n);
        let mut estimate = Spectrum::<N>::zeros();
        for (_, neighbor) in similar_neighbors(window, mask) {
            estimate += context.parameters.sample_value(context.source_index(neighbor, offset));
        }
        estimate *= k;
        accumulator.add(geometry.patch_pixel(main, offset), &estimate);
    }
}

/// Two-step collaborative estimate of every similar patch.
pub fn denoise_selected_patches<const N: usize>(
    context: &DenoiseContext<'_, N>,
    scratch: &mut DenoiseScratch<N>,
    window: &PixelRect,
    accumulator: &mut ChunkAccumulator<N>,
) {
    let geometry = &context.geometry;
    let parameters = context.parameters;
    let mask = &scratch.mask;
    let staging = &mut scratch.staging;
    let center = geometry.center_offset();

    for n in 0..geometry.num_of_patch_pixels() {
        let offset = geometry.patch_offset(n);
        let raw = |neighbor: UVec2| parameters.sample_value(context.source_index(neighbor, offset));

        // Step 1
        let covariance_mean = calc_covariance_mean(context, mask, window, offset);
        let mean = calc_empirical_mean(window, mask, raw);
        let covariance = calc_empirical_covariance(window, mask, raw, &mean);
        // The group covariance never drops below the noise it carries
        let covariance = clamp_covariance(&covariance, &covariance_mean);
        stage_values(context, window, mask, raw, &mean, &covariance_mean, &covariance, staging);

        // Step 2
        let staged = |local: usize| staging[local];
        let mean = calc_empirical_mean_local(window, mask, staged);
        let covariance = calc_empirical_covariance_local(window, mask, staged, &mean);
        stage_values(
            context,
            window,
            mask,
            raw,
            &mean,
            &covariance_mean,
            &(covariance + covariance_mean),
            staging,
        );

        for (local, neighbor) in similar_neighbors(window, mask) {
            let target = geometry.patch_pixel(neighbor, offset);
            accumulator.add(target, &staging[local]);
            if offset == center {
                accumulator.mark(target);
            }
        }
    }
}

/// Similar neighbors of a search window with their position inside it.
fn similar_neighbors<'a>(
    window: &PixelRect,
    mask: &'a SimilarPatchMask,
) -> impl Iterator<Item = (usize, UVec2)> + 'a {
    window.iter().enumerate().filter(move |(local, _)| mask.is_set(*local))
}

/// Mean of the covariance factors of the similar neighbors at `offset`.
fn calc_covariance_mean<const N: usize>(
    context: &DenoiseContext<'_, N>,
    mask: &SimilarPatchMask,
    window: &PixelRect,
    offset: UVec2,
) -> Matrix<N> {
    let mut sum = vec![0.0; Parameters::<N>::COVARIANCE_STRIDE];
    for (_, neighbor) in similar_neighbors(window, mask) {
        let factors = context.parameters.covariance_factors(context.source_index(neighbor, offset));
        for (s, f) in sum.iter_mut().zip(factors) {
            *s += f;
        }
    }
    factors_to_matrix::<N>(&sum) / mask.count() as Float
}

fn calc_empirical_mean<const N: usize>(
    window: &PixelRect,
    mask: &SimilarPatchMask,
    value: impl Fn(UVec2) -> Spectrum<N>,
) -> Spectrum<N> {
    let sum: Spectrum<N> = similar_neighbors(window, mask).map(|(_, neighbor)| value(neighbor)).sum();
    sum / mask.count() as Float
}

fn calc_empirical_mean_local<const N: usize>(
    window: &PixelRect,
    mask: &SimilarPatchMask,
    value: impl Fn(usize) -> Spectrum<N>,
) -> Spectrum<N> {
    let sum: Spectrum<N> = similar_neighbors(window, mask).map(|(local, _)| value(local)).sum();
    sum / mask.count() as Float
}

/// Unbiased covariance of the similar values around `mean`.
fn calc_empirical_covariance<const N: usize>(
    window: &PixelRect,
    mask: &SimilarPatchMask,
    value: impl Fn(UVec2) -> Spectrum<N>,
    mean: &Spectrum<N>,
) -> Matrix<N> {
    let mut sum = Matrix::<N>::zeros();
    for (_, neighbor) in similar_neighbors(window, mask) {
        let diff = value(neighbor) - mean;
        sum += diff * diff.transpose();
    }
    sum / (mask.count() - 1) as Float
}

fn calc_empirical_covariance_local<const N: usize>(
    window: &PixelRect,
    mask: &SimilarPatchMask,
    value: impl Fn(usize) -> Spectrum<N>,
    mean: &Spectrum<N>,
) -> Matrix<N> {
    let mut sum = Matrix::<N>::zeros();
    for (local, _) in similar_neighbors(window, mask) {
        let diff = value(local) - mean;
        sum += diff * diff.transpose();
    }
    sum / (mask.count() - 1) as Float
}

/// `staged = x - covariance_mean * covariance⁻¹ * (x - mean)` for every
/// similar raw value `x`. Values pass through unchanged when `covariance`
/// cannot be factorized.
#[allow(clippy::too_many_arguments)]
fn stage_values<const N: usize>(
    context: &DenoiseContext<'_, N>,
    window: &PixelRect,
    mask: &SimilarPatchMask,
    raw: impl Fn(UVec2) -> Spectrum<N>,
    mean: &Spectrum<N>,
    covariance_mean: &Matrix<N>,
    covariance: &Matrix<N>,
    staging: &mut [Spectrum<N>],
) {
    let solver = SymmetricSolver::new(covariance);
    if solver.is_none() {
        context.singular_systems.fetch_add(1, Ordering::Relaxed);
    }
    for (local, neighbor) in similar_neighbors(window, mask) {
        let x = raw(neighbor);
        staging[local] = match &solver {
            Some(solver) => x - covariance_mean * solver.solve(&(x - mean)),
            None => x,
        };
    }
}
