//! Histogram-based patch similarity.
//!
//! Two patches are compared bin by bin with a chi-square distance over the
//! histograms of the pixels at matching offsets. Bins where both histograms
//! hold less than one sample carry no information and are skipped.

use aurora_math::{pixel_index, Float, PixelRect, UVec2};

use crate::geometry::PatchGeometry;
use crate::mask::SimilarPatchMask;
use crate::parameters::Parameters;

/// Chi-square distance between two histogram bins, one count per channel.
///
/// Returns the summed distance and the number of channels that took part.
#[inline]
pub fn calc_histogram_distance(lhs: &[Float], rhs: &[Float]) -> (Float, u32) {
    debug_assert_eq!(lhs.len(), rhs.len());
    let mut distance = 0.0;
    let mut valid = 0;
    for (&a, &b) in lhs.iter().zip(rhs) {
        let sum = a + b;
        if sum > 1.0 {
            let diff = a - b;
            distance += diff * diff / sum;
            valid += 1;
        }
    }
    (distance, valid)
}

/// Normalized histogram distance between the patches centered on `lhs` and `rhs`.
pub fn calc_histogram_patch_distance<const N: usize>(
    parameters: &Parameters<N>,
    geometry: &PatchGeometry,
    lhs: UVec2,
    rhs: UVec2,
) -> Float {
    let resolution = parameters.resolution();
    let mut distance = 0.0;
    let mut valid = 0u32;
    for n in 0..geometry.num_of_patch_pixels() {
        let offset = geometry.patch_offset(n);
        let a = pixel_index(geometry.patch_pixel(lhs, offset), resolution);
        let b = pixel_index(geometry.patch_pixel(rhs, offset), resolution);
        for bin in 0..parameters.histogram_bins() {
            let (d, v) = calc_histogram_distance(parameters.histogram(bin, a), parameters.histogram(bin, b));
            distance += d;
            valid += v;
        }
    }
    debug_assert!(valid > 0, "no valid histogram bins between {lhs:?} and {rhs:?}");
    if valid == 0 {
        return 0.0;
    }
    distance / valid as Float
}

/// Mark every patch in the search window of `main` whose distance to the
/// main patch is at most `threshold`. The main patch itself always qualifies.
///
/// Returns the search window; `mask` is indexed by position inside it.
pub fn select_similar_patches<const N: usize>(
    parameters: &Parameters<N>,
    geometry: &PatchGeometry,
    threshold: Float,
    main: UVec2,
    mask: &mut SimilarPatchMask,
) -> PixelRect {
    let window = geometry.make_search_window(parameters.resolution(), main);
    mask.reset();
    for (local, neighbor) in window.iter().enumerate() {
        let distance = if neighbor == main {
            0.0
        } else {
            calc_histogram_patch_distance(parameters, geometry, main, neighbor)
        };
        if distance <= threshold {
            mask.set(local);
        }
    }
    window
}
