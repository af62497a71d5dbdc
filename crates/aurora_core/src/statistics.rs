//! Per-pixel sample statistics accumulated by the renderer.
//!
//! For every pixel the renderer keeps the running sum of its samples, the
//! sum of squares, the cross products between channel pairs and a
//! per-channel histogram of sample values. The denoiser reads these tables
//! and writes its estimate into the denoised table.
//!
//! All tables are flat and row-major. Cross products for channels `a < b`
//! live at `factor_index(a) + (b - a - 1)` inside a pixel's factor row,
//! where `factor_index(a) = a * (2C - a - 1) / 2` for `C` channels.
//! Histograms are stored pixel-major: `(pixel * bins + bin) * C + channel`.

use aurora_math::{pixel_index, Float, UVec2};

/// Gamma applied to sample values before binning.
pub const HISTOGRAM_GAMMA: Float = 2.2;

/// Sample value mapped to the last histogram bin; brighter values saturate.
pub const HISTOGRAM_SATURATION: Float = 2.5;

/// Accumulated statistics of every pixel of an image.
#[derive(Clone, Debug)]
pub struct SampleStatistics {
    resolution: UVec2,
    channels: usize,
    histogram_bins: usize,
    sample_table: Vec<Float>,
    sample_squared_table: Vec<Float>,
    covariance_factor_table: Vec<Float>,
    histogram_table: Vec<Float>,
    denoised_table: Vec<Float>,
}

impl SampleStatistics {
    /// Create empty statistics for an image.
    pub fn new(resolution: UVec2, channels: usize, histogram_bins: usize) -> Self {
        assert!(channels > 0, "statistics need at least one channel");
        assert!(histogram_bins > 0, "statistics need at least one histogram bin");
        let pixels = resolution.x as usize * resolution.y as usize;
        let factors = channels * (channels - 1) / 2;
        Self {
            resolution,
            channels,
            histogram_bins,
            sample_table: vec![0.0; pixels * channels],
            sample_squared_table: vec![0.0; pixels * channels],
            covariance_factor_table: vec![0.0; pixels * factors],
            histogram_table: vec![0.0; pixels * histogram_bins * channels],
            denoised_table: vec![0.0; pixels * channels],
        }
    }

    pub fn resolution(&self) -> UVec2 {
        self.resolution
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn histogram_bins(&self) -> usize {
        self.histogram_bins
    }

    pub fn num_of_pixels(&self) -> usize {
        self.resolution.x as usize * self.resolution.y as usize
    }

    /// Cross-product terms stored per pixel.
    pub fn num_of_covariance_factors(&self) -> usize {
        self.channels * (self.channels - 1) / 2
    }

    /// Offset of the first cross product of channel `a` in a factor row.
    #[inline]
    pub fn factor_index(&self, a: usize) -> usize {
        a * (2 * self.channels - a - 1) / 2
    }

    /// Sum of samples of a pixel.
    #[inline]
    pub fn sample(&self, pixel_index: usize) -> &[Float] {
        let c = self.channels;
        &self.sample_table[pixel_index * c..(pixel_index + 1) * c]
    }

    /// Sum of squared samples of a pixel.
    #[inline]
    pub fn sample_squared(&self, pixel_index: usize) -> &[Float] {
        let c = self.channels;
        &self.sample_squared_table[pixel_index * c..(pixel_index + 1) * c]
    }

    /// Sum of `sample[a] * sample[b]` for `a < b`.
    #[inline]
    pub fn cross_product(&self, pixel_index: usize, a: usize, b: usize) -> Float {
        debug_assert!(a < b && b < self.channels);
        let row = self.num_of_covariance_factors() * pixel_index;
        self.covariance_factor_table[row + self.factor_index(a) + (b - a - 1)]
    }

    /// Histogram counts of one bin of a pixel, one value per channel.
    #[inline]
    pub fn histogram(&self, pixel_index: usize, bin: usize) -> &[Float] {
        let c = self.channels;
        let begin = (pixel_index * self.histogram_bins + bin) * c;
        &self.histogram_table[begin..begin + c]
    }

    /// Denoised value of a pixel.
    #[inline]
    pub fn denoised(&self, pixel_index: usize) -> &[Float] {
        let c = self.channels;
        &self.denoised_table[pixel_index * c..(pixel_index + 1) * c]
    }

    pub fn set_denoised(&mut self, pixel_index: usize, value: &[Float]) {
        let c = self.channels;
        self.denoised_table[pixel_index * c..(pixel_index + 1) * c].copy_from_slice(value);
    }

    /// The whole denoised table, `channels` values per pixel.
    pub fn denoised_table_mut(&mut self) -> &mut [Float] {
        &mut self.denoised_table
    }

    /// Accumulate one sample of `pixel`.
    pub fn add_sample(&mut self, pixel: UVec2, sample: &[Float]) {
        debug_assert_eq!(sample.len(), self.channels);
        let index = pixel_index(pixel, self.resolution);
        let c = self.channels;

        for (si, &value) in sample.iter().enumerate() {
            self.sample_table[index * c + si] += value;
            self.sample_squared_table[index * c + si] += value * value;
        }

        let row = self.num_of_covariance_factors() * index;
        let mut offset = 0;
        for a in 0..c {
            for b in (a + 1)..c {
                self.covariance_factor_table[row + offset] += sample[a] * sample[b];
                offset += 1;
            }
        }

        // Splat each channel between the two nearest bins
        let last_bin = self.histogram_bins - 1;
        for (si, &value) in sample.iter().enumerate() {
            let position = histogram_position(value) * last_bin as Float;
            let lower = (position.floor() as usize).min(last_bin);
            let upper = (lower + 1).min(last_bin);
            let weight = position - lower as Float;
            let base = index * self.histogram_bins;
            self.histogram_table[(base + lower) * c + si] += 1.0 - weight;
            self.histogram_table[(base + upper) * c + si] += weight;
        }
    }

    /// Reset every table to zero.
    pub fn clear(&mut self) {
        self.sample_table.fill(0.0);
        self.sample_squared_table.fill(0.0);
        self.covariance_factor_table.fill(0.0);
        self.histogram_table.fill(0.0);
        self.denoised_table.fill(0.0);
    }
}

/// Normalized histogram position of a sample value in `[0, 1]`.
pub fn histogram_position(value: Float) -> Float {
    let v = value.max(0.0) / HISTOGRAM_SATURATION;
    v.powf(1.0 / HISTOGRAM_GAMMA).min(1.0)
}
