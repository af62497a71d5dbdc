//! Patch, search window, chunk and tile geometry.
//!
//! The denoisable pixels of a scale, `[patch_radius, resolution - patch_radius)`,
//! are cut into square chunks of side `3 * search_radius`. Each chunk is cut
//! into a 3x3 grid of tiles of side `search_radius`. All chunks process the
//! same tile at the same time, so two tiles running in parallel are always
//! `2 * search_radius` pixels apart and their search windows never meet.

use aurora_core::DenoiserSettings;
use aurora_math::{PixelRect, UVec2};

/// Tiles per chunk along each axis.
pub const TILES_PER_CHUNK_AXIS: u32 = 3;

/// Order in which the tiles of every chunk are processed.
pub const CHUNK_TILE_ORDER: [UVec2; 9] = [
    UVec2::new(0, 0),
    UVec2::new(1, 0),
    UVec2::new(2, 0),
    UVec2::new(0, 1),
    UVec2::new(1, 1),
    UVec2::new(2, 1),
    UVec2::new(0, 2),
    UVec2::new(1, 2),
    UVec2::new(2, 2),
];

/// Patch and search window sizes, and the partitioning derived from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchGeometry {
    pub patch_radius: u32,
    pub search_radius: u32,
}

impl PatchGeometry {
    pub fn new(patch_radius: u32, search_radius: u32) -> Self {
        debug_assert!(search_radius > 0 && patch_radius <= search_radius);
        Self {
            patch_radius,
            search_radius,
        }
    }

    pub fn from_settings(settings: &DenoiserSettings) -> Self {
        Self::new(settings.patch_radius, settings.search_window_radius)
    }

    /// Side of a patch in pixels.
    pub fn patch_side(&self) -> u32 {
        2 * self.patch_radius + 1
    }

    pub fn num_of_patch_pixels(&self) -> usize {
        let side = self.patch_side() as usize;
        side * side
    }

    /// Largest possible number of pixels in a search window.
    pub fn num_of_search_window_pixels(&self) -> usize {
        let side = 2 * self.search_radius as usize + 1;
        side * side
    }

    /// Number of scalars in a patch of `dimension`-channel values.
    pub fn patch_dimension(&self, dimension: usize) -> usize {
        dimension * self.num_of_patch_pixels()
    }

    /// Side of a chunk in pixels.
    pub fn chunk_size(&self) -> u32 {
        TILES_PER_CHUNK_AXIS * self.search_radius
    }

    /// Offset of the `patch_number`-th pixel from a patch's top-left corner.
    #[inline]
    pub fn patch_offset(&self, patch_number: usize) -> UVec2 {
        let side = self.patch_side() as usize;
        UVec2::new((patch_number % side) as u32, (patch_number / side) as u32)
    }

    /// Offset of the center pixel from a patch's top-left corner.
    pub fn center_offset(&self) -> UVec2 {
        UVec2::splat(self.patch_radius)
    }

    /// The pixel at `offset` inside the patch centered on `center`.
    #[inline]
    pub fn patch_pixel(&self, center: UVec2, offset: UVec2) -> UVec2 {
        center + offset - UVec2::splat(self.patch_radius)
    }

    /// The patch centered on `center`. The patch must fit inside the image.
    pub fn make_patch(&self, center: UVec2) -> PixelRect {
        let r = UVec2::splat(self.patch_radius);
        PixelRect::new(center - r, center + r + UVec2::ONE)
    }

    /// Pixels whose whole patch lies inside the image.
    pub fn denoisable_region(&self, resolution: UVec2) -> PixelRect {
        let r = UVec2::splat(self.patch_radius);
        PixelRect::new(r, resolution.saturating_sub(r).max(r))
    }

    /// The search window around `center`, clipped so that every patch
    /// centered inside it lies inside the image.
    pub fn make_search_window(&self, resolution: UVec2, center: UVec2) -> PixelRect {
        let (pr, sr) = (self.patch_radius, self.search_radius);
        let begin = center.max(UVec2::splat(pr + sr)) - UVec2::splat(sr);
        let end = (resolution - UVec2::splat(pr)).min(center + UVec2::splat(sr + 1));
        PixelRect::new(begin, end)
    }

    /// Number of chunks along each axis.
    pub fn chunk_resolution(&self, resolution: UVec2) -> UVec2 {
        let region = self.denoisable_region(resolution);
        let chunk_size = self.chunk_size();
        UVec2::new(
            region.width().div_ceil(chunk_size),
            region.height().div_ceil(chunk_size),
        )
    }

    /// Position of the `chunk_number`-th chunk in the chunk grid.
    pub fn chunk_position(&self, chunk_resolution: UVec2, chunk_number: usize) -> UVec2 {
        let w = chunk_resolution.x as usize;
        UVec2::new((chunk_number % w) as u32, (chunk_number / w) as u32)
    }

    /// The tile at `tile_position` of the chunk at `chunk_position`.
    ///
    /// Tiles at the right and bottom borders are clipped and may be empty.
    pub fn make_chunk_tile(
        &self,
        resolution: UVec2,
        chunk_position: UVec2,
        tile_position: UVec2,
    ) -> PixelRect {
        let pr = UVec2::splat(self.patch_radius);
        let begin = pr + chunk_position * self.chunk_size() + tile_position * self.search_radius;
        let end = begin + UVec2::splat(self.search_radius);
        let limit = resolution.saturating_sub(pr);
        PixelRect::new(begin.min(limit), end.min(limit))
    }

    /// Every pixel that denoising the main pixels of `tile` can write to.
    pub fn tile_footprint(&self, resolution: UVec2, tile: &PixelRect) -> PixelRect {
        if tile.is_empty() {
            return PixelRect::EMPTY;
        }
        tile.expand(self.search_radius + self.patch_radius, resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_tiles(geometry: &PatchGeometry, resolution: UVec2, tile_position: UVec2) -> Vec<PixelRect> {
        let chunk_resolution = geometry.chunk_resolution(resolution);
        let chunks = (chunk_resolution.x * chunk_resolution.y) as usize;
        (0..chunks)
            .map(|n| {
                let chunk = geometry.chunk_position(chunk_resolution, n);
                geometry.make_chunk_tile(resolution, chunk, tile_position)
            })
            .collect()
    }

    /// Chebyshev gap between two rects, 0 if they touch or overlap.
    fn gap(a: &PixelRect, b: &PixelRect) -> u32 {
        let gx = b.begin.x.saturating_sub(a.end.x).max(a.begin.x.saturating_sub(b.end.x));
        let gy = b.begin.y.saturating_sub(a.end.y).max(a.begin.y.saturating_sub(b.end.y));
        gx.max(gy)
    }

    #[test]
    fn test_patch_sizes() {
        let geometry = PatchGeometry::new(1, 3);
        assert_eq!(geometry.patch_side(), 3);
        assert_eq!(geometry.num_of_patch_pixels(), 9);
        assert_eq!(geometry.num_of_search_window_pixels(), 49);
        assert_eq!(geometry.patch_dimension(3), 27);
        assert_eq!(geometry.chunk_size(), 9);
        assert_eq!(geometry.patch_offset(5), UVec2::new(2, 1));
        assert_eq!(geometry.center_offset(), UVec2::new(1, 1));
    }

    #[test]
    fn test_make_patch() {
        let geometry = PatchGeometry::new(2, 4);
        let patch = geometry.make_patch(UVec2::new(5, 2));
        assert_eq!(patch, PixelRect::new(UVec2::new(3, 0), UVec2::new(8, 5)));
        assert_eq!(patch.pixel_count(), geometry.num_of_patch_pixels());
    }

    #[test]
    fn test_search_window_interior_and_border() {
        let geometry = PatchGeometry::new(1, 3);
        let resolution = UVec2::new(20, 10);

        let interior = geometry.make_search_window(resolution, UVec2::new(10, 5));
        assert_eq!(interior, PixelRect::new(UVec2::new(7, 2), UVec2::new(14, 9)));
        assert_eq!(interior.pixel_count(), geometry.num_of_search_window_pixels());

        // Clipped so every candidate patch stays inside the image
        let corner = geometry.make_search_window(resolution, UVec2::new(1, 8));
        assert_eq!(corner, PixelRect::new(UVec2::new(1, 5), UVec2::new(5, 9)));
        for p in corner.iter() {
            let patch = geometry.make_patch(p);
            assert!(patch.end.x <= resolution.x && patch.end.y <= resolution.y);
        }
    }

    #[test]
    fn test_chunk_resolution() {
        let geometry = PatchGeometry::new(0, 4);
        assert_eq!(geometry.chunk_size(), 12);
        assert_eq!(geometry.chunk_resolution(UVec2::new(32, 32)), UVec2::new(3, 3));

        // The patch border is excluded before dividing
        let geometry = PatchGeometry::new(1, 4);
        assert_eq!(geometry.chunk_resolution(UVec2::new(32, 32)), UVec2::new(3, 3));
        assert_eq!(geometry.chunk_resolution(UVec2::new(26, 14)), UVec2::new(2, 1));
    }

    #[test]
    fn test_tiles_cover_denoisable_region_once() {
        for (pr, sr, w, h) in [(0, 4, 32, 32), (1, 3, 37, 29), (2, 2, 11, 40), (1, 6, 64, 64)] {
            let geometry = PatchGeometry::new(pr, sr);
            let resolution = UVec2::new(w, h);
            let region = geometry.denoisable_region(resolution);
            let mut hits = vec![0u32; (w * h) as usize];
            for tile_position in CHUNK_TILE_ORDER {
                for tile in all_tiles(&geometry, resolution, tile_position) {
                    for p in tile.iter() {
                        hits[(p.x + w * p.y) as usize] += 1;
                    }
                }
            }
            for p in PixelRect::from_resolution(resolution).iter() {
                let expected = u32::from(region.contains(p));
                assert_eq!(hits[(p.x + w * p.y) as usize], expected, "pixel {p:?} pr={pr} sr={sr}");
            }
        }
    }

    #[test]
    fn test_parallel_tiles_are_separated() {
        let geometry = PatchGeometry::new(0, 4);
        let resolution = UVec2::new(32, 32);
        for tile_position in CHUNK_TILE_ORDER {
            let tiles: Vec<PixelRect> = all_tiles(&geometry, resolution, tile_position)
                .into_iter()
                .filter(|t| !t.is_empty())
                .collect();
            for (i, a) in tiles.iter().enumerate() {
                for b in &tiles[i + 1..] {
                    assert!(gap(a, b) >= geometry.search_radius, "{a:?} vs {b:?}");
                    // The search windows of their main pixels are disjoint
                    let wa = a.expand(geometry.search_radius, resolution);
                    let wb = b.expand(geometry.search_radius, resolution);
                    assert!(wa.intersect(&wb).is_empty(), "{wa:?} overlaps {wb:?}");
                }
            }
        }
    }

    #[test]
    fn test_tile_footprint_contains_patch_writes() {
        let geometry = PatchGeometry::new(1, 3);
        let resolution = UVec2::new(30, 30);
        let tile = geometry.make_chunk_tile(resolution, UVec2::new(1, 0), UVec2::new(1, 1));
        let footprint = geometry.tile_footprint(resolution, &tile);
        for main in tile.iter() {
            for neighbor in geometry.make_search_window(resolution, main).iter() {
                for n in 0..geometry.num_of_patch_pixels() {
                    let p = geometry.patch_pixel(neighbor, geometry.patch_offset(n));
                    assert!(footprint.contains(p));
                }
            }
        }
    }

    #[test]
    fn test_border_tile_clipped_to_empty() {
        let geometry = PatchGeometry::new(1, 4);
        let resolution = UVec2::new(20, 20);
        // Chunk 1 starts at 13; its third tile column starts at 21 > 19
        let tile = geometry.make_chunk_tile(resolution, UVec2::new(1, 0), UVec2::new(2, 0));
        assert!(tile.is_empty());
        assert_eq!(geometry.tile_footprint(resolution, &tile), PixelRect::EMPTY);
    }
}
