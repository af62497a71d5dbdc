use glam::UVec2;

/// Flat index of `pixel` in a row-major image of the given resolution.
#[inline]
pub fn pixel_index(pixel: UVec2, resolution: UVec2) -> usize {
    pixel.x as usize + resolution.x as usize * pixel.y as usize
}

/// Inverse of [`pixel_index`].
#[inline]
pub fn pixel_at(index: usize, resolution: UVec2) -> UVec2 {
    let width = resolution.x as usize;
    UVec2::new((index % width) as u32, (index / width) as u32)
}

/// A rectangular range of pixels, half-open on both axes: `[begin, end)`.
///
/// Patches, search windows, chunk tiles and accumulation regions are
/// all expressed as a `PixelRect`. It owns nothing and is cheap to copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub begin: UVec2,
    pub end: UVec2,
}

impl PixelRect {
    /// Create a new rect given its begin (inclusive) and end (exclusive) corners.
    pub fn new(begin: UVec2, end: UVec2) -> Self {
        Self { begin, end }
    }

    /// The rect covering a whole image.
    pub fn from_resolution(resolution: UVec2) -> Self {
        Self::new(UVec2::ZERO, resolution)
    }

    /// Number of columns (zero if the rect is inverted).
    pub fn width(&self) -> u32 {
        self.end.x.saturating_sub(self.begin.x)
    }

    /// Number of rows (zero if the rect is inverted).
    pub fn height(&self) -> u32 {
        self.end.y.saturating_sub(self.begin.y)
    }

    pub fn pixel_count(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.pixel_count() == 0
    }

    /// Returns true if `pixel` lies inside the rect.
    pub fn contains(&self, pixel: UVec2) -> bool {
        self.begin.x <= pixel.x
            && pixel.x < self.end.x
            && self.begin.y <= pixel.y
            && pixel.y < self.end.y
    }

    /// Row-major index of `pixel` relative to the rect's begin corner.
    ///
    /// `pixel` must be inside the rect.
    #[inline]
    pub fn local_index(&self, pixel: UVec2) -> usize {
        debug_assert!(self.contains(pixel), "{pixel:?} is outside of {self:?}");
        let local = pixel - self.begin;
        local.x as usize + self.width() as usize * local.y as usize
    }

    /// Iterate over every pixel, row by row.
    pub fn iter(&self) -> impl Iterator<Item = UVec2> {
        let (begin, end) = (self.begin, self.end);
        (begin.y..end.y).flat_map(move |y| (begin.x..end.x).map(move |x| UVec2::new(x, y)))
    }

    /// The overlap of two rects. Disjoint rects give an empty rect.
    pub fn intersect(&self, other: &PixelRect) -> PixelRect {
        let begin = self.begin.max(other.begin);
        let end = self.end.min(other.end).max(begin);
        PixelRect::new(begin, end)
    }

    /// Grow the rect by `margin` on every side, clipped to an image of `resolution`.
    pub fn expand(&self, margin: u32, resolution: UVec2) -> PixelRect {
        let begin = self.begin.saturating_sub(UVec2::splat(margin));
        let end = (self.end + UVec2::splat(margin)).min(resolution);
        PixelRect::new(begin, end.max(begin))
    }

    /// A rect that contains nothing.
    pub const EMPTY: PixelRect = PixelRect {
        begin: UVec2::ZERO,
        end: UVec2::ZERO,
    };
}
