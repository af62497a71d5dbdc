//! One bit per pixel: has the pixel already been estimated as a patch center?

/// Bits per marker word.
const WORD_BITS: usize = u64::BITS as usize;

/// Compact bitset over the pixels of one scale.
///
/// A marked pixel received an estimate as the center of a similar patch
/// during the current pass, so it is not worth denoising as a main pixel
/// again. Skipping is an optimization only; results stay covered either way.
#[derive(Debug, Clone)]
pub struct PixelMarker {
    words: Vec<u64>,
    num_of_pixels: usize,
}

impl PixelMarker {
    pub fn new(num_of_pixels: usize) -> Self {
        Self {
            words: vec![0; num_of_pixels.div_ceil(WORD_BITS)],
            num_of_pixels,
        }
    }

    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    #[inline]
    pub fn is_marked(&self, index: usize) -> bool {
        debug_assert!(index < self.num_of_pixels);
        (self.words[index / WORD_BITS] >> (index % WORD_BITS)) & 1 == 1
    }

    #[inline]
    pub fn mark(&mut self, index: usize) {
        debug_assert!(index < self.num_of_pixels);
        self.words[index / WORD_BITS] |= 1 << (index % WORD_BITS);
    }

    /// Number of marked pixels.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_and_query() {
        let mut marker = PixelMarker::new(130);
        assert_eq!(marker.count(), 0);

        marker.mark(0);
        marker.mark(63);
        marker.mark(64);
        marker.mark(129);
        assert!(marker.is_marked(0));
        assert!(marker.is_marked(63));
        assert!(marker.is_marked(64));
        assert!(marker.is_marked(129));
        assert!(!marker.is_marked(1));
        assert!(!marker.is_marked(128));
        assert_eq!(marker.count(), 4);

        // Marking twice is idempotent
        marker.mark(64);
        assert_eq!(marker.count(), 4);
    }

    #[test]
    fn test_clear() {
        let mut marker = PixelMarker::new(10);
        marker.mark(3);
        marker.clear();
        assert!(!marker.is_marked(3));
        assert_eq!(marker.count(), 0);
    }
}
