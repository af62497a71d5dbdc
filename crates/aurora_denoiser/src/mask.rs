//! Fixed-capacity bitset over the pixels of one search window.

/// Bits per mask word.
const WORD_BITS: usize = u64::BITS as usize;

/// Per search-window pixel: is the patch centered there similar to the main patch?
///
/// Indexed by the row-major position inside the search window. The capacity
/// is fixed when the mask is created from the configured search radius and a
/// window larger than it is a programming error.
#[derive(Debug, Clone)]
pub struct SimilarPatchMask {
    words: Vec<u64>,
    capacity: usize,
    count: usize,
}

impl SimilarPatchMask {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(WORD_BITS)],
            capacity,
            count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of similar patches.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn reset(&mut self) {
        self.words.fill(0);
        self.count = 0;
    }

    #[inline]
    pub fn set(&mut self, index: usize) {
        assert!(index < self.capacity, "mask index {index} exceeds capacity {}", self.capacity);
        let word = &mut self.words[index / WORD_BITS];
        let bit = 1 << (index % WORD_BITS);
        if *word & bit == 0 {
            *word |= bit;
            self.count += 1;
        }
    }

    #[inline]
    pub fn is_set(&self, index: usize) -> bool {
        index < self.capacity && (self.words[index / WORD_BITS] >> (index % WORD_BITS)) & 1 == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_count() {
        let mut mask = SimilarPatchMask::with_capacity(49);
        mask.set(0);
        mask.set(24);
        mask.set(48);
        mask.set(24);
        assert_eq!(mask.count(), 3);
        assert!(mask.is_set(24));
        assert!(!mask.is_set(23));
        // Out of range reads are simply unset
        assert!(!mask.is_set(49));

        mask.reset();
        assert_eq!(mask.count(), 0);
        assert!(!mask.is_set(24));
    }

    #[test]
    #[should_panic(expected = "exceeds capacity")]
    fn test_set_beyond_capacity_panics() {
        let mut mask = SimilarPatchMask::with_capacity(9);
        mask.set(9);
    }
}
