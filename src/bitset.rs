//! Scratch bitmaps addressed by bucket offset.
//!
//! Bulk set operations mark buckets of one table in a [`TemporaryBitset`]
//! instead of building intermediate sets, so every element is hashed once and
//! the final result can be allocated at its exact size.

use smallvec::SmallVec;
use smallvec::smallvec;

const WORD_BITS: usize = u64::BITS as usize;

/// Tables up to this many buckets keep their scratch bitmap inline.
const INLINE_WORDS: usize = 4;

/// A fixed-size bitmap covering the buckets of one table.
#[derive(Clone, Debug)]
pub(crate) struct TemporaryBitset {
    words: SmallVec<[u64; INLINE_WORDS]>,
    count: usize,
}

impl TemporaryBitset {
    /// An all-clear bitmap able to address `capacity` bits.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            words: smallvec![0; capacity.div_ceil(WORD_BITS).max(1)],
            count: 0,
        }
    }

    /// A bitmap initialized from existing occupancy words.
    pub(crate) fn copy_of(words: &[u64]) -> Self {
        Self {
            words: SmallVec::from_slice(words),
            count: words.iter().map(|w| w.count_ones() as usize).sum(),
        }
    }

    /// Number of set bits.
    #[inline(always)]
    pub(crate) fn count(&self) -> usize {
        self.count
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, offset: usize) -> bool {
        self.words[offset / WORD_BITS] & (1 << (offset % WORD_BITS)) != 0
    }

    /// Sets bit `offset`; returns `true` if it was previously clear.
    #[inline]
    pub(crate) fn insert(&mut self, offset: usize) -> bool {
        let word = &mut self.words[offset / WORD_BITS];
        let bit = 1 << (offset % WORD_BITS);
        if *word & bit != 0 {
            return false;
        }
        *word |= bit;
        self.count += 1;
        true
    }

    /// Clears bit `offset`; returns `true` if it was previously set.
    #[inline]
    pub(crate) fn remove(&mut self, offset: usize) -> bool {
        let word = &mut self.words[offset / WORD_BITS];
        let bit = 1 << (offset % WORD_BITS);
        if *word & bit == 0 {
            return false;
        }
        *word &= !bit;
        self.count -= 1;
        true
    }

    /// Set bits in ascending order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(index, &word)| {
            let mut bits = word;
            core::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(index * WORD_BITS + bit)
            })
        })
    }
}
