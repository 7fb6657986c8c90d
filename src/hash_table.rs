//! Occupancy bitmap and bucket arithmetic for linear open-addressing tables.
//!
//! The bitmap is type-agnostic: it only knows which buckets are occupied.
//! Anything that needs element knowledge (hashing an occupied bucket, moving
//! an entry) goes through [`HashTableDelegate`].

use core::fmt::Debug;

const WORD_BITS: usize = u64::BITS as usize;

/// Smallest scale a non-empty table is allocated with.
const MIN_SCALE: u8 = 1;

#[inline(always)]
pub(crate) fn max_load(bucket_count: usize) -> usize {
    ((bucket_count as u128 * 3) / 4) as usize
}

/// Returns the smallest scale whose load limit admits `capacity` elements.
#[inline]
pub(crate) fn scale_for_capacity(capacity: usize) -> u8 {
    let capacity = capacity.max(1);
    let minimum_entries = (capacity as u128 * 4).div_ceil(3) as usize;
    let bucket_count = minimum_entries
        .max(1 << MIN_SCALE)
        .checked_next_power_of_two()
        .expect("capacity overflow");
    bucket_count.trailing_zeros() as u8
}

#[inline(always)]
pub(crate) fn word_count(scale: u8) -> usize {
    (1usize << scale).div_ceil(WORD_BITS)
}

/// A slot position inside a table.
///
/// Buckets are plain offsets; they carry no ownership and are only
/// meaningful relative to the table that produced them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bucket {
    offset: usize,
}

impl Bucket {
    /// Creates a bucket referring to slot `offset`.
    #[inline(always)]
    pub const fn new(offset: usize) -> Self {
        Self { offset }
    }

    /// Returns the slot offset of this bucket.
    #[inline(always)]
    pub const fn offset(self) -> usize {
        self.offset
    }

    #[inline(always)]
    fn word(self) -> usize {
        self.offset / WORD_BITS
    }

    #[inline(always)]
    fn bit(self) -> u64 {
        1 << (self.offset % WORD_BITS)
    }
}

/// A position in a set, stamped with the age of the table that issued it.
///
/// An index stays valid only until the next structural mutation of the set
/// (insertion, removal, resize or clear). Using a stale index panics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Index {
    bucket: Bucket,
    age: u32,
}

impl Index {
    #[inline(always)]
    pub(crate) const fn new(bucket: Bucket, age: u32) -> Self {
        Self { bucket, age }
    }

    /// The bucket this index points at.
    #[inline(always)]
    pub const fn bucket(self) -> Bucket {
        self.bucket
    }

    /// The table age this index was issued at.
    #[inline(always)]
    pub const fn age(self) -> u32 {
        self.age
    }
}

/// Element-side operations needed while compacting a cluster.
///
/// Implemented by the typed set so that [`HashTableMut::delete`] can stay
/// independent of the element type.
pub(crate) trait HashTableDelegate {
    /// Hash value of the element stored in the occupied `bucket`.
    fn hash_value(&self, bucket: Bucket) -> u64;

    /// Moves the element in `source` into the (logically vacant) `target`.
    fn move_entry(&mut self, source: Bucket, target: Bucket);
}

/// A read-only view of a table's occupancy bitmap.
///
/// Bucket `i` is occupied iff bit `i % 64` of word `i / 64` is set. The
/// bucket count is always a power of two, so reducing a hash value to its
/// ideal bucket is a mask.
#[derive(Clone, Copy)]
pub struct HashTable<'a> {
    words: &'a [u64],
    bucket_mask: usize,
}

impl Debug for HashTable<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use alloc::string::String;

        let mut occupancy = String::with_capacity(self.bucket_count());
        for offset in 0..self.bucket_count() {
            occupancy.push(if self.is_occupied(Bucket::new(offset)) {
                '#'
            } else {
                '.'
            });
        }

        f.debug_struct("HashTable")
            .field("bucket_count", &self.bucket_count())
            .field("occupied", &self.occupied_count())
            .field("occupancy", &occupancy)
            .finish()
    }
}

impl<'a> HashTable<'a> {
    #[inline(always)]
    pub(crate) fn new(words: &'a [u64], scale: u8) -> Self {
        debug_assert!(words.len() >= word_count(scale));
        Self {
            words,
            bucket_mask: (1usize << scale) - 1,
        }
    }

    /// Number of buckets in the table. Always a power of two.
    #[inline(always)]
    pub fn bucket_count(&self) -> usize {
        self.bucket_mask + 1
    }

    /// The first bucket searched for an element with the given hash value.
    #[inline(always)]
    pub fn ideal_bucket(&self, hash: u64) -> Bucket {
        Bucket::new(hash as usize & self.bucket_mask)
    }

    /// The bucket following `bucket`, wrapping around at the end of the table.
    #[inline(always)]
    pub fn bucket_wrapped_after(&self, bucket: Bucket) -> Bucket {
        Bucket::new((bucket.offset + 1) & self.bucket_mask)
    }

    #[inline(always)]
    fn bucket_wrapped_before(&self, bucket: Bucket) -> Bucket {
        Bucket::new(bucket.offset.wrapping_sub(1) & self.bucket_mask)
    }

    /// Returns `true` if `bucket` addresses a slot of this table.
    #[inline(always)]
    pub fn is_valid(&self, bucket: Bucket) -> bool {
        bucket.offset <= self.bucket_mask
    }

    /// Returns `true` if `bucket` is a valid, occupied slot.
    #[inline(always)]
    pub fn is_occupied(&self, bucket: Bucket) -> bool {
        self.is_valid(bucket) && self.words[bucket.word()] & bucket.bit() != 0
    }

    /// The first occupied bucket, or [`end_bucket`](Self::end_bucket) if the
    /// table is empty.
    #[inline]
    pub fn start_bucket(&self) -> Bucket {
        self.occupied_bucket_from(0)
    }

    /// The past-the-end bucket.
    #[inline(always)]
    pub fn end_bucket(&self) -> Bucket {
        Bucket::new(self.bucket_count())
    }

    /// The first occupied bucket strictly after `bucket`, or the end bucket.
    #[inline]
    pub fn occupied_bucket_after(&self, bucket: Bucket) -> Bucket {
        self.occupied_bucket_from(bucket.offset + 1)
    }

    fn occupied_bucket_from(&self, offset: usize) -> Bucket {
        if offset > self.bucket_mask {
            return self.end_bucket();
        }

        let mut word = offset / WORD_BITS;
        let mut bits = self.words[word] & (!0u64 << (offset % WORD_BITS));
        loop {
            if bits != 0 {
                let found = word * WORD_BITS + bits.trailing_zeros() as usize;
                debug_assert!(found <= self.bucket_mask);
                return Bucket::new(found);
            }
            word += 1;
            if word >= self.words.len() {
                return self.end_bucket();
            }
            bits = self.words[word];
        }
    }

    /// Walks forward from `bucket` to the first vacant slot.
    ///
    /// The table must have at least one vacant bucket.
    #[inline]
    pub(crate) fn first_vacant_from(&self, mut bucket: Bucket) -> Bucket {
        while self.is_occupied(bucket) {
            bucket = self.bucket_wrapped_after(bucket);
        }
        bucket
    }

    /// Walks backward from `bucket` (exclusive) to the nearest vacant slot.
    ///
    /// The table must have at least one vacant bucket.
    #[inline]
    fn previous_hole(&self, bucket: Bucket) -> Bucket {
        let mut hole = self.bucket_wrapped_before(bucket);
        while self.is_occupied(hole) {
            debug_assert_ne!(hole, bucket, "hash table has no holes");
            hole = self.bucket_wrapped_before(hole);
        }
        hole
    }

    /// Number of occupied buckets.
    pub fn occupied_count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns an iterator over the occupied buckets in ascending order.
    pub fn iter(&self) -> OccupiedBuckets<'a> {
        OccupiedBuckets {
            words: self.words,
            word: 0,
            bits: self.words.first().copied().unwrap_or(0),
        }
    }

    pub(crate) fn words(&self) -> &'a [u64] {
        self.words
    }
}

impl<'a> IntoIterator for HashTable<'a> {
    type IntoIter = OccupiedBuckets<'a>;
    type Item = Bucket;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the occupied buckets of a [`HashTable`], in bucket order.
#[derive(Clone)]
pub struct OccupiedBuckets<'a> {
    words: &'a [u64],
    word: usize,
    bits: u64,
}

impl Iterator for OccupiedBuckets<'_> {
    type Item = Bucket;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        while self.bits == 0 {
            self.word += 1;
            if self.word >= self.words.len() {
                return None;
            }
            self.bits = self.words[self.word];
        }

        let bit = self.bits.trailing_zeros() as usize;
        self.bits &= self.bits - 1;
        Some(Bucket::new(self.word * WORD_BITS + bit))
    }
}

/// A mutable view of a table's occupancy bitmap.
pub(crate) struct HashTableMut<'a> {
    words: &'a mut [u64],
    bucket_mask: usize,
}

impl<'a> HashTableMut<'a> {
    #[inline(always)]
    pub(crate) fn new(words: &'a mut [u64], scale: u8) -> Self {
        Self {
            words,
            bucket_mask: (1usize << scale) - 1,
        }
    }

    #[inline(always)]
    pub(crate) fn as_ref(&self) -> HashTable<'_> {
        HashTable {
            words: self.words,
            bucket_mask: self.bucket_mask,
        }
    }

    /// Marks a vacant `bucket` as occupied.
    #[inline(always)]
    pub(crate) fn insert(&mut self, bucket: Bucket) {
        debug_assert!(!self.as_ref().is_occupied(bucket));
        self.words[bucket.word()] |= bucket.bit();
    }

    /// Occupies the first vacant bucket on the search sequence of `hash`.
    #[inline]
    pub(crate) fn insert_new(&mut self, hash: u64) -> Bucket {
        let table = self.as_ref();
        let bucket = table.first_vacant_from(table.ideal_bucket(hash));
        self.insert(bucket);
        bucket
    }

    /// Marks an occupied `bucket` as vacant without compacting its run.
    #[inline(always)]
    pub(crate) fn vacate(&mut self, bucket: Bucket) {
        debug_assert!(self.as_ref().is_occupied(bucket));
        self.words[bucket.word()] &= !bucket.bit();
    }

    /// Marks every bucket vacant.
    pub(crate) fn clear(&mut self) {
        self.words.fill(0);
    }

    /// Vacates `bucket`, then shifts later entries of the same cluster back
    /// into the gap wherever their ideal bucket would otherwise no longer
    /// reach them.
    ///
    /// The element in `bucket` must already have been moved out; the delegate
    /// only sees initialized entries plus the current hole.
    pub(crate) fn delete<D: HashTableDelegate>(&mut self, bucket: Bucket, delegate: &mut D) {
        debug_assert!(self.as_ref().is_occupied(bucket));

        let mut hole = bucket;
        let mut candidate = self.as_ref().bucket_wrapped_after(hole);
        if !self.as_ref().is_occupied(candidate) {
            self.vacate(hole);
            return;
        }

        // First bucket of the contiguous run containing `bucket`.
        let start = {
            let table = self.as_ref();
            table.bucket_wrapped_after(table.previous_hole(bucket))
        };

        while self.as_ref().is_occupied(candidate) {
            let ideal = self.as_ref().ideal_bucket(delegate.hash_value(candidate));

            // Does the candidate belong somewhere in [start, hole]? The range
            // may wrap around the end of the table.
            let c0 = ideal.offset >= start.offset;
            let c1 = ideal.offset <= hole.offset;
            let belongs = if start.offset <= hole.offset {
                c0 && c1
            } else {
                c0 || c1
            };
            if belongs {
                delegate.move_entry(candidate, hole);
                hole = candidate;
            }
            candidate = self.as_ref().bucket_wrapped_after(candidate);
        }

        self.vacate(hole);
    }
}
