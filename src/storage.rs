use alloc::alloc::handle_alloc_error;
use core::alloc::Layout;
use core::fmt::Debug;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ptr::NonNull;

use crate::bitset::TemporaryBitset;
use crate::hash_table::Bucket;
use crate::hash_table::HashTable;
use crate::hash_table::HashTableDelegate;
use crate::hash_table::HashTableMut;
use crate::hash_table::max_load;
use crate::hash_table::word_count;

/// Occupancy of the empty singleton. Never written to.
static EMPTY_WORDS: [u64; 1] = [0];

cfg_if::cfg_if! {
    if #[cfg(feature = "deterministic-seed")] {
        #[inline(always)]
        fn hash_seed(_alloc: NonNull<u8>, scale: u8) -> u64 {
            scale as u64
        }
    } else {
        /// Every allocation gets its own seed, so copying elements from one
        /// table into another in bucket order does not pile
        /// elements into long clusters.
        #[inline(always)]
        fn hash_seed(alloc: NonNull<u8>, scale: u8) -> u64 {
            (alloc.as_ptr().addr() as u64) ^ ((scale as u64) << 56)
        }
    }
}

#[derive(Debug)]
struct DataLayout {
    layout: Layout,
    words_offset: usize,
    hashes_offset: usize,
    elements_offset: usize,
}

impl DataLayout {
    fn empty() -> Self {
        DataLayout {
            layout: Layout::new::<()>(),
            words_offset: 0,
            hashes_offset: 0,
            elements_offset: 0,
        }
    }

    fn new<T>(scale: u8) -> Self {
        let bucket_count = 1usize << scale;
        let words_layout =
            Layout::array::<u64>(word_count(scale)).expect("allocation size overflow");
        let hashes_layout =
            Layout::array::<MaybeUninit<u64>>(bucket_count).expect("allocation size overflow");
        let elements_layout =
            Layout::array::<MaybeUninit<T>>(bucket_count).expect("allocation size overflow");

        let (layout, words_offset) = Layout::new::<()>()
            .extend(words_layout)
            .expect("allocation size overflow");
        let (layout, hashes_offset) = layout
            .extend(hashes_layout)
            .expect("allocation size overflow");
        let (layout, elements_offset) = layout
            .extend(elements_layout)
            .expect("allocation size overflow");

        DataLayout {
            layout: layout.pad_to_align(),
            words_offset,
            hashes_offset,
            elements_offset,
        }
    }
}

/// The element-side view handed to [`HashTableMut::delete`].
struct Entries<'a, T> {
    hashes: &'a mut [MaybeUninit<u64>],
    elements: &'a mut [MaybeUninit<T>],
}

impl<T> HashTableDelegate for Entries<'_, T> {
    #[inline(always)]
    fn hash_value(&self, bucket: Bucket) -> u64 {
        // SAFETY: the table only asks for the hash of occupied buckets, whose
        // hash slot is initialized.
        unsafe { self.hashes[bucket.offset()].assume_init_read() }
    }

    #[inline(always)]
    fn move_entry(&mut self, source: Bucket, target: Bucket) {
        debug_assert_ne!(source, target);
        let (source, target) = (source.offset(), target.offset());
        assert!(source < self.elements.len() && target < self.elements.len());
        // SAFETY: both offsets are in bounds and distinct. `source` is
        // initialized and is treated as vacant afterwards; `target` holds no
        // live value, so overwriting it leaks nothing.
        unsafe {
            let elements = self.elements.as_mut_ptr();
            core::ptr::copy_nonoverlapping(elements.add(source), elements.add(target), 1);
            let hashes = self.hashes.as_mut_ptr();
            core::ptr::copy_nonoverlapping(hashes.add(source), hashes.add(target), 1);
        }
    }
}

/// A single allocation holding the occupancy bitmap, the cached hash of each
/// occupied bucket and the element slots, plus the table header.
///
/// Only occupied buckets have initialized hash and element slots. The empty
/// singleton (scale 0, one bucket, no room for elements) owns no memory.
pub(crate) struct Storage<T> {
    layout: DataLayout,
    alloc: NonNull<u8>,

    scale: u8,
    count: usize,
    age: u32,
    seed: u64,

    _phantom: PhantomData<T>,
}

// SAFETY: `Storage` owns its elements exactly like a `Box<[T]>` would; the raw
// pointer is never shared outside of borrows of `self`.
unsafe impl<T: Send> Send for Storage<T> {}
// SAFETY: shared access only hands out `&T`.
unsafe impl<T: Sync> Sync for Storage<T> {}

impl<T> Debug for Storage<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Storage")
            .field("scale", &self.scale)
            .field("count", &self.count)
            .field("age", &self.age)
            .field("seed", &format_args!("{:#018x}", self.seed))
            .field("table", &self.hash_table())
            .finish()
    }
}

impl<T> Drop for Storage<T> {
    fn drop(&mut self) {
        if !self.is_allocated() {
            return;
        }

        // SAFETY: occupied buckets hold initialized elements, and the
        // allocation was made with `self.layout.layout`.
        unsafe {
            if core::mem::needs_drop::<T>() && self.count > 0 {
                let (table, _, elements) = self.parts_mut();
                for bucket in table.as_ref() {
                    elements
                        .get_unchecked_mut(bucket.offset())
                        .assume_init_drop();
                }
            }

            alloc::alloc::dealloc(self.alloc.as_ptr(), self.layout.layout);
        }
    }
}

impl<T: Clone> Clone for Storage<T> {
    fn clone(&self) -> Self {
        self.copy()
    }
}

impl<T> Storage<T> {
    /// The empty singleton: one bucket, capacity for no elements.
    pub(crate) fn empty() -> Self {
        Self::empty_at_age(0)
    }

    /// The empty singleton, continuing the age sequence of a table it
    /// replaces.
    pub(crate) fn empty_at_age(age: u32) -> Self {
        Self {
            layout: DataLayout::empty(),
            alloc: NonNull::dangling(),
            scale: 0,
            count: 0,
            age,
            seed: 0,
            _phantom: PhantomData,
        }
    }

    /// Allocates an empty table with `1 << scale` buckets.
    ///
    /// A fresh seed is picked unless given. The age starts from the seed
    /// unless given; a table that replaces another must pass the successor
    /// of the old age so that indices into the old table stay invalid.
    pub(crate) fn allocate(scale: u8, age: Option<u32>, seed: Option<u64>) -> Self {
        let layout = DataLayout::new::<T>(scale);
        // SAFETY: the layout always contains at least one occupancy word, so
        // its size is non-zero. Allocation failure is handled.
        let alloc = unsafe {
            let raw_alloc = alloc::alloc::alloc(layout.layout);
            if raw_alloc.is_null() {
                handle_alloc_error(layout.layout);
            }

            core::ptr::write_bytes(
                raw_alloc.add(layout.words_offset),
                0x0,
                layout.hashes_offset - layout.words_offset,
            );

            NonNull::new_unchecked(raw_alloc)
        };

        let seed = seed.unwrap_or_else(|| hash_seed(alloc, scale));
        Self {
            layout,
            alloc,
            scale,
            count: 0,
            age: age.unwrap_or(seed as u32),
            seed,
            _phantom: PhantomData,
        }
    }

    #[inline(always)]
    pub(crate) fn is_allocated(&self) -> bool {
        self.layout.layout.size() != 0
    }

    #[inline(always)]
    pub(crate) fn scale(&self) -> u8 {
        self.scale
    }

    #[inline(always)]
    pub(crate) fn bucket_count(&self) -> usize {
        1 << self.scale
    }

    /// Largest element count this table may hold.
    #[inline(always)]
    pub(crate) fn max_load(&self) -> usize {
        if self.is_allocated() {
            max_load(self.bucket_count())
        } else {
            0
        }
    }

    #[inline(always)]
    pub(crate) fn count(&self) -> usize {
        self.count
    }

    #[inline(always)]
    pub(crate) fn age(&self) -> u32 {
        self.age
    }

    #[inline(always)]
    pub(crate) fn seed(&self) -> u64 {
        self.seed
    }

    #[inline(always)]
    pub(crate) fn invalidate_indices(&mut self) {
        self.age = self.age.wrapping_add(1);
    }

    #[inline(always)]
    pub(crate) fn set_age(&mut self, age: u32) {
        self.age = age;
    }

    pub(crate) fn hash_table(&self) -> HashTable<'_> {
        let words: &[u64] = if self.is_allocated() {
            // SAFETY: the words region is initialized at allocation time and
            // sized for `scale`.
            unsafe {
                NonNull::slice_from_raw_parts(
                    self.alloc.add(self.layout.words_offset).cast::<u64>(),
                    word_count(self.scale),
                )
                .as_ref()
            }
        } else {
            &EMPTY_WORDS
        };
        HashTable::new(words, self.scale)
    }

    fn hashes(&self) -> &[MaybeUninit<u64>] {
        if !self.is_allocated() {
            return &[];
        }
        // SAFETY: the hashes region is part of the live allocation and
        // `MaybeUninit` has no validity requirement.
        unsafe {
            NonNull::slice_from_raw_parts(
                self.alloc.add(self.layout.hashes_offset).cast(),
                self.bucket_count(),
            )
            .as_ref()
        }
    }

    fn elements(&self) -> &[MaybeUninit<T>] {
        if !self.is_allocated() {
            return &[];
        }
        // SAFETY: as for `hashes`.
        unsafe {
            NonNull::slice_from_raw_parts(
                self.alloc.add(self.layout.elements_offset).cast(),
                self.bucket_count(),
            )
            .as_ref()
        }
    }

    #[allow(clippy::type_complexity)]
    fn parts_mut(
        &mut self,
    ) -> (
        HashTableMut<'_>,
        &mut [MaybeUninit<u64>],
        &mut [MaybeUninit<T>],
    ) {
        if !self.is_allocated() {
            return (HashTableMut::new(&mut [], 0), &mut [], &mut []);
        }

        // SAFETY: the three regions are disjoint parts of one live allocation
        // and `self` is borrowed mutably for their whole lifetime.
        unsafe {
            let words = NonNull::slice_from_raw_parts(
                self.alloc.add(self.layout.words_offset).cast::<u64>(),
                word_count(self.scale),
            )
            .as_mut();
            let hashes = NonNull::slice_from_raw_parts(
                self.alloc.add(self.layout.hashes_offset).cast(),
                self.bucket_count(),
            )
            .as_mut();
            let elements = NonNull::slice_from_raw_parts(
                self.alloc.add(self.layout.elements_offset).cast(),
                self.bucket_count(),
            )
            .as_mut();
            (HashTableMut::new(words, self.scale), hashes, elements)
        }
    }

    /// Returns the element in `bucket`.
    ///
    /// # Safety
    ///
    /// `bucket` must be occupied.
    #[inline(always)]
    pub(crate) unsafe fn element(&self, bucket: Bucket) -> &T {
        debug_assert!(self.hash_table().is_occupied(bucket));
        // SAFETY: caller guarantees the bucket is occupied, hence initialized.
        unsafe {
            self.elements()
                .get_unchecked(bucket.offset())
                .assume_init_ref()
        }
    }

    /// Returns the cached hash of the element in `bucket`.
    ///
    /// # Safety
    ///
    /// `bucket` must be occupied.
    #[inline(always)]
    pub(crate) unsafe fn stored_hash(&self, bucket: Bucket) -> u64 {
        debug_assert!(self.hash_table().is_occupied(bucket));
        // SAFETY: caller guarantees the bucket is occupied, hence initialized.
        unsafe {
            self.hashes()
                .get_unchecked(bucket.offset())
                .assume_init_read()
        }
    }

    /// Walks the search sequence of `hash` until `eq` matches or a vacant
    /// bucket is reached.
    ///
    /// Returns the matching bucket, or the vacant bucket where such an
    /// element would be inserted.
    #[inline]
    pub(crate) fn find(&self, hash: u64, eq: impl Fn(&T) -> bool) -> (Bucket, bool) {
        let table = self.hash_table();
        let hashes = self.hashes();
        let elements = self.elements();

        let mut bucket = table.ideal_bucket(hash);
        while table.is_occupied(bucket) {
            // SAFETY: the bucket is occupied, so both slots are initialized.
            let matches = unsafe {
                hashes.get_unchecked(bucket.offset()).assume_init_read() == hash
                    && eq(elements.get_unchecked(bucket.offset()).assume_init_ref())
            };
            if matches {
                return (bucket, true);
            }
            bucket = table.bucket_wrapped_after(bucket);
        }
        (bucket, false)
    }

    /// Places `element` into the vacant `bucket`.
    ///
    /// # Safety
    ///
    /// `bucket` must be vacant and in bounds, and the table must stay below
    /// its load limit.
    #[inline]
    pub(crate) unsafe fn insert_at(&mut self, bucket: Bucket, hash: u64, element: T) {
        debug_assert!(self.count < self.max_load());
        let (mut table, hashes, elements) = self.parts_mut();
        table.insert(bucket);
        // SAFETY: the caller guarantees `bucket` is in bounds.
        unsafe {
            hashes.get_unchecked_mut(bucket.offset()).write(hash);
            elements.get_unchecked_mut(bucket.offset()).write(element);
        }
        self.count += 1;
    }

    /// Places `element` into the first vacant bucket of its search sequence
    /// without comparing against existing elements.
    #[inline]
    pub(crate) fn insert_new(&mut self, hash: u64, element: T) -> Bucket {
        assert!(self.count < self.max_load(), "table is at its load limit");
        let (mut table, hashes, elements) = self.parts_mut();
        let bucket = table.insert_new(hash);
        hashes[bucket.offset()].write(hash);
        elements[bucket.offset()].write(element);
        self.count += 1;
        bucket
    }

    /// Swaps the element in `bucket` for `element`, returning the old one.
    ///
    /// # Safety
    ///
    /// `bucket` must be occupied and `element` must hash to the stored hash.
    #[inline]
    pub(crate) unsafe fn replace(&mut self, bucket: Bucket, element: T) -> T {
        debug_assert!(self.hash_table().is_occupied(bucket));
        let (_, _, elements) = self.parts_mut();
        // SAFETY: the caller guarantees the bucket is occupied.
        unsafe {
            core::mem::replace(
                elements.get_unchecked_mut(bucket.offset()).assume_init_mut(),
                element,
            )
        }
    }

    /// Moves the element out of `bucket` and compacts its cluster.
    ///
    /// # Safety
    ///
    /// `bucket` must be occupied.
    pub(crate) unsafe fn remove(&mut self, bucket: Bucket) -> T {
        debug_assert!(self.hash_table().is_occupied(bucket));
        let (mut table, hashes, elements) = self.parts_mut();
        // SAFETY: the caller guarantees the bucket is occupied. The slot is
        // treated as vacant from here on.
        let element = unsafe { elements.get_unchecked(bucket.offset()).assume_init_read() };
        table.delete(bucket, &mut Entries { hashes, elements });
        self.count -= 1;
        self.invalidate_indices();
        element
    }

    /// Moves the element out of `bucket` without compacting.
    ///
    /// Lookups are no longer reliable afterwards; only iteration over the
    /// remaining occupied buckets is.
    ///
    /// # Safety
    ///
    /// `bucket` must be occupied.
    pub(crate) unsafe fn extract(&mut self, bucket: Bucket) -> T {
        debug_assert!(self.hash_table().is_occupied(bucket));
        let (mut table, _, elements) = self.parts_mut();
        table.vacate(bucket);
        // SAFETY: the caller guarantees the bucket was occupied; it is vacant
        // now, so the slot is read exactly once.
        let element = unsafe { elements.get_unchecked(bucket.offset()).assume_init_read() };
        self.count -= 1;
        element
    }

    /// Drops every element and vacates every bucket.
    pub(crate) fn clear(&mut self) {
        if self.count > 0 {
            let (mut table, _, elements) = self.parts_mut();
            if core::mem::needs_drop::<T>() {
                for bucket in table.as_ref() {
                    // SAFETY: occupied buckets hold initialized elements.
                    unsafe {
                        elements
                            .get_unchecked_mut(bucket.offset())
                            .assume_init_drop();
                    }
                }
            }
            table.clear();
            self.count = 0;
        }
        self.invalidate_indices();
    }

    /// Moves every element out, in bucket order, leaving the table empty.
    ///
    /// The table is emptied before the first element is handed over, so a
    /// panicking `sink` leaks the remaining elements rather than dropping
    /// them twice.
    pub(crate) fn move_elements(&mut self, mut sink: impl FnMut(T)) {
        if self.count == 0 {
            return;
        }

        let (mut table, _, _) = self.parts_mut();
        let occupied = TemporaryBitset::copy_of(table.as_ref().words());
        table.clear();
        self.count = 0;
        self.invalidate_indices();

        let elements = self.elements();
        for offset in occupied.iter() {
            // SAFETY: every offset was occupied before the bitmap was cleared,
            // and each is read exactly once.
            sink(unsafe { elements.get_unchecked(offset).assume_init_read() });
        }
    }

    /// A table with the same scale, seed, age and bucket positions, holding
    /// clones of every element.
    pub(crate) fn copy(&self) -> Self
    where
        T: Clone,
    {
        if !self.is_allocated() {
            return Self::empty_at_age(self.age);
        }

        let mut result = Self::allocate(self.scale, Some(self.age), Some(self.seed));
        for bucket in self.hash_table() {
            // SAFETY: `bucket` is occupied in `self`; the same bucket is vacant
            // in `result` because buckets are visited once, in order.
            unsafe {
                let element = self.element(bucket).clone();
                result.insert_at(bucket, self.stored_hash(bucket), element);
            }
        }

        debug_assert_eq!(result.count, self.count);
        result
    }
}

/// Debug statistics for hash table analysis.
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone)]
pub struct DebugStats {
    /// Number of elements currently in the table
    pub populated: usize,
    /// Maximum load before a resize
    pub capacity: usize,
    /// Total number of buckets allocated
    pub total_buckets: usize,
    /// Load factor (populated / capacity)
    pub load_factor: f64,
    /// Bucket utilization (populated / total_buckets)
    pub bucket_utilization: f64,
    /// Longest distance of any element from its ideal bucket
    pub longest_displacement: usize,
    /// Mean distance of the elements from their ideal buckets
    pub mean_displacement: f64,
    /// Total memory in bytes used by the table
    pub total_bytes: usize,
    /// Estimated wasted memory in bytes
    pub wasted_bytes: usize,
}

#[cfg(any(test, feature = "stats"))]
impl DebugStats {
    /// Pretty-print the debug statistics.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        println!("=== Hash Set Debug Statistics ===");
        println!(
            "Population: {}/{} ({:.2}% load factor)",
            self.populated,
            self.capacity,
            self.load_factor * 100.0
        );
        println!(
            "Bucket Usage: {}/{} ({:.2}% utilization)",
            self.populated,
            self.total_buckets,
            self.bucket_utilization * 100.0
        );
        println!(
            "Displacement: {} longest, {:.3} mean",
            self.longest_displacement, self.mean_displacement
        );
        println!("Total Allocated: {} bytes", self.total_bytes);
        println!(
            "Memory: {} bytes wasted ({:.02}%)",
            self.wasted_bytes,
            if self.total_bytes == 0 {
                0.0
            } else {
                (self.wasted_bytes as f64 / self.total_bytes as f64) * 100.0
            }
        );
    }
}

/// Number of elements at each distance from their ideal bucket.
///
/// Bin `n` counts the elements found `n` buckets past the bucket their hash
/// maps to.
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplacementHistogram {
    bins: alloc::vec::Vec<usize>,
}

#[cfg(any(test, feature = "stats"))]
impl DisplacementHistogram {
    /// The histogram bins, indexed by displacement.
    pub fn bins(&self) -> &[usize] {
        &self.bins
    }

    /// Total number of elements counted.
    pub fn total(&self) -> usize {
        self.bins.iter().sum()
    }

    /// Pretty-prints the histogram horizontally using stdout.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        let max = self.bins.iter().copied().max().unwrap_or(0);
        if max == 0 {
            println!("displacement histogram: empty");
            return;
        }

        let max_bar = 60usize;
        let total_units = max_bar * 8;
        println!("displacement histogram ({} entries):", self.total());

        let make_bar = |count: usize| -> alloc::string::String {
            if count == 0 {
                return alloc::string::String::new();
            }
            let units = ((count as u128 * total_units as u128).div_ceil(max as u128)) as usize;
            let mut bar = "█".repeat(units / 8);
            let partial = match units % 8 {
                0 => None,
                1 => Some('▏'),
                2 => Some('▎'),
                3 => Some('▍'),
                4 => Some('▌'),
                5 => Some('▋'),
                6 => Some('▊'),
                _ => Some('▉'),
            };
            bar.extend(partial);
            bar
        };

        for (distance, &count) in self.bins.iter().enumerate() {
            println!("{:>3} | {} ({})", distance, make_bar(count), count);
        }
    }
}

#[cfg(any(test, feature = "stats"))]
impl<T> Storage<T> {
    fn displacement(&self, bucket: Bucket) -> usize {
        let table = self.hash_table();
        // SAFETY: only called for occupied buckets.
        let ideal = table.ideal_bucket(unsafe { self.stored_hash(bucket) });
        bucket.offset().wrapping_sub(ideal.offset()) & (self.bucket_count() - 1)
    }

    pub(crate) fn displacement_histogram(&self) -> DisplacementHistogram {
        let mut bins = alloc::vec::Vec::new();
        for bucket in self.hash_table() {
            let distance = self.displacement(bucket);
            if bins.len() <= distance {
                bins.resize(distance + 1, 0);
            }
            bins[distance] += 1;
        }
        DisplacementHistogram { bins }
    }

    pub(crate) fn debug_stats(&self) -> DebugStats {
        let total_buckets = if self.is_allocated() {
            self.bucket_count()
        } else {
            0
        };

        let mut longest_displacement = 0;
        let mut total_displacement = 0;
        for bucket in self.hash_table() {
            let distance = self.displacement(bucket);
            longest_displacement = longest_displacement.max(distance);
            total_displacement += distance;
        }

        DebugStats {
            populated: self.count,
            capacity: self.max_load(),
            total_buckets,
            load_factor: if self.max_load() == 0 {
                0.0
            } else {
                self.count as f64 / self.max_load() as f64
            },
            bucket_utilization: if total_buckets == 0 {
                0.0
            } else {
                self.count as f64 / total_buckets as f64
            },
            longest_displacement,
            mean_displacement: if self.count == 0 {
                0.0
            } else {
                total_displacement as f64 / self.count as f64
            },
            total_bytes: self.layout.layout.size(),
            wasted_bytes: (total_buckets - self.count)
                * (core::mem::size_of::<T>() + core::mem::size_of::<u64>()),
        }
    }
}
