use alloc::sync::Arc;
use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;
use core::hash::Hasher;
use core::iter::FusedIterator;

use crate::DefaultHashBuilder;
use crate::hash_table::Bucket;
use crate::hash_table::Index;
use crate::hash_table::OccupiedBuckets;
use crate::hash_table::scale_for_capacity;
use crate::storage::Storage;
#[cfg(any(test, feature = "stats"))]
use crate::storage::DebugStats;
#[cfg(any(test, feature = "stats"))]
use crate::storage::DisplacementHistogram;

const CHECK_DUPLICATES: bool = cfg!(any(debug_assertions, feature = "checked-insert"));

#[cold]
#[inline(never)]
pub(crate) fn element_type_violates_hash_requirements<T>() -> ! {
    panic!(
        "Duplicate elements of type '{}' were found in a NativeSet. This usually means that \
         the type violates Hash/Eq requirements, or that members of such a set were mutated \
         after insertion.",
        core::any::type_name::<T>()
    )
}

#[cold]
#[inline(never)]
#[track_caller]
fn invalid_index() -> ! {
    panic!("Attempting to access NativeSet elements using an invalid index")
}

/// Hashes `value` for a table with the given seed.
#[inline(always)]
pub(crate) fn hash_with_seed<T, S>(hash_builder: &S, seed: u64, value: &T) -> u64
where
    T: Hash + ?Sized,
    S: BuildHasher,
{
    let mut hasher = hash_builder.build_hasher();
    hasher.write_u64(seed);
    value.hash(&mut hasher);
    hasher.finish()
}

/// Adds an element known to be absent to a table with room for it.
///
/// With duplicate checking enabled the search sequence is searched first, and
/// finding the element aborts: the element type's `Hash` and `Eq` disagree.
pub(crate) fn insert_new_unchecked<T, S>(
    storage: &mut Storage<T>,
    hash_builder: &S,
    element: T,
) -> Bucket
where
    T: Hash + Eq,
    S: BuildHasher,
{
    let hash = hash_with_seed(hash_builder, storage.seed(), &element);
    if !CHECK_DUPLICATES {
        return storage.insert_new(hash, element);
    }

    let (bucket, found) = storage.find(hash, |candidate| *candidate == element);
    if found {
        element_type_violates_hash_requirements::<T>();
    }
    assert!(
        storage.count() < storage.max_load(),
        "table is at its load limit"
    );
    // SAFETY: `find` stopped at a vacant bucket of this table, and the table
    // has room for one more element.
    unsafe { storage.insert_at(bucket, hash, element) };
    bucket
}

/// A hash set with value semantics.
///
/// Cloning a `NativeSet` is O(1): both copies share one storage block until
/// one of them is mutated, at which point the mutated copy forks its own
/// storage. Elements live directly in a power-of-two bucket array, collisions
/// are resolved by scanning forward linearly and removal compacts the cluster instead
/// of leaving tombstones.
///
/// Mutation requires `T: Clone`, since a shared block has to be copied before
/// it can be written to.
///
/// # Performance Characteristics
///
/// - **Memory**: one bit per bucket for occupancy, plus the size of `T` plus a
///   u64 for the cached hash of each bucket. At most 3/4 of the buckets are
///   occupied.
pub struct NativeSet<T, S = DefaultHashBuilder> {
    storage: Arc<Storage<T>>,
    hash_builder: S,
}

impl<T, S> Clone for NativeSet<T, S>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            hash_builder: self.hash_builder.clone(),
        }
    }
}

impl<T, S> PartialEq for NativeSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    fn eq(&self, other: &Self) -> bool {
        if self.shares_storage_with(other) {
            return true;
        }
        if self.len() != other.len() {
            return false;
        }
        self.iter().all(|element| other.contains(element))
    }
}

impl<T, S> Eq for NativeSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
}

impl<T, S> Debug for NativeSet<T, S>
where
    T: Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T, S> NativeSet<T, S> {
    /// Creates an empty set with the given hasher builder.
    ///
    /// Empty sets do not allocate element storage.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(feature = "std")]
    /// # {
    /// use std::collections::hash_map::RandomState;
    ///
    /// use cow_hashset::NativeSet;
    ///
    /// let set: NativeSet<i32, _> = NativeSet::with_hasher(RandomState::new());
    /// assert!(set.is_empty());
    /// # }
    /// ```
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_capacity_and_hasher(0, hash_builder)
    }

    /// Creates an empty set able to hold `capacity` elements without
    /// resizing.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(feature = "std")]
    /// # {
    /// use std::collections::hash_map::RandomState;
    ///
    /// use cow_hashset::NativeSet;
    ///
    /// let set: NativeSet<i32, _> = NativeSet::with_capacity_and_hasher(100, RandomState::new());
    /// assert!(set.capacity() >= 100);
    /// # }
    /// ```
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        let storage = if capacity == 0 {
            Storage::empty()
        } else {
            Storage::allocate(scale_for_capacity(capacity), None, None)
        };
        Self::from_storage(storage, hash_builder)
    }

    pub(crate) fn from_storage(storage: Storage<T>, hash_builder: S) -> Self {
        Self {
            storage: Arc::new(storage),
            hash_builder,
        }
    }

    #[inline(always)]
    pub(crate) fn storage(&self) -> &Storage<T> {
        &self.storage
    }

    /// Returns the number of elements in the set.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use cow_hashset::NativeSet;
    ///
    /// let mut set: NativeSet<i32> = NativeSet::new();
    /// assert_eq!(set.len(), 0);
    /// set.insert(1);
    /// assert_eq!(set.len(), 1);
    /// # }
    /// ```
    #[inline]
    pub fn len(&self) -> usize {
        self.storage.count()
    }

    /// Returns `true` if the set contains no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of buckets in the set's table.
    ///
    /// Always a power of two, and always strictly greater than
    /// [`len`](Self::len). The set resizes once three quarters of the buckets
    /// are occupied.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use cow_hashset::NativeSet;
    ///
    /// let set: NativeSet<i32> = NativeSet::with_capacity(4);
    /// assert_eq!(set.capacity(), 8);
    /// # }
    /// ```
    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.bucket_count()
    }

    /// Returns a reference to the set's hasher builder.
    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }

    /// Returns `true` if both sets currently share one storage block.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use cow_hashset::NativeSet;
    ///
    /// let a: NativeSet<i32> = [1, 2, 3].into_iter().collect();
    /// let mut b = a.clone();
    /// assert!(a.shares_storage_with(&b));
    ///
    /// b.remove(&1);
    /// assert!(!a.shares_storage_with(&b));
    /// assert!(a.contains(&1));
    /// # }
    /// ```
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    /// `true` if no other set shares this set's storage.
    #[inline]
    pub(crate) fn is_unique(&mut self) -> bool {
        Arc::get_mut(&mut self.storage).is_some()
    }

    /// An iterator visiting all elements in bucket order.
    ///
    /// The order depends on the per-table hash seed and changes whenever the
    /// set is resized.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            storage: &self.storage,
            buckets: self.storage.hash_table().iter(),
            remaining: self.len(),
        }
    }

    /// The index of the first element, or [`end_index`](Self::end_index) if
    /// the set is empty.
    pub fn start_index(&self) -> Index {
        Index::new(self.storage.hash_table().start_bucket(), self.storage.age())
    }

    /// The past-the-end index.
    pub fn end_index(&self) -> Index {
        Index::new(self.storage.hash_table().end_bucket(), self.storage.age())
    }

    /// The index following `index` in iteration order.
    ///
    /// # Panics
    ///
    /// Panics if `index` is stale or does not refer to an element.
    #[track_caller]
    pub fn index_after(&self, index: Index) -> Index {
        let bucket = self.validated_bucket(index);
        Index::new(
            self.storage.hash_table().occupied_bucket_after(bucket),
            self.storage.age(),
        )
    }

    /// Returns the element at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is stale or does not refer to an element.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use cow_hashset::NativeSet;
    ///
    /// let set: NativeSet<&str> = ["a", "b"].into_iter().collect();
    /// let mut index = set.start_index();
    /// let mut seen = Vec::new();
    /// while index != set.end_index() {
    ///     seen.push(*set.element_at(index));
    ///     index = set.index_after(index);
    /// }
    /// seen.sort();
    /// assert_eq!(seen, ["a", "b"]);
    /// # }
    /// ```
    #[track_caller]
    pub fn element_at(&self, index: Index) -> &T {
        let bucket = self.validated_bucket(index);
        // SAFETY: validated buckets are occupied.
        unsafe { self.storage.element(bucket) }
    }

    /// Returns `true` if `index` was issued by this set's storage since its
    /// last structural mutation and refers to an element.
    pub fn is_valid_index(&self, index: Index) -> bool {
        index.age() == self.storage.age() && self.storage.hash_table().is_occupied(index.bucket())
    }

    #[inline]
    #[track_caller]
    fn validated_bucket(&self, index: Index) -> Bucket {
        if !self.is_valid_index(index) {
            invalid_index();
        }
        index.bucket()
    }
}

impl<T, S> NativeSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    #[inline]
    pub(crate) fn hash_value(&self, element: &T) -> u64 {
        hash_with_seed(&self.hash_builder, self.storage.seed(), element)
    }

    #[inline]
    pub(crate) fn locate(&self, element: &T) -> (u64, Bucket, bool) {
        let hash = self.hash_value(element);
        let (bucket, found) = self.storage.find(hash, |candidate| candidate == element);
        (hash, bucket, found)
    }

    /// Walks `element`'s search sequence.
    ///
    /// Returns the bucket holding `element` and `true`, or the vacant bucket
    /// where it would be inserted and `false`.
    #[inline]
    pub fn find(&self, element: &T) -> (Bucket, bool) {
        let (_, bucket, found) = self.locate(element);
        (bucket, found)
    }

    /// Returns `true` if the set contains `element`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use cow_hashset::NativeSet;
    ///
    /// let mut set: NativeSet<i32> = NativeSet::new();
    /// set.insert(1);
    /// assert!(set.contains(&1));
    /// assert!(!set.contains(&2));
    /// # }
    /// ```
    #[inline]
    pub fn contains(&self, element: &T) -> bool {
        self.find(element).1
    }

    /// Returns the stored element equal to `element`, if any.
    pub fn get(&self, element: &T) -> Option<&T> {
        match self.find(element) {
            // SAFETY: `find` reported the bucket as holding a match.
            (bucket, true) => Some(unsafe { self.storage.element(bucket) }),
            (_, false) => None,
        }
    }

    /// Returns the index of `element`, if present.
    pub fn index_of(&self, element: &T) -> Option<Index> {
        match self.find(element) {
            (bucket, true) => Some(Index::new(bucket, self.storage.age())),
            (_, false) => None,
        }
    }
}

impl<T, S> NativeSet<T, S>
where
    T: Hash + Eq + Clone,
    S: BuildHasher,
{
    /// Makes the storage uniquely owned with room for `capacity` elements.
    ///
    /// Returns `true` if the elements were rehashed into a new table, which
    /// invalidates any bucket found beforehand. A plain copy keeps every
    /// element in its bucket and returns `false`.
    pub(crate) fn ensure_unique(&mut self, is_unique: bool, capacity: usize) -> bool {
        if capacity <= self.storage.max_load() {
            if !is_unique {
                self.copy();
            }
            return false;
        }

        let scale = scale_for_capacity(capacity).max(self.storage.scale() + 1);
        if is_unique {
            self.resize(scale);
        } else {
            self.copy_and_resize(scale);
        }
        true
    }

    fn copy(&mut self) {
        self.storage = Arc::new(self.storage.copy());
    }

    /// Age for a table that takes over from the current one.
    #[inline]
    fn successor_age(&self) -> u32 {
        self.storage.age().wrapping_add(1)
    }

    fn resize(&mut self, scale: u8) {
        let mut resized = Storage::allocate(scale, Some(self.successor_age()), None);
        let storage = Arc::make_mut(&mut self.storage);
        let hash_builder = &self.hash_builder;
        storage.move_elements(|element| {
            insert_new_unchecked(&mut resized, hash_builder, element);
        });
        self.storage = Arc::new(resized);
    }

    fn copy_and_resize(&mut self, scale: u8) {
        let mut resized = Storage::allocate(scale, Some(self.successor_age()), None);
        for element in self.iter() {
            insert_new_unchecked(&mut resized, &self.hash_builder, element.clone());
        }
        self.storage = Arc::new(resized);
    }

    /// Grows the table so that it can hold `len() + additional` elements
    /// without resizing.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use cow_hashset::NativeSet;
    ///
    /// let mut set: NativeSet<i32> = NativeSet::new();
    /// set.reserve(10);
    /// assert!(set.capacity() >= 10);
    /// # }
    /// ```
    pub fn reserve(&mut self, additional: usize) {
        let required = self
            .len()
            .checked_add(additional)
            .expect("capacity overflow");
        let is_unique = self.is_unique();
        self.ensure_unique(is_unique, required);
    }

    /// Adds an element the caller knows to be absent to a uniquely owned
    /// table with room for it.
    pub(crate) fn unsafe_insert_new(&mut self, element: T) {
        let storage = Arc::make_mut(&mut self.storage);
        insert_new_unchecked(storage, &self.hash_builder, element);
        storage.invalidate_indices();
    }

    /// Adds an element that is not already in the set.
    ///
    /// Skips the membership check of [`insert`](Self::insert). In debug builds
    /// (or with the `checked-insert` feature) inserting an element that is
    /// already present panics, since that can only happen when the element
    /// type's `Hash` and `Eq` implementations disagree.
    pub fn insert_new(&mut self, element: T) {
        let is_unique = self.is_unique();
        self.ensure_unique(is_unique, self.len() + 1);
        self.unsafe_insert_new(element);
    }

    /// Inserts `element` into the vacant `bucket` found for it.
    pub(crate) fn insert_new_at(&mut self, element: T, hash: u64, bucket: Bucket, is_unique: bool) {
        let (hash, bucket) = if self.ensure_unique(is_unique, self.len() + 1) {
            let (hash, bucket, found) = self.locate(&element);
            if found {
                element_type_violates_hash_requirements::<T>();
            }
            (hash, bucket)
        } else {
            (hash, bucket)
        };

        let storage = Arc::make_mut(&mut self.storage);
        // SAFETY: `bucket` is the vacant end of `element`'s search sequence in
        // the current table, which has room for one more element.
        unsafe { storage.insert_at(bucket, hash, element) };
        storage.invalidate_indices();
    }

    /// Adds an element to the set.
    ///
    /// Returns whether the element was newly inserted. An equal element that
    /// is already present is left untouched.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use cow_hashset::NativeSet;
    ///
    /// let mut set: NativeSet<i32> = NativeSet::new();
    /// assert!(set.insert(1));
    /// assert!(!set.insert(1));
    /// assert_eq!(set.len(), 1);
    /// # }
    /// ```
    pub fn insert(&mut self, element: T) -> bool {
        let (hash, bucket, found) = self.locate(&element);
        if found {
            return false;
        }
        let is_unique = self.is_unique();
        self.insert_new_at(element, hash, bucket, is_unique);
        true
    }

    /// Inserts `element`, replacing and returning an equal element if one is
    /// present.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use cow_hashset::NativeSet;
    ///
    /// let mut set: NativeSet<i32> = NativeSet::new();
    /// assert_eq!(set.update(5), None);
    /// assert_eq!(set.update(5), Some(5));
    /// assert_eq!(set.len(), 1);
    /// # }
    /// ```
    pub fn update(&mut self, element: T) -> Option<T> {
        let (hash, bucket, found) = self.locate(&element);
        let is_unique = self.is_unique();
        let (hash, bucket) = if self.ensure_unique(is_unique, self.len() + usize::from(!found)) {
            let (hash, bucket, still_found) = self.locate(&element);
            if still_found != found {
                element_type_violates_hash_requirements::<T>();
            }
            (hash, bucket)
        } else {
            (hash, bucket)
        };

        let storage = Arc::make_mut(&mut self.storage);
        if found {
            // SAFETY: `bucket` holds an element equal to, and hashing like,
            // `element`.
            Some(unsafe { storage.replace(bucket, element) })
        } else {
            // SAFETY: as in `insert_new_at`.
            unsafe { storage.insert_at(bucket, hash, element) };
            storage.invalidate_indices();
            None
        }
    }

    /// Removes the element in the occupied `bucket`.
    pub(crate) fn unchecked_remove(&mut self, bucket: Bucket, is_unique: bool) -> T {
        let rehashed = self.ensure_unique(is_unique, self.storage.max_load());
        debug_assert!(!rehashed);
        let storage = Arc::make_mut(&mut self.storage);
        // SAFETY: callers pass a bucket found occupied before `ensure_unique`,
        // which neither moved it nor changed the table.
        unsafe { storage.remove(bucket) }
    }

    /// Removes and returns the element equal to `element`, if present.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use cow_hashset::NativeSet;
    ///
    /// let mut set: NativeSet<i32> = [1, 2].into_iter().collect();
    /// assert_eq!(set.remove(&1), Some(1));
    /// assert_eq!(set.remove(&1), None);
    /// # }
    /// ```
    pub fn remove(&mut self, element: &T) -> Option<T> {
        let (bucket, found) = self.find(element);
        if !found {
            return None;
        }
        let is_unique = self.is_unique();
        Some(self.unchecked_remove(bucket, is_unique))
    }

    /// Removes and returns the element at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is stale or does not refer to an element.
    #[track_caller]
    pub fn remove_at(&mut self, index: Index) -> T {
        let bucket = self.validated_bucket(index);
        let is_unique = self.is_unique();
        self.unchecked_remove(bucket, is_unique)
    }

    pub(crate) fn remove_all_with(&mut self, is_unique: bool, keeping_capacity: bool) {
        let age = self.successor_age();
        if !keeping_capacity || !self.storage.is_allocated() {
            self.storage = Arc::new(Storage::empty_at_age(age));
        } else if !is_unique {
            self.storage = Arc::new(Storage::allocate(self.storage.scale(), Some(age), None));
        } else {
            Arc::make_mut(&mut self.storage).clear();
        }
    }

    /// Removes every element.
    ///
    /// With `keeping_capacity` the table keeps its bucket count; otherwise
    /// the set returns to the unallocated empty state. A shared storage block
    /// is never touched: this set simply detaches from it.
    pub fn remove_all(&mut self, keeping_capacity: bool) {
        let is_unique = self.is_unique();
        self.remove_all_with(is_unique, keeping_capacity);
    }

    /// Removes every element, keeping the allocated capacity.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use cow_hashset::NativeSet;
    ///
    /// let mut set: NativeSet<i32> = (0..10).collect();
    /// let capacity = set.capacity();
    /// set.clear();
    /// assert!(set.is_empty());
    /// assert_eq!(set.capacity(), capacity);
    /// # }
    /// ```
    pub fn clear(&mut self) {
        self.remove_all(true);
    }

    /// Replaces `self` with `result`, a set built from it.
    ///
    /// Unless `result` is still `self`'s storage, the new table continues
    /// `self`'s age sequence so that indices into the old table stay invalid.
    pub(crate) fn adopt(&mut self, mut result: Self) {
        if !result.shares_storage_with(self) {
            let age = self.successor_age();
            Arc::make_mut(&mut result.storage).set_age(age);
        }
        *self = result;
    }
}

impl<T, S> NativeSet<T, S>
where
    S: Default,
{
    /// Creates an empty set using the default hasher builder.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use cow_hashset::NativeSet;
    ///
    /// let set: NativeSet<i32> = NativeSet::new();
    /// assert!(set.is_empty());
    /// # }
    /// ```
    pub fn new() -> Self {
        Self::with_hasher(S::default())
    }

    /// Creates an empty set with room for `capacity` elements using the
    /// default hasher builder.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, S::default())
    }
}

impl<T, S> Default for NativeSet<T, S>
where
    S: Default,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "stats"))]
impl<T, S> NativeSet<T, S> {
    /// Computes a histogram of how far each element sits from its ideal
    /// bucket.
    pub fn displacement_histogram(&self) -> DisplacementHistogram {
        self.storage.displacement_histogram()
    }

    /// Returns detailed utilization statistics for debugging.
    pub fn debug_stats(&self) -> DebugStats {
        self.storage.debug_stats()
    }
}

/// An iterator over the elements of a [`NativeSet`].
pub struct Iter<'a, T> {
    storage: &'a Storage<T>,
    buckets: OccupiedBuckets<'a>,
    remaining: usize,
}

impl<T> Clone for Iter<'_, T> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage,
            buckets: self.buckets.clone(),
            remaining: self.remaining,
        }
    }
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let bucket = self.buckets.next()?;
        self.remaining -= 1;
        // SAFETY: the bucket iterator only yields occupied buckets.
        Some(unsafe { self.storage.element(bucket) })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}

impl<T> FusedIterator for Iter<'_, T> {}

/// A consuming iterator over the elements of a [`NativeSet`].
///
/// Holds its own reference to the storage. Elements are moved out when no
/// other set shares that storage, and cloned otherwise.
pub struct IntoIter<T> {
    storage: Arc<Storage<T>>,
    bucket: Bucket,
    remaining: usize,
}

impl<T> Iterator for IntoIter<T>
where
    T: Clone,
{
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        let table = self.storage.hash_table();
        let bucket = self.bucket;
        if !table.is_occupied(bucket) {
            return None;
        }
        self.bucket = table.occupied_bucket_after(bucket);
        self.remaining -= 1;

        match Arc::get_mut(&mut self.storage) {
            // SAFETY: `bucket` is occupied and the cursor has moved past it,
            // so it is extracted exactly once.
            Some(storage) => Some(unsafe { storage.extract(bucket) }),
            // SAFETY: `bucket` is occupied.
            None => Some(unsafe { self.storage.element(bucket) }.clone()),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T: Clone> ExactSizeIterator for IntoIter<T> {}

impl<T: Clone> FusedIterator for IntoIter<T> {}

impl<T, S> IntoIterator for NativeSet<T, S>
where
    T: Clone,
{
    type IntoIter = IntoIter<T>;
    type Item = T;

    fn into_iter(self) -> Self::IntoIter {
        let bucket = self.storage.hash_table().start_bucket();
        let remaining = self.len();
        IntoIter {
            storage: self.storage,
            bucket,
            remaining,
        }
    }
}

impl<'a, T, S> IntoIterator for &'a NativeSet<T, S> {
    type IntoIter = Iter<'a, T>;
    type Item = &'a T;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T, S> FromIterator<T> for NativeSet<T, S>
where
    T: Hash + Eq + Clone,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut set = NativeSet::with_capacity(iter.size_hint().0);
        set.extend(iter);
        set
    }
}

impl<T, S> Extend<T> for NativeSet<T, S>
where
    T: Hash + Eq + Clone,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for element in iter {
            self.insert(element);
        }
    }
}

impl<'a, T, S> Extend<&'a T> for NativeSet<T, S>
where
    T: Hash + Eq + Copy + 'a,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = &'a T>>(&mut self, iter: I) {
        self.extend(iter.into_iter().copied());
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use alloc::string::String;
    use alloc::string::ToString;
    use alloc::vec;
    use alloc::vec::Vec;
    use core::hash::BuildHasher;

    use rand::TryRngCore;
    use rand::rngs::OsRng;
    use siphasher::sip::SipHasher;

    use super::*;

    #[derive(Clone)]
    pub(crate) struct SipHashBuilder {
        k1: u64,
        k2: u64,
    }

    impl BuildHasher for SipHashBuilder {
        type Hasher = SipHasher;

        fn build_hasher(&self) -> Self::Hasher {
            SipHasher::new_with_keys(self.k1, self.k2)
        }
    }

    impl Default for SipHashBuilder {
        fn default() -> Self {
            Self {
                k1: OsRng.try_next_u64().unwrap_or(0),
                k2: OsRng.try_next_u64().unwrap_or(0),
            }
        }
    }

    pub(crate) type TestSet<T> = NativeSet<T, SipHashBuilder>;

    fn sorted<T: Ord + Clone>(set: &TestSet<T>) -> Vec<T> {
        let mut elements: Vec<T> = set.iter().cloned().collect();
        elements.sort();
        elements
    }

    /// Equal to every other value; hashes to nothing.
    #[derive(Clone, Debug)]
    struct AlwaysEqual(#[allow(dead_code)] u32);

    impl PartialEq for AlwaysEqual {
        fn eq(&self, _: &Self) -> bool {
            true
        }
    }

    impl Eq for AlwaysEqual {}

    impl Hash for AlwaysEqual {
        fn hash<H: Hasher>(&self, _: &mut H) {}
    }

    #[test]
    fn test_new_and_with_hasher() {
        let set: TestSet<i32> = NativeSet::new();
        assert!(set.is_empty());
        assert_eq!(set.len(), 0);
        assert_eq!(set.capacity(), 1);

        let set: TestSet<i32> = NativeSet::with_hasher(SipHashBuilder::default());
        assert!(set.is_empty());
        assert_eq!(set.iter().count(), 0);
        assert_eq!(set.start_index(), set.end_index());
    }

    #[test]
    fn test_with_capacity() {
        let set: TestSet<i32> = NativeSet::with_capacity(100);
        assert!(set.capacity() >= 100);
        assert!(set.capacity().is_power_of_two());
        assert!(set.is_empty());

        let set: TestSet<i32> = NativeSet::with_capacity(4);
        assert_eq!(set.capacity(), 8);
    }

    #[test]
    fn test_insert_and_contains() {
        let mut set = TestSet::default();

        assert!(set.insert(1));
        assert!(set.insert(2));
        assert!(!set.insert(1));

        assert!(set.contains(&1));
        assert!(set.contains(&2));
        assert!(!set.contains(&3));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_remove() {
        let mut set = TestSet::default();
        set.insert(1);
        set.insert(2);

        assert_eq!(set.remove(&1), Some(1));
        assert!(!set.contains(&1));
        assert!(set.contains(&2));
        assert_eq!(set.remove(&1), None);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_get() {
        let mut set = TestSet::default();
        set.insert("hello".to_string());

        assert_eq!(set.get(&"hello".to_string()), Some(&"hello".to_string()));
        assert_eq!(set.get(&"world".to_string()), None);
    }

    #[test]
    fn test_update() {
        let mut set = TestSet::default();
        assert_eq!(set.update(10), None);
        assert_eq!(set.update(10), Some(10));
        assert_eq!(set.len(), 1);

        for i in 0..50 {
            set.update(i);
        }
        assert_eq!(set.len(), 50);
        assert_eq!(sorted(&set), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_insert_new() {
        let mut set = TestSet::default();
        for i in 0..100 {
            set.insert_new(i);
        }
        assert_eq!(set.len(), 100);
        for i in 0..100 {
            assert!(set.contains(&i));
        }
    }

    #[test]
    #[cfg(any(debug_assertions, feature = "checked-insert"))]
    #[should_panic(expected = "violates Hash/Eq requirements")]
    fn test_insert_new_detects_inconsistent_hash() {
        let mut set = TestSet::default();
        set.insert_new(AlwaysEqual(1));
        set.insert_new(AlwaysEqual(2));
    }

    #[test]
    fn test_clear() {
        let mut set = TestSet::default();
        for i in 0..20 {
            set.insert(i);
        }
        let capacity = set.capacity();

        set.clear();
        assert!(set.is_empty());
        assert_eq!(set.capacity(), capacity);
        assert!(!set.contains(&1));

        set.insert(1);
        set.remove_all(false);
        assert!(set.is_empty());
        assert_eq!(set.capacity(), 1);
    }

    #[test]
    fn test_remove_all_detaches_shared_storage() {
        let mut a = TestSet::default();
        for i in 0..20 {
            a.insert(i);
        }
        let mut b = a.clone();

        b.remove_all(true);
        assert!(b.is_empty());
        assert_eq!(b.capacity(), a.capacity());
        assert_eq!(a.len(), 20);

        let mut c = a.clone();
        c.remove_all(false);
        assert!(c.is_empty());
        assert_eq!(a.len(), 20);
    }

    #[test]
    fn test_reserve() {
        let mut set: TestSet<i32> = TestSet::default();
        set.reserve(100);
        assert!(set.capacity() >= 100);
        let capacity = set.capacity();

        for i in 0..100 {
            set.insert(i);
        }
        assert_eq!(set.capacity(), capacity);
    }

    #[test]
    fn test_growth_doubles() {
        let mut set: TestSet<i32> = NativeSet::with_capacity(4);
        assert_eq!(set.capacity(), 8);

        for i in 1..=16 {
            set.insert(i);
            assert!(set.len() < set.capacity());
            assert!(set.capacity().is_power_of_two());
        }

        assert_eq!(set.capacity(), 32);
        assert_eq!(set.len(), 16);
        for i in 1..=16 {
            assert!(set.contains(&i));
        }
    }

    #[test]
    fn test_iter() {
        let mut set = TestSet::default();
        set.insert(1);
        set.insert(2);
        set.insert(3);

        let mut values: Vec<_> = set.iter().copied().collect();
        values.sort();
        assert_eq!(values, vec![1, 2, 3]);
        assert_eq!(set.iter().len(), 3);
    }

    #[test]
    fn test_into_iterator() {
        let mut set = TestSet::default();
        set.insert(1);
        set.insert(2);
        set.insert(3);

        let mut values: Vec<_> = set.into_iter().collect();
        values.sort();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn test_into_iterator_of_shared_storage_clones() {
        let mut set = TestSet::default();
        for i in 0..10 {
            set.insert(i.to_string());
        }
        let copy = set.clone();

        let mut values: Vec<String> = set.into_iter().collect();
        values.sort();
        assert_eq!(values.len(), 10);
        assert_eq!(copy.len(), 10);
        for value in &values {
            assert!(copy.contains(value));
        }
    }

    #[test]
    fn test_into_iterator_partial_drop() {
        let tracker = alloc::rc::Rc::new(());
        #[derive(Clone)]
        struct Tracked(u32, #[allow(dead_code)] alloc::rc::Rc<()>);
        impl PartialEq for Tracked {
            fn eq(&self, other: &Self) -> bool {
                self.0 == other.0
            }
        }
        impl Eq for Tracked {}
        impl Hash for Tracked {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.0.hash(state);
            }
        }

        let mut set = TestSet::default();
        for i in 0..10 {
            set.insert(Tracked(i, alloc::rc::Rc::clone(&tracker)));
        }
        let mut iter = set.into_iter();
        let first = iter.next();
        assert!(first.is_some());
        assert_eq!(iter.len(), 9);
        drop(iter);
        assert_eq!(alloc::rc::Rc::strong_count(&tracker), 2);
        drop(first);
        assert_eq!(alloc::rc::Rc::strong_count(&tracker), 1);
    }

    #[test]
    fn test_clone_is_copy_on_write() {
        let mut a = TestSet::default();
        for i in 0..10 {
            a.insert(i);
        }

        let mut b = a.clone();
        assert!(a.shares_storage_with(&b));
        assert_eq!(a, b);

        b.insert(100);
        assert!(!a.shares_storage_with(&b));
        assert!(!a.contains(&100));
        assert!(b.contains(&100));
        assert_eq!(a.len(), 10);

        let mut c = a.clone();
        c.remove(&3);
        assert!(a.contains(&3));
        assert!(!c.contains(&3));
    }

    #[test]
    fn test_copy_keeps_buckets_and_age() {
        let mut a = TestSet::default();
        for i in 0..10 {
            a.insert(i);
        }
        let index = a.index_of(&7).unwrap();

        let mut b = a.clone();
        // Fits in the current table, so the shared storage is copied verbatim.
        b.reserve(0);
        assert!(!a.shares_storage_with(&b));
        assert_eq!(*b.element_at(index), 7);
    }

    #[test]
    fn test_unique_mutation_keeps_storage() {
        let mut set: TestSet<i32> = NativeSet::with_capacity(10);
        set.insert(1);
        let other = set.clone();
        drop(other);

        let before = Arc::as_ptr(&set.storage);
        set.insert(2);
        set.remove(&1);
        assert_eq!(Arc::as_ptr(&set.storage), before);
    }

    #[test]
    fn test_index_navigation() {
        let set: TestSet<i32> = (0..25).collect();

        let mut index = set.start_index();
        let mut seen = Vec::new();
        while index != set.end_index() {
            seen.push(*set.element_at(index));
            index = set.index_after(index);
        }
        seen.sort();
        assert_eq!(seen, (0..25).collect::<Vec<_>>());

        let index = set.index_of(&12).unwrap();
        assert!(set.is_valid_index(index));
        assert_eq!(*set.element_at(index), 12);
        assert_eq!(set.index_of(&99), None);
    }

    #[test]
    fn test_remove_at() {
        let mut set: TestSet<i32> = (0..25).collect();
        let index = set.index_of(&12).unwrap();
        assert_eq!(set.remove_at(index), 12);
        assert!(!set.contains(&12));
        assert_eq!(set.len(), 24);
        assert!(!set.is_valid_index(index));
    }

    #[test]
    #[should_panic(expected = "invalid index")]
    fn test_stale_index_panics() {
        let mut set = TestSet::default();
        set.insert(1);
        let index = set.index_of(&1).unwrap();
        set.insert(2);
        set.element_at(index);
    }

    #[test]
    #[should_panic(expected = "invalid index")]
    fn test_end_index_is_not_an_element() {
        let set: TestSet<i32> = (0..3).collect();
        set.element_at(set.end_index());
    }

    #[test]
    fn test_index_stale_after_remove_all_and_regrowth() {
        // Freed tables are often reallocated at the same address.
        for trial in 0..1000 {
            let mut set = TestSet::default();
            set.insert(trial);
            let index = set.index_of(&trial).unwrap();

            set.remove_all(false);
            assert!(!set.is_valid_index(index));

            set.insert(trial + 1_000_000);
            assert!(
                !set.is_valid_index(index),
                "index survived reallocation in trial {trial}"
            );
        }
    }

    #[test]
    #[should_panic(expected = "invalid index")]
    fn test_index_from_before_remove_all_panics() {
        let mut set: TestSet<i32> = (0..10).collect();
        let index = set.index_of(&5).unwrap();
        set.remove_all(false);
        set.extend(0..10);
        set.element_at(index);
    }

    #[test]
    fn test_index_stale_after_resize() {
        let mut set: TestSet<i32> = TestSet::with_capacity(6);
        set.extend(0..6);
        assert_eq!(set.capacity(), 8);
        let index = set.index_of(&3).unwrap();

        set.reserve(100);
        assert!(set.capacity() > 8);
        assert!(!set.is_valid_index(index));
        assert!(set.index_of(&3).is_some());
    }

    #[test]
    #[should_panic(expected = "invalid index")]
    fn test_index_from_before_resize_panics() {
        let mut set: TestSet<i32> = TestSet::with_capacity(6);
        set.extend(0..6);
        let index = set.index_of(&3).unwrap();
        set.reserve(100);
        set.element_at(index);
    }

    #[test]
    fn test_index_stale_after_replacing_shared_storage() {
        let mut set: TestSet<i32> = (0..20).collect();
        let index = set.index_of(&4).unwrap();

        let snapshot = set.clone();
        set.remove_all(true);
        set.extend(0..20);
        assert!(!set.is_valid_index(index));
        assert!(snapshot.is_valid_index(index));
        assert_eq!(*snapshot.element_at(index), 4);

        let mut set = snapshot.clone();
        set.retain(|v| v % 2 == 0);
        assert!(!set.is_valid_index(index));

        let mut set = snapshot.clone();
        set.subtract([1, 3]);
        assert!(!set.is_valid_index(index));
        assert!(snapshot.is_valid_index(index));
    }

    #[test]
    fn test_shared_set_at_load_limit_copies_and_resizes() {
        let mut original: TestSet<i32> = TestSet::with_capacity(12);
        original.extend(0..12);
        assert_eq!(original.capacity(), 16);
        assert_eq!(original.len(), crate::hash_table::max_load(16));
        let index = original.index_of(&7).unwrap();

        let mut copy = original.clone();
        assert!(copy.insert(12));

        assert!(!copy.shares_storage_with(&original));
        assert_eq!(copy.capacity(), 32);
        assert_eq!(copy.len(), 13);
        assert_eq!(sorted(&copy), (0..13).collect::<Vec<_>>());
        assert!(!copy.is_valid_index(index));

        assert_eq!(original.capacity(), 16);
        assert_eq!(original.len(), 12);
        assert!(!original.contains(&12));
        assert_eq!(sorted(&original), (0..12).collect::<Vec<_>>());
        assert!(original.is_valid_index(index));
        assert_eq!(*original.element_at(index), 7);
    }

    #[test]
    fn test_multiple_insertions() {
        let mut set = TestSet::default();

        for i in 0..100 {
            assert!(set.insert(i));
        }

        for i in 0..100 {
            assert!(!set.insert(i));
        }

        assert_eq!(set.len(), 100);
    }

    #[test]
    fn test_collision_handling() {
        let mut set = NativeSet::with_hasher(SipHashBuilder::default());

        for i in 0..1000 {
            assert!(set.insert(i));
        }

        assert_eq!(set.len(), 1000);

        for i in 0..1000 {
            assert!(set.contains(&i));
        }

        for i in (0..1000).step_by(2) {
            assert_eq!(set.remove(&i), Some(i));
        }

        assert_eq!(set.len(), 500);

        for i in (1..1000).step_by(2) {
            assert!(set.contains(&i));
        }

        for i in (0..1000).step_by(2) {
            assert!(!set.contains(&i));
        }
    }

    #[test]
    fn test_string_values() {
        let mut set = NativeSet::with_hasher(SipHashBuilder::default());

        set.insert("apple".to_string());
        set.insert("banana".to_string());
        set.insert("cherry".to_string());

        assert!(set.contains(&"apple".to_string()));
        assert!(!set.contains(&"grape".to_string()));
        assert_eq!(set.len(), 3);

        assert_eq!(set.remove(&"banana".to_string()), Some("banana".to_string()));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_edge_cases() {
        let mut set = TestSet::default();

        assert_eq!(set.remove(&1), None);
        assert!(!set.contains(&1));
        assert_eq!(set.get(&1), None);

        set.clear();
        assert!(set.is_empty());

        set.insert(0);
        set.insert(-1);
        set.insert(i32::MAX);
        set.insert(i32::MIN);
        assert_eq!(set.len(), 4);
        assert_eq!(sorted(&set), vec![i32::MIN, -1, 0, i32::MAX]);
    }

    #[test]
    fn test_insert_remove_cycle() {
        let mut set = TestSet::default();

        for cycle in 0..10 {
            for i in 0..100 {
                set.insert(i + cycle * 100);
            }
            for i in 0..100 {
                assert_eq!(set.remove(&(i + cycle * 100)), Some(i + cycle * 100));
            }
            assert!(set.is_empty());
        }
    }

    #[test]
    fn test_equality() {
        let a: TestSet<i32> = (0..50).collect();
        let b: TestSet<i32> = (0..50).rev().collect();
        let c: TestSet<i32> = (1..51).collect();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, TestSet::default());
    }

    #[test]
    fn test_extend_by_reference() {
        let mut set: TestSet<i32> = TestSet::default();
        let values = [1, 2, 3, 2];
        set.extend(values.iter());
        assert_eq!(sorted(&set), vec![1, 2, 3]);
    }

    #[test]
    fn test_debug_format() {
        let mut set = TestSet::default();
        set.insert(42);
        assert_eq!(alloc::format!("{:?}", set), "{42}");
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    #[cfg(feature = "std")]
    fn histogram_output() {
        let mut set: TestSet<u64> = NativeSet::with_capacity(10000);
        let target = crate::hash_table::max_load(set.capacity()) as u64;
        for value in 0..target {
            set.insert(value);
        }
        assert_eq!(set.displacement_histogram().total(), set.len());

        set.displacement_histogram().print();
        set.debug_stats().print();
    }
}
