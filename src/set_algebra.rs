//! Bulk set operations.
//!
//! Operations that produce a subset of `self` first mark the selected buckets
//! in a [`TemporaryBitset`] sized to `self`'s table, then materialize the
//! result once at its exact size. Every element is hashed once per operand,
//! and the result never rehashes while it is being filled.

use core::borrow::Borrow;
use core::hash::BuildHasher;
use core::hash::Hash;

use crate::NativeSet;
use crate::bitset::TemporaryBitset;
use crate::hash_table::Bucket;
use crate::hash_table::scale_for_capacity;
use crate::native_set::insert_new_unchecked;
use crate::storage::Storage;

impl<T, S> NativeSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    fn temporary_bitset(&self) -> TemporaryBitset {
        TemporaryBitset::with_capacity(self.capacity())
    }

    /// Returns `true` if every element of `self` appears in `other`.
    ///
    /// Stops as soon as all of `self` has been matched.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use cow_hashset::NativeSet;
    ///
    /// let set: NativeSet<i32> = [1, 2].into_iter().collect();
    /// assert!(set.is_subset_of(&[3, 2, 1]));
    /// assert!(!set.is_subset_of(&[2, 3]));
    /// # }
    /// ```
    pub fn is_subset_of<I>(&self, other: I) -> bool
    where
        I: IntoIterator,
        I::Item: Borrow<T>,
    {
        if self.is_empty() {
            return true;
        }

        let mut seen = self.temporary_bitset();
        for element in other {
            let (bucket, found) = self.find(element.borrow());
            if found && seen.insert(bucket.offset()) && seen.count() == self.len() {
                return true;
            }
        }
        false
    }

    /// Returns `true` if `self` is a subset of `other` and `other` holds at
    /// least one element that is not in `self`.
    pub fn is_strict_subset_of<I>(&self, other: I) -> bool
    where
        I: IntoIterator,
        I::Item: Borrow<T>,
    {
        let mut seen = self.temporary_bitset();
        let mut is_strict = false;
        for element in other {
            let (bucket, found) = self.find(element.borrow());
            if !found {
                if !is_strict {
                    is_strict = true;
                    if seen.count() == self.len() {
                        return true;
                    }
                }
                continue;
            }
            if seen.insert(bucket.offset()) && seen.count() == self.len() && is_strict {
                return true;
            }
        }
        false
    }

    /// Returns `true` if every element of `other` appears in `self`.
    pub fn is_superset_of<I>(&self, other: I) -> bool
    where
        I: IntoIterator,
        I::Item: Borrow<T>,
    {
        other
            .into_iter()
            .all(|element| self.contains(element.borrow()))
    }

    /// Returns `true` if `self` is a superset of `other` and holds at least
    /// one element that `other` lacks.
    pub fn is_strict_superset_of<I>(&self, other: I) -> bool
    where
        I: IntoIterator,
        I::Item: Borrow<T>,
    {
        if self.is_empty() {
            return false;
        }

        let mut seen = self.temporary_bitset();
        for element in other {
            let (bucket, found) = self.find(element.borrow());
            if !found {
                return false;
            }
            if seen.insert(bucket.offset()) && seen.count() == self.len() {
                return false;
            }
        }
        true
    }

    /// Returns `true` if `self` and `other` have no element in common.
    pub fn is_disjoint_with<I>(&self, other: I) -> bool
    where
        I: IntoIterator,
        I::Item: Borrow<T>,
    {
        if self.is_empty() {
            return true;
        }
        !other
            .into_iter()
            .any(|element| self.contains(element.borrow()))
    }
}

impl<T, S> NativeSet<T, S>
where
    T: Hash + Eq + Clone,
    S: BuildHasher + Clone,
{
    /// Builds a set holding the `count` elements of `self` whose buckets are
    /// marked in `bitset`.
    ///
    /// Every marked bit must refer to an occupied bucket of `self`.
    pub(crate) fn extract_subset(&self, bitset: &TemporaryBitset, count: usize) -> Self {
        debug_assert_eq!(bitset.count(), count);
        if count == 0 {
            return Self::with_hasher(self.hasher().clone());
        }
        if count == self.len() {
            return self.clone();
        }

        let mut storage = Storage::allocate(scale_for_capacity(count), None, None);
        let table = self.storage().hash_table();
        for offset in bitset.iter().take(count) {
            let bucket = Bucket::new(offset);
            assert!(table.is_occupied(bucket));
            // SAFETY: just checked that the bucket is occupied.
            let element = unsafe { self.storage().element(bucket) }.clone();
            insert_new_unchecked(&mut storage, self.hasher(), element);
        }
        Self::from_storage(storage, self.hasher().clone())
    }

    /// Returns the elements of `self` that are not in `other`.
    ///
    /// If `other` shares no element with `self`, the result shares `self`'s
    /// storage.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use cow_hashset::NativeSet;
    ///
    /// let a: NativeSet<i32> = [1, 2, 3, 4].into_iter().collect();
    /// let b: NativeSet<i32> = [3, 4, 5, 6].into_iter().collect();
    /// let expected: NativeSet<i32> = [1, 2].into_iter().collect();
    /// assert_eq!(a.subtracting(&b), expected);
    /// # }
    /// ```
    pub fn subtracting<I>(&self, other: I) -> Self
    where
        I: IntoIterator,
        I::Item: Borrow<T>,
    {
        if self.is_empty() {
            return Self::with_hasher(self.hasher().clone());
        }

        // Nothing is copied until an element to remove turns up.
        let mut other = other.into_iter();
        let Some(first) = other.by_ref().find_map(|element| {
            let (bucket, found) = self.find(element.borrow());
            found.then_some(bucket)
        }) else {
            return self.clone();
        };

        let mut difference = TemporaryBitset::copy_of(self.storage().hash_table().words());
        difference.remove(first.offset());
        for element in other {
            let (bucket, found) = self.find(element.borrow());
            if found && difference.remove(bucket.offset()) && difference.count() == 0 {
                return Self::with_hasher(self.hasher().clone());
            }
        }

        let remaining = difference.count();
        self.extract_subset(&difference, remaining)
    }

    /// Returns the elements of `self` for which `is_included` returns `true`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use cow_hashset::NativeSet;
    ///
    /// let set: NativeSet<i32> = (0..10).collect();
    /// let even = set.filter(|v| v % 2 == 0);
    /// assert_eq!(even.len(), 5);
    /// assert!(even.contains(&4));
    /// # }
    /// ```
    pub fn filter(&self, mut is_included: impl FnMut(&T) -> bool) -> Self {
        let mut bitset = self.temporary_bitset();
        let table = self.storage().hash_table();
        for bucket in table {
            // SAFETY: the table only yields occupied buckets.
            if is_included(unsafe { self.storage().element(bucket) }) {
                bitset.insert(bucket.offset());
            }
        }
        let count = bitset.count();
        self.extract_subset(&bitset, count)
    }

    /// Returns the elements common to `self` and `other`.
    ///
    /// The smaller set is scanned against the larger one. Elements are always
    /// taken from `self`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use cow_hashset::NativeSet;
    ///
    /// let a: NativeSet<i32> = [1, 2, 3, 4].into_iter().collect();
    /// let b: NativeSet<i32> = [3, 4, 5, 6].into_iter().collect();
    /// let expected: NativeSet<i32> = [3, 4].into_iter().collect();
    /// assert_eq!(a.intersection(&b), expected);
    /// # }
    /// ```
    pub fn intersection(&self, other: &Self) -> Self {
        if self.len() > other.len() {
            return self.generic_intersection(other);
        }

        let mut bitset = self.temporary_bitset();
        for bucket in self.storage().hash_table() {
            // SAFETY: the table only yields occupied buckets.
            if other.contains(unsafe { self.storage().element(bucket) }) {
                bitset.insert(bucket.offset());
            }
        }
        let count = bitset.count();
        self.extract_subset(&bitset, count)
    }

    /// Returns the elements of `self` that also appear in `other`.
    ///
    /// `other` may repeat elements.
    pub fn generic_intersection<I>(&self, other: I) -> Self
    where
        I: IntoIterator,
        I::Item: Borrow<T>,
    {
        let mut bitset = self.temporary_bitset();
        for element in other {
            let (bucket, found) = self.find(element.borrow());
            if found {
                bitset.insert(bucket.offset());
            }
        }
        let count = bitset.count();
        self.extract_subset(&bitset, count)
    }

    /// Returns the elements that are in exactly one of `self` and `other`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use cow_hashset::NativeSet;
    ///
    /// let a: NativeSet<i32> = [1, 2, 3].into_iter().collect();
    /// let expected: NativeSet<i32> = [1, 4].into_iter().collect();
    /// assert_eq!(a.symmetric_difference([2, 3, 4, 4]), expected);
    /// # }
    /// ```
    pub fn symmetric_difference<I>(&self, other: I) -> Self
    where
        I: IntoIterator,
        I::Item: Borrow<T>,
    {
        let mut kept = TemporaryBitset::copy_of(self.storage().hash_table().words());
        let mut added = Self::with_hasher(self.hasher().clone());
        for element in other {
            let element = element.borrow();
            let (bucket, found) = self.find(element);
            if found {
                kept.remove(bucket.offset());
            } else if !added.contains(element) {
                added.insert(element.clone());
            }
        }

        let count = kept.count();
        let mut result = self.extract_subset(&kept, count);
        result.reserve(added.len());
        for element in added {
            result.insert_new(element);
        }
        result
    }

    /// Returns the elements that are in `self`, in `other`, or in both.
    pub fn union<I>(&self, other: I) -> Self
    where
        I: IntoIterator,
        I::Item: Borrow<T>,
    {
        let mut result = self.clone();
        result.form_union(other);
        result
    }

    /// Inserts every element of `other` that `self` does not already hold.
    pub fn form_union<I>(&mut self, other: I)
    where
        I: IntoIterator,
        I::Item: Borrow<T>,
    {
        for element in other {
            let element = element.borrow();
            let (hash, bucket, found) = self.locate(element);
            if !found {
                let is_unique = self.is_unique();
                self.insert_new_at(element.clone(), hash, bucket, is_unique);
            }
        }
    }

    /// Removes every element of `other` from `self`.
    pub fn subtract<I>(&mut self, other: I)
    where
        I: IntoIterator,
        I::Item: Borrow<T>,
    {
        let result = self.subtracting(other);
        self.adopt(result);
    }

    /// Keeps only the elements `self` shares with `other`.
    pub fn form_intersection(&mut self, other: &Self) {
        let result = self.intersection(other);
        self.adopt(result);
    }

    /// Keeps only the elements for which `is_included` returns `true`.
    pub fn retain(&mut self, is_included: impl FnMut(&T) -> bool) {
        let result = self.filter(is_included);
        self.adopt(result);
    }
}
