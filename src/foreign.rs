//! Interoperation with sets implemented outside this crate.
//!
//! A foreign set keeps its own representation of elements and its own notion
//! of membership. [`SetVariant`] wraps either a [`NativeSet`] or a foreign set
//! behind one read surface, and moves the foreign contents into native storage
//! the first time it is mutated.

use core::convert::Infallible;
use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;

use crate::DefaultHashBuilder;
use crate::NativeSet;

/// The surface a foreign collection has to provide.
///
/// `Value` is the foreign representation of an element; `import` and `export`
/// convert between it and `T`. The conversions must preserve equality: two
/// elements are equal as `T` exactly when their exported values are equal to
/// the foreign set.
pub trait ForeignSet<T> {
    /// The foreign representation of an element.
    type Value;

    /// Number of elements in the foreign set.
    fn count(&self) -> usize;

    /// Returns `true` if the foreign set holds `value`.
    fn contains(&self, value: &Self::Value) -> bool;

    /// Every element of the foreign set, each exactly once, in any order.
    fn values(&self) -> impl Iterator<Item = Self::Value> + '_;

    /// Converts a foreign value to a native element.
    fn import(&self, value: Self::Value) -> T;

    /// Converts a native element to its foreign representation.
    fn export(&self, element: &T) -> Self::Value;
}

/// A foreign set type that cannot be constructed.
///
/// The default for [`SetVariant`] when no foreign collection is involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoForeign {}

impl<T> ForeignSet<T> for NoForeign {
    type Value = Infallible;

    fn count(&self) -> usize {
        match *self {}
    }

    fn contains(&self, _: &Infallible) -> bool {
        match *self {}
    }

    fn values(&self) -> impl Iterator<Item = Infallible> + '_ {
        core::iter::empty()
    }

    fn import(&self, value: Infallible) -> T {
        match value {}
    }

    fn export(&self, _: &T) -> Infallible {
        match *self {}
    }
}

impl<T, S> NativeSet<T, S>
where
    T: Hash + Eq + Clone,
    S: BuildHasher,
{
    /// Builds a native set holding every element of `foreign`.
    ///
    /// The result is allocated once, at the foreign set's size.
    pub fn from_foreign<F>(foreign: &F, hash_builder: S) -> Self
    where
        F: ForeignSet<T>,
    {
        let mut set = Self::with_capacity_and_hasher(foreign.count(), hash_builder);
        for value in foreign.values() {
            set.unsafe_insert_new(foreign.import(value));
        }
        set
    }
}

impl<T, S> NativeSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    /// Compares against a foreign set without importing it.
    pub fn is_equal_to_foreign<F>(&self, foreign: &F) -> bool
    where
        F: ForeignSet<T>,
    {
        if self.len() != foreign.count() {
            return false;
        }
        self.iter()
            .all(|element| foreign.contains(&foreign.export(element)))
    }
}

/// Either a native set or a wrapped foreign one.
///
/// Reads are answered by whichever representation is present. Mutation always
/// happens on native storage: a foreign variant is converted the first time a
/// mutable native view is requested.
#[derive(Clone)]
pub enum SetVariant<T, S = DefaultHashBuilder, F = NoForeign> {
    /// Elements stored in native storage.
    Native(NativeSet<T, S>),
    /// Elements held by a foreign collection.
    Foreign {
        /// The wrapped collection.
        set: F,
        /// Hasher builder used once the elements move to native storage.
        hash_builder: S,
    },
}

impl<T, S, F> Debug for SetVariant<T, S, F>
where
    T: Debug,
    F: Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SetVariant::Native(native) => f.debug_tuple("Native").field(native).finish(),
            SetVariant::Foreign { set, .. } => f.debug_tuple("Foreign").field(set).finish(),
        }
    }
}

enum VariantIter<N, F> {
    Native(N),
    Foreign(F),
}

impl<T, N, F> Iterator for VariantIter<N, F>
where
    N: Iterator<Item = T>,
    F: Iterator<Item = T>,
{
    type Item = T;

    #[inline]
    fn next(&mut self) -> Option<T> {
        match self {
            VariantIter::Native(iter) => iter.next(),
            VariantIter::Foreign(iter) => iter.next(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            VariantIter::Native(iter) => iter.size_hint(),
            VariantIter::Foreign(iter) => iter.size_hint(),
        }
    }
}

impl<T, S, F> SetVariant<T, S, F>
where
    T: Hash + Eq,
    S: BuildHasher,
    F: ForeignSet<T>,
{
    /// Wraps a foreign set.
    pub fn foreign(set: F, hash_builder: S) -> Self {
        SetVariant::Foreign { set, hash_builder }
    }

    /// Returns `true` if the elements live in native storage.
    pub fn is_native(&self) -> bool {
        matches!(self, SetVariant::Native(_))
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            SetVariant::Native(native) => native.len(),
            SetVariant::Foreign { set, .. } => set.count(),
        }
    }

    /// Returns `true` if there are no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if `element` is present.
    pub fn contains(&self, element: &T) -> bool {
        match self {
            SetVariant::Native(native) => native.contains(element),
            SetVariant::Foreign { set, .. } => set.contains(&set.export(element)),
        }
    }

    /// Iterates over the elements, cloning native ones and importing foreign
    /// ones.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_
    where
        T: Clone,
    {
        match self {
            SetVariant::Native(native) => VariantIter::Native(native.iter().cloned()),
            SetVariant::Foreign { set, .. } => {
                VariantIter::Foreign(set.values().map(move |value| set.import(value)))
            }
        }
    }
}

impl<T, S, F> SetVariant<T, S, F>
where
    T: Hash + Eq + Clone,
    S: BuildHasher + Clone,
    F: ForeignSet<T>,
{
    /// Returns the native set, first moving foreign contents into native
    /// storage if needed.
    pub fn native_mut(&mut self) -> &mut NativeSet<T, S> {
        if let SetVariant::Foreign { set, hash_builder } = self {
            let native = NativeSet::from_foreign(&*set, hash_builder.clone());
            *self = SetVariant::Native(native);
        }
        match self {
            SetVariant::Native(native) => native,
            SetVariant::Foreign { .. } => unreachable!("foreign set was just converted"),
        }
    }

    /// Converts into a native set.
    pub fn into_native(self) -> NativeSet<T, S> {
        match self {
            SetVariant::Native(native) => native,
            SetVariant::Foreign { set, hash_builder } => NativeSet::from_foreign(&set, hash_builder),
        }
    }

    /// Adds an element; see [`NativeSet::insert`].
    pub fn insert(&mut self, element: T) -> bool {
        if !self.is_native() && self.contains(&element) {
            return false;
        }
        self.native_mut().insert(element)
    }

    /// Removes an element; see [`NativeSet::remove`].
    pub fn remove(&mut self, element: &T) -> Option<T> {
        if !self.is_native() && !self.contains(element) {
            return None;
        }
        self.native_mut().remove(element)
    }
}

impl<T, S, F> From<NativeSet<T, S>> for SetVariant<T, S, F> {
    fn from(native: NativeSet<T, S>) -> Self {
        SetVariant::Native(native)
    }
}

impl<T, S, F> PartialEq for SetVariant<T, S, F>
where
    T: Hash + Eq,
    S: BuildHasher,
    F: ForeignSet<T>,
{
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SetVariant::Native(lhs), SetVariant::Native(rhs)) => lhs == rhs,
            (SetVariant::Native(native), SetVariant::Foreign { set, .. })
            | (SetVariant::Foreign { set, .. }, SetVariant::Native(native)) => {
                native.is_equal_to_foreign(set)
            }
            (SetVariant::Foreign { set: lhs, .. }, SetVariant::Foreign { set: rhs, .. }) => {
                lhs.count() == rhs.count() && lhs.values().all(|value| rhs.contains(&value))
            }
        }
    }
}
