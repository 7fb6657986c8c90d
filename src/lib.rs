#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod bitset;

/// Sets implemented outside this crate, and the [`SetVariant`] sum type that
/// wraps either kind.
pub mod foreign;

pub mod hash_table;

/// A copy-on-write hash set using linear open addressing.
///
/// This module provides [`NativeSet`], its iterators, and the element lookup,
/// insertion and removal operations. Bulk set algebra lives on the same type.
pub mod native_set;

mod set_algebra;
mod storage;

pub use foreign::ForeignSet;
pub use foreign::NoForeign;
pub use foreign::SetVariant;
pub use hash_table::Bucket;
pub use hash_table::Index;
pub use native_set::NativeSet;
#[cfg(any(test, feature = "stats"))]
pub use storage::DebugStats;
#[cfg(any(test, feature = "stats"))]
pub use storage::DisplacementHistogram;

cfg_if::cfg_if! {
    if #[cfg(feature = "foldhash")] {
        /// The hasher builder used when a set does not name one.
        pub type DefaultHashBuilder = foldhash::fast::RandomState;
    } else if #[cfg(feature = "std")] {
        /// The hasher builder used when a set does not name one.
        pub type DefaultHashBuilder = std::collections::hash_map::RandomState;
    } else {
        /// Placeholder hasher builder when neither `foldhash` nor `std` is
        /// enabled. Sets must name their hasher builder explicitly.
        #[derive(Debug, Clone, Copy)]
        pub enum DefaultHashBuilder {}
    }
}
