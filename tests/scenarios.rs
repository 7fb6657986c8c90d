#![cfg(any(feature = "std", feature = "foldhash"))]

use cow_hashset::NativeSet;
use cow_hashset::SetVariant;

fn sorted<T: Ord + Clone>(set: &NativeSet<T>) -> Vec<T> {
    let mut elements: Vec<T> = set.iter().cloned().collect();
    elements.sort();
    elements
}

#[test]
fn insert_into_empty_set() {
    let mut set: NativeSet<i32> = NativeSet::with_capacity(0);
    assert!(set.is_empty());

    for value in [1, 2, 3] {
        assert!(set.insert(value));
    }

    assert_eq!(set.len(), 3);
    assert!(set.contains(&2));
    assert!(!set.contains(&4));
}

#[test]
fn growth_from_small_capacity() {
    let mut set: NativeSet<i32> = NativeSet::with_capacity(4);
    for value in 1..=16 {
        set.insert(value);
    }

    assert_eq!(set.len(), 16);
    assert_eq!(set.capacity(), 32);
    for value in 1..=16 {
        assert!(set.contains(&value), "{value} missing after growth");
    }
}

#[test]
fn removal_keeps_the_rest_reachable() {
    let mut set: NativeSet<i32> = (1..=16).collect();

    assert_eq!(set.remove(&7), Some(7));

    assert_eq!(set.len(), 15);
    assert!(!set.contains(&7));
    for value in (1..=16).filter(|&v| v != 7) {
        assert!(set.contains(&value), "{value} lost by compaction");
    }
    assert_eq!(set.iter().count(), 15);
}

#[test]
fn intersection_subtraction_and_subset() {
    let a: NativeSet<i32> = [1, 2, 3, 4].into_iter().collect();
    let b: NativeSet<i32> = [3, 4, 5, 6].into_iter().collect();

    assert_eq!(sorted(&a.intersection(&b)), [3, 4]);
    assert_eq!(sorted(&a.subtracting(&b)), [1, 2]);
    assert!(!a.is_subset_of(&b));
}

#[test]
fn copies_are_independent_values() {
    let a: NativeSet<i32> = [1, 2, 3].into_iter().collect();
    let mut b = a.clone();
    assert!(a.shares_storage_with(&b));

    b.remove(&1);

    assert!(a.contains(&1));
    assert!(!b.contains(&1));
    assert!(!a.shares_storage_with(&b));
    assert_eq!(a.len(), 3);
    assert_eq!(b.len(), 2);
}

#[test]
fn index_walk_visits_every_element() {
    let set: NativeSet<u32> = (0..100).collect();

    let mut seen = Vec::new();
    let mut index = set.start_index();
    while index != set.end_index() {
        seen.push(*set.element_at(index));
        index = set.index_after(index);
    }
    seen.sort_unstable();

    assert_eq!(seen, (0..100).collect::<Vec<_>>());
}

#[test]
#[should_panic(expected = "invalid index")]
fn index_from_before_insertion_is_rejected() {
    let mut set: NativeSet<u32> = (0..10).collect();
    let index = set.start_index();
    set.insert(100);
    let _ = set.element_at(index);
}

#[test]
#[should_panic(expected = "invalid index")]
fn index_from_before_remove_all_is_rejected() {
    let mut set: NativeSet<u32> = (0..10).collect();
    let index = set.index_of(&5).unwrap();
    set.remove_all(false);
    set.extend(0..10);
    let _ = set.element_at(index);
}

#[test]
fn native_variant_round_trip() {
    let mut variant: SetVariant<String> = SetVariant::from(NativeSet::new());
    assert!(variant.is_native());
    assert!(variant.insert("left".to_string()));
    assert!(!variant.insert("left".to_string()));
    assert!(variant.contains(&"left".to_string()));

    let native = variant.into_native();
    assert_eq!(native.len(), 1);
}
