use clap::Parser;
use cow_hashset::NativeSet;

#[derive(Parser, Debug)]
struct Args {
    #[arg(short = 'c', long = "target_capacity", default_value_t = 1000)]
    target_capacity: usize,

    /// Fraction of the elements to remove from a copy after filling.
    #[arg(short = 'r', long = "remove_fraction", default_value_t = 0.5)]
    remove_fraction: f64,
}

fn main() {
    let args = Args::parse();

    println!(
        "Creating NativeSet with target capacity: {}",
        args.target_capacity
    );

    let mut set: NativeSet<u64> = NativeSet::with_capacity(args.target_capacity);

    println!("Actual capacity: {}", set.capacity());
    println!("Filling set with u64 values...");

    let capacity = set.capacity();
    // Stay at the load limit so the fill does not trigger a resize.
    let num_values = capacity - capacity / 4;
    for i in 0..num_values {
        let value = i as u64;
        if !set.insert(value) {
            panic!("Value already exists in set: {}", value);
        }
    }

    println!("Inserted {} values into set", set.len());
    println!(
        "Final load factor: {:.2}%",
        (set.len() as f64 / set.capacity() as f64) * 100.0
    );

    set.probe_histogram().print();
    set.debug_stats().print();

    let mut copy = set.clone();
    let to_remove = (num_values as f64 * args.remove_fraction.clamp(0.0, 1.0)) as u64;
    for value in 0..to_remove {
        copy.remove(&value);
    }

    println!();
    println!(
        "Removed {} values from a copy (storage shared with original: {})",
        to_remove,
        copy.shares_storage_with(&set)
    );
    copy.probe_histogram().print();
    copy.debug_stats().print();
}
