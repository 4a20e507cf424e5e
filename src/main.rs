//! Concurrent benchmark driver.
//!
//! Inserts `num_data` shuffled keys from `num_threads` threads, then reads
//! them all back concurrently, reporting throughput and tree height.
//!
//! Run with:
//! ```bash
//! cargo run --release -- 1000000 8
//! ```

use std::env;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use blink_tree::BLinkTree;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// SplitMix64 step; deterministic, no external PRNG needed.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z: u64 = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Keys `1..=n` in a deterministic shuffled order.
fn shuffled_keys(n: usize, seed: u64) -> Vec<u64> {
    let mut keys: Vec<u64> = (1..=n as u64).collect();
    let mut state: u64 = seed;

    for i in (1..keys.len()).rev() {
        let j: usize = (splitmix64(&mut state) % (i as u64 + 1)) as usize;
        keys.swap(i, j);
    }
    keys
}

fn concurrent_insert(tree: &Arc<BLinkTree<u64>>, keys: &Arc<Vec<u64>>, num_threads: usize) {
    let chunk: usize = keys.len() / num_threads;

    println!("Insertion start");
    let start = Instant::now();

    let handles: Vec<_> = (0..num_threads)
        .map(|tid| {
            let tree = Arc::clone(tree);
            let keys = Arc::clone(keys);
            thread::spawn(move || {
                let from: usize = chunk * tid;
                let to: usize = if tid + 1 == num_threads { keys.len() } else { chunk * (tid + 1) };
                for &key in &keys[from..to] {
                    tree.insert(key, key);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let elapsed = start.elapsed();
    println!("Insertion time: {:.3} sec", elapsed.as_secs_f64());
    println!(
        "throughput: {:.2} mops/sec",
        keys.len() as f64 / elapsed.as_secs_f64() / 1_000_000.0
    );
}

fn concurrent_search(tree: &Arc<BLinkTree<u64>>, keys: &Arc<Vec<u64>>, num_threads: usize) {
    let chunk: usize = keys.len() / num_threads;

    println!("Search start");
    let start = Instant::now();

    let handles: Vec<_> = (0..num_threads)
        .map(|tid| {
            let tree = Arc::clone(tree);
            let keys = Arc::clone(keys);
            thread::spawn(move || {
                let from: usize = chunk * tid;
                let to: usize = if tid + 1 == num_threads { keys.len() } else { chunk * (tid + 1) };
                let mut not_found: Vec<u64> = Vec::new();
                for &key in &keys[from..to] {
                    if tree.lookup(key) != key {
                        not_found.push(key);
                    }
                }
                not_found
            })
        })
        .collect();

    let mut missing: usize = 0;
    for handle in handles {
        for key in handle.join().unwrap() {
            println!("key {key} not found");
            missing += 1;
        }
    }

    let elapsed = start.elapsed();
    println!("Search time: {:.3} sec", elapsed.as_secs_f64());
    println!(
        "throughput: {:.2} mops/sec",
        keys.len() as f64 / elapsed.as_secs_f64() / 1_000_000.0
    );
    println!("Height of tree: {}", tree.height());

    if missing > 0 {
        eprintln!("{missing} keys missing");
        process::exit(1);
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <num_data> <num_threads>", args[0]);
        process::exit(1);
    }

    let num_data: usize = args[1].parse().expect("num_data must be an integer");
    let num_threads: usize = args[2].parse().expect("num_threads must be an integer");
    assert!(num_data > 0 && num_threads > 0);

    let keys: Arc<Vec<u64>> = Arc::new(shuffled_keys(num_data, 0x5eed));
    let tree: Arc<BLinkTree<u64>> = Arc::new(BLinkTree::new());

    concurrent_insert(&tree, &keys, num_threads);
    concurrent_search(&tree, &keys, num_threads);
}
