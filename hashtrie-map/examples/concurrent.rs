//! Concurrent operations on a shared `HashTrieMap`.
//!
//! Several threads store, load, swap and delete at once. Loads never block;
//! writers only contend when they touch the same trie node.
//!
//! Run with `RUST_LOG=debug` to see the map's own log output.

use hashtrie_map::HashTrieMap;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

fn main() {
    env_logger::init();
    println!("=== Concurrent Hash Trie Map Demo ===\n");

    let map = Arc::new(HashTrieMap::with_capacity(80_000));

    println!("Storing from 8 threads...");
    let start = Instant::now();
    let handles: Vec<_> = (0..8)
        .map(|thread_id| {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                for i in 0..10_000 {
                    let key = thread_id * 10_000 + i;
                    map.store(key, key * 2);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let duration = start.elapsed();
    println!(
        "Stored 80,000 entries in {:?} ({:.2} ops/sec)",
        duration,
        80_000.0 / duration.as_secs_f64()
    );
    println!("Map contains {} entries\n", map.len());

    println!("Loading from 8 threads...");
    let start = Instant::now();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let map = Arc::clone(&map);
            thread::spawn(move || (0..10_000).filter(|key| map.load(key).is_some()).count())
        })
        .collect();
    let found: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    let duration = start.elapsed();
    println!(
        "Performed 80,000 loads in {:?} ({:.2} ops/sec)",
        duration,
        80_000.0 / duration.as_secs_f64()
    );
    println!("Found {found} entries\n");

    println!("Mixed readers, writers and deleters...");
    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..4 {
        let map = Arc::clone(&map);
        handles.push(thread::spawn(move || {
            for key in 0..5_000 {
                let _ = map.load(&key);
            }
        }));
    }
    for thread_id in 0..2 {
        let map = Arc::clone(&map);
        handles.push(thread::spawn(move || {
            for i in 0..5_000 {
                let key = 80_000 + thread_id * 5_000 + i;
                map.load_or_store(key, key);
            }
        }));
    }
    for thread_id in 0..2 {
        let map = Arc::clone(&map);
        handles.push(thread::spawn(move || {
            for i in 0..2_500 {
                let key = thread_id * 2_500 + i;
                map.compare_and_delete(&key, &(key * 2));
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    println!("Mixed operations completed in {:?}", start.elapsed());
    println!("Map contains {} entries\n", map.len());

    println!("Incrementing a shared counter with compare_and_swap...");
    map.store(usize::MAX, 0);
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                for _ in 0..1_000 {
                    while let Some(current) = map.load(&usize::MAX) {
                        if map.compare_and_swap(&usize::MAX, &current, current + 1) {
                            break;
                        }
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    println!("Counter reached {:?}\n", map.load(&usize::MAX));

    let mut verified = 0;
    map.range(|key, value| {
        if *key < 80_000 && *value == key * 2 {
            verified += 1;
        }
        true
    });
    println!("Verified {verified} original entries");
    println!("\n=== Demo Complete ===");
}
