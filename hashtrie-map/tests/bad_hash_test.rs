//! Runs the same workloads under degenerate hash functions.

use hashtrie_map::HashTrieMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{BuildHasher, BuildHasherDefault, Hasher};
use std::sync::Arc;
use std::thread;

/// Every key hashes to zero, so all entries share one overflow chain.
#[derive(Default)]
struct ConstantHasher;

impl Hasher for ConstantHasher {
    fn finish(&self) -> u64 {
        0
    }

    fn write(&mut self, _bytes: &[u8]) {}
}

/// Keeps only the low four bits, so entries only separate on the deepest
/// trie level.
#[derive(Default)]
struct LowNibbleHasher(DefaultHasher);

impl Hasher for LowNibbleHasher {
    fn finish(&self) -> u64 {
        self.0.finish() & 0xF
    }

    fn write(&mut self, bytes: &[u8]) {
        self.0.write(bytes);
    }
}

type ConstantState = BuildHasherDefault<ConstantHasher>;
type LowNibbleState = BuildHasherDefault<LowNibbleHasher>;

fn check_basic<S: BuildHasher + Default>(n: u32) {
    let map: HashTrieMap<u32, u32, S> = HashTrieMap::with_hasher(S::default());
    for i in 0..n {
        assert_eq!(map.load_or_store(i, i * 2), (i * 2, false));
    }
    assert_eq!(map.len(), n as usize);
    for i in 0..n {
        assert_eq!(map.load(&i), Some(i * 2));
        assert_eq!(map.load_or_store(i, 0), (i * 2, true));
    }
    assert_eq!(map.load(&n), None);

    for i in (3..n).step_by(3) {
        assert!(map.compare_and_swap(&i, &(i * 2), i * 3));
        assert!(!map.compare_and_swap(&i, &(i * 2), i * 4));
    }
    for i in (0..n).step_by(2) {
        let expected = if i % 3 == 0 { i * 3 } else { i * 2 };
        assert!(!map.compare_and_delete(&i, &(expected + 1)));
        assert!(map.compare_and_delete(&i, &expected));
    }

    let mut visited = 0;
    map.range(|k, v| {
        assert_eq!(k % 2, 1);
        let expected = if k % 3 == 0 { k * 3 } else { k * 2 };
        assert_eq!(*v, expected);
        visited += 1;
        true
    });
    assert_eq!(visited, n / 2);
    assert_eq!(map.len(), (n / 2) as usize);

    for i in 0..n {
        map.delete(&i);
    }
    assert!(map.is_empty());
    assert_eq!(map.iter().count(), 0);
}

fn check_concurrent<S: BuildHasher + Default + Send + Sync + 'static>(per_thread: u32) {
    let map: Arc<HashTrieMap<u32, u32, S>> = Arc::new(HashTrieMap::with_hasher(S::default()));
    let threads = 4;
    let mut handles = vec![];

    for t in 0..threads {
        let m = map.clone();
        handles.push(thread::spawn(move || {
            let base = t * per_thread;
            for i in base..base + per_thread {
                m.store(i, i);
            }
            for i in (base..base + per_thread).step_by(2) {
                assert_eq!(m.load_and_delete(&i), Some(i));
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    for i in 0..threads * per_thread {
        let expected = (i % 2 == 1).then_some(i);
        assert_eq!(map.load(&i), expected);
    }
    assert_eq!(map.len(), (threads * per_thread / 2) as usize);
}

#[test]
fn test_default_hasher() {
    check_basic::<hashtrie_map::DefaultHashBuilder>(10_000);
}

#[test]
fn test_constant_hasher() {
    check_basic::<ConstantState>(10_000);
}

#[test]
fn test_low_nibble_hasher() {
    check_basic::<LowNibbleState>(10_000);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_concurrent_default_hasher() {
    check_concurrent::<hashtrie_map::DefaultHashBuilder>(5_000);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_concurrent_constant_hasher() {
    check_concurrent::<ConstantState>(500);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_concurrent_low_nibble_hasher() {
    check_concurrent::<LowNibbleState>(2_000);
}
