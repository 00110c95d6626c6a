//! Concurrent hash-trie map.
//!
//! # Architecture
//! - **Trie**: indirect nodes with 16 child slots, indexed by successive
//!   4-bit groups of the key's 64-bit hash, most significant bits first.
//! - **Entries**: immutable key/value nodes. Keys whose full hashes collide
//!   share a slot through the entry's overflow link.
//! - **Reads**: lock-free walk under a `crossbeam-epoch` guard.
//! - **Writes**: lock only the indirect node owning the target slot,
//!   re-validate, publish a replacement with one release store, and retire
//!   whatever was replaced.
//! - **Growth**: an insert landing on an entry with a different hash replaces
//!   the slot with as many new indirect nodes as the two hashes share 4-bit
//!   groups. Deletes prune indirect nodes that become empty.

use crate::DefaultHashBuilder;
use crate::error::OccupiedError;
use crate::iter::{Iter, Keys, Values};
use crate::node::{
    self, CHILDREN, CHILDREN_LOG2, Entry, Found, HASH_BITS, Indirect, Node, Trie, child_index,
};
use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::ptr;
use core::sync::atomic::Ordering;
use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use log::{debug, trace};
use parking_lot::MutexGuard;

/// Most trie levels pre-built below the root for a capacity hint.
const MAX_PRESIZE_LEVELS: u32 = 3;

/// Concurrent hash-trie map.
///
/// Lookups never block and take no locks. Writers lock a single trie node,
/// so writers on different branches proceed in parallel. Values are handed
/// out as clones.
///
/// # Type Parameters
///
/// - `K`: Key type (must implement `Hash`, `Eq`, `Clone` and `Send`)
/// - `V`: Value type (must implement `Clone` and `Send`)
/// - `S`: Hash builder, [`DefaultHashBuilder`] unless given
///
/// Replaced and deleted entries are dropped by whichever thread next collects
/// epoch garbage, so keys and values must be `Send` even when the map never
/// leaves its thread:
///
/// ```compile_fail
/// use hashtrie_map::HashTrieMap;
/// use std::rc::Rc;
///
/// let map = HashTrieMap::new();
/// map.store(1, Rc::new(()));
/// ```
///
/// # Examples
///
/// ```
/// use hashtrie_map::HashTrieMap;
///
/// let map = HashTrieMap::new();
/// map.store("a", 1);
/// map.store("b", 2);
///
/// assert_eq!(map.load("a"), Some(1));
/// assert_eq!(map.load_and_delete("a"), Some(1));
/// assert_eq!(map.load("a"), None);
/// assert_eq!(map.len(), 1);
/// ```
pub struct HashTrieMap<K, V, S = DefaultHashBuilder> {
    trie: Atomic<Trie<K, V>>,
    hasher: S,
}

/// Where a walk from the root stopped: the first slot not holding an
/// indirect node.
struct Descent<'g, K, V> {
    trie: &'g Trie<K, V>,
    indirect: &'g Indirect<K, V>,
    slot: &'g Atomic<Node<K, V>>,
    node: Shared<'g, Node<K, V>>,
    shift: u32,
}

impl<'g, K, V> Descent<'g, K, V> {
    /// Head of the entry chain the walk ended on.
    #[inline]
    fn head(&self) -> Option<&'g Entry<K, V>> {
        // SAFETY: `node` was loaded under the guard that bounds `'g`, and a
        // walk only stops on null or an entry.
        unsafe { self.node.as_ref() }.map(Node::expect_entry)
    }

    /// Locks the owning node and checks the slot can still be written
    /// through it. `None` means the trie changed under us and the walk must
    /// start over.
    fn lock(self, guard: &'g Guard) -> Option<Locked<'g, K, V>> {
        let lock = self.indirect.lock.lock();
        let node = self.slot.load(Ordering::Acquire, guard);
        // SAFETY: protected by `guard`.
        let grown = matches!(unsafe { node.as_ref() }, Some(Node::Indirect(_)));
        if grown || self.indirect.dead.load(Ordering::Acquire) {
            return None;
        }
        Some(Locked {
            trie: self.trie,
            indirect: self.indirect,
            lock,
            slot: self.slot,
            shift: self.shift,
        })
    }
}

/// A slot whose owning indirect node is locked and live. The slot holds null
/// or an entry chain for as long as this value exists.
struct Locked<'g, K, V> {
    trie: &'g Trie<K, V>,
    indirect: &'g Indirect<K, V>,
    lock: MutexGuard<'g, ()>,
    slot: &'g Atomic<Node<K, V>>,
    shift: u32,
}

/// Number of levels to pre-build below the root for `capacity` entries.
fn presize_levels(capacity: usize) -> u32 {
    let mut levels = 0;
    let mut reach = CHILDREN * CHILDREN;
    while levels < MAX_PRESIZE_LEVELS && capacity >= reach {
        levels += 1;
        reach = reach.saturating_mul(CHILDREN);
    }
    levels
}

impl<K, V> HashTrieMap<K, V, DefaultHashBuilder>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Creates an empty map with the default hasher.
    ///
    /// # Examples
    ///
    /// ```
    /// use hashtrie_map::HashTrieMap;
    ///
    /// let map: HashTrieMap<i32, String> = HashTrieMap::new();
    /// assert!(map.is_empty());
    /// ```
    pub fn new() -> Self {
        Self::with_hasher(DefaultHashBuilder::default())
    }

    /// Creates an empty map sized for roughly `capacity` entries.
    ///
    /// The hint pre-builds the upper trie levels, so the first inserts skip
    /// expansion work. It is not a limit.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, DefaultHashBuilder::default())
    }
}

impl<K, V, S> HashTrieMap<K, V, S>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
    S: BuildHasher,
{
    /// Creates an empty map that hashes keys with `hasher`.
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_capacity_and_hasher(0, hasher)
    }

    /// Creates an empty map sized for roughly `capacity` entries that hashes
    /// keys with `hasher`.
    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        let levels = presize_levels(capacity);
        if levels > 0 {
            debug!("pre-building {levels} trie level(s) for capacity {capacity}");
        }

        Self {
            trie: Atomic::from(Trie::new(levels)),
            hasher,
        }
    }

    #[inline(always)]
    fn hash<Q>(&self, key: &Q) -> u64
    where
        Q: Hash + ?Sized,
    {
        self.hasher.hash_one(key)
    }


    /// Walks from the root to the first slot that does not hold an indirect
    /// node. Lock-free.
    fn descend<'g>(&self, hash: u64, guard: &'g Guard) -> Descent<'g, K, V> {
        let trie = self.trie(guard);
        let mut indirect = &trie.root;
        let mut shift = HASH_BITS;
        loop {
            if shift == 0 {
                unreachable!("hash trie ran out of hash bits while descending");
            }
            shift -= CHILDREN_LOG2;

            let slot = &indirect.children[child_index(hash, shift)];
            let node = slot.load(Ordering::Acquire, guard);
            // SAFETY: protected by `guard`.
            match unsafe { node.as_ref() } {
                Some(Node::Indirect(next)) => indirect = next,
                _ => {
                    return Descent {
                        trie,
                        indirect,
                        slot,
                        node,
                        shift,
                    };
                }
            }
        }
    }

    /// Locks the slot `hash` belongs to, retrying until the lock is taken on
    /// a live node.
    fn lock_slot<'g>(&self, hash: u64, guard: &'g Guard) -> Locked<'g, K, V> {
        loop {
            if let Some(locked) = self.descend(hash, guard).lock(guard) {
                return locked;
            }
        }
    }

    /// Locks the slot holding `key` with a value accepted by `accept`.
    /// Returns `None` without locking anything if no such entry is visible.
    fn lock_matching<'g, Q>(
        &self,
        key: &Q,
        hash: u64,
        mut accept: impl FnMut(&V) -> bool,
        guard: &'g Guard,
    ) -> Option<Locked<'g, K, V>>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        loop {
            let descent = self.descend(hash, guard);
            descent.head()?.find(key, &mut accept, guard)?;
            if let Some(locked) = descent.lock(guard) {
                return Some(locked);
            }
        }
    }

    /// Publishes a new entry into a locked slot known not to contain `key`.
    fn insert_locked<'g>(
        &self,
        locked: &Locked<'g, K, V>,
        hash: u64,
        key: K,
        value: V,
        guard: &'g Guard,
    ) {
        let current = locked.slot.load(Ordering::Acquire, guard);
        let node = if current.is_null() {
            Owned::new(Node::Entry(Entry::new(key, value, Shared::null())))
        } else {
            // SAFETY: protected by `guard`; a locked slot holds null or an entry.
            let head = unsafe { current.deref() }.expect_entry();
            self.expand(current, head, hash, key, value, locked.shift, locked.indirect)
        };
        locked.slot.store(node, Ordering::Release);
        locked.trie.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Builds the replacement for a slot at `shift` that holds the chain
    /// `current` (whose head is `head`) so that it also holds `key`.
    ///
    /// Nothing is published here. The existing chain is moved, not copied:
    /// readers see it at its old place until the caller stores the result.
    #[allow(clippy::too_many_arguments)]
    fn expand(
        &self,
        current: Shared<'_, Node<K, V>>,
        head: &Entry<K, V>,
        hash: u64,
        key: K,
        value: V,
        mut shift: u32,
        parent: &Indirect<K, V>,
    ) -> Owned<Node<K, V>> {
        let current_hash = self.hash(&head.key);
        if current_hash == hash {
            trace!("full hash collision at shift {shift}, chaining entry");
            return Owned::new(Node::Entry(Entry::new(key, value, current)));
        }

        let fresh = Owned::new(Node::Entry(Entry::new(key, value, Shared::null())));
        let top = Owned::new(Node::Indirect(Indirect::new(parent)));
        let mut level = ptr::from_ref(top.expect_indirect());
        let mut levels = 1;
        loop {
            if shift == 0 {
                unreachable!("hash trie ran out of hash bits while expanding");
            }
            shift -= CHILDREN_LOG2;

            // SAFETY: `level` points into a node owned by `top`, which is not
            // published and outlives this loop.
            let indirect = unsafe { &*level };
            let current_idx = child_index(current_hash, shift);
            let fresh_idx = child_index(hash, shift);
            if current_idx != fresh_idx {
                indirect.children[current_idx].store(current, Ordering::Relaxed);
                indirect.children[fresh_idx].store(fresh, Ordering::Relaxed);
                break;
            }

            let next = Owned::new(Node::Indirect(Indirect::new(indirect)));
            level = ptr::from_ref(next.expect_indirect());
            indirect.children[current_idx].store(next, Ordering::Relaxed);
            levels += 1;
        }

        trace!("expanded slot into {levels} indirect level(s), split at shift {shift}");
        top
    }

    /// Publishes a copy of `found` carrying `value` in its place, and retires
    /// the old entry.
    fn replace_locked<'g>(found: Found<'g, K, V>, key: K, value: V, guard: &'g Guard) {
        let overflow = found.entry.overflow.load(Ordering::Acquire, guard);
        found.link.store(
            Owned::new(Node::Entry(Entry::new(key, value, overflow))),
            Ordering::Release,
        );
        // SAFETY: the entry was unlinked under the slot lock, and only the
        // unlinking thread retires it.
        unsafe { guard.defer_destroy(found.node) };
    }

    /// Unlinks `found` from its chain, retires it, and prunes indirect nodes
    /// left empty.
    fn remove_locked<'g>(
        &self,
        locked: Locked<'g, K, V>,
        found: Found<'g, K, V>,
        hash: u64,
        guard: &'g Guard,
    ) {
        let overflow = found.entry.overflow.load(Ordering::Acquire, guard);
        found.link.store(overflow, Ordering::Release);
        // SAFETY: as in `replace_locked`.
        unsafe { guard.defer_destroy(found.node) };
        locked.trie.count.fetch_sub(1, Ordering::Relaxed);

        if locked.slot.load(Ordering::Acquire, guard).is_null() {
            self.prune(locked, hash, guard);
        }
    }

    /// Removes empty indirect nodes from the locked one upwards. The root is
    /// never removed.
    ///
    /// Locks are taken child first, then parent, and writers only ever hold
    /// one, so this cannot deadlock.
    fn prune<'g>(&self, locked: Locked<'g, K, V>, hash: u64, guard: &'g Guard) {
        let Locked {
            mut indirect,
            mut lock,
            mut shift,
            ..
        } = locked;

        while let Some(parent) = indirect.parent() {
            if !indirect.is_empty(guard) {
                break;
            }
            shift += CHILDREN_LOG2;

            let parent_lock = parent.lock.lock();
            indirect.dead.store(true, Ordering::Release);
            let unlinked = parent.children[child_index(hash, shift)]
                .swap(Shared::null(), Ordering::AcqRel, guard);
            debug_assert!(!unlinked.is_null());
            // SAFETY: the node is dead and unlinked; later lockers give up on
            // it, and only this thread retires it.
            unsafe { guard.defer_destroy(unlinked) };
            trace!("pruned empty indirect node at shift {shift}");

            // Releases the child's lock.
            lock = parent_lock;
            indirect = parent;
        }
        drop(lock);
    }

    /// Deletes `key` if its value is accepted by `accept`, returning what
    /// `take` extracts from the deleted value.
    fn delete_where<Q, R>(
        &self,
        key: &Q,
        mut accept: impl FnMut(&V) -> bool,
        take: impl FnOnce(&V) -> R,
    ) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash(key);
        let guard = epoch::pin();

        let locked = self.lock_matching(key, hash, &mut accept, &guard)?;
        let found = node::find_in_chain(locked.slot, key, &mut accept, &guard)?;
        let taken = take(&found.entry.value);
        self.remove_locked(locked, found, hash, &guard);
        Some(taken)
    }

    /// Returns a clone of the value stored for `key`.
    ///
    /// Never blocks.
    pub fn load<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let guard = epoch::pin();
        let descent = self.descend(self.hash(key), &guard);
        let entry = descent.head()?.find(key, |_| true, &guard)?;
        Some(entry.value.clone())
    }

    /// Returns true if the map contains `key`.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let guard = epoch::pin();
        let descent = self.descend(self.hash(key), &guard);
        descent
            .head()
            .and_then(|head| head.find(key, |_| true, &guard))
            .is_some()
    }

    /// Sets the value for `key`, replacing any previous value.
    pub fn store(&self, key: K, value: V) {
        self.swap(key, value);
    }

    /// Sets the value for `key` and returns the previous value, if any.
    pub fn swap(&self, key: K, value: V) -> Option<V> {
        let hash = self.hash(&key);
        let guard = epoch::pin();

        let locked = self.lock_slot(hash, &guard);
        if let Some(found) = node::find_in_chain(locked.slot, &key, |_| true, &guard) {
            let previous = found.entry.value.clone();
            Self::replace_locked(found, key, value, &guard);
            return Some(previous);
        }
        self.insert_locked(&locked, hash, key, value, &guard);
        None
    }

    /// Returns the value stored for `key` if present; otherwise stores
    /// `value`. The flag is `true` when the value was loaded, `false` when it
    /// was stored.
    ///
    /// Of several callers racing to store the same absent key, exactly one
    /// stores and all others load its value.
    pub fn load_or_store(&self, key: K, value: V) -> (V, bool) {
        self.load_or_store_with(key, || value)
    }

    /// Like [`load_or_store`](Self::load_or_store), but builds the value only
    /// if the key is absent.
    ///
    /// `make` runs while the slot's node is locked, and that lock is not
    /// reentrant. `make` must not access this map: a write that lands on the
    /// same node deadlocks.
    pub fn load_or_store_with<F>(&self, key: K, make: F) -> (V, bool)
    where
        F: FnOnce() -> V,
    {
        let hash = self.hash(&key);
        let guard = epoch::pin();

        let descent = self.descend(hash, &guard);
        if let Some(entry) = descent.head().and_then(|head| head.find(&key, |_| true, &guard)) {
            return (entry.value.clone(), true);
        }

        let locked = self.lock_slot(hash, &guard);
        if let Some(found) = node::find_in_chain(locked.slot, &key, |_| true, &guard) {
            return (found.entry.value.clone(), true);
        }
        let value = make();
        self.insert_locked(&locked, hash, key, value.clone(), &guard);
        (value, false)
    }

    /// Stores `value` only if `key` is absent.
    ///
    /// # Errors
    ///
    /// Returns [`OccupiedError`] holding the key, the rejected value and the
    /// value already stored if `key` is present.
    pub fn try_insert(&self, key: K, value: V) -> Result<(), OccupiedError<K, V>> {
        let hash = self.hash(&key);
        let guard = epoch::pin();

        let locked = self.lock_slot(hash, &guard);
        if let Some(found) = node::find_in_chain(locked.slot, &key, |_| true, &guard) {
            return Err(OccupiedError {
                existing: found.entry.value.clone(),
                key,
                value,
            });
        }
        self.insert_locked(&locked, hash, key, value, &guard);
        Ok(())
    }

    /// Removes `key`, returning its value if it was present.
    pub fn load_and_delete<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.delete_where(key, |_| true, V::clone)
    }

    /// Removes `key`. Returns true if it was present.
    pub fn delete<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.delete_where(key, |_| true, |_| ()).is_some()
    }

    /// Replaces the value for `key` with `new` if it currently equals `old`.
    /// Returns true if the swap happened.
    pub fn compare_and_swap<Q>(&self, key: &Q, old: &V, new: V) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: PartialEq,
    {
        let hash = self.hash(key);
        let guard = epoch::pin();

        let Some(locked) = self.lock_matching(key, hash, |v| v == old, &guard) else {
            return false;
        };
        let Some(found) = node::find_in_chain(locked.slot, key, |v| v == old, &guard) else {
            return false;
        };
        let key = found.entry.key.clone();
        Self::replace_locked(found, key, new, &guard);
        drop(locked);
        true
    }

    /// Removes `key` if its value currently equals `old`. Returns true if the
    /// entry was removed.
    pub fn compare_and_delete<Q>(&self, key: &Q, old: &V) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: PartialEq,
    {
        self.delete_where(key, |v| v == old, |_| ()).is_some()
    }

    /// Removes every entry.
    ///
    /// The whole trie is swapped out at once. Readers and iterators already
    /// walking the old trie finish on it; it is freed once they are done.
    pub fn clear(&self) {
        let guard = epoch::pin();
        let old = self.trie.swap(Trie::new(0), Ordering::AcqRel, &guard);
        debug!("cleared hash trie map");

        let old = old.as_raw();
        // SAFETY: threads pinned after the swap cannot reach the old trie, and
        // the closure runs only after every earlier pin is released. Writers
        // that were still inside it have finished, so it is frozen.
        let destroy = move || unsafe { node::destroy_trie(Shared::from(old)) };
        unsafe { guard.defer_unchecked(destroy) };
    }

    #[cfg(test)]
    pub(crate) fn indirect_count(&self) -> usize {
        let guard = epoch::pin();
        self.trie(&guard).root.indirect_count(&guard)
    }

    #[cfg(test)]
    pub(crate) fn depth(&self) -> usize {
        let guard = epoch::pin();
        self.trie(&guard).root.depth(&guard)
    }
}

impl<K, V, S> HashTrieMap<K, V, S> {
    #[inline]
    fn trie<'g>(&self, guard: &'g Guard) -> &'g Trie<K, V> {
        // SAFETY: the trie is never null, and `clear` defers freeing a
        // replaced trie until every guard that could have loaded it is gone.
        unsafe { self.trie.load(Ordering::Acquire, guard).deref() }
    }

    /// Returns the number of entries.
    ///
    /// Exact when no writer runs concurrently, approximate otherwise.
    pub fn len(&self) -> usize {
        let guard = epoch::pin();
        self.trie(&guard).len()
    }

    /// Returns true if the map holds no entries. Approximate, like
    /// [`len`](Self::len).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls `f` for each entry until it returns `false`.
    ///
    /// Each key present for the whole call is visited exactly once. Entries
    /// stored or deleted concurrently may or may not be seen.
    pub fn range<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        let guard = epoch::pin();
        self.trie(&guard).root.visit(&mut f, &guard);
    }

    /// Returns an iterator over clones of the entries, with the consistency
    /// of [`range`](Self::range).
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter::new(&self.trie)
    }

    /// Returns an iterator over clones of the keys.
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys::new(self.iter())
    }

    /// Returns an iterator over clones of the values.
    pub fn values(&self) -> Values<'_, K, V> {
        Values::new(self.iter())
    }

    /// Returns a reference to the map's hash builder.
    pub fn hasher(&self) -> &S {
        &self.hasher
    }
}

impl<K, V> Default for HashTrieMap<K, V, DefaultHashBuilder>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> fmt::Debug for HashTrieMap<K, V, S>
where
    K: fmt::Debug + Clone,
    V: fmt::Debug + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a, K, V, S> IntoIterator for &'a HashTrieMap<K, V, S>
where
    K: Clone,
    V: Clone,
{
    type Item = (K, V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K, V, S> FromIterator<(K, V)> for HashTrieMap<K, V, S>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let map = Self::with_hasher(S::default());
        for (key, value) in iter {
            map.store(key, value);
        }
        map
    }
}

impl<K, V, S> Extend<(K, V)> for HashTrieMap<K, V, S>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.store(key, value);
        }
    }
}

impl<K, V, S> Extend<(K, V)> for &HashTrieMap<K, V, S>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.store(key, value);
        }
    }
}

impl<K, V, S> Drop for HashTrieMap<K, V, S> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` rules out concurrent access, and every node
        // still reachable from the root is owned by the trie alone.
        unsafe {
            let trie = self.trie.load(Ordering::Relaxed, epoch::unprotected());
            node::destroy_trie(trie);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{BuildHasherDefault, Hasher};

    /// Keeps only the low four bits, so every key lands in slot 0 until the
    /// deepest level.
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

    #[derive(Default)]
    struct ZeroHasher;

    impl Hasher for ZeroHasher {
        fn finish(&self) -> u64 {
            0
        }

        fn write(&mut self, _bytes: &[u8]) {}
    }

    type LowNibbleState = BuildHasherDefault<LowNibbleHasher>;
    type ZeroState = BuildHasherDefault<ZeroHasher>;

    /// Two keys whose truncated hashes differ.
    fn distinct_pair(map: &HashTrieMap<u32, u32, LowNibbleState>) -> (u32, u32) {
        let first = 0;
        let second = (1..)
            .find(|k| map.hash(k) != map.hash(&first))
            .unwrap();
        (first, second)
    }

    #[test]
    fn test_presize_levels() {
        assert_eq!(presize_levels(0), 0);
        assert_eq!(presize_levels(255), 0);
        assert_eq!(presize_levels(256), 1);
        assert_eq!(presize_levels(4096), 2);
        assert_eq!(presize_levels(65_536), 3);
        assert_eq!(presize_levels(usize::MAX), MAX_PRESIZE_LEVELS);
    }

    #[test]
    fn test_with_capacity_prebuilds_levels() {
        let map: HashTrieMap<u32, u32> = HashTrieMap::with_capacity(4096);
        assert_eq!(map.indirect_count(), 1 + 16 + 256);
        assert_eq!(map.depth(), 3);

        for i in 0..4096 {
            map.store(i, i);
        }
        for i in 0..4096 {
            assert_eq!(map.load(&i), Some(i));
        }
    }

    #[test]
    fn test_expand_splits_at_last_level() {
        let map = HashTrieMap::with_hasher(LowNibbleState::default());
        let (a, b) = distinct_pair(&map);

        map.store(a, 1);
        assert_eq!(map.indirect_count(), 1);
        map.store(b, 2);

        // Root plus one node for every level below it.
        assert_eq!(map.indirect_count(), 16);
        assert_eq!(map.depth(), 16);
        assert_eq!(map.load(&a), Some(1));
        assert_eq!(map.load(&b), Some(2));
    }

    #[test]
    fn test_delete_prunes_to_root() {
        let map = HashTrieMap::with_hasher(LowNibbleState::default());
        let (a, b) = distinct_pair(&map);
        map.store(a, 1);
        map.store(b, 2);

        assert!(map.delete(&a));
        // `b` still hangs at the bottom of the chain of indirect nodes.
        assert_eq!(map.indirect_count(), 16);
        assert!(map.delete(&b));
        assert_eq!(map.indirect_count(), 1);
        assert!(map.is_empty());
    }

    #[test]
    fn test_delete_all_prunes_random_trie() {
        let map = HashTrieMap::new();
        for i in 0..2000u64 {
            map.store(i, i);
        }
        assert!(map.indirect_count() > 1);

        for i in 0..2000u64 {
            assert_eq!(map.load_and_delete(&i), Some(i));
        }
        assert_eq!(map.indirect_count(), 1);
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn test_full_collisions_chain_at_root() {
        let map = HashTrieMap::with_hasher(ZeroState::default());
        for i in 0..100u32 {
            map.store(i, i * 2);
        }
        assert_eq!(map.indirect_count(), 1);
        for i in 0..100u32 {
            assert_eq!(map.load(&i), Some(i * 2));
        }

        // Delete from the middle, the head and the tail of the chain.
        assert!(map.delete(&50));
        assert!(map.delete(&99));
        assert!(map.delete(&0));
        assert_eq!(map.load(&50), None);
        assert_eq!(map.load(&1), Some(2));
        assert_eq!(map.len(), 97);
    }

    #[test]
    fn test_writer_on_detached_trie_keeps_len_exact() {
        let map = HashTrieMap::new();
        map.store(1u32, 1u32);
        let hash = map.hash(&2u32);

        // A writer holding a slot of the old trie while `clear` runs finishes
        // there, and must not count against the new one.
        let guard = epoch::pin();
        let locked = map.lock_slot(hash, &guard);
        map.clear();
        map.insert_locked(&locked, hash, 2, 2, &guard);
        drop(locked);
        drop(guard);

        assert_eq!(map.len(), 0);
        assert_eq!(map.iter().count(), 0);

        map.store(3, 3);
        let guard = epoch::pin();
        let locked = map.lock_matching(&3, map.hash(&3u32), |_| true, &guard).unwrap();
        let found = node::find_in_chain(locked.slot, &3, |_| true, &guard).unwrap();
        map.clear();
        map.store(4, 4);
        map.remove_locked(locked, found, map.hash(&3u32), &guard);
        drop(guard);

        assert_eq!(map.len(), 1);
        assert_eq!(map.iter().collect::<Vec<_>>(), vec![(4, 4)]);
    }

    #[test]
    fn test_clear_replaces_root() {
        let map = HashTrieMap::with_capacity(256);
        for i in 0..1000 {
            map.store(i, i);
        }
        map.clear();
        assert_eq!(map.indirect_count(), 1);
        assert!(map.is_empty());
        assert_eq!(map.load(&1), None);

        map.store(1, 10);
        assert_eq!(map.load(&1), Some(10));
    }
}
