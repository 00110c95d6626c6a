//! Iterators over a [`HashTrieMap`](crate::HashTrieMap).

use crate::node::{CHILDREN, Entry, Indirect, Node, Trie};
use core::iter::FusedIterator;
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::Ordering;
use crossbeam_epoch::{self as epoch, Atomic, Guard};

/// Iterator over the entries of a `HashTrieMap`. Yields `(K, V)` clones.
///
/// Holds an epoch guard for its whole lifetime, so nodes it can still reach
/// are not reclaimed; keep iterators short-lived.
pub struct Iter<'a, K, V> {
    /// Indirect nodes being walked and the next child index of each.
    stack: Vec<(*const Indirect<K, V>, usize)>,
    /// Next entry of the chain being walked, or null.
    entry: *const Entry<K, V>,
    guard: Guard,
    _map: PhantomData<&'a (K, V)>,
}

impl<'a, K, V> Iter<'a, K, V> {
    pub(crate) fn new(trie: &'a Atomic<Trie<K, V>>) -> Self {
        let guard = epoch::pin();
        // SAFETY: the trie is never null and stays alive while `guard` is
        // pinned.
        let trie = unsafe { trie.load(Ordering::Acquire, &guard).deref() };
        let root = ptr::from_ref(&trie.root);
        Self {
            stack: vec![(root, 0)],
            entry: ptr::null(),
            guard,
            _map: PhantomData,
        }
    }
}

impl<K, V> Iterator for Iter<'_, K, V>
where
    K: Clone,
    V: Clone,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            // SAFETY: every pointer held by the iterator was loaded under
            // `self.guard`, which is still pinned.
            if let Some(entry) = unsafe { self.entry.as_ref() } {
                self.entry = entry.next(&self.guard).map_or(ptr::null(), ptr::from_ref);
                return Some((entry.key.clone(), entry.value.clone()));
            }

            let (indirect, index) = self.stack.last_mut()?;
            if *index == CHILDREN {
                self.stack.pop();
                continue;
            }
            // SAFETY: as above.
            let indirect = unsafe { &**indirect };
            let child = indirect.children[*index].load(Ordering::Acquire, &self.guard);
            *index += 1;

            // SAFETY: as above.
            match unsafe { child.as_ref() } {
                None => {}
                Some(Node::Entry(entry)) => self.entry = ptr::from_ref(entry),
                Some(Node::Indirect(next)) => self.stack.push((ptr::from_ref(next), 0)),
            }
        }
    }
}

impl<K: Clone, V: Clone> FusedIterator for Iter<'_, K, V> {}

/// Iterator over the keys of a `HashTrieMap`. Yields `K` clones.
pub struct Keys<'a, K, V> {
    iter: Iter<'a, K, V>,
}

impl<'a, K, V> Keys<'a, K, V> {
    pub(crate) fn new(iter: Iter<'a, K, V>) -> Self {
        Self { iter }
    }
}

impl<K: Clone, V: Clone> Iterator for Keys<'_, K, V> {
    type Item = K;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next().map(|(k, _)| k)
    }
}

impl<K: Clone, V: Clone> FusedIterator for Keys<'_, K, V> {}

/// Iterator over the values of a `HashTrieMap`. Yields `V` clones.
pub struct Values<'a, K, V> {
    iter: Iter<'a, K, V>,
}

impl<'a, K, V> Values<'a, K, V> {
    pub(crate) fn new(iter: Iter<'a, K, V>) -> Self {
        Self { iter }
    }
}

impl<K: Clone, V: Clone> Iterator for Values<'_, K, V> {
    type Item = V;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next().map(|(_, v)| v)
    }
}

impl<K: Clone, V: Clone> FusedIterator for Values<'_, K, V> {}
