//! Trie nodes.
//!
//! A child slot of an indirect node holds nothing, the head of an entry chain,
//! or a nested indirect node. Keys and values of a published entry are never
//! touched again: a new value means a new entry, and the old one is retired.
//! The only things that change after publication are atomic links (a child
//! slot, or an entry's overflow link), and only while the indirect node that
//! owns them is locked.

use core::borrow::Borrow;
use core::ptr;
use core::sync::atomic::{AtomicBool, Ordering};
use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use parking_lot::Mutex;
use portable_atomic::AtomicI64;

/// log2 of the fan-out of an indirect node.
pub(crate) const CHILDREN_LOG2: u32 = 4;

/// Fan-out of an indirect node.
pub(crate) const CHILDREN: usize = 1 << CHILDREN_LOG2;

const CHILDREN_MASK: u64 = (CHILDREN as u64) - 1;

/// Width of the hash consumed by the trie.
pub(crate) const HASH_BITS: u32 = u64::BITS;

/// Index of the child selected by `hash` on the level that consumes the bits
/// starting at `shift`.
#[inline(always)]
pub(crate) fn child_index(hash: u64, shift: u32) -> usize {
    ((hash >> shift) & CHILDREN_MASK) as usize
}

pub(crate) enum Node<K, V> {
    Entry(Entry<K, V>),
    Indirect(Indirect<K, V>),
}

impl<K, V> Node<K, V> {
    /// Entry stored in this node. Only valid where the trie guarantees an
    /// entry: overflow links, and slots checked under their node's lock.
    #[inline]
    pub(crate) fn expect_entry(&self) -> &Entry<K, V> {
        match self {
            Node::Entry(entry) => entry,
            Node::Indirect(_) => unreachable!("indirect node found where an entry was expected"),
        }
    }

    /// Indirect node stored in this node, for freshly built nodes.
    #[inline]
    pub(crate) fn expect_indirect(&self) -> &Indirect<K, V> {
        match self {
            Node::Indirect(indirect) => indirect,
            Node::Entry(_) => unreachable!("entry found where an indirect node was expected"),
        }
    }
}

/// A key/value pair plus the link to further entries with the same full hash.
pub(crate) struct Entry<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
    /// Null or a `Node::Entry`.
    pub(crate) overflow: Atomic<Node<K, V>>,
}

impl<K, V> Entry<K, V> {
    pub(crate) fn new(key: K, value: V, overflow: Shared<'_, Node<K, V>>) -> Self {
        Self {
            key,
            value,
            overflow: Atomic::from(overflow),
        }
    }

    /// Next entry of the chain.
    #[inline]
    pub(crate) fn next<'g>(&self, guard: &'g Guard) -> Option<&'g Entry<K, V>> {
        let next = self.overflow.load(Ordering::Acquire, guard);
        // SAFETY: overflow links are null or point to published entries, and
        // `guard` keeps them from being reclaimed.
        unsafe { next.as_ref() }.map(Node::expect_entry)
    }

    /// Searches the chain starting at `self` for `key` with a value accepted
    /// by `accept`. Lock-free.
    pub(crate) fn find<'g, Q>(
        &'g self,
        key: &Q,
        mut accept: impl FnMut(&V) -> bool,
        guard: &'g Guard,
    ) -> Option<&'g Entry<K, V>>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let mut current = Some(self);
        while let Some(entry) = current {
            if entry.key.borrow() == key && accept(&entry.value) {
                return Some(entry);
            }
            current = entry.next(guard);
        }
        None
    }
}

/// A matching entry together with the link that points at it.
///
/// `link` is either the child slot itself or the overflow link of the
/// previous entry, so replacing or unlinking the entry is one store into
/// `link` regardless of its position in the chain.
pub(crate) struct Found<'g, K, V> {
    pub(crate) link: &'g Atomic<Node<K, V>>,
    pub(crate) node: Shared<'g, Node<K, V>>,
    pub(crate) entry: &'g Entry<K, V>,
}

/// Searches the chain hanging off `slot` for `key` with a value accepted by
/// `accept`.
///
/// The indirect node owning `slot` must be locked by the caller, and `slot`
/// must have been checked not to hold an indirect node under that lock.
pub(crate) fn find_in_chain<'g, K, V, Q>(
    slot: &'g Atomic<Node<K, V>>,
    key: &Q,
    mut accept: impl FnMut(&V) -> bool,
    guard: &'g Guard,
) -> Option<Found<'g, K, V>>
where
    K: Borrow<Q>,
    Q: Eq + ?Sized,
{
    let mut link = slot;
    loop {
        let node = link.load(Ordering::Acquire, guard);
        // SAFETY: `guard` protects every node reachable from a live slot.
        let entry = unsafe { node.as_ref() }?.expect_entry();
        if entry.key.borrow() == key && accept(&entry.value) {
            return Some(Found { link, node, entry });
        }
        link = &entry.overflow;
    }
}

pub(crate) struct Indirect<K, V> {
    /// Serializes changes to `children`.
    pub(crate) lock: Mutex<()>,
    /// Set, under both this node's and its parent's lock, once the node has
    /// been unlinked. Writers that locked a dead node start over.
    pub(crate) dead: AtomicBool,
    parent: *const Indirect<K, V>,
    pub(crate) children: [Atomic<Node<K, V>>; CHILDREN],
}

// SAFETY: `parent` is a non-owning link inside the same trie and is only
// followed while an epoch guard keeps the parent alive. Keys and values may be
// read from and dropped on any thread.
unsafe impl<K: Send + Sync, V: Send + Sync> Send for Indirect<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for Indirect<K, V> {}

impl<K, V> Indirect<K, V> {
    pub(crate) fn new(parent: *const Indirect<K, V>) -> Self {
        Self {
            lock: Mutex::new(()),
            dead: AtomicBool::new(false),
            parent,
            children: core::array::from_fn(|_| Atomic::null()),
        }
    }

    /// Empty root node.
    pub(crate) fn root() -> Self {
        Self::new(ptr::null())
    }

    /// Parent node, `None` for the root.
    #[inline]
    pub(crate) fn parent(&self) -> Option<&Indirect<K, V>> {
        // SAFETY: a node is unlinked from its parent before the parent can
        // become empty and be retired, so whoever can still see `self` under
        // a guard can also see its parent.
        unsafe { self.parent.as_ref() }
    }

    pub(crate) fn is_empty(&self, guard: &Guard) -> bool {
        self.children
            .iter()
            .all(|child| child.load(Ordering::Acquire, guard).is_null())
    }

    /// Calls `f` for every entry below this node, depth first. Returns `false`
    /// as soon as `f` does.
    pub(crate) fn visit<F>(&self, f: &mut F, guard: &Guard) -> bool
    where
        F: FnMut(&K, &V) -> bool,
    {
        for child in &self.children {
            let node = child.load(Ordering::Acquire, guard);
            // SAFETY: protected by `guard`.
            match unsafe { node.as_ref() } {
                None => {}
                Some(Node::Indirect(indirect)) => {
                    if !indirect.visit(f, guard) {
                        return false;
                    }
                }
                Some(Node::Entry(head)) => {
                    let mut current = Some(head);
                    while let Some(entry) = current {
                        if !f(&entry.key, &entry.value) {
                            return false;
                        }
                        current = entry.next(guard);
                    }
                }
            }
        }
        true
    }

    /// Fills every slot with empty indirect nodes, `levels` deep. Only for
    /// nodes that have not been published yet.
    pub(crate) fn grow(&self, levels: u32) {
        if levels == 0 {
            return;
        }
        for child in &self.children {
            let node = Owned::new(Node::Indirect(Indirect::new(self)));
            node.expect_indirect().grow(levels - 1);
            child.store(node, Ordering::Relaxed);
        }
    }

    /// Number of indirect nodes in this subtree, this one included.
    #[cfg(test)]
    pub(crate) fn indirect_count(&self, guard: &Guard) -> usize {
        1 + self
            .children
            .iter()
            .map(|child| {
                // SAFETY: protected by `guard`.
                match unsafe { child.load(Ordering::Acquire, guard).as_ref() } {
                    Some(Node::Indirect(indirect)) => indirect.indirect_count(guard),
                    _ => 0,
                }
            })
            .sum::<usize>()
    }

    /// Length of the longest path of indirect nodes, this one included.
    #[cfg(test)]
    pub(crate) fn depth(&self, guard: &Guard) -> usize {
        1 + self
            .children
            .iter()
            .map(|child| {
                // SAFETY: protected by `guard`.
                match unsafe { child.load(Ordering::Acquire, guard).as_ref() } {
                    Some(Node::Indirect(indirect)) => indirect.depth(guard),
                    _ => 0,
                }
            })
            .max()
            .unwrap_or(0)
    }
}

/// One generation of the map: a root node plus the number of entries below
/// it. `clear` replaces the whole generation, so writers still finishing on
/// a detached root only ever count against that root.
pub(crate) struct Trie<K, V> {
    pub(crate) root: Indirect<K, V>,
    /// Best-effort entry count. May dip below zero transiently.
    pub(crate) count: AtomicI64,
}

impl<K, V> Trie<K, V> {
    /// Empty trie with `levels` levels of indirect nodes pre-built below the
    /// root.
    pub(crate) fn new(levels: u32) -> Owned<Self> {
        let trie = Owned::new(Self {
            root: Indirect::root(),
            count: AtomicI64::new(0),
        });
        // Children link to the root, so it must already sit at its final
        // address.
        trie.root.grow(levels);
        trie
    }

    /// Entry count, clamped at zero.
    pub(crate) fn len(&self) -> usize {
        usize::try_from(self.count.load(Ordering::Relaxed)).unwrap_or(0)
    }
}

/// Frees `trie` and every node reachable from it.
///
/// # Safety
///
/// No other thread may be able to reach any node of the subtree, and none of
/// its reachable nodes may have been retired separately.
pub(crate) unsafe fn destroy_trie<K, V>(trie: Shared<'_, Trie<K, V>>) {
    if trie.is_null() {
        return;
    }
    // SAFETY: exclusive access per the function contract.
    let guard = unsafe { epoch::unprotected() };
    let trie = unsafe { trie.into_owned() };

    // Explicit stack: both trie depth and overflow chains can be long.
    let mut pending: Vec<Shared<'_, Node<K, V>>> = trie
        .root
        .children
        .iter()
        .map(|child| child.load(Ordering::Relaxed, guard))
        .collect();
    while let Some(node) = pending.pop() {
        if node.is_null() {
            continue;
        }
        // SAFETY: every reachable node is owned by exactly one link.
        let node = unsafe { node.into_owned() };
        match &*node {
            Node::Indirect(indirect) => pending.extend(
                indirect
                    .children
                    .iter()
                    .map(|child| child.load(Ordering::Relaxed, guard)),
            ),
            Node::Entry(entry) => pending.push(entry.overflow.load(Ordering::Relaxed, guard)),
        }
    }
}
