//! Structural interning for hash-consed IR values.
//!
//! A [`Uniquer`] hands out dense `u32` ids for structurally distinct keys.
//! Interning the same key twice always yields the same id, from any thread.
//!
//! Interned keys never move or change. They live in append-only slots, so
//! [`Uniquer::resolve`] is a plain atomic load; only inserting a new key
//! takes the index lock.

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Slots in the first chunk; chunk `i` holds `FIRST_CHUNK << i` slots.
const FIRST_CHUNK: usize = 64;
/// Enough chunks to address every `u32` id.
const NUM_CHUNKS: usize = 27;

/// Append-only storage addressed by dense index. Chunks are allocated on
/// first use and never reallocated, so references into them stay valid for
/// the lifetime of the store.
struct Slots<K> {
    chunks: [OnceCell<Box<[OnceCell<K>]>>; NUM_CHUNKS],
}

impl<K> Slots<K> {
    fn new() -> Self {
        Self {
            chunks: std::array::from_fn(|_| OnceCell::new()),
        }
    }

    /// Chunk number and offset of slot `index`.
    fn locate(index: usize) -> (usize, usize) {
        let biased = index + FIRST_CHUNK;
        let chunk = (biased.ilog2() - FIRST_CHUNK.ilog2()) as usize;
        (chunk, biased - (FIRST_CHUNK << chunk))
    }

    fn get(&self, index: usize) -> Option<&K> {
        let (chunk, offset) = Self::locate(index);
        self.chunks.get(chunk)?.get()?.get(offset)?.get()
    }

    /// Fill slot `index`. Callers serialize writes and never fill a slot twice.
    fn set(&self, index: usize, key: K) {
        let (chunk, offset) = Self::locate(index);
        let slots = self.chunks[chunk].get_or_init(|| (0..FIRST_CHUNK << chunk).map(|_| OnceCell::new()).collect());
        if slots[offset].set(key).is_err() {
            unreachable!("uniquer slot {} filled twice", index);
        }
    }
}

/// Append-only uniquing arena.
pub struct Uniquer<K> {
    index: RwLock<FxHashMap<K, u32>>,
    items: Slots<K>,
    len: AtomicUsize,
}

impl<K> fmt::Debug for Uniquer<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Uniquer")
            .field("len", &self.len.load(Ordering::Acquire))
            .finish()
    }
}

impl<K: Clone + Eq + Hash> Default for Uniquer<K> {
    fn default() -> Self { Self::new() }
}

impl<K: Clone + Eq + Hash> Uniquer<K> {
    /// An empty uniquer.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// An empty uniquer whose index is sized for `capacity` keys.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut index = FxHashMap::default();
        index.reserve(capacity);
        Self {
            index: RwLock::new(index),
            items: Slots::new(),
            len: AtomicUsize::new(0),
        }
    }

    /// Look up `key`, inserting it if absent. The flag is true when the key
    /// was inserted by this call.
    pub fn intern(&self, key: K) -> (u32, bool) {
        if let Some(&id) = self.index.read().get(&key) {
            return (id, false);
        }
        // Another writer may have inserted the key since the read lock was
        // released; the entry lookup below re-checks under the write lock.
        let mut index = self.index.write();
        let next = index.len();
        match index.entry(key) {
            Entry::Occupied(slot) => (*slot.get(), false),
            Entry::Vacant(slot) => {
                let id = u32::try_from(next)
                    .unwrap_or_else(|_| panic!("uniquer overflow: more than {} entries", u32::MAX));
                // The slot is filled before the id becomes visible to anyone.
                self.items.set(next, slot.key().clone());
                slot.insert(id);
                self.len.store(next + 1, Ordering::Release);
                (id, true)
            }
        }
    }

    /// Id of `key` if it has already been interned.
    pub fn get(&self, key: &K) -> Option<u32> {
        self.index.read().get(key).copied()
    }

    /// The key behind an id handed out by this uniquer. Takes no lock.
    pub fn resolve(&self, id: u32) -> &K {
        match self.items.get(id as usize) {
            Some(key) => key,
            None => panic!("id {} was not handed out by this uniquer", id),
        }
    }

    /// Number of distinct keys interned so far.
    pub fn len(&self) -> usize { self.len.load(Ordering::Acquire) }

    /// True if nothing has been interned yet.
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}
