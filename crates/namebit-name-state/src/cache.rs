//! The tiered name cache.
//!
//! A [`NameCache`] is a delta, not a snapshot: it records pending updates
//! (`entries`), pending deletions (`deleted`), history rewrites and
//! expire-index flips relative to some base view. A reader sees the
//! effective mapping `(base \ deleted) ∪ entries`; the merged iterator
//! realizes that view in ascending name order.
//!
//! Caches layer: block connect builds its changes in a fresh cache and
//! applies them into the parent with [`NameCache::apply_to_cache`]; at
//! flush time the outermost cache turns into one atomic store batch and
//! into incremental UNO trie updates. A cache is discarded after it is
//! consumed.

use namebit_primitives::{ExpireEntry, Name, NameData, NameHistory};
use std::collections::btree_map;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use crate::trie::UnoTrie;

/// Ordered enumeration of name records.
///
/// Implementations yield names in strict ascending lexicographic order,
/// each at most once. `seek` repositions the cursor; a fresh iterator
/// starts at the beginning.
pub trait NameIterator {
    /// Reposition at the first name `>= start`.
    fn seek(&mut self, start: &[u8]);

    /// Return the next record, or `None` when the enumeration is done.
    fn next(&mut self) -> Option<(Name, NameData)>;
}

/// Buffered name mutations layered over a base view.
#[derive(Debug, Clone, Default)]
pub struct NameCache {
    /// Pending inserts and overwrites. Never overlaps `deleted`.
    pub(crate) entries: BTreeMap<Name, NameData>,
    /// Pending deletions (tombstones).
    pub(crate) deleted: BTreeSet<Name>,
    /// Pending history rewrites; an empty history erases the record.
    /// Touched only while history tracking is enabled.
    pub(crate) history: BTreeMap<Name, NameHistory>,
    /// Pending expire-index flips: `true` adds the entry, `false`
    /// removes it.
    pub(crate) expire_index: BTreeMap<ExpireEntry, bool>,
}

impl NameCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a pending update. Does not consult the base view.
    pub fn get(&self, name: &[u8]) -> Option<&NameData> {
        self.entries.get(name)
    }

    /// Whether `name` is tombstoned in this cache.
    pub fn is_deleted(&self, name: &[u8]) -> bool {
        self.deleted.contains(name)
    }

    /// Insert or overwrite a binding, clearing any tombstone for it.
    pub fn set(&mut self, name: &[u8], data: NameData) {
        self.deleted.remove(name);
        self.entries.insert(name.to_vec(), data);
    }

    /// Tombstone a binding, discarding any pending update for it.
    pub fn remove(&mut self, name: &[u8]) {
        self.entries.remove(name);
        self.deleted.insert(name.to_vec());
    }

    /// Look up a pending history rewrite.
    ///
    /// History tracking must be enabled; calling this without it is a
    /// programmer error and aborts.
    pub fn get_history(&self, name: &[u8]) -> Option<&NameHistory> {
        assert!(
            crate::name_history_enabled(),
            "name history lookup with history tracking disabled"
        );
        self.history.get(name)
    }

    /// Record a history rewrite; an empty history erases the stored
    /// record at flush time.
    ///
    /// History tracking must be enabled; calling this without it is a
    /// programmer error and aborts.
    pub fn set_history(&mut self, name: &[u8], history: NameHistory) {
        assert!(
            crate::name_history_enabled(),
            "name history update with history tracking disabled"
        );
        self.history.insert(name.to_vec(), history);
    }

    /// Fold this cache's expire-index flips for `height` into `names`:
    /// additions insert, removals erase.
    pub fn update_names_for_height(&self, height: u32, names: &mut BTreeSet<Name>) {
        let start = ExpireEntry::new(height, Name::new());
        for (entry, add) in self.expire_index.range(start..) {
            if entry.height > height {
                break;
            }
            if *add {
                names.insert(entry.name.clone());
            } else {
                names.remove(&entry.name);
            }
        }
    }

    /// Mark `(height, name)` for addition to the expire index.
    pub fn add_expire_index(&mut self, name: &[u8], height: u32) {
        self.expire_index
            .insert(ExpireEntry::new(height, name.to_vec()), true);
    }

    /// Mark `(height, name)` for removal from the expire index.
    pub fn remove_expire_index(&mut self, name: &[u8], height: u32) {
        self.expire_index
            .insert(ExpireEntry::new(height, name.to_vec()), false);
    }

    /// Enumerate the effective mapping of this cache over `base` in
    /// ascending name order. The returned iterator owns `base`.
    pub fn iterate_names<'a>(&'a self, base: Box<dyn NameIterator + 'a>) -> CacheNameIterator<'a> {
        CacheNameIterator::new(self, base)
    }

    /// Overlay this cache's deltas onto `cache`.
    ///
    /// Conflicts resolve through the target's own `set`/`remove`, so the
    /// result equals replaying the mutations there. Applying the same
    /// cache twice is idempotent.
    pub fn apply_to_cache(&self, cache: &mut NameCache) {
        for (name, data) in &self.entries {
            cache.set(name, data.clone());
        }
        for name in &self.deleted {
            cache.remove(name);
        }
        for (name, history) in &self.history {
            cache.set_history(name, history.clone());
        }
        for (entry, add) in &self.expire_index {
            cache.expire_index.insert(entry.clone(), *add);
        }
    }

    /// Replay this cache's updates and tombstones into a trie: all sets
    /// first, then all deletes. The two groups never address the same
    /// name, so the result is order-independent within each group.
    pub fn apply_to_trie(&self, trie: &mut UnoTrie, expanded: bool) {
        for (name, data) in &self.entries {
            trie.set(name, data.clone(), expanded);
        }
        for name in &self.deleted {
            // A tombstone may address a name the trie never contained.
            let _ = trie.delete(name, expanded);
        }
    }
}

/// Merged iterator over a cache and its base enumeration.
///
/// Yields `(base \ deleted) ∪ entries` in ascending order; on a name
/// present in both, the cache version wins and both cursors advance.
pub struct CacheNameIterator<'a> {
    cache: &'a NameCache,
    base: Box<dyn NameIterator + 'a>,
    /// Pre-fetched base record, already filtered against the tombstones.
    base_next: Option<(Name, NameData)>,
    cache_range: btree_map::Range<'a, Name, NameData>,
    cache_next: Option<(&'a Name, &'a NameData)>,
}

impl<'a> CacheNameIterator<'a> {
    fn new(cache: &'a NameCache, base: Box<dyn NameIterator + 'a>) -> Self {
        let mut iter = Self {
            cache,
            base,
            base_next: None,
            cache_range: cache.entries.range::<[u8], _>(..),
            cache_next: None,
        };
        iter.seek(&[]);
        iter
    }

    /// Pull the next base record, skipping tombstoned names.
    fn advance_base(&mut self) {
        self.base_next = loop {
            match self.base.next() {
                Some((name, data)) => {
                    if !self.cache.is_deleted(&name) {
                        break Some((name, data));
                    }
                }
                None => break None,
            }
        };
    }
}

impl NameIterator for CacheNameIterator<'_> {
    fn seek(&mut self, start: &[u8]) {
        self.cache_range = self
            .cache
            .entries
            .range::<[u8], _>((Bound::Included(start), Bound::Unbounded));
        self.cache_next = self.cache_range.next();
        self.base.seek(start);
        self.advance_base();
    }

    fn next(&mut self) -> Option<(Name, NameData)> {
        // On a name both sides know, the cache version wins; drop the
        // base record so the name comes out once.
        if let (Some((base_name, _)), Some((cache_name, _))) = (&self.base_next, &self.cache_next) {
            if base_name == *cache_name {
                self.advance_base();
            }
        }
        let use_base = match (&self.base_next, &self.cache_next) {
            (None, None) => return None,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some((base_name, _)), Some((cache_name, _))) => base_name < *cache_name,
        };
        if use_base {
            let record = self.base_next.take();
            self.advance_base();
            record
        } else {
            let record = self.cache_next.map(|(name, data)| (name.clone(), data.clone()));
            self.cache_next = self.cache_range.next();
            record
        }
    }
}
