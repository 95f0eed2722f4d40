//! Derived Object Cache
//!
//! Deduplicates backend objects that are built from other objects, such as
//! frame buffers built from a set of attachments.
//!
//! ```text
//!   lookup:     K ─────────────▶ EntryKey
//!   entries:    EntryKey ──────▶ { key, value, sources }
//!   back_edges: ObjectId ──────▶ [EntryKey, ...]
//! ```
//!
//! Every entry records the identities it was built from. When one of them is
//! destroyed, [`DerivedCache::invalidate`] walks its back-edges and releases
//! each dependent entry exactly once, also unlinking it from the other
//! sources it was built from.

use std::hash::Hash;

use log::debug;
use rustc_hash::FxHashMap;
use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;

use crate::object::ObjectId;

new_key_type! {
    struct EntryKey;
}

struct Entry<K, V> {
    key: K,
    value: V,
    sources: SmallVec<[ObjectId; 4]>,
}

/// Cache of derived objects keyed by `K` with resource back-edges.
pub struct DerivedCache<K, V> {
    name: &'static str,
    entries: SlotMap<EntryKey, Entry<K, V>>,
    lookup: FxHashMap<K, EntryKey>,
    back_edges: FxHashMap<ObjectId, SmallVec<[EntryKey; 4]>>,
    builds: u64,
}

impl<K, V> DerivedCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: SlotMap::with_key(),
            lookup: FxHashMap::default(),
            back_edges: FxHashMap::default(),
            builds: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of successful builds since creation.
    #[inline]
    #[must_use]
    pub fn build_count(&self) -> u64 {
        self.builds
    }

    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.lookup.get(key).map(|&entry| &self.entries[entry].value)
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.lookup.contains_key(key)
    }

    /// Number of live entries built from `source`.
    #[must_use]
    pub fn dependents_of(&self, source: ObjectId) -> usize {
        self.back_edges.get(&source).map_or(0, SmallVec::len)
    }

    /// Returns the cached value for `key`, building it on a miss.
    ///
    /// `sources` are the identities the value is built from; a failed build
    /// (`None`) caches nothing.
    pub fn get_or_build<F>(&mut self, key: &K, sources: &[ObjectId], build: F) -> Option<V>
    where
        F: FnOnce(&K) -> Option<V>,
    {
        if let Some(&entry) = self.lookup.get(key) {
            return Some(self.entries[entry].value.clone());
        }

        let value = build(key)?;
        self.builds += 1;

        let mut unique: SmallVec<[ObjectId; 4]> = SmallVec::new();
        for &source in sources {
            if !source.is_empty() && !unique.contains(&source) {
                unique.push(source);
            }
        }

        let entry = self.entries.insert(Entry {
            key: key.clone(),
            value: value.clone(),
            sources: unique.clone(),
        });
        self.lookup.insert(key.clone(), entry);
        for source in unique {
            self.back_edges.entry(source).or_default().push(entry);
        }

        debug!("{}: built {key:?} ({} cached)", self.name, self.entries.len());
        Some(value)
    }

    /// Removes every entry built from `source`, handing each removed value to
    /// `release` once. Returns the number of entries removed.
    pub fn invalidate<F>(&mut self, source: ObjectId, mut release: F) -> usize
    where
        F: FnMut(&K, V),
    {
        let Some(edges) = self.back_edges.remove(&source) else {
            return 0;
        };

        let mut removed = 0;
        for entry_key in edges {
            let Some(entry) = self.entries.remove(entry_key) else {
                continue;
            };
            self.lookup.remove(&entry.key);

            for other in entry.sources.iter().filter(|&&other| other != source) {
                if let Some(list) = self.back_edges.get_mut(other) {
                    list.retain(|k| *k != entry_key);
                    if list.is_empty() {
                        self.back_edges.remove(other);
                    }
                }
            }

            release(&entry.key, entry.value);
            removed += 1;
        }

        if removed > 0 {
            debug!("{}: {source} destroyed, {removed} entries released", self.name);
        }
        removed
    }

    /// Releases every entry.
    pub fn clear<F>(&mut self, mut release: F)
    where
        F: FnMut(&K, V),
    {
        for (_, entry) in self.entries.drain() {
            release(&entry.key, entry.value);
        }
        self.lookup.clear();
        self.back_edges.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(index: u32) -> ObjectId {
        ObjectId::new(index, u64::from(index) + 1)
    }

    #[test]
    fn test_get_or_build_is_idempotent() {
        let mut cache: DerivedCache<(u32, u32), u64> = DerivedCache::new("test");
        let mut builds = 0;

        for _ in 0..3 {
            let value = cache.get_or_build(&(1, 2), &[id(1), id(2)], |_| {
                builds += 1;
                Some(42)
            });
            assert_eq!(value, Some(42));
        }

        assert_eq!(builds, 1);
        assert_eq!(cache.build_count(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_failed_build_is_not_cached() {
        let mut cache: DerivedCache<u32, u64> = DerivedCache::new("test");
        assert_eq!(cache.get_or_build(&7, &[id(7)], |_| None), None);
        assert!(cache.is_empty());
        assert_eq!(cache.dependents_of(id(7)), 0);
    }

    #[test]
    fn test_invalidate_releases_each_dependent_once() {
        let mut cache: DerivedCache<&'static str, u64> = DerivedCache::new("test");
        cache.get_or_build(&"ab", &[id(1), id(2)], |_| Some(1));
        cache.get_or_build(&"ac", &[id(1), id(3), id(1)], |_| Some(2));
        cache.get_or_build(&"bc", &[id(2), id(3)], |_| Some(3));
        assert_eq!(cache.dependents_of(id(1)), 2);

        let mut released = Vec::new();
        let removed = cache.invalidate(id(1), |_, value| released.push(value));
        released.sort_unstable();

        assert_eq!(removed, 2);
        assert_eq!(released, vec![1, 2]);
        assert!(!cache.contains(&"ab"));
        assert!(cache.contains(&"bc"));
        // back-edges of the other sources no longer point at removed entries
        assert_eq!(cache.dependents_of(id(2)), 1);
        assert_eq!(cache.dependents_of(id(3)), 1);

        assert_eq!(cache.invalidate(id(1), |_, _| panic!("released twice")), 0);
    }

    #[test]
    fn test_clear_releases_everything() {
        let mut cache: DerivedCache<u32, u32> = DerivedCache::new("test");
        for key in 0..4 {
            cache.get_or_build(&key, &[id(key)], |k| Some(*k));
        }

        let mut count = 0;
        cache.clear(|_, _| count += 1);
        assert_eq!(count, 4);
        assert!(cache.is_empty());
        assert_eq!(cache.dependents_of(id(2)), 0);
    }
}
