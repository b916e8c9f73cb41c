// Copyright 2026 The StreamCore Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! An arena/page-backed bucket-chained hash table, designed to be driven
//! from a tight scan loop (normally compiler-generated) rather than from
//! ordinary Rust call sites: keys and values are opaque fixed-size byte
//! slices, and entries are addressed by a stable [`EntryRef`] index rather
//! than a pointer, so the table can grow without invalidating references
//! held across a loop iteration.
//!
//! One instance is single-threaded; parallel aggregation uses one
//! `ChainedHashMap` per worker and merges them at a barrier (see
//! [`crate::task`]).

mod paged_vec;

pub use paged_vec::PagedVec;

/// A stable handle to one entry, valid for the lifetime of the map that
/// created it. Never reused after the map grows — entries are appended,
/// never relocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryRef {
    page: u32,
    slot: u32,
}

struct Entry {
    next: Option<EntryRef>,
    hash: u64,
    key: Vec<u8>,
    value: Vec<u8>,
}

struct Page {
    entries: Vec<Entry>,
    capacity: usize,
}

impl Page {
    fn new(capacity: usize) -> Self {
        Self { entries: Vec::with_capacity(capacity), capacity }
    }

    fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }
}

/// A single-threaded, open-addressing-free hash table over opaque byte
/// keys and values, with separate-chaining collision resolution through a
/// page-backed arena.
///
/// `key_size`/`value_size` are fixed for the lifetime of the map, matching
/// the compiled-record layout a JIT-generated scan loop expects.
pub struct ChainedHashMap {
    buckets: Vec<Option<EntryRef>>,
    bucket_mask: u64,
    pages: Vec<Page>,
    page_size: usize,
    key_size: usize,
    value_size: usize,
    num_entries: usize,
    destructor: Option<Box<dyn Fn(&[u8]) + Send>>,
}

impl ChainedHashMap {
    pub fn new(initial_buckets: usize, page_size: usize, key_size: usize, value_size: usize) -> Self {
        assert!(initial_buckets.is_power_of_two(), "bucket count must be a power of two");
        Self {
            buckets: vec![None; initial_buckets],
            bucket_mask: (initial_buckets - 1) as u64,
            pages: Vec::new(),
            page_size,
            key_size,
            value_size,
            num_entries: 0,
            destructor: None,
        }
    }

    /// Registers a callback invoked on a value's bytes right before the
    /// entry holding it is dropped (map drop, or an explicit `clear`).
    /// Mirrors the original's `destructorCallback` for values that own a
    /// resource outside their inline bytes (e.g. a [`PagedVec`] handle).
    pub fn set_destructor(&mut self, destructor: impl Fn(&[u8]) + Send + 'static) {
        self.destructor = Some(Box::new(destructor));
    }

    pub fn len(&self) -> usize {
        self.num_entries
    }

    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    fn bucket_index(&self, hash: u64) -> usize {
        (hash & self.bucket_mask) as usize
    }

    fn entry(&self, r: EntryRef) -> &Entry {
        &self.pages[r.page as usize].entries[r.slot as usize]
    }

    fn entry_mut(&mut self, r: EntryRef) -> &mut Entry {
        &mut self.pages[r.page as usize].entries[r.slot as usize]
    }

    fn find_in_chain(&self, mut cursor: Option<EntryRef>, hash: u64, key: &[u8]) -> Option<EntryRef> {
        while let Some(r) = cursor {
            let e = self.entry(r);
            if e.hash == hash && e.key == key {
                return Some(r);
            }
            cursor = e.next;
        }
        None
    }

    fn allocate(&mut self, hash: u64, key: &[u8], value: Vec<u8>) -> EntryRef {
        if self.pages.last().map(|p| p.is_full()).unwrap_or(true) {
            self.pages.push(Page::new(self.page_size));
        }
        let page_idx = (self.pages.len() - 1) as u32;
        let page = self.pages.last_mut().expect("just ensured a page exists");
        let slot_idx = page.entries.len() as u32;
        page.entries.push(Entry { next: None, hash, key: key.to_vec(), value });
        self.num_entries += 1;
        EntryRef { page: page_idx, slot: slot_idx }
    }

    /// Returns the existing entry for `key`, or creates one with
    /// `value_size` zero-initialized bytes and links it into its bucket's
    /// chain. Keys and values must match the sizes fixed at construction.
    pub fn find_or_create_entry(&mut self, hash: u64, key: &[u8]) -> EntryRef {
        debug_assert_eq!(key.len(), self.key_size);
        let bucket = self.bucket_index(hash);
        if let Some(found) = self.find_in_chain(self.buckets[bucket], hash, key) {
            return found;
        }
        let new_ref = self.allocate(hash, key, vec![0u8; self.value_size]);
        self.entry_mut(new_ref).next = self.buckets[bucket];
        self.buckets[bucket] = Some(new_ref);
        new_ref
    }

    /// Looks a key up without creating an entry.
    pub fn find(&self, hash: u64, key: &[u8]) -> Option<EntryRef> {
        let bucket = self.bucket_index(hash);
        self.find_in_chain(self.buckets[bucket], hash, key)
    }

    /// Finds an entry and updates its value in place, or creates one from
    /// `on_create` if none exists. Returns the entry and whether it was
    /// newly created.
    pub fn insert_or_update_entry(
        &mut self,
        hash: u64,
        key: &[u8],
        on_create: impl FnOnce() -> Vec<u8>,
        on_update: impl FnOnce(&mut [u8]),
    ) -> (EntryRef, bool) {
        debug_assert_eq!(key.len(), self.key_size);
        let bucket = self.bucket_index(hash);
        if let Some(found) = self.find_in_chain(self.buckets[bucket], hash, key) {
            on_update(&mut self.entry_mut(found).value);
            return (found, false);
        }
        let value = on_create();
        debug_assert_eq!(value.len(), self.value_size);
        let new_ref = self.allocate(hash, key, value);
        self.entry_mut(new_ref).next = self.buckets[bucket];
        self.buckets[bucket] = Some(new_ref);
        (new_ref, true)
    }

    pub fn key(&self, r: EntryRef) -> &[u8] {
        &self.entry(r).key
    }

    pub fn value(&self, r: EntryRef) -> &[u8] {
        &self.entry(r).value
    }

    pub fn value_mut(&mut self, r: EntryRef) -> &mut [u8] {
        &mut self.entry_mut(r).value
    }

    /// Iterates every live entry, in arbitrary (page, bucket-chain) order —
    /// callers that need a merge across per-worker partial maps should not
    /// depend on ordering.
    pub fn iter(&self) -> impl Iterator<Item = EntryRef> + '_ {
        self.pages.iter().enumerate().flat_map(|(page_idx, page)| {
            (0..page.entries.len()).map(move |slot| EntryRef { page: page_idx as u32, slot: slot as u32 })
        })
    }

    /// Merges `other` into `self`, calling `merge_values` for keys present
    /// in both maps and moving over entries unique to `other`. Used to
    /// combine per-worker partial aggregation maps at a pipeline barrier.
    pub fn merge_from(&mut self, other: &ChainedHashMap, mut merge_values: impl FnMut(&mut [u8], &[u8])) {
        for r in other.iter() {
            let key = other.key(r);
            let hash = other.entry(r).hash;
            let (entry_ref, created) = self.insert_or_update_entry(hash, key, || other.value(r).to_vec(), |_| {});
            if !created {
                let mut existing = std::mem::take(&mut self.entry_mut(entry_ref).value);
                merge_values(&mut existing, other.value(r));
                self.entry_mut(entry_ref).value = existing;
            }
        }
    }
}

impl Drop for ChainedHashMap {
    fn drop(&mut self) {
        if let Some(destructor) = self.destructor.take() {
            for page in &self.pages {
                for entry in &page.entries {
                    destructor(&entry.value);
                }
            }
        }
    }
}

/// A thin, offset-based view over a [`ChainedHashMap`]'s key/value layout,
/// handed to a compiled scan loop instead of the map itself. The loop
/// reads/writes raw bytes at fixed offsets; this type only describes where
/// the key and value begin within an entry.
#[derive(Debug, Clone, Copy)]
pub struct HashMapRef {
    pub key_size: usize,
    pub value_size: usize,
}

impl HashMapRef {
    pub fn for_map(map: &ChainedHashMap) -> Self {
        Self { key_size: map.key_size, value_size: map.value_size }
    }

    pub fn key_offset(&self) -> usize {
        0
    }

    pub fn value_offset(&self) -> usize {
        self.key_size
    }

    pub fn entry_size(&self) -> usize {
        self.key_size + self.value_size
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn hash_of(key: &[u8]) -> u64 {
        key.iter().fold(0xcbf29ce484222325u64, |h, b| (h ^ *b as u64).wrapping_mul(0x100000001b3))
    }

    #[test]
    fn find_or_create_returns_the_same_entry_for_the_same_key() {
        let mut map = ChainedHashMap::new(8, 4, 4, 8);
        let key = b"key1".to_vec();
        let a = map.find_or_create_entry(hash_of(&key), &key);
        let b = map.find_or_create_entry(hash_of(&key), &key);
        assert_eq!(a, b);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn distinct_keys_get_distinct_entries() {
        let mut map = ChainedHashMap::new(8, 4, 4, 8);
        let a = map.find_or_create_entry(hash_of(b"aaaa"), b"aaaa");
        let b = map.find_or_create_entry(hash_of(b"bbbb"), b"bbbb");
        assert_ne!(a, b);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn insert_or_update_accumulates_a_counter() {
        let mut map = ChainedHashMap::new(8, 4, 4, 8);
        let key = b"ctr1".to_vec();
        for _ in 0..5 {
            map.insert_or_update_entry(
                hash_of(&key),
                &key,
                || 1u64.to_le_bytes().to_vec(),
                |value| {
                    let count = u64::from_le_bytes(value.try_into().unwrap());
                    value.copy_from_slice(&(count + 1).to_le_bytes());
                },
            );
        }
        let r = map.find(hash_of(&key), &key).expect("entry exists");
        let count = u64::from_le_bytes(map.value(r).try_into().unwrap());
        assert_eq!(count, 5);
    }

    #[test]
    fn allocation_spans_multiple_pages() {
        let mut map = ChainedHashMap::new(4, 2, 4, 0);
        for i in 0..10u32 {
            let key = i.to_le_bytes();
            map.find_or_create_entry(hash_of(&key), &key);
        }
        assert_eq!(map.len(), 10);
        assert!(map.pages.len() >= 5);
        assert_eq!(map.iter().count(), 10);
    }

    #[test]
    fn destructor_runs_once_per_entry_on_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let mut map = ChainedHashMap::new(4, 4, 4, 0);
        map.set_destructor(move |_value| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        map.find_or_create_entry(hash_of(b"aaaa"), b"aaaa");
        map.find_or_create_entry(hash_of(b"bbbb"), b"bbbb");
        drop(map);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    /// A key maps to a growing collection instead of a fixed-size value: the
    /// entry's value bytes hold an index into a side table of `PagedVec`
    /// pages, and the destructor callback frees the side-table slot when the
    /// owning entry is dropped.
    #[test]
    fn value_can_be_an_index_into_a_side_table_of_paged_vectors() {
        use parking_lot::Mutex;

        let side_table: Arc<Mutex<Vec<Option<PagedVec<u64>>>>> = Arc::new(Mutex::new(Vec::new()));

        let mut map = ChainedHashMap::new(8, 4, 4, 4);
        let table_for_destructor = side_table.clone();
        map.set_destructor(move |value| {
            let index = u32::from_le_bytes(value.try_into().unwrap()) as usize;
            table_for_destructor.lock()[index] = None;
        });

        let key = b"grps".to_vec();
        let slot_index = {
            let mut table = side_table.lock();
            table.push(Some(PagedVec::new(4)));
            table.len() - 1
        };
        map.insert_or_update_entry(hash_of(&key), &key, || (slot_index as u32).to_le_bytes().to_vec(), |_| {});

        let r = map.find(hash_of(&key), &key).expect("entry exists");
        let slot = u32::from_le_bytes(map.value(r).try_into().unwrap()) as usize;
        {
            let mut table = side_table.lock();
            let paged = table[slot].as_mut().expect("slot still live");
            paged.push(1);
            paged.push(2);
            paged.push(3);
        }
        assert_eq!(side_table.lock()[slot].as_ref().unwrap().len(), 3);

        drop(map);
        assert!(side_table.lock()[slot_index].is_none(), "destructor should have freed the side-table slot");
    }

    #[test]
    fn merge_from_combines_partial_maps() {
        let mut a = ChainedHashMap::new(8, 4, 4, 8);
        let mut b = ChainedHashMap::new(8, 4, 4, 8);
        let key = b"shrd".to_vec();
        a.insert_or_update_entry(hash_of(&key), &key, || 3u64.to_le_bytes().to_vec(), |_| {});
        b.insert_or_update_entry(hash_of(&key), &key, || 4u64.to_le_bytes().to_vec(), |_| {});
        b.insert_or_update_entry(hash_of(b"only"), b"only", || 9u64.to_le_bytes().to_vec(), |_| {});

        a.merge_from(&b, |existing, incoming| {
            let sum = u64::from_le_bytes(existing.try_into().unwrap()) + u64::from_le_bytes(incoming.try_into().unwrap());
            existing.copy_from_slice(&sum.to_le_bytes());
        });

        let merged = a.find(hash_of(&key), &key).expect("merged key present");
        assert_eq!(u64::from_le_bytes(a.value(merged).try_into().unwrap()), 7);
        assert!(a.find(hash_of(b"only"), b"only").is_some());
        assert_eq!(a.len(), 2);
    }
}
