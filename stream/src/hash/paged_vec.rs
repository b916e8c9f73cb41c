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

//! An append-only, page-backed vector, used as a hash map value when a
//! single key maps to a growing collection of records rather than a fixed
//! number of bytes (a multimap built on top of [`super::ChainedHashMap`]).

/// A `Vec<T>`-like container that grows one fixed-size page at a time
/// instead of reallocating its whole backing store, so a reference handed
/// out by a scan loop stays valid across later pushes.
pub struct PagedVec<T> {
    pages: Vec<Vec<T>>,
    page_capacity: usize,
    len: usize,
}

impl<T> PagedVec<T> {
    pub fn new(page_capacity: usize) -> Self {
        assert!(page_capacity > 0, "page capacity must be positive");
        Self { pages: Vec::new(), page_capacity, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, value: T) {
        if self.pages.last().map(|p| p.len() >= self.page_capacity).unwrap_or(true) {
            self.pages.push(Vec::with_capacity(self.page_capacity));
        }
        self.pages.last_mut().expect("just ensured a page exists").push(value);
        self.len += 1;
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }
        let page = index / self.page_capacity;
        let offset = index % self.page_capacity;
        self.pages[page].get(offset)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.pages.iter().flatten()
    }
}

impl<T> Default for PagedVec<T> {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_spans_pages_without_losing_order() {
        let mut v: PagedVec<u32> = PagedVec::new(4);
        for i in 0..17u32 {
            v.push(i);
        }
        assert_eq!(v.len(), 17);
        assert_eq!(v.pages.len(), 5);
        for i in 0..17u32 {
            assert_eq!(v.get(i as usize), Some(&i));
        }
        assert_eq!(v.get(17), None);
    }

    #[test]
    fn iter_visits_every_element_in_insertion_order() {
        let mut v: PagedVec<&str> = PagedVec::new(2);
        v.push("a");
        v.push("b");
        v.push("c");
        let collected: Vec<_> = v.iter().copied().collect();
        assert_eq!(collected, vec!["a", "b", "c"]);
    }
}
