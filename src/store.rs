//  Copyright 2024 Foyer Project Authors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

use std::collections::HashMap;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::code::{Key, Value};

/// A resident key/value pair plus its pin count. Held behind an `Arc` so a
/// caller can keep using the value after the store's lock is released,
/// without the unsafe intrusive pointers the teacher's `generic.rs` uses for
/// the same purpose.
pub(crate) struct StoreEntry<K, V> {
    pub key: K,
    pub value: V,
    pins: AtomicUsize,
}

impl<K, V> StoreEntry<K, V> {
    pub fn pins(&self) -> usize {
        self.pins.load(Ordering::Acquire)
    }

    fn pin(&self) {
        self.pins.fetch_add(1, Ordering::AcqRel);
    }

    fn unpin(&self) {
        let prev = self.pins.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unpin on an entry with zero pins");
    }
}

struct Node<K, V> {
    entry: Arc<StoreEntry<K, V>>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Recency-ordered index over resident entries: a `HashMap<K, usize>` plus a
/// doubly linked list threaded through a slab (`Vec<Option<Node<K, V>>>`),
/// front = most recently used. This replaces the teacher's `NonNull`-pointer
/// intrusive list with safe index arithmetic over the slab.
pub(crate) struct Store<K, V, S> {
    index: HashMap<K, usize, S>,
    nodes: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<K, V, S> Store<K, V, S>
where
    S: BuildHasher,
{
    pub fn with_hasher(hash_builder: S) -> Self {
        Self {
            index: HashMap::with_hasher(hash_builder),
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }
}

impl<K, V, S> Store<K, V, S>
where
    K: Key,
    V: Value,
    S: BuildHasher,
{
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Looks up `key`, moves it to the front of the recency sequence, and
    /// increments its pin count. This is the only operation that touches
    /// recency; `unpin` deliberately does not (see spec.md's Open Question
    /// on the asymmetry).
    pub fn peek_and_pin(&mut self, key: &K) -> Option<Arc<StoreEntry<K, V>>> {
        let id = *self.index.get(key)?;
        self.move_to_front(id);
        let entry = self.nodes[id].as_ref().unwrap().entry.clone();
        entry.pin();
        Some(entry)
    }

    /// Inserts a brand new entry at the front of the recency sequence with
    /// a pin count of one, owned by the caller. The key must not already be
    /// present; callers are expected to have already handled the hit case.
    pub fn insert_pinned(&mut self, key: K, value: V) -> Arc<StoreEntry<K, V>> {
        debug_assert!(!self.index.contains_key(&key));
        let entry = Arc::new(StoreEntry {
            key: key.clone(),
            value,
            pins: AtomicUsize::new(1),
        });
        let id = self.alloc_node(entry.clone());
        self.push_front(id);
        self.index.insert(key, id);
        entry
    }

    /// Decrements `key`'s pin count. A no-op if the key is absent (already
    /// evicted or never resident).
    pub fn unpin(&mut self, key: &K) -> bool {
        match self.index.get(key) {
            Some(&id) => {
                self.nodes[id].as_ref().unwrap().entry.unpin();
                true
            }
            None => false,
        }
    }

    /// Removes `key` entirely, unlinking it from the recency sequence.
    pub fn remove(&mut self, key: &K) -> Option<Arc<StoreEntry<K, V>>> {
        let id = self.index.remove(key)?;
        self.unlink(id);
        let node = self.nodes[id].take().unwrap();
        self.free.push(id);
        Some(node.entry)
    }

    /// Eviction candidates in the order the scavenger's collector should see
    /// them: least recently used first, skipping anything still pinned.
    pub fn evictable_from_tail(&self) -> Vec<K> {
        let mut out = Vec::new();
        let mut cur = self.tail;
        while let Some(id) = cur {
            let node = self.nodes[id].as_ref().unwrap();
            if node.entry.pins() == 0 {
                out.push(node.entry.key.clone());
            }
            cur = node.prev;
        }
        out
    }

    fn alloc_node(&mut self, entry: Arc<StoreEntry<K, V>>) -> usize {
        let node = Node {
            entry,
            prev: None,
            next: None,
        };
        if let Some(id) = self.free.pop() {
            self.nodes[id] = Some(node);
            id
        } else {
            self.nodes.push(Some(node));
            self.nodes.len() - 1
        }
    }

    fn push_front(&mut self, id: usize) {
        match self.head {
            Some(head) => {
                self.nodes[id].as_mut().unwrap().next = Some(head);
                self.nodes[head].as_mut().unwrap().prev = Some(id);
                self.head = Some(id);
            }
            None => {
                self.head = Some(id);
                self.tail = Some(id);
            }
        }
    }

    fn unlink(&mut self, id: usize) {
        let (prev, next) = {
            let node = self.nodes[id].as_ref().unwrap();
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.nodes[p].as_mut().unwrap().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].as_mut().unwrap().prev = prev,
            None => self.tail = prev,
        }
        let node = self.nodes[id].as_mut().unwrap();
        node.prev = None;
        node.next = None;
    }

    fn move_to_front(&mut self, id: usize) {
        if self.head == Some(id) {
            return;
        }
        self.unlink(id);
        self.push_front(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahash::RandomState;

    fn store() -> Store<&'static str, i32, RandomState> {
        Store::with_hasher(RandomState::default())
    }

    #[test]
    fn insert_and_hit() {
        let mut s = store();
        s.insert_pinned("a", 1);
        let e = s.peek_and_pin(&"a").expect("hit");
        assert_eq!(e.value, 1);
        assert_eq!(e.pins(), 2);
    }

    #[test]
    fn miss_on_absent_key() {
        let mut s = store();
        assert!(s.peek_and_pin(&"missing").is_none());
        assert!(!s.unpin(&"missing"));
    }

    #[test]
    fn recency_order_after_touch() {
        let mut s = store();
        s.insert_pinned("a", 1);
        s.insert_pinned("b", 2);
        s.insert_pinned("c", 3);
        // all still pinned (count 1 each), nothing evictable yet.
        assert!(s.evictable_from_tail().is_empty());
        s.unpin(&"a");
        s.unpin(&"b");
        s.unpin(&"c");
        // LRU order, oldest (least recently touched) first: a, b, c.
        assert_eq!(s.evictable_from_tail(), vec!["a", "b", "c"]);
        s.peek_and_pin(&"a");
        s.unpin(&"a");
        // "a" was touched, so it moves to the front; tail order is now b, c, a.
        assert_eq!(s.evictable_from_tail(), vec!["b", "c", "a"]);
    }

    #[test]
    fn pinned_entries_are_not_evictable() {
        let mut s = store();
        s.insert_pinned("a", 1);
        s.insert_pinned("b", 2);
        s.unpin(&"b");
        // "a" still pinned once, only "b" is a candidate.
        assert_eq!(s.evictable_from_tail(), vec!["b"]);
    }

    #[test]
    fn remove_reclaims_slot() {
        let mut s = store();
        s.insert_pinned("a", 1);
        s.unpin(&"a");
        assert!(s.remove(&"a").is_some());
        assert!(s.is_empty());
        assert!(s.peek_and_pin(&"a").is_none());
        s.insert_pinned("b", 2);
        assert_eq!(s.len(), 1);
    }
}
