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

use std::sync::atomic::{AtomicUsize, Ordering};

/// The outcome of [`Scavenger::collect`].
pub enum CollectOutcome<'a, K> {
    /// Room was available and has been committed; the caller may admit
    /// immediately.
    Admitted,
    /// Room is not available. The closure accounts for candidate victims as
    /// the caller proposes them (in recency order, least recent first) and
    /// returns `true` once enough have been proposed to close the deficit.
    Deficit(Box<dyn FnMut(&K) -> bool + 'a>),
}

/// Pluggable eviction accounting. A `Scavenger` tracks whatever notion of
/// "space" the cache should respect (entry count, byte size, ...) and
/// decides whether a key can be admitted.
///
/// Implementations must be safe to call from multiple threads concurrently;
/// `collect` and `throw` are the only two operations the cache facade calls,
/// matching the two steps in the admission protocol (tentative reservation,
/// and release on eviction or on abort).
pub trait Scavenger<K>: Send + Sync + 'static {
    /// Attempt to reserve room for `key`. On success the reservation is
    /// already committed (the cache still owes a matching `throw` if it
    /// ultimately decides not to keep the key, e.g. a losing singleflight
    /// follower, or a loader miss). On failure, returns a collector the
    /// caller feeds eviction candidates through.
    fn collect<'a>(&'a self, key: &K) -> CollectOutcome<'a, K>;

    /// Release whatever `collect` reserved for `key`, whether because the
    /// entry was evicted or because the reservation was never used.
    fn throw(&self, key: &K);
}

/// Default [`Scavenger`]: a single `size` counter bounded by `capacity`,
/// with per-key cost given by a weigher function. Mirrors the `weighter`
/// and `make_room` accounting in the teacher's `Container`/`Pool` design,
/// generalized to the collector-based protocol spec.md describes.
pub struct LazyScavenger<K> {
    size: AtomicUsize,
    capacity: usize,
    weight: fn(&K) -> usize,
}

/// The default weigher: every key costs exactly one unit, so `capacity` is
/// simply an entry count.
pub fn unit_weight<K>(_key: &K) -> usize {
    1
}

impl<K> LazyScavenger<K> {
    pub fn new(capacity: usize, weight: fn(&K) -> usize) -> Self {
        Self {
            size: AtomicUsize::new(0),
            capacity,
            weight,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn usage(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }
}

impl<K> Scavenger<K> for LazyScavenger<K>
where
    K: Send + Sync + 'static,
{
    fn collect<'a>(&'a self, key: &K) -> CollectOutcome<'a, K> {
        let w = (self.weight)(key);
        loop {
            let cur = self.size.load(Ordering::Acquire);
            let next = cur.saturating_add(w);
            if next <= self.capacity {
                if self
                    .size
                    .compare_exchange(cur, next, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return CollectOutcome::Admitted;
                }
                continue;
            }
            let mut deficit = next as isize - self.capacity as isize;
            let weight = self.weight;
            return CollectOutcome::Deficit(Box::new(move |victim: &K| {
                deficit -= weight(victim) as isize;
                deficit <= 0
            }));
        }
    }

    fn throw(&self, key: &K) {
        let w = (self.weight)(key);
        self.size.fetch_sub(w, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_within_capacity() {
        let s: LazyScavenger<u32> = LazyScavenger::new(4, unit_weight);
        assert!(matches!(s.collect(&1), CollectOutcome::Admitted));
        assert!(matches!(s.collect(&2), CollectOutcome::Admitted));
        assert_eq!(s.usage(), 2);
    }

    #[test]
    fn reports_deficit_past_capacity() {
        let s: LazyScavenger<u32> = LazyScavenger::new(1, unit_weight);
        assert!(matches!(s.collect(&1), CollectOutcome::Admitted));
        match s.collect(&2) {
            CollectOutcome::Deficit(mut collector) => assert!(collector(&1)),
            CollectOutcome::Admitted => panic!("expected deficit"),
        };
    }

    #[test]
    fn throw_releases_reservation() {
        let s: LazyScavenger<u32> = LazyScavenger::new(1, unit_weight);
        assert!(matches!(s.collect(&1), CollectOutcome::Admitted));
        s.throw(&1);
        assert_eq!(s.usage(), 0);
        assert!(matches!(s.collect(&2), CollectOutcome::Admitted));
    }
}
