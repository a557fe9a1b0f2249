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

use std::hash::BuildHasher;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::RandomState;
use parking_lot::Mutex;

use crate::code::{Key, Value};
use crate::error::{CacheError, FinalizerError, Result};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::scavenger::{unit_weight, CollectOutcome, LazyScavenger, Scavenger};
use crate::singleflight::{Joined, LoadCoordinator};
use crate::store::{Store, StoreEntry};
use crate::wait::WaitQueue;

/// A finalizer runs once for every key that leaves residency, whether
/// through eviction or because a loaded value never became resident.
type Finalizer<K, V> = fn(&K, &V) -> std::result::Result<(), FinalizerError>;

/// The result of a successful [`Cache::do_with`] or [`Cache::do_with_wait`]
/// call.
#[derive(Debug)]
pub struct DoOutcome<R> {
    /// Whether this call's key was not already resident when the call
    /// started, i.e. it (or a concurrent sibling call on the same key)
    /// triggered a loader invocation.
    pub missing: bool,
    /// Whatever the closure returned.
    pub value: R,
}

/// A generic, concurrent, pinning cache with pluggable eviction accounting
/// and single-flight loading.
///
/// Entries are only ever observed inside the closure passed to [`do_with`]
/// or [`do_with_wait`](Cache::do_with_wait); while pinned, an entry cannot
/// be evicted, however full the cache is.
pub struct Cache<K, V, Sc = LazyScavenger<K>, S = RandomState> {
    store: Mutex<Store<K, V, S>>,
    scavenger: Sc,
    coordinator: LoadCoordinator<K>,
    wait_queue: WaitQueue,
    metrics: Metrics,
    loader: Option<fn(&K) -> Option<V>>,
    finalizer: Option<Finalizer<K, V>>,
}

impl<K, V> Cache<K, V, LazyScavenger<K>, RandomState>
where
    K: Key,
    V: Value,
{
    /// Starts building a cache backed by the default [`LazyScavenger`].
    pub fn builder(capacity: usize) -> CacheBuilder<K, V> {
        CacheBuilder::new(capacity)
    }
}

impl<K, V, Sc, S> Cache<K, V, Sc, S>
where
    K: Key,
    V: Value,
    Sc: Scavenger<K>,
    S: BuildHasher,
{
    pub(crate) fn new(
        scavenger: Sc,
        hash_builder: S,
        loader: Option<fn(&K) -> Option<V>>,
        finalizer: Option<Finalizer<K, V>>,
    ) -> Self {
        Self {
            store: Mutex::new(Store::with_hasher(hash_builder)),
            scavenger,
            coordinator: LoadCoordinator::new(),
            wait_queue: WaitQueue::new(),
            metrics: Metrics::default(),
            loader,
            finalizer,
        }
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }

    /// A snapshot of the hit/miss/insert/evict/finalizer-error counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Runs `doer` against the value for `key`, loading it first if needed.
    /// Returns [`CacheError::NotEnoughSpace`] immediately rather than
    /// waiting; use [`Cache::do_with_wait`] to block for capacity instead.
    pub fn do_with<R>(&self, key: K, doer: impl FnOnce(&V) -> R) -> Result<DoOutcome<R>> {
        let (entry, missing) = self.admit(&key)?;
        let _guard = PinGuard {
            cache: self,
            key: &key,
        };
        let value = doer(&entry.value);
        Ok(DoOutcome { missing, value })
    }

    /// As [`Cache::do_with`], but on [`CacheError::NotEnoughSpace`] blocks
    /// until another caller's `unpin` frees enough room, or until `timeout`
    /// elapses (measured from this call's first admission attempt, not
    /// reset on each retry).
    pub fn do_with_wait<R>(
        &self,
        key: K,
        timeout: Duration,
        doer: impl FnOnce(&V) -> R,
    ) -> Result<DoOutcome<R>> {
        let start = Instant::now();
        loop {
            match self.admit(&key) {
                Ok((entry, missing)) => {
                    let _guard = PinGuard {
                        cache: self,
                        key: &key,
                    };
                    let value = doer(&entry.value);
                    return Ok(DoOutcome { missing, value });
                }
                Err(CacheError::NotEnoughSpace) => {
                    let elapsed = start.elapsed();
                    if elapsed >= timeout {
                        self.metrics
                            .timeout
                            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        metrics::counter!("pincache_timeout").increment(1);
                        return Err(CacheError::TimedOut);
                    }
                    self.wait_queue.wait_for(timeout - elapsed);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn release(&self, key: &K) {
        {
            let mut store = self.store.lock();
            store.unpin(key);
        }
        self.wait_queue.notify_all();
    }

    fn run_finalizer(&self, key: &K, value: &V) {
        let Some(finalizer) = self.finalizer else {
            return;
        };
        if let Err(err) = finalizer(key, value) {
            self.metrics
                .finalizer_error
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            metrics::counter!("pincache_finalizer_error").increment(1);
            tracing::warn!(error = %err, "finalizer returned an error");
        }
    }

    /// Returns the pinned, resident entry for `key`, loading it via the
    /// configured loader if it is missing. A miss enters the per-key loader
    /// coordinator: the first caller becomes the leader and runs the
    /// loader, then accounts for capacity and evicts unpinned victims (in
    /// recency order) under the store lock before inserting; followers
    /// wait for the leader's published result and pin the same entry.
    fn admit(&self, key: &K) -> Result<(Arc<StoreEntry<K, V>>, bool)> {
        {
            let mut store = self.store.lock();
            if let Some(entry) = store.peek_and_pin(key) {
                self.metrics
                    .hit
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                metrics::counter!("pincache_hit").increment(1);
                tracing::trace!("cache hit");
                return Ok((entry, false));
            }
        }
        self.metrics
            .miss
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        metrics::counter!("pincache_miss").increment(1);

        match self.coordinator.join(key.clone()) {
            Joined::Follower(slot) => {
                match slot.wait() {
                    Ok(()) => {
                        let mut store = self.store.lock();
                        match store.peek_and_pin(key) {
                            Some(entry) => Ok((entry, true)),
                            // Evicted again before we could observe it; retry as a fresh miss.
                            None => {
                                drop(store);
                                self.admit(key)
                            }
                        }
                    }
                    Err(e) => Err(e),
                }
            }
            Joined::Leader(slot) => {
                // Another admission for this key may have completed and
                // published between our initial peek_and_pin (above) and
                // winning the leader role here; re-check before loading.
                {
                    let mut store = self.store.lock();
                    if let Some(entry) = store.peek_and_pin(key) {
                        drop(store);
                        self.coordinator.publish(key, &slot, Ok(()));
                        return Ok((entry, true));
                    }
                }

                let loaded = self.loader.and_then(|loader| loader(key));
                let value = match loaded {
                    Some(v) => v,
                    None => {
                        // No reservation was ever taken out for this key
                        // (collect() only runs below, after a value is
                        // loaded), so there is nothing to throw.
                        self.coordinator
                            .publish(key, &slot, Err(CacheError::NoSuchItem));
                        return Err(CacheError::NoSuchItem);
                    }
                };

                // Capacity accounting and eviction happen here, under the
                // store lock, so they stay consistent with whichever other
                // keys are concurrently being admitted or evicted.
                let mut store = self.store.lock();
                let admitted = match self.scavenger.collect(key) {
                    CollectOutcome::Admitted => true,
                    CollectOutcome::Deficit(mut collector) => {
                        let mut victims = Vec::new();
                        let mut satisfied = false;
                        for candidate in store.evictable_from_tail() {
                            let enough = collector(&candidate);
                            victims.push(candidate);
                            if enough {
                                satisfied = true;
                                break;
                            }
                        }
                        if satisfied {
                            for victim in &victims {
                                if let Some(evicted) = store.remove(victim) {
                                    self.scavenger.throw(victim);
                                    self.metrics
                                        .evict
                                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                                    metrics::counter!("pincache_evict").increment(1);
                                    tracing::debug!("evicting a victim");
                                    self.run_finalizer(&evicted.key, &evicted.value);
                                }
                            }
                            matches!(self.scavenger.collect(key), CollectOutcome::Admitted)
                        } else {
                            false
                        }
                    }
                };

                if !admitted {
                    drop(store);
                    self.run_finalizer(key, &value);
                    self.metrics
                        .not_enough_space
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    metrics::counter!("pincache_not_enough_space").increment(1);
                    self.coordinator
                        .publish(key, &slot, Err(CacheError::NotEnoughSpace));
                    return Err(CacheError::NotEnoughSpace);
                }

                let entry = store.insert_pinned(key.clone(), value);
                self.metrics
                    .insert
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                metrics::counter!("pincache_insert").increment(1);
                tracing::debug!("admitted");
                drop(store);
                self.coordinator.publish(key, &slot, Ok(()));
                Ok((entry, true))
            }
        }
    }
}

impl<K, V, S> Cache<K, V, LazyScavenger<K>, S>
where
    K: Key,
    V: Value,
    S: BuildHasher,
{
    /// The capacity configured for the default [`LazyScavenger`].
    pub fn capacity(&self) -> usize {
        self.scavenger.capacity()
    }

    /// Current reserved usage against [`Cache::capacity`], per the default
    /// [`LazyScavenger`]'s weigher.
    pub fn usage(&self) -> usize {
        self.scavenger.usage()
    }
}

struct PinGuard<'a, K: Key, V: Value, Sc: Scavenger<K>, S: BuildHasher> {
    cache: &'a Cache<K, V, Sc, S>,
    key: &'a K,
}

impl<K, V, Sc, S> Drop for PinGuard<'_, K, V, Sc, S>
where
    K: Key,
    V: Value,
    Sc: Scavenger<K>,
    S: BuildHasher,
{
    fn drop(&mut self) {
        self.cache.release(self.key);
    }
}

/// Builder for [`Cache`], mirroring the teacher's `GenericCacheConfig`.
/// `capacity`/`weight` configure the default [`LazyScavenger`]; call
/// [`CacheBuilder::build_with_scavenger`] instead of [`CacheBuilder::build`]
/// to plug in any other [`Scavenger`] implementation.
pub struct CacheBuilder<K, V, S = RandomState> {
    capacity: usize,
    weight: fn(&K) -> usize,
    loader: Option<fn(&K) -> Option<V>>,
    finalizer: Option<Finalizer<K, V>>,
    hash_builder: S,
}

impl<K, V> CacheBuilder<K, V, RandomState>
where
    K: Key,
    V: Value,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            weight: unit_weight,
            loader: None,
            finalizer: None,
            hash_builder: RandomState::default(),
        }
    }
}

impl<K, V, S> CacheBuilder<K, V, S>
where
    K: Key,
    V: Value,
    S: BuildHasher,
{
    /// Per-key cost used by the default [`LazyScavenger`]. Has no effect if
    /// [`CacheBuilder::build_with_scavenger`] is used instead of
    /// [`CacheBuilder::build`].
    pub fn weight(mut self, weight: fn(&K) -> usize) -> Self {
        self.weight = weight;
        self
    }

    pub fn loader(mut self, loader: fn(&K) -> Option<V>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn finalizer(
        mut self,
        finalizer: fn(&K, &V) -> std::result::Result<(), FinalizerError>,
    ) -> Self {
        self.finalizer = Some(finalizer);
        self
    }

    pub fn hash_builder<S2: BuildHasher>(self, hash_builder: S2) -> CacheBuilder<K, V, S2> {
        CacheBuilder {
            capacity: self.capacity,
            weight: self.weight,
            loader: self.loader,
            finalizer: self.finalizer,
            hash_builder,
        }
    }

    /// Builds a cache using the default [`LazyScavenger`], configured from
    /// [`CacheBuilder::new`]'s capacity and [`CacheBuilder::weight`].
    pub fn build(self) -> Cache<K, V, LazyScavenger<K>, S> {
        let scavenger = LazyScavenger::new(self.capacity, self.weight);
        Cache::new(scavenger, self.hash_builder, self.loader, self.finalizer)
    }

    /// Builds a cache using a caller-supplied [`Scavenger`] in place of the
    /// default [`LazyScavenger`]; `capacity`/`weight` are ignored.
    pub fn build_with_scavenger<Sc: Scavenger<K>>(self, scavenger: Sc) -> Cache<K, V, Sc, S> {
        Cache::new(scavenger, self.hash_builder, self.loader, self.finalizer)
    }
}
