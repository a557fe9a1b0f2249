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

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use pincache::{Cache, CacheError};

fn load_double(key: &u32) -> Option<u32> {
    Some(key * 2)
}

/// Scenario: hit-then-hit. The second call for the same key observes
/// `missing = false` and does not re-invoke the loader.
#[test]
fn hit_then_hit() {
    let cache = Cache::builder(8).loader(load_double).build();

    let first = cache.do_with(3, |v| *v).unwrap();
    assert!(first.missing);
    assert_eq!(first.value, 6);

    let second = cache.do_with(3, |v| *v).unwrap();
    assert!(!second.missing);
    assert_eq!(second.value, 6);

    let snapshot = cache.metrics();
    assert_eq!(snapshot.hit, 1);
    assert_eq!(snapshot.miss, 1);
    assert_eq!(snapshot.insert, 1);
}

/// `capacity()`/`usage()` expose the default scavenger's accounting.
#[test]
fn capacity_and_usage_track_residency() {
    let cache = Cache::builder(4).loader(load_double).build();
    assert_eq!(cache.capacity(), 4);
    assert_eq!(cache.usage(), 0);

    cache.do_with(1, |_| ()).unwrap();
    cache.do_with(2, |_| ()).unwrap();
    assert_eq!(cache.usage(), 2);
}

/// Scenario: fill then evict. Filling the cache to capacity and inserting
/// one more key evicts the least recently used unpinned entry.
#[test]
fn fill_then_evict() {
    let cache = Cache::builder(4).loader(load_double).build();
    for k in 0..4u32 {
        cache.do_with(k, |_| ()).unwrap();
    }
    assert_eq!(cache.len(), 4);

    // key 0 is now the least recently used and unpinned; inserting a 5th
    // key should evict it.
    cache.do_with(4, |_| ()).unwrap();
    assert_eq!(cache.len(), 4);
    assert_eq!(cache.metrics().evict, 1);

    // 0 was evicted, so this is a fresh miss (and re-admits it by evicting
    // the new least recently used entry).
    let outcome = cache.do_with(0, |v| *v).unwrap();
    assert!(outcome.missing);
    assert_eq!(outcome.value, 0);
}

/// Scenario: pinned entries block eviction even when every resident entry
/// is a nominal LRU candidate; with no unpinned victim available,
/// admission of a new key fails with `NotEnoughSpace` instead of evicting
/// something still in use.
#[test]
fn pin_blocks_eviction() {
    let cache = Arc::new(Cache::builder(2).loader(load_double).build());
    let barrier = Arc::new(Barrier::new(3));

    let mut holders = Vec::new();
    for key in [1u32, 2u32] {
        let cache = cache.clone();
        let barrier = barrier.clone();
        holders.push(thread::spawn(move || {
            cache
                .do_with(key, |_| {
                    barrier.wait();
                    // hold the pin while the main thread tries to admit
                    // past capacity.
                    thread::sleep(Duration::from_millis(100));
                })
                .unwrap();
        }));
    }

    barrier.wait();
    // both resident entries are pinned by the holder threads; there is no
    // evictable victim, so admitting a 3rd key fails fast.
    let err = cache.do_with(3, |_| ()).unwrap_err();
    assert!(matches!(err, CacheError::NotEnoughSpace));

    for holder in holders {
        holder.join().unwrap();
    }
}

/// Scenario: `do_with_wait` succeeds once a concurrent holder unpins,
/// freeing capacity.
#[test]
fn do_with_wait_succeeds_after_unpin() {
    let cache = Arc::new(Cache::builder(1).loader(load_double).build());
    let barrier = Arc::new(Barrier::new(2));

    let holder_cache = cache.clone();
    let holder_barrier = barrier.clone();
    let holder = thread::spawn(move || {
        holder_cache
            .do_with(1, |_| {
                holder_barrier.wait();
                thread::sleep(Duration::from_millis(100));
            })
            .unwrap();
    });

    barrier.wait();
    let outcome = cache
        .do_with_wait(2, Duration::from_secs(5), |v| *v)
        .unwrap();
    assert_eq!(outcome.value, 4);

    holder.join().unwrap();
}

/// Scenario: `do_with_wait` times out if capacity never frees up.
#[test]
fn do_with_wait_times_out() {
    let cache = Arc::new(Cache::builder(1).loader(load_double).build());
    let barrier = Arc::new(Barrier::new(2));

    let holder_cache = cache.clone();
    let holder_barrier = barrier.clone();
    let holder = thread::spawn(move || {
        holder_cache
            .do_with(1, |_| {
                holder_barrier.wait();
                thread::sleep(Duration::from_millis(300));
            })
            .unwrap();
    });

    barrier.wait();
    let err = cache
        .do_with_wait(2, Duration::from_millis(50), |_| ())
        .unwrap_err();
    assert!(matches!(err, CacheError::TimedOut));

    holder.join().unwrap();
}

/// Scenario: ten threads race on the same missing key; the loader runs
/// once, and all ten observe `missing = true` with the same value.
#[test]
fn singleflight_deduplicates_concurrent_loads() {
    static LOAD_COUNT: AtomicU32 = AtomicU32::new(0);
    fn counting_loader(key: &u32) -> Option<u32> {
        LOAD_COUNT.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        Some(key * 10)
    }

    let cache = Arc::new(Cache::builder(16).loader(counting_loader).build());
    let barrier = Arc::new(Barrier::new(10));

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let cache = cache.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                cache.do_with(7, |v| *v).unwrap()
            })
        })
        .collect();

    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(LOAD_COUNT.load(Ordering::SeqCst), 1);
    for outcome in &outcomes {
        assert!(outcome.missing);
        assert_eq!(outcome.value, 70);
    }
    assert_eq!(cache.len(), 1);
}

/// A finalizer is invoked for an evicted entry, and for a loaded value that
/// never became resident because admission ultimately failed.
#[test]
fn finalizer_runs_on_eviction_and_on_aborted_admission() {
    static FINALIZED: AtomicU32 = AtomicU32::new(0);
    fn finalizer(_key: &u32, _value: &u32) -> Result<(), pincache::FinalizerError> {
        FINALIZED.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    let cache = Cache::builder(1)
        .loader(load_double)
        .finalizer(finalizer)
        .build();

    cache.do_with(1, |_| ()).unwrap();
    cache.do_with(2, |_| ()).unwrap();
    assert_eq!(FINALIZED.load(Ordering::SeqCst), 1);
    assert_eq!(cache.metrics().evict, 1);
}

/// Scenario: a missing key with no loader configured reports `NoSuchItem`,
/// and reaching that outcome does not corrupt the scavenger's accounting —
/// a subsequent admission still succeeds.
#[test]
fn no_such_item_without_loader() {
    let cache: Cache<u32, u32> = Cache::builder(4).build();

    let err = cache.do_with(1, |_| ()).unwrap_err();
    assert!(matches!(err, CacheError::NoSuchItem));
    assert_eq!(cache.usage(), 0);
}

/// Scenario: a loader returning `None` reports `NoSuchItem` for every
/// concurrent caller on that key, and does not leave the scavenger's
/// reservation accounting permanently corrupted — a later admission for a
/// different key still succeeds.
#[test]
fn no_such_item_from_loader_does_not_corrupt_accounting() {
    fn absent_loader(_key: &u32) -> Option<u32> {
        None
    }

    let cache = Cache::builder(4).loader(absent_loader).build();

    let err = cache.do_with(1, |_| ()).unwrap_err();
    assert!(matches!(err, CacheError::NoSuchItem));
    assert_eq!(cache.usage(), 0);

    let cache = Cache::builder(4).loader(load_double).build();
    let outcome = cache.do_with(2, |v| *v).unwrap();
    assert!(outcome.missing);
    assert_eq!(outcome.value, 4);
    assert_eq!(cache.usage(), 1);
}

/// Scenario: a single key whose weight exceeds the entire capacity can
/// never be admitted, however empty the cache is — there is no victim set
/// that can ever close the deficit.
#[test]
fn weight_exceeding_capacity_never_admits() {
    fn oversized_weight(_key: &u32) -> usize {
        10
    }

    let cache = Cache::builder(4)
        .weight(oversized_weight)
        .loader(load_double)
        .build();

    let err = cache.do_with(1, |_| ()).unwrap_err();
    assert!(matches!(err, CacheError::NotEnoughSpace));
    assert_eq!(cache.len(), 0);
    assert_eq!(cache.usage(), 0);
}

/// Scenario: `do_with_wait` with a zero timeout times out immediately
/// without ever invoking the closure, when capacity is already exhausted.
#[test]
fn do_with_wait_zero_timeout_skips_doer() {
    let cache = Arc::new(Cache::builder(1).loader(load_double).build());
    let barrier = Arc::new(Barrier::new(2));

    let holder_cache = cache.clone();
    let holder_barrier = barrier.clone();
    let holder = thread::spawn(move || {
        holder_cache
            .do_with(1, |_| {
                holder_barrier.wait();
                thread::sleep(Duration::from_millis(100));
            })
            .unwrap();
    });

    barrier.wait();
    static DOER_RAN: AtomicU32 = AtomicU32::new(0);
    let err = cache
        .do_with_wait(2, Duration::ZERO, |_| {
            DOER_RAN.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap_err();
    assert!(matches!(err, CacheError::TimedOut));
    assert_eq!(DOER_RAN.load(Ordering::SeqCst), 0);

    holder.join().unwrap();
}

/// Scenario: a finalizer error (on eviction) is logged and swallowed; it
/// does not poison the cache or prevent the eviction and subsequent
/// admission from completing.
#[test]
fn finalizer_error_does_not_block_subsequent_admissions() {
    fn failing_finalizer(_key: &u32, _value: &u32) -> Result<(), pincache::FinalizerError> {
        Err("finalizer boom".into())
    }

    let cache = Cache::builder(1)
        .loader(load_double)
        .finalizer(failing_finalizer)
        .build();

    cache.do_with(1, |_| ()).unwrap();
    // Evicts key 1, whose finalizer errors; admission still succeeds.
    let outcome = cache.do_with(2, |v| *v).unwrap();
    assert!(outcome.missing);
    assert_eq!(outcome.value, 4);
    assert_eq!(cache.metrics().finalizer_error, 1);
    assert_eq!(cache.metrics().evict, 1);

    // The cache keeps admitting normally afterwards.
    let outcome = cache.do_with(3, |v| *v).unwrap();
    assert!(outcome.missing);
    assert_eq!(outcome.value, 6);
}
