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

use std::sync::atomic::{AtomicU64, Ordering};

/// Internal, always-on counters. Cheap atomics, read with `Relaxed` since
/// they are informational rather than synchronizing.
#[derive(Debug, Default)]
pub(crate) struct Metrics {
    pub hit: AtomicU64,
    pub miss: AtomicU64,
    pub insert: AtomicU64,
    pub evict: AtomicU64,
    pub finalizer_error: AtomicU64,
    pub timeout: AtomicU64,
    pub not_enough_space: AtomicU64,
}

impl Metrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hit: self.hit.load(Ordering::Relaxed),
            miss: self.miss.load(Ordering::Relaxed),
            insert: self.insert.load(Ordering::Relaxed),
            evict: self.evict.load(Ordering::Relaxed),
            finalizer_error: self.finalizer_error.load(Ordering::Relaxed),
            timeout: self.timeout.load(Ordering::Relaxed),
            not_enough_space: self.not_enough_space.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time read of a [`crate::Cache`]'s counters, returned by
/// [`crate::Cache::metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub hit: u64,
    pub miss: u64,
    pub insert: u64,
    pub evict: u64,
    pub finalizer_error: u64,
    pub timeout: u64,
    pub not_enough_space: u64,
}
