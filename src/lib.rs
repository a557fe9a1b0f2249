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

//! A generic, concurrent, pinning cache with pluggable eviction accounting
//! and single-flight loading.
//!
//! An entry is only ever visible to a caller inside the closure passed to
//! [`Cache::do_with`] or [`Cache::do_with_wait`]; for the closure's
//! duration the entry is pinned and cannot be evicted, however much
//! capacity pressure the cache is under. Concurrent callers that miss on
//! the same key converge on a single loader invocation.
//!
//! ```
//! use pincache::Cache;
//!
//! fn load(key: &u32) -> Option<String> {
//!     Some(format!("value-{key}"))
//! }
//!
//! let cache = Cache::builder(64).loader(load).build();
//! let outcome = cache.do_with(1, |v| v.clone()).unwrap();
//! assert_eq!(outcome.value, "value-1");
//! assert!(outcome.missing);
//! ```

mod cache;
mod code;
mod error;
mod metrics;
mod scavenger;
mod singleflight;
mod store;
mod wait;

pub use cache::{Cache, CacheBuilder, DoOutcome};
pub use code::{Key, Value};
pub use error::{CacheError, FinalizerError, Result};
pub use metrics::MetricsSnapshot;
pub use scavenger::{unit_weight, CollectOutcome, LazyScavenger, Scavenger};
