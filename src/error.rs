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

use thiserror::Error;

/// Errors surfaced to callers of [`crate::Cache::do_with`] and
/// [`crate::Cache::do_with_wait`].
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The loader reported that the key does not exist, or no loader is
    /// configured.
    #[error("no such item")]
    NoSuchItem,
    /// Admission could not be granted without waiting.
    #[error("not enough space")]
    NotEnoughSpace,
    /// `do_with_wait` exceeded its deadline before admission succeeded.
    #[error("timed out waiting for capacity")]
    TimedOut,
}

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Error type returned by a user-supplied finalizer. Boxed because the
/// cache has no way to know the caller's concrete error type; finalizer
/// errors are logged and otherwise swallowed (see [`crate::CacheBuilder::finalizer`]).
pub type FinalizerError = Box<dyn std::error::Error + Send + Sync>;
