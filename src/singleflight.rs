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
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::code::Key;
use crate::error::CacheError;

/// One in-flight load. The leader publishes its result here; followers
/// block on the condvar until it does.
pub(crate) struct Slot {
    result: Mutex<Option<Result<(), CacheError>>>,
    done: Condvar,
}

impl Slot {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    pub(crate) fn publish(&self, result: Result<(), CacheError>) {
        *self.result.lock() = Some(result);
        self.done.notify_all();
    }

    pub(crate) fn wait(&self) -> Result<(), CacheError> {
        let mut guard = self.result.lock();
        while guard.is_none() {
            self.done.wait(&mut guard);
        }
        guard.clone().unwrap()
    }
}

/// Deduplicates concurrent loader invocations for the same key: the first
/// caller to reach a key becomes its leader and runs the loader, everyone
/// else joins as a follower and waits for the leader's published result.
pub(crate) struct LoadCoordinator<K> {
    inflight: Mutex<HashMap<K, Arc<Slot>>>,
}

pub(crate) enum Joined {
    Leader(Arc<Slot>),
    Follower(Arc<Slot>),
}

impl<K: Key> LoadCoordinator<K> {
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn join(&self, key: K) -> Joined {
        let mut guard = self.inflight.lock();
        if let Some(slot) = guard.get(&key) {
            Joined::Follower(slot.clone())
        } else {
            let slot = Arc::new(Slot::new());
            guard.insert(key, slot.clone());
            Joined::Leader(slot)
        }
    }

    /// Publishes `result` to every follower waiting on `slot` and retires
    /// this key so a future call starts a fresh load.
    pub fn publish(&self, key: &K, slot: &Slot, result: Result<(), CacheError>) {
        slot.publish(result);
        self.inflight.lock().remove(key);
    }
}
