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

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Broadcasts to every blocked `do_with_wait` caller on every unpin. Spec.md
/// explicitly does not require fairness between waiters, so a plain condvar
/// (rather than an explicit FIFO queue of waiter records) is enough: the OS
/// already queues the blocked threads, and each wakeup just re-attempts
/// admission from scratch.
pub(crate) struct WaitQueue {
    gate: Mutex<()>,
    condvar: Condvar,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self {
            gate: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    /// Blocks for at most `timeout`, or until the next `notify_all`.
    /// Returns without error on spurious wakeup; the caller is expected to
    /// re-check its condition and call this again if needed.
    pub fn wait_for(&self, timeout: Duration) {
        let mut guard = self.gate.lock();
        self.condvar.wait_for(&mut guard, timeout);
    }

    pub fn notify_all(&self) {
        self.condvar.notify_all();
    }
}
