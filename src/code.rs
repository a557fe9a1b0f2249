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

use std::hash::Hash;

/// Blanket bound for cache keys, mirroring `foyer_common::code::Key`.
pub trait Key: Eq + Hash + Clone + Send + Sync + 'static {}
impl<T> Key for T where T: Eq + Hash + Clone + Send + Sync + 'static {}

/// Blanket bound for cache values, mirroring `foyer_common::code::Value`.
pub trait Value: Send + Sync + 'static {}
impl<T> Value for T where T: Send + Sync + 'static {}
