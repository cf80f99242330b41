// Copyright 2025 txcache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{fmt::Debug, hash::Hash};

/// Bounds for a key stored in a cache decorated by this crate.
///
/// `Clone` is required because a key read through the decorator may be
/// retained in the transaction overlay (memoized reads, loaded values).
pub trait Key: Send + Sync + 'static + Hash + Eq + Clone + Debug {}
impl<T> Key for T where T: Send + Sync + 'static + Hash + Eq + Clone + Debug {}

/// Bounds for a value stored in a cache decorated by this crate.
///
/// `Clone` is required because a pending value is handed out to readers
/// within the transaction while staying buffered for the commit flush.
pub trait Value: Send + Sync + 'static + Clone + Debug {}
impl<T> Value for T where T: Send + Sync + 'static + Clone + Debug {}
