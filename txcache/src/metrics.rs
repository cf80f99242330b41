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

use std::sync::atomic::AtomicUsize;

/// Operation counters for one decorated cache, shared by all of its clones.
#[derive(Debug, Default)]
pub struct Metrics {
    /// reads answered from the transaction overlay
    pub overlay_hit: AtomicUsize,
    /// reads that fell through to the underlying cache
    pub fallthrough: AtomicUsize,
    /// reads suppressed by a transaction-local clear
    pub cleared_miss: AtomicUsize,

    /// pending writes recorded
    pub pending_write: AtomicUsize,
    /// pending evicts recorded
    pub pending_evict: AtomicUsize,
    /// transaction-local clears recorded
    pub pending_clear: AtomicUsize,

    /// operations delegated straight through outside a transaction
    pub passthrough: AtomicUsize,
    /// commit-time overlay flushes
    pub reconcile: AtomicUsize,
}
