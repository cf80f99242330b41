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

//! Utilities for testing: an in-memory backend and a manually driven
//! transaction boundary.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use hashbrown::{hash_map::Entry, HashMap};
use parking_lot::Mutex;

use crate::{
    backend::CacheBackend,
    code::{Key, Value},
    error::Result,
    transaction::{
        TransactionBoundary, TransactionOutcome, TransactionState, TransactionStateRef,
        TransactionSynchronization,
    },
};

/// A plain in-memory [`CacheBackend`] with out-of-band inspection helpers
/// and call counters.
#[derive(Debug)]
pub struct MemoryBackend<K, V> {
    name: String,
    map: Mutex<HashMap<K, V>>,
    reads: AtomicUsize,
    mutations: AtomicUsize,
}

impl<K, V> MemoryBackend<K, V>
where
    K: Key,
    V: Value,
{
    /// Create an empty backend named `name`.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            map: Mutex::new(HashMap::new()),
            reads: AtomicUsize::new(0),
            mutations: AtomicUsize::new(0),
        }
    }

    /// Snapshot of the current contents.
    pub fn snapshot(&self) -> HashMap<K, V> {
        self.map.lock().clone()
    }

    /// Whether `key` is physically present.
    pub fn contains(&self, key: &K) -> bool {
        self.map.lock().contains_key(key)
    }

    /// Number of stored associations.
    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    /// Whether the backend holds no associations.
    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }

    /// Insert directly, bypassing any decorator. Models out-of-band writes
    /// by other parties.
    pub fn seed(&self, key: K, value: V) {
        self.map.lock().insert(key, value);
    }

    /// Remove directly, bypassing any decorator.
    pub fn unseed(&self, key: &K) {
        self.map.lock().remove(key);
    }

    /// Number of lookups served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of mutating calls (put, put_if_absent, evict, clear) served
    /// so far.
    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::Relaxed)
    }
}

impl<K, V> CacheBackend for MemoryBackend<K, V>
where
    K: Key,
    V: Value,
{
    type Key = K;
    type Value = V;

    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &K) -> Result<Option<V>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.map.lock().get(key).cloned())
    }

    fn put(&self, key: K, value: V) -> Result<()> {
        self.mutations.fetch_add(1, Ordering::Relaxed);
        self.map.lock().insert(key, value);
        Ok(())
    }

    fn put_if_absent(&self, key: K, value: V) -> Result<Option<V>> {
        self.mutations.fetch_add(1, Ordering::Relaxed);
        match self.map.lock().entry(key) {
            Entry::Occupied(entry) => Ok(Some(entry.get().clone())),
            Entry::Vacant(entry) => {
                entry.insert(value);
                Ok(None)
            }
        }
    }

    fn evict(&self, key: &K) -> Result<()> {
        self.mutations.fetch_add(1, Ordering::Relaxed);
        self.map.lock().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.mutations.fetch_add(1, Ordering::Relaxed);
        self.map.lock().clear();
        Ok(())
    }
}

#[derive(Default)]
struct ManualTransactionInner {
    state: Option<TransactionStateRef>,
    syncs: Vec<TransactionSynchronization>,
    accepting: bool,
}

/// A manually driven [`TransactionBoundary`] for a single execution
/// context.
///
/// Tests call [`begin`](ManualTransaction::begin), run cache operations,
/// then [`commit`](ManualTransaction::commit) or
/// [`rollback`](ManualTransaction::rollback) to fire the registered
/// callbacks the way a real transaction manager would.
#[derive(Default)]
pub struct ManualTransaction {
    inner: Mutex<ManualTransactionInner>,
}

impl ManualTransaction {
    /// Create an inactive boundary.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Begin a transaction on this context.
    ///
    /// # Panics
    ///
    /// Panics if a transaction is already active.
    pub fn begin(&self) {
        let mut inner = self.inner.lock();
        assert!(inner.state.is_none(), "transaction already active");
        inner.state = Some(Arc::new(Mutex::new(TransactionState::default())));
        inner.accepting = true;
    }

    /// Stop accepting callback registrations while keeping the transaction
    /// active. Models a boundary mechanism that was available moments
    /// earlier but has gone away.
    pub fn stop_accepting(&self) {
        self.inner.lock().accepting = false;
    }

    /// Commit the active transaction: run every commit callback, then every
    /// completion callback.
    ///
    /// The first commit callback failure aborts the remaining commit
    /// callbacks; completion callbacks still run.
    pub fn commit(&self) -> Result<()> {
        let (_state, syncs) = self.end();

        let mut result = Ok(());
        let mut completions = Vec::with_capacity(syncs.len());
        for sync in syncs {
            let (on_commit, on_completion) = sync.into_parts();
            if result.is_ok() {
                result = on_commit();
            }
            completions.push(on_completion);
        }
        for on_completion in completions {
            on_completion(TransactionOutcome::Committed);
        }
        result
    }

    /// Roll back the active transaction: completion callbacks only.
    pub fn rollback(&self) {
        let (_state, syncs) = self.end();
        for sync in syncs {
            let (_on_commit, on_completion) = sync.into_parts();
            on_completion(TransactionOutcome::RolledBack);
        }
    }

    /// State handle of the active transaction, if any.
    pub fn state(&self) -> Option<TransactionStateRef> {
        self.inner.lock().state.clone()
    }

    /// Number of callback registrations accepted for the active
    /// transaction.
    pub fn registered_syncs(&self) -> usize {
        self.inner.lock().syncs.len()
    }

    /// Whether no transactional state is left over: either no transaction
    /// is active, or the active transaction's overlays hold no pending
    /// state. Mirrors the cleanup check of a well-behaved transaction
    /// manager.
    pub fn is_clean(&self) -> bool {
        self.inner
            .lock()
            .state
            .as_ref()
            .is_none_or(|state| state.lock().is_clean())
    }

    fn end(&self) -> (Option<TransactionStateRef>, Vec<TransactionSynchronization>) {
        let mut inner = self.inner.lock();
        inner.accepting = false;
        (inner.state.take(), std::mem::take(&mut inner.syncs))
    }
}

impl TransactionBoundary for ManualTransaction {
    fn current(&self) -> Option<TransactionStateRef> {
        self.inner.lock().state.clone()
    }

    fn register(
        &self,
        sync: TransactionSynchronization,
    ) -> std::result::Result<(), TransactionSynchronization> {
        let mut inner = self.inner.lock();
        if inner.accepting {
            inner.syncs.push(sync);
            Ok(())
        } else {
            Err(sync)
        }
    }
}
