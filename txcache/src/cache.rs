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

use std::{
    fmt::{self, Debug},
    sync::{atomic::Ordering, Arc},
};

use tracing::debug;

use crate::{
    backend::CacheBackend,
    error::{Error, Result},
    metrics::Metrics,
    overlay::EntryState,
    transaction::{TransactionBoundary, TransactionState, TransactionStateRef, TransactionSynchronization},
};

/// Builder for a [`TransactionalCache`].
pub struct TransactionalCacheBuilder<B>
where
    B: CacheBackend,
{
    backend: Arc<B>,
    boundary: Arc<dyn TransactionBoundary>,
    memoize_reads: bool,
    allow_unsafe: bool,
}

impl<B> TransactionalCacheBuilder<B>
where
    B: CacheBackend,
{
    /// Create a builder decorating `backend`, resolving transactions via
    /// `boundary`.
    pub fn new(backend: B, boundary: Arc<dyn TransactionBoundary>) -> Self {
        Self {
            backend: Arc::new(backend),
            boundary,
            memoize_reads: false,
            allow_unsafe: false,
        }
    }

    /// Memoize successful reads from the underlying cache for the rest of
    /// the transaction, trading one extra overlay lookup for avoiding
    /// repeat round-trips to a potentially remote cache. Memoized reads are
    /// never written back at commit.
    ///
    /// Default: disabled.
    pub fn with_memoize_reads(mut self, memoize_reads: bool) -> Self {
        self.memoize_reads = memoize_reads;
        self
    }

    /// Allow [`TransactionalCache::put_if_absent`] to pass through to the
    /// underlying cache inside a transaction instead of failing. The
    /// check-and-set then ignores pending overlay state for that key; the
    /// caller accepts that risk.
    ///
    /// Default: disabled.
    pub fn with_allow_unsafe(mut self, allow_unsafe: bool) -> Self {
        self.allow_unsafe = allow_unsafe;
        self
    }

    /// Build the decorated cache.
    pub fn build(self) -> TransactionalCache<B> {
        TransactionalCache {
            backend: self.backend,
            boundary: self.boundary,
            memoize_reads: self.memoize_reads,
            allow_unsafe: self.allow_unsafe,
            metrics: Arc::new(Metrics::default()),
        }
    }
}

/// A cache decorator that defers writes, evictions and clears issued inside
/// a transaction until that transaction commits.
///
/// Pending changes are immediately visible to reads within the same
/// transaction. The underlying cache is mutated exactly once, at commit; on
/// rollback all pending changes are discarded and the underlying cache is
/// left untouched. Outside a transaction every operation delegates straight
/// to the underlying cache.
///
/// Cloning is cheap; all clones share the same backend and counters.
pub struct TransactionalCache<B>
where
    B: CacheBackend,
{
    backend: Arc<B>,
    boundary: Arc<dyn TransactionBoundary>,
    memoize_reads: bool,
    allow_unsafe: bool,
    metrics: Arc<Metrics>,
}

impl<B> Clone for TransactionalCache<B>
where
    B: CacheBackend,
{
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            boundary: Arc::clone(&self.boundary),
            memoize_reads: self.memoize_reads,
            allow_unsafe: self.allow_unsafe,
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<B> Debug for TransactionalCache<B>
where
    B: CacheBackend,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionalCache")
            .field("cache", &self.backend.name())
            .field("memoize_reads", &self.memoize_reads)
            .field("allow_unsafe", &self.allow_unsafe)
            .finish()
    }
}

impl<B> TransactionalCache<B>
where
    B: CacheBackend,
{
    /// Name of the underlying cache.
    pub fn name(&self) -> &str {
        self.backend.name()
    }

    /// The decorated underlying cache.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Operation counters of this decorator.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Look up `key`.
    ///
    /// Within a transaction, pending overlay state wins over the underlying
    /// cache: a pending evict or an earlier transaction-local clear hides
    /// the upstream value, while a pending write or a memoized read is
    /// returned as is. Without an active transaction this is a straight
    /// delegation and no overlay is created.
    pub fn get(&self, key: &B::Key) -> Result<Option<B::Value>> {
        let Some(state) = self.boundary.current() else {
            self.metrics.passthrough.fetch_add(1, Ordering::Relaxed);
            return self.backend.get(key);
        };

        let mut guard = state.lock();
        let overlay = guard.overlay_mut(&self.backend, &self.metrics)?;

        if let Some(entry) = overlay.entry(key) {
            self.metrics.overlay_hit.fetch_add(1, Ordering::Relaxed);
            return Ok(match entry {
                EntryState::PendingEvict => None,
                EntryState::CachedRead(value) => value.clone(),
                EntryState::PendingWrite(value) => Some(value.clone()),
            });
        }

        if overlay.is_cleared() {
            // A clear earlier in this transaction logically emptied the
            // cache; do not consult upstream.
            self.metrics.cleared_miss.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        debug!(cache = self.backend.name(), key = ?key, "fetching from underlying cache");
        self.metrics.fallthrough.fetch_add(1, Ordering::Relaxed);
        let fetched = self.backend.get(key)?;

        if self.memoize_reads {
            overlay.insert(key.clone(), EntryState::CachedRead(fetched.clone()));
            self.arm(&state, &mut guard)?;
        }

        Ok(fetched)
    }

    /// Look up `key`, invoking `loader` on a miss.
    ///
    /// The loader runs at most once. Its failure is wrapped into
    /// [`Error::ValueRetrieval`] carrying the key, so callers can tell
    /// loader failures apart from cache failures. A loaded value is
    /// recorded as a pending write: unlike a memoized read it is flushed to
    /// the underlying cache at commit.
    pub fn get_or_load<F>(&self, key: &B::Key, loader: F) -> Result<B::Value>
    where
        F: FnOnce() -> anyhow::Result<B::Value>,
    {
        if self.boundary.current().is_none() {
            self.metrics.passthrough.fetch_add(1, Ordering::Relaxed);
            return self.backend.get_or_load(key, loader);
        }

        if let Some(value) = self.get(key)? {
            return Ok(value);
        }

        let value = loader().map_err(|source| Error::value_retrieval(key, source))?;

        // The boundary could have completed while the loader ran; resolve
        // the state afresh rather than reusing a stale handle.
        let Some(state) = self.boundary.current() else {
            self.metrics.passthrough.fetch_add(1, Ordering::Relaxed);
            self.backend.put(key.clone(), value.clone())?;
            return Ok(value);
        };

        let mut guard = state.lock();
        let overlay = guard.overlay_mut(&self.backend, &self.metrics)?;
        overlay.insert(key.clone(), EntryState::PendingWrite(value.clone()));
        self.metrics.pending_write.fetch_add(1, Ordering::Relaxed);
        self.arm(&state, &mut guard)?;

        Ok(value)
    }

    /// Associate `value` with `key`.
    ///
    /// Inside a transaction the write stays pending until commit and
    /// replaces any earlier pending state for `key`.
    pub fn put(&self, key: B::Key, value: B::Value) -> Result<()> {
        let Some(state) = self.boundary.current() else {
            self.metrics.passthrough.fetch_add(1, Ordering::Relaxed);
            return self.backend.put(key, value);
        };

        let mut guard = state.lock();
        let overlay = guard.overlay_mut(&self.backend, &self.metrics)?;
        overlay.insert(key, EntryState::PendingWrite(value));
        self.metrics.pending_write.fetch_add(1, Ordering::Relaxed);
        self.arm(&state, &mut guard)
    }

    /// Atomic check-and-set on the underlying cache.
    ///
    /// The check cannot be answered correctly against pending, uncommitted
    /// overlay state, so inside a transaction this fails with
    /// [`Error::UnsafeOperation`] unless the decorator was built with
    /// [`TransactionalCacheBuilder::with_allow_unsafe`], in which case it
    /// passes straight through to the underlying cache.
    pub fn put_if_absent(&self, key: B::Key, value: B::Value) -> Result<Option<B::Value>> {
        if self.boundary.current().is_some() && !self.allow_unsafe {
            return Err(Error::UnsafeOperation(
                "put_if_absent cannot honor pending transactional state",
            ));
        }
        self.backend.put_if_absent(key, value)
    }

    /// Remove the association for `key`.
    ///
    /// Inside a transaction the underlying cache keeps the key until
    /// commit, but it is unobservable through this decorator from this
    /// point in the transaction onward.
    pub fn evict(&self, key: &B::Key) -> Result<()> {
        let Some(state) = self.boundary.current() else {
            self.metrics.passthrough.fetch_add(1, Ordering::Relaxed);
            return self.backend.evict(key);
        };

        let mut guard = state.lock();
        let overlay = guard.overlay_mut(&self.backend, &self.metrics)?;
        overlay.insert(key.clone(), EntryState::PendingEvict);
        self.metrics.pending_evict.fetch_add(1, Ordering::Relaxed);
        self.arm(&state, &mut guard)
    }

    /// Remove all associations.
    ///
    /// Inside a transaction this only marks the overlay as cleared and
    /// discards its pending entries; keys without a later pending write
    /// read as absent while the underlying cache stays untouched until
    /// commit.
    pub fn clear(&self) -> Result<()> {
        let Some(state) = self.boundary.current() else {
            self.metrics.passthrough.fetch_add(1, Ordering::Relaxed);
            return self.backend.clear();
        };

        let mut guard = state.lock();
        let overlay = guard.overlay_mut(&self.backend, &self.metrics)?;
        overlay.mark_cleared();
        self.metrics.pending_clear.fetch_add(1, Ordering::Relaxed);
        self.arm(&state, &mut guard)
    }

    /// Arm the commit/completion hook for the current transaction, once.
    ///
    /// When the boundary mechanism has gone away between the activity check
    /// and the registration attempt, the pending state is applied
    /// synchronously so the mutation is never silently lost.
    fn arm(&self, state: &TransactionStateRef, guard: &mut TransactionState) -> Result<()> {
        if guard.is_synced() {
            return Ok(());
        }

        let commit_state = Arc::clone(state);
        let completion_state = Arc::clone(state);
        let sync = TransactionSynchronization::new(
            Box::new(move || commit_state.lock().reconcile_all()),
            Box::new(move |outcome| {
                debug!(?outcome, "transaction completed, discarding transactional state");
                completion_state.lock().discard();
            }),
        );

        match self.boundary.register(sync) {
            Ok(()) => {
                guard.mark_synced();
                debug!(cache = self.backend.name(), "transaction boundary hook armed");
                Ok(())
            }
            Err(_sync) => {
                debug!(
                    cache = self.backend.name(),
                    "no boundary mechanism active, reconciling synchronously"
                );
                let result = guard.reconcile_all();
                guard.discard();
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ManualTransaction, MemoryBackend};

    fn s(v: &str) -> String {
        v.to_string()
    }

    fn setup() -> (Arc<ManualTransaction>, TransactionalCache<MemoryBackend<String, String>>) {
        let tx = ManualTransaction::new();
        let cache = TransactionalCacheBuilder::new(
            MemoryBackend::new("my-cache"),
            Arc::clone(&tx) as Arc<dyn TransactionBoundary>,
        )
        .build();
        (tx, cache)
    }

    #[test]
    fn test_hook_armed_once_per_transaction() {
        let (tx, cache) = setup();

        tx.begin();
        cache.put(s("a"), s("1")).unwrap();
        cache.put(s("b"), s("2")).unwrap();
        cache.evict(&s("a")).unwrap();
        assert_eq!(tx.registered_syncs(), 1);

        tx.commit().unwrap();
        assert!(tx.is_clean());
    }

    #[test]
    fn test_unsafe_put_if_absent_is_rejected() {
        let (tx, cache) = setup();

        tx.begin();
        let err = cache.put_if_absent(s("foo"), s("bar")).unwrap_err();
        assert!(matches!(err, Error::UnsafeOperation(_)));
        tx.rollback();
    }

    #[test]
    fn test_unsafe_put_if_absent_passthrough_when_allowed() {
        let tx = ManualTransaction::new();
        let cache = TransactionalCacheBuilder::new(
            MemoryBackend::<String, String>::new("my-cache"),
            Arc::clone(&tx) as Arc<dyn TransactionBoundary>,
        )
        .with_allow_unsafe(true)
        .build();

        tx.begin();
        assert_eq!(cache.put_if_absent(s("foo"), s("bar")).unwrap(), None);
        // Passed straight through, visible upstream before commit.
        assert!(cache.backend().contains(&s("foo")));
        assert_eq!(cache.put_if_absent(s("foo"), s("baz")).unwrap(), Some(s("bar")));
        tx.rollback();
    }

    #[test]
    fn test_mutation_not_lost_when_boundary_vanishes() {
        let (tx, cache) = setup();

        tx.begin();
        tx.stop_accepting();
        cache.put(s("foo"), s("bar")).unwrap();

        // Applied synchronously instead of being deferred.
        assert!(cache.backend().contains(&s("foo")));
        assert_eq!(tx.registered_syncs(), 0);
        assert!(tx.is_clean());
        tx.rollback();
    }
}
