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
    any::Any,
    fmt::{self, Debug},
    sync::{atomic::Ordering, Arc},
};

use hashbrown::HashMap;
use tracing::debug;

use crate::{backend::CacheBackend, error::Result, metrics::Metrics, strict_assert};

/// Pending disposition of one key within one transaction's view of a cache.
///
/// The absence of an entry means "no pending state, fall through to the
/// underlying cache". There is at most one entry per key and it is always
/// replaced wholesale by a later operation on that key, never merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState<V> {
    /// A value fetched from the underlying cache and memoized for repeat
    /// reads within the transaction. `None` memoizes an upstream miss.
    /// Never written back at commit.
    CachedRead(Option<V>),
    /// An explicit put. Written back at commit.
    PendingWrite(V),
    /// An explicit evict. Applied as a delete at commit.
    PendingEvict,
}

/// The transaction-local shadow of pending changes to one underlying cache.
///
/// Once `clear()` was issued in the owning transaction, all keys without a
/// later pending entry are logically absent even though they may still be
/// physically present upstream.
pub struct CacheOverlay<B>
where
    B: CacheBackend,
{
    backend: Arc<B>,
    metrics: Arc<Metrics>,
    entries: HashMap<B::Key, EntryState<B::Value>>,
    cleared: bool,
}

impl<B> Debug for CacheOverlay<B>
where
    B: CacheBackend,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOverlay")
            .field("cache", &self.backend.name())
            .field("entries", &self.entries.len())
            .field("cleared", &self.cleared)
            .finish()
    }
}

impl<B> CacheOverlay<B>
where
    B: CacheBackend,
{
    pub(crate) fn new(backend: Arc<B>, metrics: Arc<Metrics>) -> Self {
        Self {
            backend,
            metrics,
            entries: HashMap::new(),
            cleared: false,
        }
    }

    /// Pending state for `key`, if any.
    pub fn entry(&self, key: &B::Key) -> Option<&EntryState<B::Value>> {
        self.entries.get(key)
    }

    /// Whether `clear()` was issued in the owning transaction.
    pub fn is_cleared(&self) -> bool {
        self.cleared
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the overlay holds no pending entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn insert(&mut self, key: B::Key, state: EntryState<B::Value>) {
        self.entries.insert(key, state);
    }

    pub(crate) fn mark_cleared(&mut self) {
        self.cleared = true;
        self.entries.clear();
    }

    /// Flush the net effect of this overlay into its underlying cache.
    ///
    /// A transaction-local clear is applied first: it logically precedes
    /// every entry still present, because `clear()` discarded all entries
    /// recorded before it. Then the final entry per key is applied; memoized
    /// reads are skipped, they only ever mirrored a value already upstream.
    ///
    /// The overlay is drained as it flushes so a later transaction reusing
    /// the same execution context can never replay it. Flushing is
    /// attempted at most once; on failure the remaining state is dropped
    /// with the overlay at completion.
    pub(crate) fn reconcile(&mut self) -> Result<()> {
        self.metrics.reconcile.fetch_add(1, Ordering::Relaxed);

        if self.cleared {
            debug!(cache = self.backend.name(), "clearing underlying cache");
            self.cleared = false;
            self.backend.clear()?;
        }

        for (key, state) in self.entries.drain() {
            match state {
                EntryState::PendingWrite(value) => {
                    debug!(cache = self.backend.name(), key = ?key, "writing pending value to underlying cache");
                    self.backend.put(key, value)?;
                }
                EntryState::PendingEvict => {
                    debug!(cache = self.backend.name(), key = ?key, "evicting key from underlying cache");
                    self.backend.evict(&key)?;
                }
                // Only a local memoization of a value already upstream.
                EntryState::CachedRead(_) => {}
            }
        }

        strict_assert!(self.entries.is_empty());
        strict_assert!(!self.cleared);

        Ok(())
    }
}

/// Object-safe view of a [`CacheOverlay`], so one transaction can span
/// caches with different key/value types.
pub(crate) trait AnyOverlay: Send {
    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn reconcile(&mut self) -> Result<()>;

    /// Whether the overlay holds no pending state at all. A reconciled
    /// overlay must always be drained.
    fn is_drained(&self) -> bool;
}

impl<B> AnyOverlay for CacheOverlay<B>
where
    B: CacheBackend,
{
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn reconcile(&mut self) -> Result<()> {
        CacheOverlay::reconcile(self)
    }

    fn is_drained(&self) -> bool {
        self.entries.is_empty() && !self.cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MemoryBackend;

    fn overlay() -> CacheOverlay<MemoryBackend<String, String>> {
        CacheOverlay::new(
            Arc::new(MemoryBackend::new("overlay-test")),
            Arc::new(Metrics::default()),
        )
    }

    fn s(v: &str) -> String {
        v.to_string()
    }

    #[test]
    fn test_entry_replaced_wholesale() {
        let mut overlay = overlay();

        overlay.insert(s("k"), EntryState::CachedRead(Some(s("old"))));
        overlay.insert(s("k"), EntryState::PendingWrite(s("new")));
        assert_eq!(overlay.entry(&s("k")), Some(&EntryState::PendingWrite(s("new"))));

        overlay.insert(s("k"), EntryState::PendingEvict);
        assert_eq!(overlay.entry(&s("k")), Some(&EntryState::PendingEvict));
        assert_eq!(overlay.len(), 1);
    }

    #[test]
    fn test_mark_cleared_discards_entries() {
        let mut overlay = overlay();

        overlay.insert(s("k"), EntryState::PendingWrite(s("v")));
        overlay.mark_cleared();

        assert!(overlay.is_cleared());
        assert!(overlay.is_empty());
    }

    #[test]
    fn test_reconcile_applies_net_effect() {
        let mut overlay = overlay();
        let backend = Arc::clone(&overlay.backend);

        backend.seed(s("stale"), s("gone-after-clear"));
        backend.seed(s("evicted"), s("gone-after-evict"));

        overlay.mark_cleared();
        overlay.insert(s("kept"), EntryState::PendingWrite(s("v")));
        overlay.insert(s("evicted"), EntryState::PendingEvict);
        overlay.insert(s("seen"), EntryState::CachedRead(Some(s("never-written"))));

        overlay.reconcile().unwrap();

        assert_eq!(backend.snapshot(), [(s("kept"), s("v"))].into_iter().collect());
        assert!(AnyOverlay::is_drained(&overlay));
    }

    #[test]
    fn test_reconcile_skips_memoized_reads() {
        let mut overlay = overlay();
        let backend = Arc::clone(&overlay.backend);

        overlay.insert(s("a"), EntryState::CachedRead(Some(s("v"))));
        overlay.insert(s("b"), EntryState::CachedRead(None));

        overlay.reconcile().unwrap();

        assert!(backend.is_empty());
        assert_eq!(backend.mutations(), 0);
    }
}
