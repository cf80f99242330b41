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
    sync::Arc,
};

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::{
    backend::CacheBackend,
    error::{Error, Result},
    metrics::Metrics,
    overlay::{AnyOverlay, CacheOverlay},
};

/// Outcome reported by the boundary mechanism at transaction completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// The transaction committed.
    Committed,
    /// The transaction rolled back.
    RolledBack,
    /// The outcome could not be determined.
    Unknown,
}

/// Shared handle to the state of one transaction on one execution context.
pub type TransactionStateRef = Arc<Mutex<TransactionState>>;

/// All per-cache overlays touched within one transaction, keyed by the name
/// of the underlying cache.
///
/// Created lazily on the first cache operation inside a transaction and
/// discarded exactly once when the transaction completes, whatever the
/// outcome. Owned by a single execution context; the boundary mechanism
/// must never share one state across contexts.
#[derive(Default)]
pub struct TransactionState {
    overlays: HashMap<String, Box<dyn AnyOverlay>>,
    synced: bool,
}

impl Debug for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionState")
            .field("overlays", &self.overlays.keys().collect::<Vec<_>>())
            .field("synced", &self.synced)
            .finish()
    }
}

impl TransactionState {
    /// Whether the commit/completion synchronization has been armed for
    /// this transaction.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Whether no overlay holds pending state. Always true after the
    /// commit flush and after a discard.
    pub fn is_clean(&self) -> bool {
        self.overlays.values().all(|overlay| overlay.is_drained())
    }

    /// Number of caches touched in this transaction.
    pub fn overlay_count(&self) -> usize {
        self.overlays.len()
    }

    pub(crate) fn mark_synced(&mut self) {
        self.synced = true;
    }

    /// Resolve the overlay for `backend`, creating it on first access.
    ///
    /// Fails with a config error when a differently typed backend was
    /// already registered under the same name in this transaction.
    pub(crate) fn overlay_mut<B>(
        &mut self,
        backend: &Arc<B>,
        metrics: &Arc<Metrics>,
    ) -> Result<&mut CacheOverlay<B>>
    where
        B: CacheBackend,
    {
        self.overlays
            .entry_ref(backend.name())
            .or_insert_with(|| {
                Box::new(CacheOverlay::new(Arc::clone(backend), Arc::clone(metrics))) as Box<dyn AnyOverlay>
            })
            .as_any_mut()
            .downcast_mut::<CacheOverlay<B>>()
            .ok_or_else(|| {
                Error::config(format!(
                    "cache {:?} is already overlaid with different key/value types in this transaction",
                    backend.name()
                ))
            })
    }

    /// Flush every overlay touched in this transaction into its underlying
    /// cache. Invoked once, at commit.
    pub(crate) fn reconcile_all(&mut self) -> Result<()> {
        for (name, overlay) in self.overlays.iter_mut() {
            debug!(cache = name.as_str(), "flushing overlay");
            overlay.reconcile()?;
        }
        Ok(())
    }

    /// Drop all overlays, regardless of outcome.
    pub(crate) fn discard(&mut self) {
        self.overlays.clear();
        self.synced = false;
    }
}

/// One-shot commit/completion callbacks registered with the boundary
/// mechanism.
///
/// `on_commit` runs after the commit decision and before `on_completion`.
/// `on_completion` runs exactly once per transaction, after commit handling
/// or directly on rollback. The boundary mechanism must invoke each at most
/// once.
pub struct TransactionSynchronization {
    on_commit: Box<dyn FnOnce() -> Result<()> + Send>,
    on_completion: Box<dyn FnOnce(TransactionOutcome) + Send>,
}

impl Debug for TransactionSynchronization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionSynchronization").finish()
    }
}

impl TransactionSynchronization {
    /// Bundle the two callbacks.
    pub fn new(
        on_commit: Box<dyn FnOnce() -> Result<()> + Send>,
        on_completion: Box<dyn FnOnce(TransactionOutcome) + Send>,
    ) -> Self {
        Self { on_commit, on_completion }
    }

    /// Split into the commit and completion callbacks, in that order.
    pub fn into_parts(
        self,
    ) -> (
        Box<dyn FnOnce() -> Result<()> + Send>,
        Box<dyn FnOnce(TransactionOutcome) + Send>,
    ) {
        (self.on_commit, self.on_completion)
    }
}

/// Access to the transaction bound to the calling execution context.
///
/// Implemented by the application's transaction plumbing; this crate only
/// consumes it. The `test_utils` module ships `ManualTransaction`, a simple
/// single-context implementation for tests and examples.
pub trait TransactionBoundary: Send + Sync + 'static {
    /// State of the transaction active on the calling context, or `None`
    /// when no transaction is active.
    fn current(&self) -> Option<TransactionStateRef>;

    /// Register one-shot commit/completion callbacks with the active
    /// transaction.
    ///
    /// Hands the callbacks back as `Err` when no boundary mechanism is
    /// active anymore; the caller is then responsible for applying pending
    /// changes immediately so they are never silently lost.
    fn register(
        &self,
        sync: TransactionSynchronization,
    ) -> std::result::Result<(), TransactionSynchronization>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MemoryBackend;

    #[test]
    fn test_overlay_created_lazily_per_cache() {
        let mut state = TransactionState::default();
        let metrics = Arc::new(Metrics::default());
        let a = Arc::new(MemoryBackend::<String, String>::new("a"));
        let b = Arc::new(MemoryBackend::<String, String>::new("b"));

        assert_eq!(state.overlay_count(), 0);
        state.overlay_mut(&a, &metrics).unwrap();
        state.overlay_mut(&a, &metrics).unwrap();
        state.overlay_mut(&b, &metrics).unwrap();
        assert_eq!(state.overlay_count(), 2);
    }

    #[test]
    fn test_conflicting_types_for_one_name() {
        let mut state = TransactionState::default();
        let metrics = Arc::new(Metrics::default());
        let strings = Arc::new(MemoryBackend::<String, String>::new("shared"));
        let numbers = Arc::new(MemoryBackend::<u64, u64>::new("shared"));

        state.overlay_mut(&strings, &metrics).unwrap();
        let err = state.overlay_mut(&numbers, &metrics).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_discard_resets_state() {
        let mut state = TransactionState::default();
        let metrics = Arc::new(Metrics::default());
        let backend = Arc::new(MemoryBackend::<String, String>::new("a"));

        state.overlay_mut(&backend, &metrics).unwrap();
        state.mark_synced();

        state.discard();
        assert_eq!(state.overlay_count(), 0);
        assert!(!state.is_synced());
        assert!(state.is_clean());
    }
}
