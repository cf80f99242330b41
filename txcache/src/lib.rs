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

//! A transaction-aware decorator for key-value caches.
//!
//! txcache sits in front of an existing cache and buffers writes, evictions
//! and clears issued inside a transaction in a per-transaction overlay.
//! Pending changes are immediately visible to reads within the same
//! transaction and are flushed to the underlying cache exactly once, at
//! commit. On rollback the overlay is discarded and the underlying cache is
//! left untouched. Outside a transaction every operation delegates straight
//! to the underlying cache.
//!
//! The underlying cache is abstracted as a [`CacheBackend`], the
//! application's transaction machinery as a [`TransactionBoundary`] that
//! reports transaction activity and accepts one-shot commit/completion
//! callbacks.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use txcache::{
//!     prelude::*,
//!     test_utils::{ManualTransaction, MemoryBackend},
//! };
//!
//! let tx = ManualTransaction::new();
//! let cache = TransactionalCacheBuilder::new(
//!     MemoryBackend::<String, String>::new("users"),
//!     tx.clone() as Arc<dyn TransactionBoundary>,
//! )
//! .build();
//!
//! tx.begin();
//! cache.put("foo".to_string(), "bar".to_string()).unwrap();
//!
//! // Visible inside the transaction, not yet in the underlying cache.
//! assert_eq!(cache.get(&"foo".to_string()).unwrap().as_deref(), Some("bar"));
//! assert!(!cache.backend().contains(&"foo".to_string()));
//!
//! tx.commit().unwrap();
//! assert!(cache.backend().contains(&"foo".to_string()));
//! ```

mod assert;
mod backend;
mod cache;
mod code;
mod error;
mod metrics;
mod overlay;
mod transaction;

pub mod test_utils;

pub mod prelude;
pub use prelude::*;
