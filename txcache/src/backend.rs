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

use crate::{
    code::{Key, Value},
    error::{Error, Result},
};

/// An underlying key-value cache addressable by name.
///
/// This is the contract the decorator defers to. Implementations may be
/// remote and slow; every operation is fallible and errors propagate to the
/// decorator's caller untouched.
///
/// Implementations must be safe for concurrent use by independent
/// transactions. This crate performs no additional locking around them.
pub trait CacheBackend: Send + Sync + 'static {
    /// Key type stored in this cache.
    type Key: Key;
    /// Value type stored in this cache.
    type Value: Value;

    /// Name of this cache. Transaction overlays are keyed by it.
    fn name(&self) -> &str;

    /// Look up `key`. `Ok(None)` means the key is not present.
    fn get(&self, key: &Self::Key) -> Result<Option<Self::Value>>;

    /// Associate `value` with `key`, replacing any existing association.
    fn put(&self, key: Self::Key, value: Self::Value) -> Result<()>;

    /// Associate `value` with `key` only if `key` has no association yet.
    ///
    /// Returns the pre-existing value, if any.
    fn put_if_absent(&self, key: Self::Key, value: Self::Value) -> Result<Option<Self::Value>>;

    /// Remove the association for `key`, if any.
    fn evict(&self, key: &Self::Key) -> Result<()>;

    /// Remove all associations.
    fn clear(&self) -> Result<()>;

    /// Look up `key`, invoking `loader` and caching its result on a miss.
    ///
    /// The loader is invoked at most once. Its failure is wrapped into
    /// [`Error::ValueRetrieval`] carrying the key.
    fn get_or_load<F>(&self, key: &Self::Key, loader: F) -> Result<Self::Value>
    where
        F: FnOnce() -> anyhow::Result<Self::Value>,
    {
        if let Some(value) = self.get(key)? {
            return Ok(value);
        }
        let value = loader().map_err(|source| Error::value_retrieval(key, source))?;
        self.put(key.clone(), value.clone())?;
        Ok(value)
    }
}
