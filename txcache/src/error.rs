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

use std::fmt::Debug;

/// Transactional cache error.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An operation whose underlying-cache semantics cannot be honored
    /// against pending, uncommitted overlay state was invoked inside a
    /// transaction while unsafe operations are disallowed.
    #[error("unsafe operation within a transaction: {0}")]
    UnsafeOperation(&'static str),
    /// A value loader handed to a read-with-loader operation failed.
    ///
    /// Carries the key the load was for and the wrapped cause. Loader
    /// failures are never surfaced as-is so callers can tell them apart
    /// from cache failures.
    #[error("value retrieval failed for key {key}")]
    ValueRetrieval {
        /// The key the failed load was for.
        key: String,
        /// The original loader failure.
        #[source]
        source: anyhow::Error,
    },
    /// Config error.
    #[error("config error: {0}")]
    Config(String),
    /// Failure raised by an underlying cache, propagated untouched.
    #[error(transparent)]
    Backend(anyhow::Error),
}

impl Error {
    /// Helper for wrapping an underlying cache failure.
    pub fn backend(source: impl Into<anyhow::Error>) -> Self {
        Self::Backend(source.into())
    }

    /// Helper for wrapping a loader failure with the key it was for.
    pub fn value_retrieval<K>(key: &K, source: impl Into<anyhow::Error>) -> Self
    where
        K: Debug,
    {
        Self::ValueRetrieval {
            key: format!("{key:?}"),
            source: source.into(),
        }
    }

    /// Helper for creating a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// Transactional cache result.
pub type Result<T> = std::result::Result<T, Error>;
