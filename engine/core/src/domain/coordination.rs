// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Cross-request coordination primitives used by the resolver.

use async_trait::async_trait;
use std::time::Duration;

/// Held while a keyed lock is owned; dropping it releases the lock.
pub struct KeyedLockGuard {
    _inner: Box<dyn Send + Sync>,
}

impl KeyedLockGuard {
    pub fn new(inner: impl Send + Sync + 'static) -> Self {
        Self {
            _inner: Box::new(inner),
        }
    }
}

/// Mutual exclusion per string key, shared by all concurrent decisions.
#[async_trait]
pub trait KeyedLock: Send + Sync {
    /// Wait at most `wait` for the lock; `None` if another holder kept it.
    async fn acquire(&self, key: &str, wait: Duration) -> Option<KeyedLockGuard>;
}

/// Short-lived "known missing" markers.
pub trait NegativeCache: Send + Sync {
    fn contains(&self, key: &str) -> bool;

    fn insert(&self, key: &str, ttl: Duration);
}
