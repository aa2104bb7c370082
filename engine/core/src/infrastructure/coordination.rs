// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Single-process keyed lock and negative cache.
//!
//! Both are enough for one node. A deployment with several nodes behind a
//! load balancer needs shared implementations of the same traits.

use crate::domain::coordination::{KeyedLock, KeyedLockGuard, NegativeCache};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Idle locks and expired cache entries are pruned once a table grows past
/// this size.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Default)]
pub struct InMemoryKeyedLock {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl InMemoryKeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn prune(&self) {
        if self.locks.len() > PRUNE_THRESHOLD {
            self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
    }
}

#[async_trait]
impl KeyedLock for InMemoryKeyedLock {
    async fn acquire(&self, key: &str, wait: Duration) -> Option<KeyedLockGuard> {
        self.prune();
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        tokio::time::timeout(wait, lock.lock_owned())
            .await
            .ok()
            .map(KeyedLockGuard::new)
    }
}

#[derive(Default)]
pub struct InMemoryNegativeCache {
    entries: DashMap<String, Instant>,
}

impl InMemoryNegativeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn prune(&self) {
        if self.entries.len() > PRUNE_THRESHOLD {
            let now = Instant::now();
            self.entries.retain(|_, expires_at| *expires_at > now);
        }
    }
}

impl NegativeCache for InMemoryNegativeCache {
    fn contains(&self, key: &str) -> bool {
        let expired = match self.entries.get(key) {
            Some(expires_at) => *expires_at <= Instant::now(),
            None => return false,
        };
        if expired {
            self.entries.remove(key);
        }
        !expired
    }

    fn insert(&self, key: &str, ttl: Duration) {
        self.prune();
        self.entries.insert(key.to_string(), Instant::now() + ttl);
    }
}
