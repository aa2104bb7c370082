// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Customer Resolution
//!
//! Works out who a call belongs to: the synchronized conference answering to
//! the local alias, the active gateway rule, and the owning customer with its
//! `require_authorization` flag.
//!
//! When nothing is known locally the [`ConferenceFetcher`] may ask the
//! cluster for the conference. One fetch per alias is in flight at a time and
//! misses are remembered for a short while, so a slow cluster is not flooded
//! by retries.

use crate::application::error::DecisionError;
use crate::application::rule_service::RuleService;
use crate::domain::alias::normalize_alias;
use crate::domain::call::CallParams;
use crate::domain::cluster::ClusterId;
use crate::domain::coordination::{KeyedLock, NegativeCache};
use crate::domain::customer::{Conference, CustomerId, CustomerMatch};
use crate::domain::pattern::PatternEngine;
use crate::domain::repository::{ConferenceStore, CustomerStore};
use crate::domain::routing_rule::RoutingRule;
use crate::domain::upstream::{ConferenceSource, UpstreamError};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};

/// What is known about the call's owner before any policy is applied.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub customer: Option<CustomerId>,
    pub conference: Option<Conference>,
    pub gateway_rule: Option<RoutingRule>,
    pub customer_match: Option<CustomerMatch>,
    pub needs_auth: bool,
}

/// Aliases addressed at a bare IPv4 host are almost always scanners.
fn is_ip_literal_alias(alias: &str) -> bool {
    static IP_ALIAS: OnceLock<Option<Regex>> = OnceLock::new();
    IP_ALIAS
        .get_or_init(|| Regex::new(r"@\d+\.\d+\.\d+\.\d+").ok())
        .as_ref()
        .map(|re| re.is_match(alias))
        .unwrap_or(false)
}

pub struct ConferenceFetcher {
    source: Arc<dyn ConferenceSource>,
    store: Arc<dyn ConferenceStore>,
    lock: Arc<dyn KeyedLock>,
    misses: Arc<dyn NegativeCache>,
    timeout: Duration,
    lock_wait: Duration,
    miss_ttl: Duration,
    strict: bool,
}

impl ConferenceFetcher {
    pub fn new(
        source: Arc<dyn ConferenceSource>,
        store: Arc<dyn ConferenceStore>,
        lock: Arc<dyn KeyedLock>,
        misses: Arc<dyn NegativeCache>,
    ) -> Self {
        Self {
            source,
            store,
            lock,
            misses,
            timeout: Duration::from_secs(3),
            lock_wait: Duration::from_secs(3),
            miss_ttl: Duration::from_secs(10),
            strict: false,
        }
    }

    pub fn with_timeouts(mut self, timeout: Duration, lock_wait: Duration, miss_ttl: Duration) -> Self {
        self.timeout = timeout;
        self.lock_wait = lock_wait;
        self.miss_ttl = miss_ttl;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn cache_key(alias: &str) -> String {
        format!("conference.fetch.{:x}", md5::compute(alias.as_bytes()))
    }

    fn lock_key(alias: &str) -> String {
        format!("conference.fetch.lock.{:x}", md5::compute(alias.as_bytes()))
    }

    /// Fetch and store the conference for `alias`.
    pub async fn fetch(&self, cluster_id: ClusterId, alias: &str) -> Result<Option<Conference>, DecisionError> {
        let cache_key = Self::cache_key(alias);
        if self.misses.contains(&cache_key) {
            debug!("Conference for {} recently missing, not fetching", alias);
            return Ok(None);
        }

        let Some(_guard) = self.lock.acquire(&Self::lock_key(alias), self.lock_wait).await else {
            warn!("Missing conference alias for policy response, but a pending request already exists");
            return Ok(None);
        };

        // The previous holder may have finished the same fetch.
        if self.misses.contains(&cache_key) {
            return Ok(None);
        }
        if let Some(conference) = self.store.find_by_alias(cluster_id, alias).await? {
            return Ok(Some(conference));
        }

        let fetched = match tokio::time::timeout(self.timeout, self.source.fetch_conference(cluster_id, alias)).await {
            Ok(Ok(conference)) => conference,
            Ok(Err(UpstreamError::NotFound(_))) => None,
            Ok(Err(e)) => {
                self.misses.insert(&cache_key, self.miss_ttl);
                if self.strict {
                    return Err(e.into());
                }
                warn!("Conference fetch for {} failed: {}", alias, e);
                None
            }
            Err(_) => {
                self.misses.insert(&cache_key, self.miss_ttl);
                if self.strict {
                    return Err(UpstreamError::Timeout(self.timeout).into());
                }
                warn!("Timeout before getting conference response for missing alias {}", alias);
                None
            }
        };

        match &fetched {
            Some(conference) => self.store.save(conference).await?,
            None => self.misses.insert(&cache_key, self.miss_ttl),
        }
        Ok(fetched)
    }
}

pub struct CustomerResolver {
    customers: Arc<dyn CustomerStore>,
    conferences: Arc<dyn ConferenceStore>,
    rules: Arc<RuleService>,
    patterns: Arc<PatternEngine>,
    fetcher: Option<Arc<ConferenceFetcher>>,
}

impl CustomerResolver {
    pub fn new(
        customers: Arc<dyn CustomerStore>,
        conferences: Arc<dyn ConferenceStore>,
        rules: Arc<RuleService>,
        patterns: Arc<PatternEngine>,
    ) -> Self {
        Self {
            customers,
            conferences,
            rules,
            patterns,
            fetcher: None,
        }
    }

    /// Enable live fetching of unknown conferences.
    pub fn with_fetcher(mut self, fetcher: Arc<ConferenceFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub async fn resolve(&self, cluster_id: ClusterId, params: &CallParams) -> Result<Resolution, DecisionError> {
        let local = normalize_alias(&params.local_alias());
        let remote = normalize_alias(&params.remote_alias());

        let mut resolution = Resolution {
            conference: self.conferences.find_by_alias(cluster_id, &local).await?,
            gateway_rule: self.rules.get_active_rule(cluster_id, params).await?,
            ..Resolution::default()
        };

        let matches = self.customers.matches_for(cluster_id).await?;

        if let Some(conference) = &resolution.conference {
            resolution.customer = conference.customer_id;
            if let Some(match_id) = conference.match_id {
                if let Some(m) = matches.iter().find(|m| m.id == match_id) {
                    resolution.needs_auth |= m.require_authorization;
                    resolution.customer_match = Some(m.clone());
                }
            }
        }

        if resolution.customer_match.is_none() {
            if let Some(m) = self.find_match(&matches, &[&local, &remote])? {
                resolution.customer = resolution.customer.or(Some(m.customer_id));
                resolution.needs_auth |= m.require_authorization;
                resolution.customer_match = Some(m);
            }
        }

        if resolution.conference.is_none()
            && resolution.gateway_rule.is_none()
            && (resolution.customer.is_some() || resolution.customer_match.is_some())
        {
            if let Some(fetcher) = &self.fetcher {
                if is_ip_literal_alias(&local) {
                    debug!("Not fetching conference for IP literal alias {}", local);
                } else {
                    resolution.conference = fetcher.fetch(cluster_id, &local).await?;
                }
            }
        }

        debug!(
            "Resolved call to {}: customer={:?} conference={:?} rule={:?} needs_auth={}",
            local,
            resolution.customer,
            resolution.conference.as_ref().map(|c| c.name.as_str()),
            resolution.gateway_rule.as_ref().map(|r| r.id),
            resolution.needs_auth
        );
        Ok(resolution)
    }

    /// First match over the aliases in order, each tried against all matches.
    fn find_match(&self, matches: &[CustomerMatch], aliases: &[&str]) -> Result<Option<CustomerMatch>, DecisionError> {
        let mut ordered: Vec<&CustomerMatch> = matches.iter().collect();
        ordered.sort_by_key(|m| m.sort_key());

        for alias in aliases.iter().filter(|a| !a.is_empty()) {
            let needle = alias.to_lowercase();
            for m in &ordered {
                if m.matches(&needle, &self.patterns)? {
                    return Ok(Some((*m).clone()));
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::customer::{ConferenceId, CustomerMatchId, CustomerMatchMode};
    use crate::infrastructure::coordination::{InMemoryKeyedLock, InMemoryNegativeCache};
    use crate::infrastructure::repositories::{InMemoryConferenceStore, InMemoryCustomerStore, InMemoryRuleStore};
    use async_trait::async_trait;
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        conference: Option<Conference>,
        delay: Duration,
    }

    #[async_trait]
    impl ConferenceSource for CountingSource {
        async fn fetch_conference(&self, _cluster_id: ClusterId, _alias: &str) -> Result<Option<Conference>, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self.conference.clone())
        }
    }

    fn customer_match(cluster: ClusterId, customer: CustomerId, prefix: &str, auth: bool) -> CustomerMatch {
        CustomerMatch {
            id: CustomerMatchId(1),
            cluster_id: cluster,
            customer_id: customer,
            prefix_match: prefix.to_string(),
            suffix_match: String::new(),
            match_mode: CustomerMatchMode::Both,
            regexp_match: String::new(),
            require_authorization: auth,
            priority: 10,
        }
    }

    fn conference(cluster: ClusterId, alias: &str) -> Conference {
        Conference {
            id: ConferenceId::new(),
            cluster_id: cluster,
            name: "Room".to_string(),
            aliases: vec![alias.to_string()],
            customer_id: None,
            match_id: None,
            full_data: Map::new(),
            is_active: true,
        }
    }

    fn resolver(customers: Arc<InMemoryCustomerStore>, conferences: Arc<InMemoryConferenceStore>) -> CustomerResolver {
        let patterns = Arc::new(PatternEngine::new(true));
        let rules = Arc::new(RuleService::new(Arc::new(InMemoryRuleStore::new()), patterns.clone()));
        CustomerResolver::new(customers, conferences, rules, patterns)
    }

    fn fetcher(source: Arc<CountingSource>, conferences: Arc<InMemoryConferenceStore>) -> ConferenceFetcher {
        ConferenceFetcher::new(
            source,
            conferences,
            Arc::new(InMemoryKeyedLock::new()),
            Arc::new(InMemoryNegativeCache::new()),
        )
    }

    fn dial_in(local: &str) -> CallParams {
        CallParams::new()
            .with("call_direction", "dial_in")
            .with("local_alias", local)
            .with("remote_alias", "alice@remote.example")
    }

    #[tokio::test]
    async fn test_customer_from_prefix_match() {
        let cluster = ClusterId::new();
        let customer = CustomerId::new();
        let customers = Arc::new(InMemoryCustomerStore::new());
        customers
            .save_match(&customer_match(cluster, customer, "654", true))
            .await
            .unwrap();

        let resolution = resolver(customers, Arc::new(InMemoryConferenceStore::new()))
            .resolve(cluster, &dial_in("sip:65432@video.example"))
            .await
            .unwrap();
        assert_eq!(resolution.customer, Some(customer));
        assert!(resolution.needs_auth);
        assert!(resolution.conference.is_none());
    }

    #[tokio::test]
    async fn test_conference_customer_takes_precedence() {
        let cluster = ClusterId::new();
        let owner = CustomerId::new();
        let other = CustomerId::new();
        let customers = Arc::new(InMemoryCustomerStore::new());
        customers.save_match(&customer_match(cluster, other, "654", false)).await.unwrap();

        let conferences = Arc::new(InMemoryConferenceStore::new());
        let mut room = conference(cluster, "65432");
        room.customer_id = Some(owner);
        conferences.save(&room).await.unwrap();

        let resolution = resolver(customers, conferences)
            .resolve(cluster, &dial_in("65432"))
            .await
            .unwrap();
        assert_eq!(resolution.customer, Some(owner));
        assert_eq!(resolution.conference.map(|c| c.name), Some("Room".to_string()));
        assert!(!resolution.needs_auth);
    }

    #[tokio::test]
    async fn test_missing_conference_is_fetched_and_stored() {
        let cluster = ClusterId::new();
        let customers = Arc::new(InMemoryCustomerStore::new());
        customers
            .save_match(&customer_match(cluster, CustomerId::new(), "654", false))
            .await
            .unwrap();
        let conferences = Arc::new(InMemoryConferenceStore::new());
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            conference: Some(conference(cluster, "65432")),
            delay: Duration::ZERO,
        });

        let resolver = resolver(customers, conferences.clone())
            .with_fetcher(Arc::new(fetcher(source.clone(), conferences.clone())));
        let resolution = resolver.resolve(cluster, &dial_in("65432")).await.unwrap();

        assert!(resolution.conference.is_some());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(conferences.find_by_alias(cluster, "65432").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_ip_literal_alias_is_not_fetched() {
        let cluster = ClusterId::new();
        let customers = Arc::new(InMemoryCustomerStore::new());
        customers
            .save_match(&customer_match(cluster, CustomerId::new(), "654", false))
            .await
            .unwrap();
        let conferences = Arc::new(InMemoryConferenceStore::new());
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            conference: None,
            delay: Duration::ZERO,
        });

        let resolver = resolver(customers, conferences.clone())
            .with_fetcher(Arc::new(fetcher(source.clone(), conferences)));
        resolver.resolve(cluster, &dial_in("65432@10.0.0.1")).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_misses_are_cached() {
        let cluster = ClusterId::new();
        let conferences = Arc::new(InMemoryConferenceStore::new());
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            conference: None,
            delay: Duration::ZERO,
        });
        let fetcher = fetcher(source.clone(), conferences);

        assert!(fetcher.fetch(cluster, "404").await.unwrap().is_none());
        assert!(fetcher.fetch(cluster, "404").await.unwrap().is_none());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_fetches_hit_upstream_once() {
        let cluster = ClusterId::new();
        let conferences = Arc::new(InMemoryConferenceStore::new());
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            conference: None,
            delay: Duration::from_millis(50),
        });
        let fetcher = Arc::new(fetcher(source.clone(), conferences));

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let fetcher = fetcher.clone();
                tokio::spawn(async move { fetcher.fetch(cluster, "slow").await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().unwrap().is_none());
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_timeout_is_swallowed_unless_strict() {
        let cluster = ClusterId::new();
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            conference: None,
            delay: Duration::from_millis(200),
        });
        let lenient = fetcher(source.clone(), Arc::new(InMemoryConferenceStore::new())).with_timeouts(
            Duration::from_millis(10),
            Duration::from_secs(1),
            Duration::from_secs(10),
        );
        assert!(lenient.fetch(cluster, "slow").await.unwrap().is_none());

        let strict = fetcher(source, Arc::new(InMemoryConferenceStore::new()))
            .with_timeouts(Duration::from_millis(10), Duration::from_secs(1), Duration::from_secs(10))
            .with_strict(true);
        assert!(strict.fetch(cluster, "slow").await.is_err());
    }
}
