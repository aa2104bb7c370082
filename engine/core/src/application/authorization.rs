// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Authorization checks for customers that require them.
//!
//! Permanent overrides are tried first, then time-boxed grants for the exact
//! local alias. Rewrites made by a matcher are visible to the matchers after
//! it within the same check, and nowhere else.

use crate::application::error::DecisionError;
use crate::domain::authorization::{GrantId, TimeBoxedAuthorization};
use crate::domain::call::CallParams;
use crate::domain::cluster::ClusterId;
use crate::domain::customer::CustomerId;
use crate::domain::pattern::PatternEngine;
use crate::domain::repository::AuthorizationStore;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub enum AuthorizationOutcome {
    /// A permanent override matched.
    Override { grant: GrantId, settings: Map<String, Value> },
    /// A time-boxed grant matched and one use was recorded.
    Grant(TimeBoxedAuthorization),
    Denied,
}

impl AuthorizationOutcome {
    pub fn is_granted(&self) -> bool {
        !matches!(self, AuthorizationOutcome::Denied)
    }

    pub fn settings_override(&self) -> Option<&Map<String, Value>> {
        match self {
            AuthorizationOutcome::Override { settings, .. } => Some(settings),
            AuthorizationOutcome::Grant(grant) => Some(&grant.settings_override),
            AuthorizationOutcome::Denied => None,
        }
    }
}

pub struct AuthorizationService {
    store: Arc<dyn AuthorizationStore>,
    patterns: Arc<PatternEngine>,
}

impl AuthorizationService {
    pub fn new(store: Arc<dyn AuthorizationStore>, patterns: Arc<PatternEngine>) -> Self {
        Self { store, patterns }
    }

    pub async fn check(
        &self,
        customer: Option<CustomerId>,
        cluster_id: ClusterId,
        params: &CallParams,
        now: DateTime<Utc>,
    ) -> Result<AuthorizationOutcome, DecisionError> {
        let Some(customer) = customer else {
            debug!("Authorization required but no customer resolved");
            return Ok(AuthorizationOutcome::Denied);
        };

        let mut scratch = params.clone();

        for grant in self.store.overrides_for(customer, cluster_id).await? {
            if let Some(index) = grant.matches(&mut scratch, &self.patterns)? {
                info!("Authorization override {} matched remote entry {}", grant.id, index);
                return Ok(AuthorizationOutcome::Override {
                    grant: grant.id,
                    settings: grant.settings_override,
                });
            }
        }

        let local_alias = params.local_alias();
        for grant in self
            .store
            .active_grants(customer, cluster_id, &local_alias, now)
            .await?
        {
            if !grant.matches(&mut scratch, &self.patterns)? {
                continue;
            }
            match self.store.try_use_grant(grant.id, now).await? {
                Some(used) => {
                    info!(
                        "Time-boxed authorization {} used for {} ({} of {:?})",
                        used.id, local_alias, used.usage_count, used.usage_limit
                    );
                    return Ok(AuthorizationOutcome::Grant(used));
                }
                None => debug!("Authorization {} exhausted by a concurrent call", grant.id),
            }
        }

        Ok(AuthorizationOutcome::Denied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::authorization::{AuthorizationOverride, FieldMatcher, FieldSet};
    use crate::infrastructure::repositories::InMemoryAuthorizationStore;
    use chrono::Duration;
    use serde_json::json;

    fn service(store: Arc<InMemoryAuthorizationStore>) -> AuthorizationService {
        AuthorizationService::new(store, Arc::new(PatternEngine::new(true)))
    }

    fn params() -> CallParams {
        CallParams::new()
            .with("call_direction", "dial_in")
            .with("protocol", "sip")
            .with("local_alias", "65432")
            .with("remote_alias", "alice@partner.example")
    }

    fn permanent(customer: CustomerId, remote: &str) -> AuthorizationOverride {
        AuthorizationOverride {
            id: GrantId::new(),
            customer_id: customer,
            cluster_id: None,
            match_location_name: String::new(),
            match_incoming_sip: true,
            match_incoming_h323: true,
            match_incoming_skype: true,
            match_incoming_webrtc: false,
            local_alias_match: String::new(),
            remote_list: FieldMatcher::parse_list(remote),
            settings_override: json!({"call_type": "audio"}).as_object().cloned().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_no_customer_is_denied() {
        let outcome = service(Arc::new(InMemoryAuthorizationStore::new()))
            .check(None, ClusterId::new(), &params(), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, AuthorizationOutcome::Denied);
    }

    #[tokio::test]
    async fn test_permanent_override_matches_remote() {
        let store = Arc::new(InMemoryAuthorizationStore::new());
        let customer = CustomerId::new();
        store
            .save_override(&permanent(customer, "bob@elsewhere\nalice@partner.example"))
            .await
            .unwrap();

        let outcome = service(store)
            .check(Some(customer), ClusterId::new(), &params(), Utc::now())
            .await
            .unwrap();
        assert!(outcome.is_granted());
        assert_eq!(
            outcome.settings_override().and_then(|s| s.get("call_type")),
            Some(&json!("audio"))
        );
    }

    #[tokio::test]
    async fn test_grant_usage_is_recorded() {
        let store = Arc::new(InMemoryAuthorizationStore::new());
        let customer = CustomerId::new();
        let mut grant = TimeBoxedAuthorization::new(customer, "65432", Utc::now() + Duration::seconds(30));
        grant.usage_limit = Some(1);
        grant.require_fields = FieldSet::from(json!({"remote_alias": "alice@partner.example"}).as_object().cloned().unwrap());
        store.save_grant(&grant).await.unwrap();

        let service = service(store);
        let cluster = ClusterId::new();
        let first = service.check(Some(customer), cluster, &params(), Utc::now()).await.unwrap();
        let AuthorizationOutcome::Grant(used) = first else {
            panic!("expected grant");
        };
        assert_eq!(used.usage_count, 1);
        assert!(used.first_use.is_some());

        let second = service.check(Some(customer), cluster, &params(), Utc::now()).await.unwrap();
        assert_eq!(second, AuthorizationOutcome::Denied);
    }

    #[tokio::test]
    async fn test_grant_for_other_alias_does_not_apply() {
        let store = Arc::new(InMemoryAuthorizationStore::new());
        let customer = CustomerId::new();
        store
            .save_grant(&TimeBoxedAuthorization::new(customer, "11111", Utc::now() + Duration::seconds(30)))
            .await
            .unwrap();

        let outcome = service(store)
            .check(Some(customer), ClusterId::new(), &params(), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, AuthorizationOutcome::Denied);
    }
}
