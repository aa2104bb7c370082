// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Customer concurrency limit evaluation.

use crate::domain::cluster::ClusterPolicy;
use crate::domain::customer::CustomerId;
use crate::domain::limits::{CustomerLimitPolicy, CustomerLimitState, LimitAction, LimitEffect, LimitStatus};
use crate::domain::repository::{LimitStore, RepositoryError};
use chrono::NaiveDate;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct LimitEvaluation {
    pub status: LimitStatus,
    pub action: LimitAction,
    pub effect: LimitEffect,
    pub state: CustomerLimitState,
    pub policy: Option<CustomerLimitPolicy>,
}

impl LimitEvaluation {
    pub fn summary(&self, customer: CustomerId) -> String {
        format!(
            "Action: {}. {} for customer {}. Current participants are {} (total value {}), limit is {}",
            self.action,
            self.status,
            customer,
            self.state.active_participants,
            self.state.participant_value(),
            self.policy.as_ref().map(|p| p.participant_limit()).unwrap_or(0)
        )
    }
}

pub struct LimitService {
    store: Arc<dyn LimitStore>,
}

impl LimitService {
    pub fn new(store: Arc<dyn LimitStore>) -> Self {
        Self { store }
    }

    /// Current status of `customer` on the cluster and the action it calls for.
    pub async fn evaluate(
        &self,
        customer: CustomerId,
        cluster: &ClusterPolicy,
        today: NaiveDate,
    ) -> Result<LimitEvaluation, RepositoryError> {
        let policies = self.store.policies_for(customer).await?;
        let policy = CustomerLimitPolicy::select_active(&policies, today).cloned();
        let state = self.store.state(customer, cluster.cluster_id).await?;

        let status = state.status(policy.as_ref());
        let action = policy
            .as_ref()
            .map(|p| p.action_for(status, cluster))
            .unwrap_or(LimitAction::Ignore);

        Ok(LimitEvaluation {
            status,
            action,
            effect: action.effect(),
            state,
            policy,
        })
    }

    /// A participant joined (`delta > 0`) or left (`delta < 0`).
    pub async fn record_participants(
        &self,
        customer: CustomerId,
        cluster: &ClusterPolicy,
        delta: i64,
        gateway: bool,
    ) -> Result<CustomerLimitState, RepositoryError> {
        self.store
            .change_participants(customer, cluster.cluster_id, delta, gateway)
            .await
    }
}
