// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Customer concurrency limits
//!
//! Each customer may have a dated [`CustomerLimitPolicy`] with a soft and a
//! hard participant threshold, and one [`LimitAction`] per threshold. The live
//! [`CustomerLimitState`] only stores counters; its [`LimitStatus`] is always
//! recomputed from the counters and the active policy, never stored.

use crate::domain::cluster::{ClusterId, ClusterPolicy};
use crate::domain::customer::CustomerId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use tracing::warn;

/// Action applied to a call when a customer is over a threshold.
///
/// Serialized as its numeric code. Codes are ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "i16", into = "i16")]
pub enum LimitAction {
    /// `-1`: use the cluster default.
    Inherit,
    /// `0`
    #[default]
    Ignore,
    /// `5`: audit only.
    Log,
    /// `20`: force `call_type=audio`.
    AudioOnly,
    /// `30`: cap `max_pixels_per_second` at `sd`.
    QualitySd,
    /// `35`: cap `max_pixels_per_second` at `hd`.
    Quality720p,
    /// `100`: reject the call.
    Reject,
    /// Any code not listed above.
    Other(i16),
}

impl LimitAction {
    pub fn code(self) -> i16 {
        match self {
            LimitAction::Inherit => -1,
            LimitAction::Ignore => 0,
            LimitAction::Log => 5,
            LimitAction::AudioOnly => 20,
            LimitAction::QualitySd => 30,
            LimitAction::Quality720p => 35,
            LimitAction::Reject => 100,
            LimitAction::Other(code) => code,
        }
    }

    /// Codes of zero or below never act on the call.
    pub fn is_active(self) -> bool {
        self.code() > 0
    }

    /// Map the code onto its effect by severity band.
    ///
    /// Unlisted codes fall into the band above them; codes past `35` other
    /// than `100` are logged only.
    pub fn effect(self) -> LimitEffect {
        match self.code() {
            code if code <= 0 => LimitEffect::None,
            code if code <= 5 => LimitEffect::Log,
            code if code <= 20 => LimitEffect::Override(settings(json!({"call_type": "audio"}))),
            code if code <= 30 => LimitEffect::Override(settings(json!({"max_pixels_per_second": "sd"}))),
            code if code <= 35 => LimitEffect::Override(settings(json!({"max_pixels_per_second": "hd"}))),
            100 => LimitEffect::Reject,
            code => {
                warn!("Invalid limit action code {}, only logging", code);
                LimitEffect::Log
            }
        }
    }
}

fn settings(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// What a limit action does to the in-progress response.
#[derive(Debug, Clone, PartialEq)]
pub enum LimitEffect {
    None,
    /// Audit only.
    Log,
    Override(Map<String, Value>),
    Reject,
}

impl From<i16> for LimitAction {
    fn from(code: i16) -> Self {
        match code {
            -1 => LimitAction::Inherit,
            0 => LimitAction::Ignore,
            5 => LimitAction::Log,
            20 => LimitAction::AudioOnly,
            30 => LimitAction::QualitySd,
            35 => LimitAction::Quality720p,
            100 => LimitAction::Reject,
            other => LimitAction::Other(other),
        }
    }
}

impl From<LimitAction> for i16 {
    fn from(action: LimitAction) -> Self {
        action.code()
    }
}

impl PartialOrd for LimitAction {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LimitAction {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.code().cmp(&other.code())
    }
}

impl fmt::Display for LimitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitAction::Inherit => write!(f, "inherit"),
            LimitAction::Ignore => write!(f, "ignore"),
            LimitAction::Log => write!(f, "log"),
            LimitAction::AudioOnly => write!(f, "audio_only"),
            LimitAction::QualitySd => write!(f, "quality_sd"),
            LimitAction::Quality720p => write!(f, "quality_720p"),
            LimitAction::Reject => write!(f, "reject"),
            LimitAction::Other(code) => write!(f, "unknown({})", code),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitStatus {
    Ok,
    SoftLimit,
    HardLimit,
}

impl LimitStatus {
    pub fn code(self) -> i16 {
        match self {
            LimitStatus::Ok => 0,
            LimitStatus::SoftLimit => 10,
            LimitStatus::HardLimit => 20,
        }
    }
}

impl fmt::Display for LimitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitStatus::Ok => write!(f, "ok"),
            LimitStatus::SoftLimit => write!(f, "soft_limit"),
            LimitStatus::HardLimit => write!(f, "hard_limit"),
        }
    }
}

fn default_inherit() -> LimitAction {
    LimitAction::Inherit
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerLimitPolicy {
    pub customer_id: CustomerId,
    #[serde(default)]
    pub participant_normal_limit: Option<u32>,
    /// Gateway participants count double against the soft threshold.
    #[serde(default)]
    pub participant_gateway_limit: Option<u32>,
    #[serde(default)]
    pub participant_hard_limit: Option<u32>,
    pub date_start: NaiveDate,
    #[serde(default = "default_inherit")]
    pub soft_limit_action: LimitAction,
    #[serde(default = "default_inherit")]
    pub hard_limit_action: LimitAction,
}

impl CustomerLimitPolicy {
    /// Soft threshold: `max(normal, 2 * gateway)`; zero means unset.
    pub fn participant_limit(&self) -> u32 {
        let normal = self.participant_normal_limit.unwrap_or(0);
        let gateway = self.participant_gateway_limit.unwrap_or(0).saturating_mul(2);
        normal.max(gateway)
    }

    pub fn check_participant_count(&self, participant_count: u32) -> LimitStatus {
        match self.participant_hard_limit {
            Some(hard) if hard > 0 && participant_count >= hard => return LimitStatus::HardLimit,
            _ => {}
        }
        let soft = self.participant_limit();
        if soft > 0 && participant_count >= soft {
            return LimitStatus::SoftLimit;
        }
        LimitStatus::Ok
    }

    /// The action configured for `status`, resolving `-1` to the cluster default.
    pub fn action_for(&self, status: LimitStatus, cluster: &ClusterPolicy) -> LimitAction {
        let (own, fallback) = match status {
            LimitStatus::Ok => return LimitAction::Ignore,
            LimitStatus::SoftLimit => (self.soft_limit_action, cluster.soft_limit_action),
            LimitStatus::HardLimit => (self.hard_limit_action, cluster.hard_limit_action),
        };
        if own == LimitAction::Inherit {
            fallback
        } else {
            own
        }
    }

    /// The policy in force on `today`: latest `date_start` not after it.
    pub fn select_active(policies: &[CustomerLimitPolicy], today: NaiveDate) -> Option<&CustomerLimitPolicy> {
        policies
            .iter()
            .filter(|p| p.date_start <= today)
            .max_by_key(|p| p.date_start)
    }
}

/// Live counters for one `(customer, cluster)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerLimitState {
    pub customer_id: CustomerId,
    pub cluster_id: ClusterId,
    #[serde(default)]
    pub active_calls: u32,
    #[serde(default)]
    pub active_participants: u32,
    #[serde(default)]
    pub active_participants_gateway: u32,
    pub last_check: DateTime<Utc>,
}

impl CustomerLimitState {
    pub fn new(customer_id: CustomerId, cluster_id: ClusterId) -> Self {
        Self {
            customer_id,
            cluster_id,
            active_calls: 0,
            active_participants: 0,
            active_participants_gateway: 0,
            last_check: Utc::now(),
        }
    }

    /// Participants as weighed against the thresholds.
    pub fn participant_value(&self) -> u32 {
        self.active_participants
            .saturating_add(self.active_participants_gateway)
    }

    pub fn status(&self, policy: Option<&CustomerLimitPolicy>) -> LimitStatus {
        policy
            .map(|p| p.check_participant_count(self.participant_value()))
            .unwrap_or(LimitStatus::Ok)
    }

    /// Apply a signed participant delta; counters never go below zero.
    pub fn change_participants(&mut self, delta: i64, gateway: bool) {
        self.active_participants = apply_delta(self.active_participants, delta);
        if gateway {
            self.active_participants_gateway = apply_delta(self.active_participants_gateway, delta);
        }
        if self.active_participants == 0 {
            self.active_participants_gateway = 0;
        }
        self.last_check = Utc::now();
    }

    pub fn change_calls(&mut self, delta: i64) {
        self.active_calls = apply_delta(self.active_calls, delta);
        self.last_check = Utc::now();
    }
}

fn apply_delta(value: u32, delta: i64) -> u32 {
    (i64::from(value) + delta).clamp(0, i64::from(u32::MAX)) as u32
}
