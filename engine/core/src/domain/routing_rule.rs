// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Routing Rules (gateway rules)
//!
//! A [`RoutingRule`] is a prioritized gateway rule mirrored from the
//! conferencing cluster's own rule set. Rules are evaluated in `(priority, id)`
//! order; the first enabled match becomes the decision's gateway rule when the
//! dialled alias does not belong to a known conference.
//!
//! Evaluation short-circuits in this order:
//!
//! 1. `enable`
//! 2. call direction (`match_incoming_calls` / `match_outgoing_calls`)
//! 3. registration requirement
//! 4. protocol allow-flags
//! 5. source location / source alias, combined per [`SourceMatchMode`]
//! 6. destination regex (`match_string`)
//!
//! Rules that were edited locally with `sync_back = false` are never pushed to
//! the cluster; see `application::rule_service::RuleSyncService`.

use crate::domain::alias::normalize_alias;
use crate::domain::call::{CallDirection, CallParams};
use crate::domain::cluster::ClusterId;
use crate::domain::pattern::{PatternEngine, PatternError};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleId(pub i64);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceMatchMode {
    /// Every configured source predicate must hold.
    #[default]
    And,
    /// At least one configured source predicate must hold.
    Or,
}

/// Object types on the conferencing cluster that rules reference by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteObjectKind {
    SystemLocation,
    IvrTheme,
    SipProxy,
    TeamsProxy,
    GmsAccessToken,
    H323Gatekeeper,
    MssipProxy,
    StunServer,
    TurnServer,
}

/// Cached id → display name catalog of the cluster's configuration objects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteObjects(HashMap<RemoteObjectKind, HashMap<i64, String>>);

impl RemoteObjects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: RemoteObjectKind, id: i64, name: impl Into<String>) {
        self.0.entry(kind).or_default().insert(id, name.into());
    }

    pub fn name(&self, kind: RemoteObjectKind, id: i64) -> Option<&str> {
        self.0.get(&kind)?.get(&id).map(String::as_str)
    }
}

fn default_true() -> bool {
    true
}

fn default_priority() -> i32 {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub id: RuleId,
    pub cluster_id: ClusterId,

    #[serde(default = "default_true")]
    pub enable: bool,
    /// Fallback rules are evaluated after all others.
    #[serde(default)]
    pub is_fallback: bool,
    pub name: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_priority")]
    pub priority: i32,

    // Match predicates
    #[serde(default)]
    pub match_incoming_calls: bool,
    #[serde(default)]
    pub match_outgoing_calls: bool,
    #[serde(default)]
    pub match_source_location: Option<i64>,
    #[serde(default)]
    pub match_source_location_name: String,
    #[serde(default)]
    pub match_source_alias: String,
    #[serde(default)]
    pub match_source_mode: SourceMatchMode,
    #[serde(default)]
    pub match_incoming_only_if_registered: bool,
    #[serde(default)]
    pub match_incoming_webrtc: bool,
    #[serde(default)]
    pub match_incoming_sip: bool,
    #[serde(default)]
    pub match_incoming_mssip: bool,
    #[serde(default)]
    pub match_incoming_h323: bool,
    #[serde(default)]
    pub match_string_full: bool,
    pub match_string: String,
    #[serde(default)]
    pub replace_string: String,

    // Response predicates
    #[serde(default)]
    pub call_type: Option<String>,
    #[serde(default)]
    pub max_callrate_in: Option<u32>,
    #[serde(default)]
    pub max_callrate_out: Option<u32>,
    #[serde(default)]
    pub max_pixels_per_second: Option<String>,
    #[serde(default)]
    pub crypto_mode: Option<String>,
    #[serde(default)]
    pub ivr_theme: Option<i64>,
    #[serde(default)]
    pub called_device_type: Option<String>,
    #[serde(default)]
    pub outgoing_location: Option<i64>,
    #[serde(default)]
    pub outgoing_protocol: Option<String>,
    #[serde(default)]
    pub sip_proxy: Option<i64>,
    #[serde(default)]
    pub teams_proxy: Option<i64>,
    #[serde(default)]
    pub gms_access_token: Option<i64>,
    #[serde(default)]
    pub h323_gatekeeper: Option<i64>,
    #[serde(default)]
    pub mssip_proxy: Option<i64>,
    #[serde(default)]
    pub stun_server: Option<i64>,
    #[serde(default)]
    pub turn_server: Option<i64>,
    #[serde(default)]
    pub external_participant_avatar_lookup: Option<String>,
    #[serde(default)]
    pub treat_as_trusted: bool,

    // Synchronization with the cluster's own rule set
    #[serde(default)]
    pub external_id: Option<i64>,
    #[serde(default = "default_true")]
    pub sync_back: bool,
    #[serde(default)]
    pub in_sync: bool,
    #[serde(default)]
    pub last_external_sync: Option<DateTime<Utc>>,
}

impl RoutingRule {
    /// Minimal enabled rule matching `match_string`; every other predicate off.
    pub fn new(id: i64, cluster_id: ClusterId, name: impl Into<String>, match_string: impl Into<String>) -> Self {
        Self {
            id: RuleId(id),
            cluster_id,
            enable: true,
            is_fallback: false,
            name: name.into(),
            tag: String::new(),
            description: String::new(),
            priority: default_priority(),
            match_incoming_calls: false,
            match_outgoing_calls: false,
            match_source_location: None,
            match_source_location_name: String::new(),
            match_source_alias: String::new(),
            match_source_mode: SourceMatchMode::And,
            match_incoming_only_if_registered: false,
            match_incoming_webrtc: false,
            match_incoming_sip: false,
            match_incoming_mssip: false,
            match_incoming_h323: false,
            match_string_full: false,
            match_string: match_string.into(),
            replace_string: String::new(),
            call_type: None,
            max_callrate_in: None,
            max_callrate_out: None,
            max_pixels_per_second: None,
            crypto_mode: None,
            ivr_theme: None,
            called_device_type: None,
            outgoing_location: None,
            outgoing_protocol: None,
            sip_proxy: None,
            teams_proxy: None,
            gms_access_token: None,
            h323_gatekeeper: None,
            mssip_proxy: None,
            stun_server: None,
            turn_server: None,
            external_participant_avatar_lookup: None,
            treat_as_trusted: false,
            external_id: None,
            sync_back: true,
            in_sync: false,
            last_external_sync: None,
        }
    }

    /// Total evaluation order.
    pub fn sort_key(&self) -> (bool, i32, RuleId) {
        (self.is_fallback, self.priority, self.id)
    }

    /// Evaluate this rule against one call.
    pub fn evaluate(&self, query: &RuleQuery, patterns: &PatternEngine) -> Result<RuleMatch, PatternError> {
        let outcome = self.evaluate_inner(query, patterns)?;
        match &outcome {
            RuleMatch::Matched => info!("Policy rule {} ({}) matched call", self.id, self.name),
            RuleMatch::Rejected(reason) => debug!(
                "Policy rule {} ({}) did not match call, reason: {}",
                self.id, self.name, reason
            ),
        }
        Ok(outcome)
    }

    fn evaluate_inner(&self, query: &RuleQuery, patterns: &PatternEngine) -> Result<RuleMatch, PatternError> {
        use MatchFailure::*;

        if !self.enable {
            return Ok(RuleMatch::Rejected(Disabled));
        }
        match query.direction {
            CallDirection::DialIn if !self.match_incoming_calls => return Ok(RuleMatch::Rejected(Incoming)),
            CallDirection::DialOut if !self.match_outgoing_calls => return Ok(RuleMatch::Rejected(Outgoing)),
            _ => {}
        }
        if self.match_incoming_only_if_registered && !query.registered {
            return Ok(RuleMatch::Rejected(Registered));
        }

        let protocol_allowed = match query.protocol.as_str() {
            "api" | "webrtc" | "rtmp" => self.match_incoming_webrtc,
            "sip" => self.match_incoming_sip,
            "mssip" => self.match_incoming_mssip,
            "h323" => self.match_incoming_h323,
            _ => true,
        };
        if !protocol_allowed {
            return Ok(RuleMatch::Rejected(Protocol));
        }

        let (destination, source) = match query.direction {
            CallDirection::DialIn => (&query.local_alias, &query.remote_alias),
            _ => (&query.remote_alias, &query.local_alias),
        };
        let destination = if self.match_string_full {
            destination.clone()
        } else {
            normalize_alias(destination)
        };
        let source = normalize_alias(source);

        let mut source_checks = Vec::with_capacity(2);
        if self.match_source_location.is_some() {
            source_checks.push(query.location == self.match_source_location_name);
        }
        if !self.match_source_alias.is_empty() {
            source_checks.push(patterns.is_match(&self.match_source_alias, &source)?);
        }
        let source_ok = match self.match_source_mode {
            SourceMatchMode::And => source_checks.iter().all(|ok| *ok),
            SourceMatchMode::Or => source_checks.is_empty() || source_checks.iter().any(|ok| *ok),
        };
        if !source_ok {
            return Ok(RuleMatch::Rejected(Source));
        }

        if !patterns.is_match(&self.match_string, &destination)? {
            return Ok(RuleMatch::Rejected(Destination));
        }

        Ok(RuleMatch::Matched)
    }
}

/// The call fields a rule looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleQuery {
    pub local_alias: String,
    pub remote_alias: String,
    pub direction: CallDirection,
    pub protocol: String,
    pub registered: bool,
    pub location: String,
}

impl RuleQuery {
    pub fn from_params(params: &CallParams) -> Self {
        Self {
            local_alias: params.local_alias(),
            remote_alias: params.remote_alias(),
            direction: params.direction(),
            protocol: params.protocol(),
            registered: params.is_registered(),
            location: params.location().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchFailure {
    Disabled,
    Incoming,
    Outgoing,
    Registered,
    Protocol,
    Source,
    Destination,
}

impl fmt::Display for MatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchFailure::Disabled => "disabled",
            MatchFailure::Incoming => "incoming",
            MatchFailure::Outgoing => "outgoing",
            MatchFailure::Registered => "registered",
            MatchFailure::Protocol => "protocol",
            MatchFailure::Source => "source",
            MatchFailure::Destination => "destination",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleMatch {
    Matched,
    Rejected(MatchFailure),
}

impl RuleMatch {
    pub fn is_match(&self) -> bool {
        matches!(self, RuleMatch::Matched)
    }

    pub fn failure(&self) -> Option<MatchFailure> {
        match self {
            RuleMatch::Matched => None,
            RuleMatch::Rejected(reason) => Some(*reason),
        }
    }
}

/// Per-rule, per-day hit counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleHitCount {
    pub rule_id: RuleId,
    pub date: NaiveDate,
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sip_rule() -> RoutingRule {
        let mut rule = RoutingRule::new(1, ClusterId::default(), "gw", "newname.*");
        rule.match_incoming_calls = true;
        rule.match_incoming_sip = true;
        rule
    }

    fn query() -> RuleQuery {
        RuleQuery {
            local_alias: "sip:newname123@example.com;transport=tls".to_string(),
            remote_alias: "sip:alice@example.com".to_string(),
            direction: CallDirection::DialIn,
            protocol: "sip".to_string(),
            registered: false,
            location: "London".to_string(),
        }
    }

    fn eval(rule: &RoutingRule, query: &RuleQuery) -> RuleMatch {
        rule.evaluate(query, &PatternEngine::new(true)).unwrap()
    }

    #[test]
    fn test_basic_match() {
        assert_eq!(eval(&sip_rule(), &query()), RuleMatch::Matched);
    }

    #[test]
    fn test_each_predicate_can_fail() {
        let q = query();

        let mut rule = sip_rule();
        rule.enable = false;
        assert_eq!(eval(&rule, &q).failure(), Some(MatchFailure::Disabled));

        let mut rule = sip_rule();
        rule.match_incoming_calls = false;
        assert_eq!(eval(&rule, &q).failure(), Some(MatchFailure::Incoming));

        let mut rule = sip_rule();
        rule.match_incoming_only_if_registered = true;
        assert_eq!(eval(&rule, &q).failure(), Some(MatchFailure::Registered));

        let mut rule = sip_rule();
        rule.match_incoming_sip = false;
        assert_eq!(eval(&rule, &q).failure(), Some(MatchFailure::Protocol));

        let mut rule = sip_rule();
        rule.match_source_alias = "bob".to_string();
        assert_eq!(eval(&rule, &q).failure(), Some(MatchFailure::Source));

        let mut rule = sip_rule();
        rule.match_string = "other".to_string();
        assert_eq!(eval(&rule, &q).failure(), Some(MatchFailure::Destination));
    }

    #[test]
    fn test_dial_out_uses_remote_as_destination() {
        let mut rule = sip_rule();
        rule.match_outgoing_calls = true;
        rule.match_string = "alice@".to_string();

        let mut q = query();
        q.direction = CallDirection::DialOut;
        assert!(eval(&rule, &q).is_match());

        q.direction = CallDirection::DialIn;
        assert_eq!(eval(&rule, &q).failure(), Some(MatchFailure::Destination));
    }

    #[test]
    fn test_full_match_keeps_scheme() {
        let mut rule = sip_rule();
        rule.match_string = "newname".to_string();
        rule.match_string_full = true;
        assert_eq!(eval(&rule, &query()).failure(), Some(MatchFailure::Destination));

        rule.match_string = "sip:newname".to_string();
        assert!(eval(&rule, &query()).is_match());
    }

    #[test]
    fn test_webrtc_protocols_share_flag() {
        let mut rule = sip_rule();
        let mut q = query();
        for protocol in ["api", "webrtc", "rtmp"] {
            q.protocol = protocol.to_string();
            assert_eq!(eval(&rule, &q).failure(), Some(MatchFailure::Protocol));
        }
        rule.match_incoming_webrtc = true;
        assert!(eval(&rule, &q).is_match());
    }

    #[test]
    fn test_source_modes() {
        let mut rule = sip_rule();
        rule.match_source_location = Some(7);
        rule.match_source_location_name = "Stockholm".to_string();
        rule.match_source_alias = "alice".to_string();

        assert_eq!(eval(&rule, &query()).failure(), Some(MatchFailure::Source));

        rule.match_source_mode = SourceMatchMode::Or;
        assert!(eval(&rule, &query()).is_match());

        rule.match_source_alias = "bob".to_string();
        assert_eq!(eval(&rule, &query()).failure(), Some(MatchFailure::Source));
    }

    #[test]
    fn test_registered_requirement() {
        let mut rule = sip_rule();
        rule.match_incoming_only_if_registered = true;
        let mut q = query();
        q.registered = true;
        assert!(eval(&rule, &q).is_match());
    }

    #[test]
    fn test_remote_objects_lookup() {
        let mut objects = RemoteObjects::new();
        objects.insert(RemoteObjectKind::SipProxy, 3, "proxy-a");
        assert_eq!(objects.name(RemoteObjectKind::SipProxy, 3), Some("proxy-a"));
        assert_eq!(objects.name(RemoteObjectKind::SipProxy, 4), None);
        assert_eq!(objects.name(RemoteObjectKind::TurnServer, 3), None);
    }
}
