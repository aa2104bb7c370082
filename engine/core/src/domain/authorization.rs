// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Authorization grants
//!
//! A customer flagged `require_authorization` only admits dial-in calls that
//! present a grant:
//!
//! - [`AuthorizationOverride`]: permanent, optionally scoped by location,
//!   protocol and local alias regex, with an allow-list of remote matchers.
//! - [`TimeBoxedAuthorization`]: valid in `[valid_from, valid_to]` for one
//!   exact local alias, optionally limited to `usage_limit` uses.
//!
//! Both use the same field grammar ([`FieldSet`]):
//!
//! | Key | Expected value | Satisfied when |
//! |-----|----------------|----------------|
//! | `md5()` | `{"fields": [...], "hash": "..."}` | md5 of the concatenated fields equals `hash` |
//! | `*_alias` | string | exact, or equal to the normalized parameter |
//! | any | `/search/sub/final/` | the rewrite matches; the parameter is replaced by the rewritten value |
//! | any | other JSON | exact equality |
//!
//! Rewrites mutate the [`CallParams`] passed in, so later requirements of the
//! same evaluation observe earlier rewrites. Callers decide how far that copy
//! travels.

use crate::domain::alias::normalize_alias;
use crate::domain::call::{CallParams, LOCAL_ALIAS, LOCATION, REMOTE_ALIAS};
use crate::domain::cluster::ClusterId;
use crate::domain::customer::CustomerId;
use crate::domain::pattern::{PatternEngine, PatternError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

const MD5_KEY: &str = "md5()";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GrantId(pub Uuid);

impl GrantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GrantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GrantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// md5 over the concatenation of `fields` read from `params`.
///
/// Missing fields contribute nothing, booleans contribute `true`/`false`.
pub fn md5_match(params: &CallParams, fields: &[String], hash: &str) -> bool {
    let joined: String = fields
        .iter()
        .map(|f| match params.get(f) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        })
        .collect();
    format!("{:x}", md5::compute(joined.as_bytes())) == hash
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashSpec {
    pub fields: Vec<String>,
    pub hash: String,
}

impl HashSpec {
    pub fn matches(&self, params: &CallParams) -> bool {
        md5_match(params, &self.fields, &self.hash)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldRequirement {
    Hash(HashSpec),
    Field { name: String, expected: Value },
    /// A malformed `md5()` entry; never satisfied.
    Invalid(Value),
}

/// Ordered requirements decoded from a JSON object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct FieldSet(pub Vec<FieldRequirement>);

impl From<Map<String, Value>> for FieldSet {
    fn from(map: Map<String, Value>) -> Self {
        let requirements = map
            .into_iter()
            .map(|(name, expected)| {
                if name == MD5_KEY {
                    match serde_json::from_value::<HashSpec>(expected.clone()) {
                        Ok(spec) => FieldRequirement::Hash(spec),
                        Err(_) => FieldRequirement::Invalid(expected),
                    }
                } else {
                    FieldRequirement::Field { name, expected }
                }
            })
            .collect();
        FieldSet(requirements)
    }
}

impl From<FieldSet> for Map<String, Value> {
    fn from(set: FieldSet) -> Self {
        set.0
            .into_iter()
            .map(|req| match req {
                FieldRequirement::Hash(spec) => (
                    MD5_KEY.to_string(),
                    serde_json::json!({ "fields": spec.fields, "hash": spec.hash }),
                ),
                FieldRequirement::Field { name, expected } => (name, expected),
                FieldRequirement::Invalid(value) => (MD5_KEY.to_string(), value),
            })
            .collect()
    }
}

/// How non-literal values are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteRetry {
    /// Rewrite patterns are tried against the raw parameter only.
    RawOnly,
    /// A failed rewrite is retried against the normalized parameter.
    RawThenNormalized,
}

impl FieldSet {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Evaluate every requirement in order, rewriting `params` on the way.
    pub fn matches(
        &self,
        params: &mut CallParams,
        patterns: &PatternEngine,
        retry: RewriteRetry,
    ) -> Result<bool, PatternError> {
        for requirement in &self.0 {
            let satisfied = match requirement {
                FieldRequirement::Hash(spec) => spec.matches(params),
                FieldRequirement::Invalid(_) => false,
                FieldRequirement::Field { name, expected } => {
                    match_field(params, name, expected, patterns, retry)?
                }
            };
            if !satisfied {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn match_field(
    params: &mut CallParams,
    name: &str,
    expected: &Value,
    patterns: &PatternEngine,
    retry: RewriteRetry,
) -> Result<bool, PatternError> {
    let current = params.get(name).cloned();
    if current.as_ref() == Some(expected) {
        return Ok(true);
    }

    let raw = match &current {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    };
    let normalized = normalize_alias(&params.get_str(name).unwrap_or_default());

    if name.ends_with("_alias") && expected.as_str() == Some(normalized.as_str()) {
        return Ok(true);
    }

    let Some(pattern) = expected.as_str() else {
        return Ok(false);
    };

    let mut outcome = match &raw {
        Some(raw) => patterns.match_rewrite_only(pattern, raw)?,
        None => crate::domain::pattern::PatternMatch {
            matched: false,
            rewritten: String::new(),
        },
    };
    if !outcome.matched && retry == RewriteRetry::RawThenNormalized {
        outcome = patterns.match_rewrite_only(pattern, &normalized)?;
    }
    if !outcome.matched {
        return Ok(false);
    }

    if raw.as_deref() != Some(outcome.rewritten.as_str()) {
        params.set(name.to_string(), Value::String(outcome.rewritten));
    }
    Ok(true)
}

/// One entry of an override's remote allow-list.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldMatcher {
    /// A plain line: the remote alias, literally or as a rewrite pattern.
    Literal(String),
    /// A JSON object line whose entries must all hold.
    FieldSet(FieldSet),
    /// A JSON line consisting only of an `md5()` entry.
    HashSpec(HashSpec),
}

impl FieldMatcher {
    pub fn parse_line(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        if line.starts_with('{') {
            if let Ok(map) = serde_json::from_str::<Map<String, Value>>(line) {
                let set = FieldSet::from(map);
                if let [FieldRequirement::Hash(spec)] = set.0.as_slice() {
                    return Some(FieldMatcher::HashSpec(spec.clone()));
                }
                return Some(FieldMatcher::FieldSet(set));
            }
        }
        Some(FieldMatcher::Literal(trimmed.to_string()))
    }

    pub fn parse_list(text: &str) -> Vec<Self> {
        text.lines().filter_map(Self::parse_line).collect()
    }

    fn to_line(&self) -> String {
        match self {
            FieldMatcher::Literal(s) => s.clone(),
            FieldMatcher::FieldSet(set) => Value::Object(set.clone().into()).to_string(),
            FieldMatcher::HashSpec(spec) => {
                serde_json::json!({ MD5_KEY: { "fields": spec.fields, "hash": spec.hash } }).to_string()
            }
        }
    }

    pub fn matches(&self, params: &mut CallParams, patterns: &PatternEngine) -> Result<bool, PatternError> {
        match self {
            FieldMatcher::Literal(alias) => {
                let set = FieldSet(vec![FieldRequirement::Field {
                    name: REMOTE_ALIAS.to_string(),
                    expected: Value::String(alias.clone()),
                }]);
                set.matches(params, patterns, RewriteRetry::RawOnly)
            }
            FieldMatcher::FieldSet(set) => set.matches(params, patterns, RewriteRetry::RawOnly),
            FieldMatcher::HashSpec(spec) => Ok(spec.matches(params)),
        }
    }
}

mod remote_list_text {
    use super::FieldMatcher;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(list: &[FieldMatcher], serializer: S) -> Result<S::Ok, S::Error> {
        let text = list
            .iter()
            .map(FieldMatcher::to_line)
            .collect::<Vec<_>>()
            .join("\n");
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<FieldMatcher>, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(FieldMatcher::parse_list(&text))
    }
}

fn default_true() -> bool {
    true
}

/// Permanent authorization grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationOverride {
    #[serde(default)]
    pub id: GrantId,
    pub customer_id: CustomerId,
    #[serde(default)]
    pub cluster_id: Option<ClusterId>,
    #[serde(default)]
    pub match_location_name: String,
    #[serde(default = "default_true")]
    pub match_incoming_sip: bool,
    #[serde(default = "default_true")]
    pub match_incoming_h323: bool,
    #[serde(default = "default_true")]
    pub match_incoming_skype: bool,
    /// WebRTC parameters are easy to forge; combine with a location check.
    #[serde(default)]
    pub match_incoming_webrtc: bool,
    /// Anchored at the start; tested against raw and normalized local alias.
    #[serde(default)]
    pub local_alias_match: String,
    /// One matcher per line: a remote alias, or a JSON object of fields.
    #[serde(default, with = "remote_list_text")]
    pub remote_list: Vec<FieldMatcher>,
    #[serde(default)]
    pub settings_override: Map<String, Value>,
}

impl AuthorizationOverride {
    fn protocol_allowed(&self, protocol: &str) -> bool {
        match protocol.to_uppercase().as_str() {
            "SIP" => self.match_incoming_sip,
            "H323" => self.match_incoming_h323,
            "LYNC" | "MSSIP" => self.match_incoming_skype,
            "WEBRTC" | "API" | "RTMP" => self.match_incoming_webrtc,
            _ => false,
        }
    }

    /// Returns the index of the first satisfied remote matcher.
    pub fn matches(&self, params: &mut CallParams, patterns: &PatternEngine) -> Result<Option<usize>, PatternError> {
        if !self.match_location_name.is_empty()
            && params.get_str(LOCATION).as_deref() != Some(self.match_location_name.as_str())
        {
            return Ok(None);
        }

        if !self.local_alias_match.is_empty() {
            let local = params.get_str(LOCAL_ALIAS).unwrap_or_default();
            let accepted = patterns.is_match(&self.local_alias_match, &local)?
                || patterns.is_match(&self.local_alias_match, &normalize_alias(&local))?;
            if !accepted {
                return Ok(None);
            }
        }

        if !self.protocol_allowed(&params.protocol()) {
            return Ok(None);
        }

        for (index, matcher) in self.remote_list.iter().enumerate() {
            if matcher.matches(params, patterns)? {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }
}

/// Time-limited authorization grant with an optional usage ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBoxedAuthorization {
    #[serde(default)]
    pub id: GrantId,
    pub customer_id: CustomerId,
    #[serde(default)]
    pub cluster_id: Option<ClusterId>,
    /// Full alias, identical to what the cluster reports.
    pub local_alias: String,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: DateTime<Utc>,
    #[serde(default)]
    pub require_fields: FieldSet,
    #[serde(default)]
    pub settings_override: Map<String, Value>,
    #[serde(default)]
    pub usage_limit: Option<u32>,
    #[serde(default)]
    pub usage_count: u32,
    #[serde(default)]
    pub first_use: Option<DateTime<Utc>>,
    /// Free-form marker of the system that issued the grant.
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub external_id: Option<String>,
}

impl TimeBoxedAuthorization {
    pub fn new(customer_id: CustomerId, local_alias: impl Into<String>, valid_to: DateTime<Utc>) -> Self {
        Self {
            id: GrantId::new(),
            customer_id,
            cluster_id: None,
            local_alias: local_alias.into(),
            valid_from: Some(Utc::now()),
            valid_to,
            require_fields: FieldSet::default(),
            settings_override: Map::new(),
            usage_limit: None,
            usage_count: 0,
            first_use: None,
            source: String::new(),
            external_id: None,
        }
    }

    pub fn is_active_at(&self, ts: DateTime<Utc>) -> bool {
        self.valid_from.map(|from| from <= ts).unwrap_or(true) && ts <= self.valid_to
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.usage_limit, Some(limit) if limit > 0 && self.usage_count >= limit)
    }

    pub fn matches(&self, params: &mut CallParams, patterns: &PatternEngine) -> Result<bool, PatternError> {
        self.require_fields
            .matches(params, patterns, RewriteRetry::RawThenNormalized)
    }

    /// Record one successful use.
    pub fn record_use(&mut self, ts: DateTime<Utc>) {
        self.usage_count = self.usage_count.saturating_add(1);
        if self.first_use.is_none() {
            self.first_use = Some(ts);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn md5_hex(s: &str) -> String {
        format!("{:x}", md5::compute(s.as_bytes()))
    }

    fn engine() -> PatternEngine {
        PatternEngine::new(true)
    }

    #[test]
    fn test_md5_match_concatenates_fields() {
        let params = CallParams::new().with("name", "test").with("value2", "test2");
        let fields = vec!["name".to_string(), "other".to_string(), "value2".to_string()];
        assert!(md5_match(&params, &fields, &md5_hex("testtest2")));

        let params = params.with("other", "x");
        assert!(!md5_match(&params, &fields, &md5_hex("testtest2")));
    }

    #[test]
    fn test_md5_match_lowercases_booleans() {
        let params = CallParams::new().with("a", true).with("b", false);
        let fields = vec!["a".to_string(), "b".to_string()];
        assert!(md5_match(&params, &fields, &md5_hex("truefalse")));
    }

    #[test]
    fn test_field_set_alias_normalization() {
        let set: FieldSet = serde_json::from_value(json!({"remote_alias": "alice@example.com"})).unwrap();
        let mut params = CallParams::new().with("remote_alias", "sip:alice@example.com;transport=tls");
        assert!(set.matches(&mut params, &engine(), RewriteRetry::RawOnly).unwrap());
    }

    #[test]
    fn test_field_set_literal_mismatch() {
        let set: FieldSet = serde_json::from_value(json!({"registered": "True"})).unwrap();
        let mut params = CallParams::new().with("registered", "False");
        assert!(!set.matches(&mut params, &engine(), RewriteRetry::RawOnly).unwrap());
    }

    #[test]
    fn test_rewrite_propagates_to_later_requirements() {
        let set = FieldSet(vec![
            FieldRequirement::Field {
                name: "remote_alias".to_string(),
                expected: json!(r"/(.*)@old.example.com/\1@new.example.com/"),
            },
            FieldRequirement::Hash(HashSpec {
                fields: vec!["remote_alias".to_string()],
                hash: md5_hex("alice@new.example.com"),
            }),
        ]);
        let mut params = CallParams::new().with("remote_alias", "alice@old.example.com");
        assert!(set.matches(&mut params, &engine(), RewriteRetry::RawOnly).unwrap());
        assert_eq!(params.remote_alias(), "alice@new.example.com");
    }

    #[test]
    fn test_retry_against_normalized_value() {
        let set: FieldSet = serde_json::from_value(json!({"remote_display": "/^alice@x$/"})).unwrap();
        let mut params = CallParams::new().with("remote_display", "sip:alice@x");

        let mut raw_only = params.clone();
        assert!(!set.matches(&mut raw_only, &engine(), RewriteRetry::RawOnly).unwrap());
        assert!(set.matches(&mut params, &engine(), RewriteRetry::RawThenNormalized).unwrap());
    }

    #[test]
    fn test_invalid_md5_entry_never_matches() {
        let set: FieldSet = serde_json::from_value(json!({"md5()": "abc"})).unwrap();
        let mut params = CallParams::new();
        assert!(!set.matches(&mut params, &engine(), RewriteRetry::RawOnly).unwrap());
    }

    #[test]
    fn test_remote_list_parsing() {
        let text = "alice@example.com\n\n{\"remote_alias\": \"bob@example.com\", \"registered\": \"True\"}\n{\"md5()\": {\"fields\": [\"a\"], \"hash\": \"x\"}}\n{broken json";
        let list = FieldMatcher::parse_list(text);
        assert_eq!(list.len(), 4);
        assert_eq!(list[0], FieldMatcher::Literal("alice@example.com".to_string()));
        assert!(matches!(list[1], FieldMatcher::FieldSet(_)));
        assert!(matches!(list[2], FieldMatcher::HashSpec(_)));
        assert_eq!(list[3], FieldMatcher::Literal("{broken json".to_string()));
    }

    fn override_grant() -> AuthorizationOverride {
        serde_json::from_value(json!({
            "customer_id": CustomerId::new(),
            "local_alias_match": "654",
            "remote_list": "alice@example.com\n{\"remote_alias\": \"/.*@partner.com/\"}",
            "settings_override": {"role": "chair"}
        }))
        .unwrap()
    }

    #[test]
    fn test_override_matches_remote_list() {
        let grant = override_grant();
        let base = CallParams::from_query([
            ("protocol", "sip"),
            ("local_alias", "sip:65432@video.example.com"),
            ("remote_alias", "sip:alice@example.com"),
        ]);

        let mut params = base.clone();
        assert_eq!(grant.matches(&mut params, &engine()).unwrap(), Some(0));

        let mut params = base.clone().with("remote_alias", "carol@partner.com");
        assert_eq!(grant.matches(&mut params, &engine()).unwrap(), Some(1));

        let mut params = base.clone().with("remote_alias", "mallory@evil.com");
        assert_eq!(grant.matches(&mut params, &engine()).unwrap(), None);
    }

    #[test]
    fn test_override_filters() {
        let mut grant = override_grant();
        let base = CallParams::from_query([
            ("protocol", "webrtc"),
            ("local_alias", "65432"),
            ("remote_alias", "alice@example.com"),
            ("location", "London"),
        ]);

        assert_eq!(grant.matches(&mut base.clone(), &engine()).unwrap(), None);
        grant.match_incoming_webrtc = true;
        assert_eq!(grant.matches(&mut base.clone(), &engine()).unwrap(), Some(0));

        grant.match_location_name = "Stockholm".to_string();
        assert_eq!(grant.matches(&mut base.clone(), &engine()).unwrap(), None);

        grant.match_location_name.clear();
        grant.local_alias_match = "999".to_string();
        assert_eq!(grant.matches(&mut base.clone(), &engine()).unwrap(), None);
    }

    #[test]
    fn test_time_boxed_window_and_usage() {
        let now = Utc::now();
        let mut grant = TimeBoxedAuthorization::new(CustomerId::new(), "65432", now + chrono::Duration::seconds(30));
        grant.valid_from = Some(now - chrono::Duration::seconds(1));

        assert!(grant.is_active_at(now));
        assert!(!grant.is_active_at(now + chrono::Duration::seconds(31)));

        grant.usage_limit = Some(1);
        assert!(!grant.is_exhausted());
        grant.record_use(now);
        assert!(grant.is_exhausted());
        assert_eq!(grant.first_use, Some(now));

        grant.record_use(now + chrono::Duration::seconds(5));
        assert_eq!(grant.first_use, Some(now));
    }
}
