// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Decision responses
//!
//! The cluster accepts exactly two shapes:
//!
//! ```text
//! {"status": "success", "action": "reject", "_reason": "..."}
//! {"status": "success", "action": "continue", "result": {...}}
//! ```
//!
//! A `continue` without `result` tells the cluster to apply its own built-in
//! logic. [`ResponseBuilder`] accumulates overrides from gateway rules, grants
//! and limits on top of the base configuration and produces the final
//! [`PolicyResponse`].

use crate::domain::call::CallParams;
use crate::domain::pattern::{is_rewrite_pattern, PatternEngine, PatternError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_REJECT: &str = "reject";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    Continue,
    Reject,
}

impl fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyAction::Continue => write!(f, "continue"),
            PolicyAction::Reject => write!(f, "reject"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyResponse {
    pub status: String,
    pub action: PolicyAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Map<String, Value>>,
    #[serde(rename = "_reason", default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Keys dropped from `result` by [`PolicyResponse::clean`].
    #[serde(rename = "_cleaned_result", default, skip_serializing_if = "Vec::is_empty")]
    pub cleaned_result: Vec<String>,
    /// Any other top-level keys, e.g. added by scripts.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PolicyResponse {
    /// Let the cluster use its built-in logic.
    pub fn continue_default() -> Self {
        Self {
            status: STATUS_SUCCESS.to_string(),
            action: PolicyAction::Continue,
            result: None,
            reason: None,
            cleaned_result: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn continue_with(result: Map<String, Value>) -> Self {
        Self {
            result: Some(result),
            ..Self::continue_default()
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            action: PolicyAction::Reject,
            reason: Some(reason.into()),
            ..Self::continue_default()
        }
    }

    pub fn is_reject(&self) -> bool {
        self.action == PolicyAction::Reject
    }

    pub fn has_result(&self) -> bool {
        self.result.as_ref().map(|r| !r.is_empty()).unwrap_or(false)
    }

    /// `continue` with no `result`: the responder has no opinion.
    pub fn is_continue_without_result(&self) -> bool {
        self.status == STATUS_SUCCESS && self.action == PolicyAction::Continue && !self.has_result()
    }

    /// Short label used for audit and metrics.
    pub fn action_label(&self) -> &'static str {
        match self.action {
            PolicyAction::Reject => "reject",
            PolicyAction::Continue if self.has_result() => "override",
            PolicyAction::Continue => "continue",
        }
    }

    /// Drop null and empty-string values from `result` and rename `tag` to
    /// `service_tag`. Dropped keys are listed in `_cleaned_result`.
    pub fn clean(mut self) -> Self {
        let Some(result) = self.result.take() else {
            return self;
        };
        if result.is_empty() {
            self.result = Some(result);
            return self;
        }

        let mut cleaned = Map::new();
        for (key, value) in result {
            let empty = match &value {
                Value::Null => true,
                Value::String(s) => s.is_empty(),
                _ => false,
            };
            if empty {
                self.cleaned_result.push(key);
            } else {
                cleaned.insert(key, value);
            }
        }

        if let Some(tag) = cleaned.remove("tag") {
            if cleaned.contains_key("service_tag") {
                self.cleaned_result.push("tag".to_string());
            } else {
                cleaned.insert("service_tag".to_string(), tag);
            }
        }

        self.result = Some(cleaned);
        self
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

/// Accumulates the pieces of one decision.
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    params: CallParams,
    base: Map<String, Value>,
    overrides: Vec<Map<String, Value>>,
    rejection: Option<String>,
    fallback: PolicyResponse,
}

impl ResponseBuilder {
    /// `base` is the conference configuration (possibly empty).
    pub fn new(params: CallParams, base: Map<String, Value>) -> Self {
        Self {
            params,
            base,
            overrides: Vec::new(),
            rejection: None,
            fallback: PolicyResponse::continue_default(),
        }
    }

    /// Returned instead when the assembled result is unusable.
    pub fn with_fallback(mut self, fallback: PolicyResponse) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn override_with(&mut self, values: Map<String, Value>) -> &mut Self {
        if !values.is_empty() {
            self.overrides.push(values);
        }
        self
    }

    pub fn reject(&mut self, reason: impl Into<String>) -> &mut Self {
        self.rejection = Some(reason.into());
        self
    }

    pub fn is_rejected(&self) -> bool {
        self.rejection.is_some()
    }

    pub fn build(&self, patterns: &PatternEngine) -> Result<PolicyResponse, PatternError> {
        if let Some(reason) = &self.rejection {
            return Ok(PolicyResponse::reject(reason.clone()));
        }

        if self.base.is_empty() && self.overrides.is_empty() {
            return Ok(self.fallback.clone().clean());
        }

        let mut result = self.base.clone();
        for values in &self.overrides {
            for (key, value) in values {
                match value.as_str() {
                    Some(pattern) if is_rewrite_pattern(pattern) => {
                        let target = self
                            .params
                            .get_str(key)
                            .or_else(|| result.get(key).and_then(|v| v.as_str().map(str::to_string)));
                        let rewritten = match target {
                            Some(target) => Value::String(patterns.match_pattern(pattern, &target)?.rewritten),
                            None => Value::Null,
                        };
                        result.insert(key.clone(), rewritten);
                    }
                    _ => {
                        result.insert(key.clone(), value.clone());
                    }
                }
            }
        }

        let has_name = match result.get("name") {
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Null) | None => false,
            Some(_) => true,
        };
        if !has_name {
            return Ok(self.fallback.clone().clean());
        }

        Ok(PolicyResponse::continue_with(result).clean())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_default_continue_has_no_result_key() {
        let json = serde_json::to_value(PolicyResponse::continue_default()).unwrap();
        assert_eq!(json, json!({"status": "success", "action": "continue"}));
    }

    #[test]
    fn test_reject_shape() {
        let json = serde_json::to_value(PolicyResponse::reject("Limit reached")).unwrap();
        assert_eq!(
            json,
            json!({"status": "success", "action": "reject", "_reason": "Limit reached"})
        );
    }

    #[test]
    fn test_clean_drops_empty_and_renames_tag() {
        let response = PolicyResponse::continue_with(obj(json!({
            "name": "room",
            "tag": "t1",
            "description": "",
            "crypto_mode": null,
            "call_type": "audio"
        })))
        .clean();

        let result = response.result.clone().unwrap();
        assert_eq!(result.get("service_tag"), Some(&json!("t1")));
        assert!(!result.contains_key("tag"));
        assert!(!result.contains_key("description"));
        assert!(!result.contains_key("crypto_mode"));
        assert_eq!(response.cleaned_result, vec!["crypto_mode", "description"]);
    }

    #[test]
    fn test_parse_external_body_with_extra_keys() {
        let parsed: PolicyResponse = serde_json::from_value(json!({
            "status": "success",
            "action": "continue",
            "result": {"test": 1},
            "override": 123
        }))
        .unwrap();
        assert!(parsed.has_result());
        assert_eq!(parsed.extra.get("override"), Some(&json!(123)));
    }

    #[test]
    fn test_builder_without_data_returns_fallback() {
        let builder = ResponseBuilder::new(CallParams::new(), Map::new());
        let response = builder.build(&PatternEngine::new(true)).unwrap();
        assert_eq!(response, PolicyResponse::continue_default());
    }

    #[test]
    fn test_builder_without_name_returns_fallback() {
        let mut builder = ResponseBuilder::new(CallParams::new(), Map::new());
        builder.override_with(obj(json!({"call_type": "audio"})));
        let response = builder.build(&PatternEngine::new(true)).unwrap();
        assert!(!response.has_result());
    }

    #[test]
    fn test_builder_applies_overrides_in_order() {
        let mut builder = ResponseBuilder::new(CallParams::new(), obj(json!({"name": "room", "call_type": "video"})));
        builder.override_with(obj(json!({"call_type": "audio"})));
        builder.override_with(obj(json!({"max_pixels_per_second": "sd"})));

        let response = builder.build(&PatternEngine::new(true)).unwrap();
        let result = response.result.unwrap();
        assert_eq!(result.get("call_type"), Some(&json!("audio")));
        assert_eq!(result.get("max_pixels_per_second"), Some(&json!("sd")));
    }

    #[test]
    fn test_builder_rewrite_override_uses_request_value() {
        let params = CallParams::new().with("remote_alias", "alice@old.com");
        let mut builder = ResponseBuilder::new(params, obj(json!({"name": "room"})));
        builder.override_with(obj(json!({"remote_alias": r"/(.*)@old.com/\1@new.com/"})));

        let result = builder.build(&PatternEngine::new(true)).unwrap().result.unwrap();
        assert_eq!(result.get("remote_alias"), Some(&json!("alice@new.com")));
    }

    #[test]
    fn test_rejection_wins() {
        let mut builder = ResponseBuilder::new(CallParams::new(), obj(json!({"name": "room"})));
        builder.reject("Authorization required");
        builder.override_with(obj(json!({"call_type": "audio"})));
        let response = builder.build(&PatternEngine::new(true)).unwrap();
        assert!(response.is_reject());
        assert_eq!(response.reason.as_deref(), Some("Authorization required"));
    }
}
