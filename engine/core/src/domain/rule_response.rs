// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Gateway-rule responses.
//!
//! Turns a matched [`RoutingRule`] into the `result` object of a `continue`
//! decision: a uniquely named gateway service with the rule's alias rewrite,
//! media settings and outgoing routing.

use crate::domain::alias::normalize_alias;
use crate::domain::call::{CallDirection, CallParams, LOCAL_ALIAS, REMOTE_ALIAS, REMOTE_DISPLAY_NAME};
use crate::domain::pattern::{PatternEngine, PatternError};
use crate::domain::routing_rule::{RemoteObjectKind, RemoteObjects, RoutingRule};
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

pub struct RuleResponse<'a> {
    rule: &'a RoutingRule,
    params: &'a CallParams,
    objects: &'a RemoteObjects,
}

impl<'a> RuleResponse<'a> {
    pub fn new(rule: &'a RoutingRule, params: &'a CallParams, objects: &'a RemoteObjects) -> Self {
        Self { rule, params, objects }
    }

    /// Build the service definition. Later groups win on key collisions.
    pub fn build(&self, patterns: &PatternEngine) -> Result<Map<String, Value>, PatternError> {
        let mut result = Map::new();
        result.insert("name".into(), format!("{}:{}", self.rule.name, Uuid::new_v4()).into());
        result.insert("service_tag".into(), self.rule.tag.clone().into());
        result.insert("description".into(), self.rule.description.clone().into());
        result.insert("service_type".into(), "gateway".into());

        result.extend(self.alias_overrides(patterns)?);
        result.extend(self.media_overrides());
        result.extend(self.outgoing_overrides());
        result.extend(self.protocol_overrides());
        Ok(result)
    }

    fn rewrite(&self, alias: &str, patterns: &PatternEngine) -> Result<String, PatternError> {
        if self.rule.replace_string.is_empty() {
            return Ok(alias.to_string());
        }
        let alias = if self.rule.match_string_full {
            alias.to_string()
        } else {
            normalize_alias(alias)
        };
        patterns.replace_leading(&self.rule.match_string, &self.rule.replace_string, &alias)
    }

    fn alias_overrides(&self, patterns: &PatternEngine) -> Result<Map<String, Value>, PatternError> {
        let mut result = Map::new();
        let params = self.params;
        let param = |key: &str| params.get_str(key).unwrap_or_default();

        match params.direction() {
            CallDirection::DialIn => {
                result.insert(LOCAL_ALIAS.into(), param(REMOTE_ALIAS).into());
                result.insert("local_display_name".into(), param(REMOTE_DISPLAY_NAME).into());
                result.insert(REMOTE_ALIAS.into(), self.rewrite(&param(LOCAL_ALIAS), patterns)?.into());
            }
            CallDirection::DialOut => {
                result.insert(LOCAL_ALIAS.into(), param(LOCAL_ALIAS).into());
                result.insert(REMOTE_ALIAS.into(), self.rewrite(&param(REMOTE_ALIAS), patterns)?.into());
            }
            _ => {}
        }
        Ok(result)
    }

    fn media_overrides(&self) -> Map<String, Value> {
        let rule = self.rule;
        let mut result = Map::new();

        if let Some(call_type) = non_empty(&rule.call_type) {
            result.insert("call_type".into(), call_type.into());
        }
        if let Some(rate) = rule.max_callrate_in.filter(|r| *r > 0) {
            result.insert("max_callrate_in".into(), rate.into());
        }
        if let Some(rate) = rule.max_callrate_out.filter(|r| *r > 0) {
            result.insert("max_callrate_out".into(), rate.into());
        }
        if let Some(pixels) = non_empty(&rule.max_pixels_per_second) {
            result.insert("max_pixels_per_second".into(), pixels.into());
        }
        if let Some(crypto) = non_empty(&rule.crypto_mode) {
            result.insert("crypto_mode".into(), crypto.into());
        }
        if let Some(theme) = rule.ivr_theme {
            result.insert(
                "ivr_theme".into(),
                format!("/admin/configuration/v1/ivr_theme/{}/", theme).into(),
            );
        }
        result
    }

    fn outgoing_overrides(&self) -> Map<String, Value> {
        let rule = self.rule;
        let mut result = Map::new();
        let protocol = non_empty(&rule.outgoing_protocol);

        if let Some(protocol) = protocol {
            result.insert("outgoing_protocol".into(), protocol.into());
        }
        if protocol == Some("rtmp") {
            result.insert("called_device_type".into(), "external".into());
        } else if let Some(device) = non_empty(&rule.called_device_type) {
            result.insert("called_device_type".into(), device.into());
        }

        self.insert_name(&mut result, "ivr_theme_name", RemoteObjectKind::IvrTheme, rule.ivr_theme);
        self.insert_name(
            &mut result,
            "outgoing_location_name",
            RemoteObjectKind::SystemLocation,
            rule.outgoing_location,
        );

        if rule.treat_as_trusted {
            result.insert("treat_as_trusted".into(), true.into());
        }
        result
    }

    fn protocol_overrides(&self) -> Map<String, Value> {
        let rule = self.rule;
        let mut result = Map::new();

        match non_empty(&rule.outgoing_protocol).unwrap_or_default() {
            "sip" => {
                self.insert_name(&mut result, "sip_proxy_name", RemoteObjectKind::SipProxy, rule.sip_proxy);
            }
            "teams" => {
                self.insert_name(&mut result, "teams_proxy_name", RemoteObjectKind::TeamsProxy, rule.teams_proxy);
                if let Some(lookup) = non_empty(&rule.external_participant_avatar_lookup) {
                    result.insert("external_participant_avatar_lookup".into(), lookup.into());
                }
            }
            "gms" => {
                self.insert_name(&mut result, "turn_server_name", RemoteObjectKind::TurnServer, rule.turn_server);
                self.insert_name(&mut result, "stun_server_name", RemoteObjectKind::StunServer, rule.stun_server);
                self.insert_name(
                    &mut result,
                    "gms_access_token_name",
                    RemoteObjectKind::GmsAccessToken,
                    rule.gms_access_token,
                );
            }
            "mssip" => {
                self.insert_name(&mut result, "turn_server_name", RemoteObjectKind::TurnServer, rule.turn_server);
                self.insert_name(&mut result, "stun_server_name", RemoteObjectKind::StunServer, rule.stun_server);
                self.insert_name(&mut result, "mssip_proxy_name", RemoteObjectKind::MssipProxy, rule.mssip_proxy);
            }
            "h323" => {
                self.insert_name(
                    &mut result,
                    "h323_gatekeeper_name",
                    RemoteObjectKind::H323Gatekeeper,
                    rule.h323_gatekeeper,
                );
            }
            _ => {}
        }
        result
    }

    fn insert_name(&self, result: &mut Map<String, Value>, key: &str, kind: RemoteObjectKind, id: Option<i64>) {
        let Some(id) = id else {
            return;
        };
        match self.objects.name(kind, id) {
            Some(name) => {
                result.insert(key.to_string(), name.into());
            }
            None => warn!(
                "Missing remote name for {:?} {} in cluster {}",
                kind, id, self.rule.cluster_id
            ),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}
