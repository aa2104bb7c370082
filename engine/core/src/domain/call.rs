// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Call-setup parameters as sent by the conferencing cluster.
//!
//! The parameter names are a wire contract (`local_alias`, `remote_alias`,
//! `call_direction`, `protocol`, ...). Values are kept as JSON so grant
//! matchers, overrides and scripts can see exactly what was received.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

pub const LOCAL_ALIAS: &str = "local_alias";
pub const REMOTE_ALIAS: &str = "remote_alias";
pub const REMOTE_DISPLAY_NAME: &str = "remote_display_name";
pub const CALL_DIRECTION: &str = "call_direction";
pub const PROTOCOL: &str = "protocol";
pub const REGISTERED: &str = "registered";
pub const LOCATION: &str = "location";
pub const REMOTE_ADDRESS: &str = "remote_address";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    DialIn,
    DialOut,
    NonDial,
    /// Anything the cluster sent that is not one of the known directions.
    Unknown,
}

impl CallDirection {
    pub fn parse(value: &str) -> Self {
        match value {
            "dial_in" => CallDirection::DialIn,
            "dial_out" => CallDirection::DialOut,
            "non_dial" => CallDirection::NonDial,
            _ => CallDirection::Unknown,
        }
    }
}

impl fmt::Display for CallDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallDirection::DialIn => "dial_in",
            CallDirection::DialOut => "dial_out",
            CallDirection::NonDial => "non_dial",
            CallDirection::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Parameter map for one decision request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallParams(BTreeMap<String, Value>);

impl CallParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw query-string pairs; all values are kept as strings.
    pub fn from_query<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), Value::String(v.into())))
                .collect(),
        )
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String view of a parameter; non-string scalars are rendered, null is `None`.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Bool(b) => Some(b.to_string()),
            other => Some(other.to_string()),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn local_alias(&self) -> String {
        self.get_str(LOCAL_ALIAS).unwrap_or_default()
    }

    pub fn remote_alias(&self) -> String {
        self.get_str(REMOTE_ALIAS).unwrap_or_default()
    }

    pub fn direction(&self) -> CallDirection {
        CallDirection::parse(&self.get_str(CALL_DIRECTION).unwrap_or_default())
    }

    /// Lowercased protocol (`sip`, `h323`, `mssip`, `webrtc`, `api`, `rtmp`, ...).
    pub fn protocol(&self) -> String {
        self.get_str(PROTOCOL).unwrap_or_default().to_lowercase()
    }

    pub fn location(&self) -> Option<String> {
        self.get_str(LOCATION)
    }

    /// The cluster reports `registered` as `"True"`/`"False"`.
    pub fn is_registered(&self) -> bool {
        match self.0.get(REGISTERED) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.as_str(), "True" | "true" | "1"),
            _ => false,
        }
    }

    /// The alias facing the outside world: local for dial-in, remote otherwise.
    pub fn target_alias(&self) -> String {
        match self.direction() {
            CallDirection::DialIn => self.local_alias(),
            _ => self.remote_alias(),
        }
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.0.clone().into_iter().collect::<Map<String, Value>>())
    }
}

impl FromIterator<(String, Value)> for CallParams {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_parsing() {
        assert_eq!(CallDirection::parse("dial_in"), CallDirection::DialIn);
        assert_eq!(CallDirection::parse("dial_out"), CallDirection::DialOut);
        assert_eq!(CallDirection::parse("non_dial"), CallDirection::NonDial);
        assert_eq!(CallDirection::parse("sideways"), CallDirection::Unknown);
    }

    #[test]
    fn test_registered_flag() {
        assert!(CallParams::from_query([("registered", "True")]).is_registered());
        assert!(CallParams::from_query([("registered", "true")]).is_registered());
        assert!(!CallParams::from_query([("registered", "False")]).is_registered());
        assert!(!CallParams::new().is_registered());
    }

    #[test]
    fn test_target_alias_follows_direction() {
        let params = CallParams::from_query([
            ("local_alias", "65432"),
            ("remote_alias", "sip:alice@example.com"),
            ("call_direction", "dial_in"),
        ]);
        assert_eq!(params.target_alias(), "65432");

        let params = params.with("call_direction", "dial_out");
        assert_eq!(params.target_alias(), "sip:alice@example.com");
    }

    #[test]
    fn test_get_str_renders_scalars() {
        let params = CallParams::new().with("flag", true).with("n", 3);
        assert_eq!(params.get_str("flag").as_deref(), Some("true"));
        assert_eq!(params.get_str("n").as_deref(), Some("3"));
        assert_eq!(params.get_str("missing"), None);
    }
}
