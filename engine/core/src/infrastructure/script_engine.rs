// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Script Sandbox
//!
//! Runs policy scripts as Handlebars templates.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Execute customer-authored response customization
//! - **Integration:** `ScriptService` → `ScriptRuntime` → Handlebars
//!
//! # Helpers
//!
//! Besides the stock logic helpers (`if`, `unless`, `each`, `with`, `eq`,
//! `ne`, `and`, `or`, `not`, `lt`, `gt`, `len`, `lookup`) a script may call:
//!
//! - `{{send_response response [extra...] key=value...}}`
//! - `{{deny "reason"}}`
//! - `{{exit}}`
//! - `(now)` for an RFC 3339 timestamp, `(time)` for Unix seconds
//!
//! The registry has no template directory, no partials and no host access.
//! Compiled templates are kept per cluster and script for a short TTL; the
//! template body is rendered anew for every call.

use crate::domain::cluster::ClusterId;
use crate::domain::script::{ScriptError, ScriptOutcome, ScriptRule, ScriptRuntime};
use chrono::Utc;
use dashmap::DashMap;
use handlebars::{
    Context, Handlebars, Helper, HelperDef, HelperResult, Output, RenderContext, RenderError, RenderErrorReason,
    ScopedJson, Template,
};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::cell::RefCell;
use std::time::{Duration, Instant};
use tracing::debug;

// Handlebars renders synchronously on the calling thread, so a helper's
// signal is read back on the same thread before `execute` returns. Any await
// between rendering and `take_signal` would break that.
thread_local! {
    /// Control signal raised by a helper during the current render.
    static SIGNAL: RefCell<Option<ScriptOutcome>> = const { RefCell::new(None) };
}

fn raise(outcome: ScriptOutcome) -> HelperResult {
    SIGNAL.with(|slot| *slot.borrow_mut() = Some(outcome));
    Err(RenderErrorReason::Other("script control".to_string()).into())
}

fn take_signal() -> Option<ScriptOutcome> {
    SIGNAL.with(|slot| slot.borrow_mut().take())
}

struct SendResponse;

impl HelperDef for SendResponse {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
        _: &mut dyn Output,
    ) -> HelperResult {
        let mut body = match h.param(0).map(|p| p.value()) {
            Some(Value::Object(response)) => response.clone(),
            _ => Map::new(),
        };
        for extra in h.params().iter().skip(1) {
            if let Value::Object(extra) = extra.value() {
                for (key, value) in extra {
                    body.insert(key.clone(), value.clone());
                }
            }
        }

        if !h.hash().is_empty() {
            let result = body
                .entry("result")
                .or_insert_with(|| Value::Object(Map::new()));
            if !result.is_object() {
                *result = Value::Object(Map::new());
            }
            if let Value::Object(result) = result {
                for (key, value) in h.hash() {
                    result.insert(key.to_string(), value.value().clone());
                }
            }
        }

        body.entry("status").or_insert_with(|| json!("success"));
        body.entry("action").or_insert_with(|| json!("continue"));

        let rejected = body.get("action").and_then(Value::as_str) == Some("reject");
        let body = Value::Object(body);
        raise(if rejected {
            ScriptOutcome::Reject(body)
        } else {
            ScriptOutcome::Response(body)
        })
    }
}

struct Deny;

impl HelperDef for Deny {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
        _: &mut dyn Output,
    ) -> HelperResult {
        let reason = h
            .param(0)
            .and_then(|p| p.value().as_str())
            .unwrap_or("Denied by policy script");
        raise(ScriptOutcome::Reject(json!({
            "status": "success",
            "action": "reject",
            "_reason": reason,
        })))
    }
}

struct Exit;

impl HelperDef for Exit {
    fn call<'reg: 'rc, 'rc>(
        &self,
        _: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
        _: &mut dyn Output,
    ) -> HelperResult {
        raise(ScriptOutcome::Exit)
    }
}

struct Now;

impl HelperDef for Now {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        _: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        Ok(ScopedJson::Derived(Value::String(Utc::now().to_rfc3339())))
    }
}

struct Time;

impl HelperDef for Time {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        _: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        Ok(ScopedJson::Derived(json!(Utc::now().timestamp())))
    }
}

struct CachedTemplate {
    digest: String,
    expires_at: Instant,
}

pub struct HandlebarsScriptRuntime {
    registry: RwLock<Handlebars<'static>>,
    compiled: DashMap<String, CachedTemplate>,
    ttl: Duration,
}

impl HandlebarsScriptRuntime {
    pub fn new(ttl: Duration) -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.register_helper("send_response", Box::new(SendResponse));
        handlebars.register_helper("deny", Box::new(Deny));
        handlebars.register_helper("exit", Box::new(Exit));
        handlebars.register_helper("now", Box::new(Now));
        handlebars.register_helper("time", Box::new(Time));

        Self {
            registry: RwLock::new(handlebars),
            compiled: DashMap::new(),
            ttl,
        }
    }

    fn template_name(script: &ScriptRule) -> String {
        format!("{}/{}", script.cluster_id, script.id.0)
    }

    /// Compile `script` unless a fresh compilation of the same body exists.
    fn ensure_compiled(&self, script: &ScriptRule) -> Result<String, ScriptError> {
        let name = Self::template_name(script);
        let digest = format!("{:x}", md5::compute(script.content.as_bytes()));

        let fresh = self
            .compiled
            .get(&name)
            .map(|c| c.digest == digest && c.expires_at > Instant::now())
            .unwrap_or(false);
        if fresh {
            return Ok(name);
        }

        debug!("Compiling policy script '{}'", script.title);
        self.registry
            .write()
            .register_template_string(&name, &script.content)
            .map_err(|e| ScriptError::Compile {
                script: script.title.clone(),
                message: e.to_string(),
            })?;
        self.compiled.insert(
            name.clone(),
            CachedTemplate {
                digest,
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(name)
    }

    /// Drop every compiled script of `cluster_id`.
    pub fn clear_cluster(&self, cluster_id: ClusterId) {
        let prefix = format!("{}/", cluster_id);
        let names: Vec<String> = self
            .compiled
            .iter()
            .filter(|entry| entry.key().starts_with(&prefix))
            .map(|entry| entry.key().clone())
            .collect();

        let mut registry = self.registry.write();
        for name in names {
            registry.unregister_template(&name);
            self.compiled.remove(&name);
        }
    }
}

impl ScriptRuntime for HandlebarsScriptRuntime {
    fn validate(&self, content: &str) -> Result<(), ScriptError> {
        Template::compile(content)
            .map(|_| ())
            .map_err(|e| ScriptError::Compile {
                script: String::new(),
                message: e.to_string(),
            })
    }

    fn execute(&self, script: &ScriptRule, context: &Value) -> Result<ScriptOutcome, ScriptError> {
        let name = self.ensure_compiled(script)?;

        take_signal();
        let rendered = self.registry.read().render(&name, context);
        if let Some(outcome) = take_signal() {
            return Ok(outcome);
        }

        let output = rendered.map_err(|e| ScriptError::Render {
            script: script.title.clone(),
            message: e.to_string(),
        })?;
        if output.trim().is_empty() {
            Ok(ScriptOutcome::Continue)
        } else {
            Err(ScriptError::Authoring {
                script: script.title.clone(),
                output: output.trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> HandlebarsScriptRuntime {
        HandlebarsScriptRuntime::new(Duration::from_secs(10))
    }

    fn script(content: &str) -> ScriptRule {
        ScriptRule::new(ClusterId::default(), "test", content)
    }

    fn context(local_alias: &str) -> Value {
        json!({
            "request": {"local_alias": local_alias, "protocol": "sip"},
            "response": {"status": "success", "action": "continue", "result": {"name": "room"}},
            "cluster": ClusterId::default().to_string(),
            "customer": null
        })
    }

    #[test]
    fn test_send_response_merges_hash_into_result() {
        let outcome = runtime()
            .execute(&script(r#"{{send_response response call_type="audio"}}"#), &context("1"))
            .unwrap();
        let ScriptOutcome::Response(body) = outcome else {
            panic!("expected response");
        };
        assert_eq!(body["result"]["name"], json!("room"));
        assert_eq!(body["result"]["call_type"], json!("audio"));
        assert_eq!(body["action"], json!("continue"));
    }

    #[test]
    fn test_conditional_deny() {
        let rt = runtime();
        let s = script(r#"{{#if (eq request.local_alias "blocked")}}{{deny "Blocked alias"}}{{/if}}"#);

        let outcome = rt.execute(&s, &context("blocked")).unwrap();
        assert_eq!(
            outcome,
            ScriptOutcome::Reject(json!({"status": "success", "action": "reject", "_reason": "Blocked alias"}))
        );
        assert_eq!(rt.execute(&s, &context("fine")).unwrap(), ScriptOutcome::Continue);
    }

    #[test]
    fn test_exit_and_whitespace() {
        let rt = runtime();
        assert_eq!(rt.execute(&script("{{exit}}"), &context("1")).unwrap(), ScriptOutcome::Exit);
        assert_eq!(rt.execute(&script("  \n "), &context("1")).unwrap(), ScriptOutcome::Continue);
    }

    #[test]
    fn test_stray_output_is_an_authoring_error() {
        let err = runtime()
            .execute(&script("Hello {{request.local_alias}}"), &context("1"))
            .unwrap_err();
        assert!(matches!(err, ScriptError::Authoring { output, .. } if output == "Hello 1"));
    }

    #[test]
    fn test_time_helper_in_subexpression() {
        let outcome = runtime()
            .execute(&script("{{send_response response started=(time)}}"), &context("1"))
            .unwrap();
        let ScriptOutcome::Response(body) = outcome else {
            panic!("expected response");
        };
        assert!(body["result"]["started"].is_i64());
    }

    #[test]
    fn test_compile_errors() {
        let rt = runtime();
        assert!(matches!(rt.validate("{{#if}}"), Err(ScriptError::Compile { .. })));
        assert!(rt.validate("{{exit}}").is_ok());
        assert!(matches!(
            rt.execute(&script("{{#each}}"), &context("1")),
            Err(ScriptError::Compile { .. })
        ));
    }

    #[test]
    fn test_changed_body_is_recompiled() {
        let rt = runtime();
        let mut s = script("{{exit}}");
        assert_eq!(rt.execute(&s, &context("1")).unwrap(), ScriptOutcome::Exit);

        s.content = "".to_string();
        assert_eq!(rt.execute(&s, &context("1")).unwrap(), ScriptOutcome::Continue);

        rt.clear_cluster(s.cluster_id);
        assert!(rt.compiled.is_empty());
    }
}
