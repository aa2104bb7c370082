// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! External policy endpoints (mockito) and Handlebars scripts inside full
//! decisions.

use callgate_core::call::CallParams;
use callgate_core::cluster::{ClusterId, ClusterPolicy};
use callgate_core::config::EngineConfig;
use callgate_core::customer::Conference;
use callgate_core::external_policy::{ExternalPolicyEndpoint, ExternalPolicyId};
use callgate_core::infrastructure::PolicyStores;
use callgate_core::node::PolicyNode;
use callgate_core::routing_rule::RoutingRule;
use callgate_core::script::{OnResponse, ScriptRule, ScriptScope};
use mockito::Matcher;
use serde_json::{json, Map, Value};

async fn setup() -> (PolicyStores, ClusterPolicy) {
    let stores = PolicyStores::in_memory();
    let mut cluster = ClusterPolicy::new(ClusterId::new(), "s3cret");
    cluster.enable_gateway_rules = true;
    stores.clusters.save(&cluster).await.unwrap();
    (stores, cluster)
}

fn endpoint(cluster: ClusterId, id: i64, url: String, settings_override: Value) -> ExternalPolicyEndpoint {
    ExternalPolicyEndpoint {
        id: ExternalPolicyId(id),
        cluster_id: cluster,
        target_alias_match: String::new(),
        priority: id as i32,
        remote_url: url,
        settings_override: settings_override.as_object().cloned().unwrap_or_default(),
    }
}

fn params(local_alias: &str, remote_alias: &str) -> CallParams {
    CallParams::new()
        .with("protocol", "sip")
        .with("call_direction", "dial_in")
        .with("local_alias", local_alias)
        .with("remote_alias", remote_alias)
}

async fn board_room(stores: &PolicyStores, cluster: ClusterId) {
    let mut full_data = Map::new();
    full_data.insert("name".to_string(), json!("Board room"));
    full_data.insert("service_type".to_string(), json!("conference"));
    stores
        .conferences
        .save(&Conference {
            id: Default::default(),
            cluster_id: cluster,
            name: "Board room".to_string(),
            aliases: vec!["board@acme.example".to_string()],
            customer_id: None,
            match_id: None,
            full_data,
            is_active: true,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn external_reject_wins_over_local_rules() {
    let (stores, cluster) = setup().await;
    let mut rule = RoutingRule::new(1, cluster.cluster_id, "Everything", ".*");
    rule.match_incoming_calls = true;
    rule.match_incoming_sip = true;
    stores.rules.save_rule(&rule).await.unwrap();

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/policy")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("local_alias".into(), "12345@gw.example".into()),
            Matcher::UrlEncoded("_original_ip".into(), "10.1.1.1".into()),
            Matcher::UrlEncoded("_external_id".into(), "1".into()),
        ]))
        .with_status(200)
        .with_body(r#"{"status": "success", "action": "reject", "_reason": "Blocked upstream"}"#)
        .create_async()
        .await;
    stores
        .external_policies
        .save(&endpoint(cluster.cluster_id, 1, format!("{}/policy", server.url()), json!({})))
        .await
        .unwrap();

    let node = PolicyNode::build(stores.clone(), &EngineConfig::default());
    let response = node
        .decisions
        .decide(&cluster, &params("12345@gw.example", "bob@example.com"), Some("10.1.1.1"))
        .await
        .unwrap();

    assert!(response.is_reject());
    assert_eq!(response.reason.as_deref(), Some("Blocked upstream"));
    mock.assert_async().await;
}

#[tokio::test]
async fn external_result_is_merged_with_endpoint_settings() {
    let (stores, cluster) = setup().await;
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/silent")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"status": "success", "action": "continue"}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/rooms")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"status": "success", "action": "continue", "result": {"name": "Remote room", "call_type": "video"}}"#)
        .create_async()
        .await;
    stores
        .external_policies
        .save(&endpoint(cluster.cluster_id, 1, format!("{}/silent", server.url()), json!({})))
        .await
        .unwrap();
    stores
        .external_policies
        .save(&endpoint(
            cluster.cluster_id,
            2,
            format!("{}/rooms", server.url()),
            json!({"max_pixels_per_second": "sd"}),
        ))
        .await
        .unwrap();

    let node = PolicyNode::build(stores.clone(), &EngineConfig::default());
    let body = node
        .decisions
        .decide(&cluster, &params("room@remote.example", "bob@example.com"), None)
        .await
        .unwrap()
        .to_json();

    assert_eq!(body["action"], json!("continue"));
    assert_eq!(body["result"]["name"], json!("Remote room"));
    assert_eq!(body["result"]["call_type"], json!("video"));
    assert_eq!(body["result"]["max_pixels_per_second"], json!("sd"));
}

#[tokio::test]
async fn failing_endpoint_has_no_opinion() {
    let (stores, cluster) = setup().await;
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/broken")
        .match_query(Matcher::Any)
        .with_status(500)
        .create_async()
        .await;
    stores
        .external_policies
        .save(&endpoint(cluster.cluster_id, 1, format!("{}/broken", server.url()), json!({})))
        .await
        .unwrap();

    let node = PolicyNode::build(stores.clone(), &EngineConfig::default());
    let body = node
        .decisions
        .decide(&cluster, &params("65432", "bob@example.com"), None)
        .await
        .unwrap()
        .to_json();
    assert_eq!(body, json!({"status": "success", "action": "continue"}));
}

#[tokio::test]
async fn script_can_deny_a_caller() {
    let (stores, cluster) = setup().await;
    stores
        .scripts
        .save(&ScriptRule::new(
            cluster.cluster_id,
            "Block mallory",
            r#"{{#if (eq request.remote_alias "mallory@evil.example")}}{{deny "Blocked caller"}}{{/if}}"#,
        ))
        .await
        .unwrap();

    let node = PolicyNode::build(stores.clone(), &EngineConfig::default());
    let rejected = node
        .decisions
        .decide(&cluster, &params("65432", "mallory@evil.example"), None)
        .await
        .unwrap();
    assert!(rejected.is_reject());
    assert_eq!(rejected.reason.as_deref(), Some("Blocked caller"));

    let allowed = node
        .decisions
        .decide(&cluster, &params("65432", "alice@example.com"), None)
        .await
        .unwrap();
    assert!(!allowed.is_reject());
}

#[tokio::test]
async fn meeting_script_extends_conference_result() {
    let (stores, cluster) = setup().await;
    board_room(&stores, cluster.cluster_id).await;

    let mut script = ScriptRule::new(
        cluster.cluster_id,
        "Audio meetings",
        r#"{{send_response response call_type="audio"}}"#,
    );
    script.scope = ScriptScope::Meeting;
    script.on_response = OnResponse::Break;
    stores.scripts.save(&script).await.unwrap();

    let mut later = ScriptRule::new(cluster.cluster_id, "Never reached", r#"{{deny "late"}}"#);
    later.priority = 20;
    stores.scripts.save(&later).await.unwrap();

    let node = PolicyNode::build(stores.clone(), &EngineConfig::default());
    let body = node
        .decisions
        .decide(&cluster, &params("board@acme.example", "alice@example.com"), None)
        .await
        .unwrap()
        .to_json();
    assert_eq!(body["action"], json!("continue"));
    assert_eq!(body["result"]["name"], json!("Board room"));
    assert_eq!(body["result"]["call_type"], json!("audio"));

    // Without a conference the meeting script is skipped and the cluster
    // script rejects.
    let body = node
        .decisions
        .decide(&cluster, &params("nobody@acme.example", "alice@example.com"), None)
        .await
        .unwrap()
        .to_json();
    assert_eq!(body["action"], json!("reject"));
}

#[tokio::test]
async fn broken_script_is_ignored_unless_strict() {
    let (stores, cluster) = setup().await;
    stores
        .scripts
        .save(&ScriptRule::new(cluster.cluster_id, "Chatty", "hello"))
        .await
        .unwrap();

    let node = PolicyNode::build(stores.clone(), &EngineConfig::default());
    let response = node
        .decisions
        .decide(&cluster, &params("65432", "alice@example.com"), None)
        .await
        .unwrap();
    assert!(!response.is_reject());

    let strict = EngineConfig {
        strict_mode: true,
        ..EngineConfig::default()
    };
    let node = PolicyNode::build(stores.clone(), &strict);
    assert!(node
        .decisions
        .decide(&cluster, &params("65432", "alice@example.com"), None)
        .await
        .is_err());
}
