use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{Method, StatusCode};
use coco_test_support::{CocoRunner, Farm};
use serde_json::{json, Value};

#[tokio::test]
async fn save_and_get_state_round_trip_through_the_queue() {
    let runner = CocoRunner::from_config(json!({
        "endpoints": [
            {"name": "seed", "values": {"count": "int"}, "save_state": ["counter"]},
            {"name": "reader", "get_state": "counter"},
        ],
    }));

    let (status, _) = runner.call(Method::POST, "/seed", json!({"count": 3})).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = runner.call(Method::POST, "/reader", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], json!({"counter": {"count": 3}}));

    runner.shutdown().await;
}

#[tokio::test]
async fn update_blocklist_rejects_an_unknown_host() {
    let runner = CocoRunner::from_config(json!({
        "groups": {"backends": ["known-host:80"]},
    }));

    let (status, _) = runner
        .call(Method::POST, "/update-blocklist", json!({"command": "add", "hosts": ["ghost-host:1"]}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = runner.call(Method::GET, "/blocklist", Value::Null).await;
    assert_eq!(body["blocklist_hosts"], json!([]));

    runner.shutdown().await;
}

#[tokio::test]
async fn blocklisted_host_is_excluded_from_the_forward_fan_out() {
    let mut callbacks = HashMap::new();
    callbacks.insert("ping".to_string(), Arc::new(|_port, _body| json!({"ok": true})) as coco_test_support::Callback);
    let farm = Farm::start(2, callbacks).await;

    let group_hosts: Vec<String> = farm.hosts.iter().map(|h| h.to_string()).collect();
    let runner = CocoRunner::from_config(json!({
        "groups": {"backends": group_hosts},
        "endpoints": [{"name": "ping", "call": {"forward": ["backends"]}}],
    }));

    let to_block = farm.hosts[0].to_string();
    runner
        .call(Method::POST, "/update-blocklist", json!({"command": "add", "hosts": [to_block]}))
        .await;

    let (status, _) = runner.call(Method::POST, "/ping", json!({})).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(farm.count(farm.hosts[0].port.unwrap(), "ping"), 0);
    assert_eq!(farm.count(farm.hosts[1].port.unwrap(), "ping"), 1);

    runner.shutdown().await;
    farm.stop().await;
}

#[tokio::test]
async fn identical_check_passes_when_every_host_echoes_the_same_body() {
    let mut callbacks = HashMap::new();
    callbacks.insert(
        "vote".to_string(),
        Arc::new(|_port, body: Value| json!({"seen": body})) as coco_test_support::Callback,
    );
    let farm = Farm::start(2, callbacks).await;

    let group_hosts: Vec<String> = farm.hosts.iter().map(|h| h.to_string()).collect();
    let runner = CocoRunner::from_config(json!({
        "groups": {"backends": group_hosts},
        "endpoints": [
            {
                "name": "vote",
                "call": {"forward": ["backends"]},
                "checks": [{"type": "identical"}],
                "on_failure": 502,
            }
        ],
    }));

    let (status, _) = runner.call(Method::POST, "/vote", json!({"value": 1})).await;
    assert_eq!(status, StatusCode::OK);

    runner.shutdown().await;
    farm.stop().await;
}

#[tokio::test]
async fn identical_check_fails_when_hosts_disagree() {
    let mut callbacks = HashMap::new();
    // each host's reply embeds its own port, so the two fake hosts never
    // agree, without reaching for a time/random source.
    callbacks.insert(
        "vote".to_string(),
        Arc::new(|port, body: Value| json!({"seen": body, "from_port": port})) as coco_test_support::Callback,
    );
    let farm = Farm::start(2, callbacks).await;

    let group_hosts: Vec<String> = farm.hosts.iter().map(|h| h.to_string()).collect();
    let runner = CocoRunner::from_config(json!({
        "groups": {"backends": group_hosts},
        "endpoints": [
            {
                "name": "vote",
                "call": {"forward": ["backends"]},
                "checks": [{"type": "identical"}],
                "on_failure": 502,
            }
        ],
    }));

    let (status, _) = runner.call(Method::POST, "/vote", json!({"value": 1})).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    runner.shutdown().await;
    farm.stop().await;
}

#[tokio::test]
async fn reset_state_restores_initial_contents_except_excluded_paths() {
    let runner = CocoRunner::from_config(json!({
        "exclude_from_reset": ["keep"],
        "endpoints": [
            {"name": "seed-keep", "set_state": {"keep": "preserved"}},
            {"name": "seed-drop", "set_state": {"drop": "gone"}},
        ],
    }));

    runner.call(Method::POST, "/seed-keep", json!({})).await;
    runner.call(Method::POST, "/seed-drop", json!({})).await;

    let (status, _) = runner.call(Method::POST, "/reset-state", Value::Null).await;
    assert_eq!(status, StatusCode::OK);

    let state = runner.state();
    assert_eq!(state.read("keep").unwrap(), json!("preserved"));
    assert!(state.read("drop").is_err());

    runner.shutdown().await;
}

#[tokio::test]
async fn unknown_endpoint_completes_with_a_500_instead_of_hanging() {
    let runner = CocoRunner::from_config(json!({}));
    let (status, body) = runner.call(Method::POST, "/no-such-endpoint", json!({})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["reply"].as_str().unwrap().contains("unknown endpoint"));

    runner.shutdown().await;
}
