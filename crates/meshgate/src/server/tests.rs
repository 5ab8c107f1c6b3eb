#![allow(clippy::unwrap_used)]

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;

use meshgate_core::testing::{Harness, headscale_node, wireguard_peer};
use meshgate_core::{Backend, Engine, EngineConfig};

use super::{AppState, router};

async fn setup() -> (axum::Router, Engine, Harness) {
    let harness = Harness::new(
        vec![
            headscale_node(1, "laptop", "100.64.0.1"),
            headscale_node(2, "server", "100.64.0.2"),
        ],
        vec![wireguard_peer("cGhvbmUta2V5", "phone", "10.8.0.2")],
    );
    let config = EngineConfig {
        sync_interval: Duration::ZERO,
        ..EngineConfig::default()
    };
    let engine = Engine::with_collaborators(config, harness.collaborators());
    engine.start().await.unwrap();
    let app = router(AppState {
        engine: engine.clone(),
    });
    (app, engine, harness)
}

fn id_of(engine: &Engine, name: &str) -> String {
    engine.find_client(name).unwrap().id.to_string()
}

async fn send(app: axum::Router, method: &str, uri: &str, body: Option<Value>) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };
    app.oneshot(builder.body(body).unwrap()).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ── Reads ───────────────────────────────────────────────────────────

#[tokio::test]
async fn list_clients_spans_both_backends() {
    let (app, _engine, _harness) = setup().await;

    let response = send(app, "GET", "/clients", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let clients = body.as_array().unwrap();
    assert_eq!(clients.len(), 3);
    assert!(clients.iter().any(|c| c["backend"] == "wireguard"));
    assert!(clients.iter().all(|c| c["aclPolicy"] == "selected"));
    assert!(clients.iter().all(|c| c["hasDNS"] == false));
}

#[tokio::test]
async fn get_client_returns_record_rules_and_dns_flag() {
    let (app, engine, _harness) = setup().await;
    let laptop = id_of(&engine, "laptop");

    let response = send(app, "GET", &format!("/clients/{laptop}"), None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["client"]["name"], "laptop");
    assert_eq!(body["rules"], json!([]));
    assert_eq!(body["hasDNS"], false);
}

#[tokio::test]
async fn unknown_client_is_404_and_malformed_id_is_400() {
    let (app, _engine, _harness) = setup().await;

    let missing = send(
        app.clone(),
        "GET",
        "/clients/6f1c1f5e-8a11-4c47-9a59-0d35f0d0a001",
        None,
    )
    .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let malformed = send(app, "GET", "/clients/not-a-uuid", None).await;
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
}

// ── ACL writes ──────────────────────────────────────────────────────

#[tokio::test]
async fn put_acl_stores_without_enforcing() {
    let (app, engine, harness) = setup().await;
    let laptop = id_of(&engine, "laptop");
    let server = id_of(&engine, "server");

    let response = send(
        app.clone(),
        "PUT",
        &format!("/clients/{laptop}/acl"),
        Some(json!({
            "policy": "selected",
            "rules": [{ "targetId": server, "bidirectional": false }]
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(response.headers()["x-meshgate-pending"], "true");
    assert_eq!(harness.applier.calls(), 0);

    let reach = json_body(send(app, "GET", &format!("/clients/{laptop}/reach"), None).await).await;
    assert_eq!(reach["canReach"], json!([server]));
    assert_eq!(reach["reachableFrom"], json!([]));
}

#[tokio::test]
async fn put_acl_that_cannot_be_saved_is_500() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("state.json.tmp")).unwrap();
    let harness = Harness::new(
        vec![
            headscale_node(1, "laptop", "100.64.0.1"),
            headscale_node(2, "server", "100.64.0.2"),
        ],
        Vec::new(),
    );
    let config = EngineConfig {
        sync_interval: Duration::ZERO,
        state_path: Some(dir.path().join("state.json")),
        ..EngineConfig::default()
    };
    let engine = Engine::with_collaborators(config, harness.collaborators());
    engine.start().await.unwrap();
    let app = router(AppState {
        engine: engine.clone(),
    });
    let laptop = id_of(&engine, "laptop");
    let server = id_of(&engine, "server");

    let response = send(
        app,
        "PUT",
        &format!("/clients/{laptop}/acl"),
        Some(json!({
            "policy": "selected",
            "rules": [{ "targetId": server, "bidirectional": false }]
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let error = json_body(response).await["error"].as_str().unwrap().to_owned();
    assert!(error.contains("Failed to persist state"));
    assert!(engine.apply_status().pending_changes);
}

#[tokio::test]
async fn put_acl_rejects_unknown_policy_with_400() {
    let (app, engine, _harness) = setup().await;
    let laptop = id_of(&engine, "laptop");

    let response = send(
        app,
        "PUT",
        &format!("/clients/{laptop}/acl"),
        Some(json!({ "policy": "open", "rules": [] })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(response).await["error"].as_str().unwrap().contains("open"));
}

#[tokio::test]
async fn put_acl_rejects_unknown_or_self_target_with_422() {
    let (app, engine, _harness) = setup().await;
    let laptop = id_of(&engine, "laptop");

    let unknown = send(
        app.clone(),
        "PUT",
        &format!("/clients/{laptop}/acl"),
        Some(json!({
            "policy": "selected",
            "rules": [{ "targetId": "6f1c1f5e-8a11-4c47-9a59-0d35f0d0a001" }]
        })),
    )
    .await;
    assert_eq!(unknown.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let own = send(
        app,
        "PUT",
        &format!("/clients/{laptop}/acl"),
        Some(json!({ "policy": "selected", "rules": [{ "targetId": laptop }] })),
    )
    .await;
    assert_eq!(own.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(engine.rules(&engine.find_client("laptop").unwrap().id).unwrap().is_empty());
}

#[tokio::test]
async fn toggle_flips_existing_rule_and_404s_otherwise() {
    let (app, engine, _harness) = setup().await;
    let laptop = id_of(&engine, "laptop");
    let server = id_of(&engine, "server");
    let phone = id_of(&engine, "phone");

    send(
        app.clone(),
        "PUT",
        &format!("/clients/{laptop}/acl"),
        Some(json!({ "policy": "selected", "rules": [{ "targetId": server }] })),
    )
    .await;

    let flipped = send(
        app.clone(),
        "POST",
        &format!("/clients/{laptop}/acl/{server}/toggle"),
        None,
    )
    .await;
    assert_eq!(flipped.status(), StatusCode::OK);
    assert_eq!(json_body(flipped).await["bidirectional"], true);

    let reach = json_body(send(app.clone(), "GET", &format!("/clients/{server}/reach"), None).await).await;
    assert_eq!(reach["canReach"], json!([laptop]));

    let missing = send(
        app,
        "POST",
        &format!("/clients/{laptop}/acl/{phone}/toggle"),
        None,
    )
    .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

// ── Apply ───────────────────────────────────────────────────────────

#[tokio::test]
async fn apply_pushes_and_reports_in_sync() {
    let (app, _engine, harness) = setup().await;

    let response = send(app.clone(), "POST", "/apply", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["inSync"], true);
    assert_eq!(body["pendingChanges"], false);
    assert_eq!(body["lastError"], Value::Null);
    assert_eq!(harness.applier.calls(), 2);

    let status = json_body(send(app, "GET", "/status", None).await).await;
    assert_eq!(status["apply"]["inSync"], true);
    assert_eq!(status["clients"], 3);
}

#[tokio::test]
async fn rejected_apply_is_502_with_last_error() {
    let (app, engine, harness) = setup().await;
    harness.applier.reject_with(Some("policy does not parse"));

    let response = send(app, "POST", "/apply", None).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let body = json_body(response).await;
    assert_eq!(body["inSync"], false);
    assert_eq!(body["pendingChanges"], true);
    assert!(body["lastError"].as_str().unwrap().contains("policy does not parse"));
    assert!(engine.apply_status().pending_changes);
}

#[tokio::test]
async fn preview_renders_one_document_per_backend() {
    let (app, _engine, harness) = setup().await;

    let body = json_body(send(app, "GET", "/apply/preview", None).await).await;
    let docs = body.as_array().unwrap();
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0]["backend"], "headscale");
    assert_eq!(docs[1]["format"], "nftables");
    assert_eq!(harness.applier.calls(), 0);
}

// ── DNS, bridge, events ─────────────────────────────────────────────

#[tokio::test]
async fn dns_toggle_reaches_rewriter() {
    let (app, engine, harness) = setup().await;
    let phone = id_of(&engine, "phone");

    let response = send(
        app,
        "PUT",
        &format!("/clients/{phone}/dns"),
        Some(json!({ "enabled": true })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["hasDNS"], true);
    assert_eq!(harness.dns.changes().len(), 1);
}

#[tokio::test]
async fn bridge_outage_marks_pending() {
    let (app, engine, _harness) = setup().await;
    engine.apply().await.unwrap();

    let response = send(
        app,
        "PUT",
        "/capabilities/bridge",
        Some(json!({ "available": false })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["bridgeAvailable"], false);
    assert!(engine.apply_status().pending_changes);
}

#[tokio::test]
async fn topology_event_is_accepted_and_triggers_sync() {
    let (app, engine, harness) = setup().await;
    harness
        .wireguard
        .set_clients(vec![
            wireguard_peer("cGhvbmUta2V5", "phone", "10.8.0.2"),
            wireguard_peer("dGFibGV0LWtleQ", "tablet", "10.8.0.3"),
        ]);

    let response = send(
        app.clone(),
        "POST",
        "/events/topology",
        Some(json!({ "backend": "wireguard" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let empty = send(app, "POST", "/events/topology", None).await;
    assert_eq!(empty.status(), StatusCode::ACCEPTED);

    for _ in 0..50 {
        if engine.find_client("tablet").is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(engine.clients().len(), 4);
    assert!(engine.backends().contains(&Backend::WireGuard));
}
