#![allow(clippy::unwrap_used)]
// Integration tests for `HeadscaleClient` using wiremock.

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use meshgate_api::{Error, HeadscaleClient, TransportConfig};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, HeadscaleClient) {
    let server = MockServer::start().await;
    let key: secrecy::SecretString = "hs-test-key".to_string().into();
    let client =
        HeadscaleClient::from_api_key(&server.uri(), &key, &TransportConfig::default()).unwrap();
    (server, client)
}

// ── Node listing ────────────────────────────────────────────────────

#[tokio::test]
async fn test_list_nodes() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/node"))
        .and(header("authorization", "Bearer hs-test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "nodes": [
                {
                    "id": "1",
                    "name": "laptop-x1",
                    "givenName": "laptop",
                    "ipAddresses": ["100.64.0.1", "fd7a:115c:a1e0::1"],
                    "online": true,
                    "user": { "id": "3", "name": "alice" }
                },
                {
                    "id": "2",
                    "name": "nas",
                    "ipAddresses": ["100.64.0.2"]
                }
            ]
        })))
        .mount(&server)
        .await;

    let nodes = client.list_nodes().await.unwrap();

    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].id, 1);
    assert_eq!(nodes[0].display_name(), "laptop");
    assert_eq!(nodes[0].ip_addresses[0], "100.64.0.1");
    assert!(nodes[0].online);
    assert_eq!(nodes[0].user.as_ref().unwrap().name, "alice");
    assert!(!nodes[1].online);
}

#[tokio::test]
async fn test_list_nodes_unauthorized() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/node"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .mount(&server)
        .await;

    let result = client.list_nodes().await;
    assert!(
        matches!(result, Err(Error::Authentication { .. })),
        "expected Authentication error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_list_nodes_garbage_body() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/node"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
        .mount(&server)
        .await;

    let result = client.list_nodes().await;
    assert!(matches!(result, Err(Error::Deserialization { .. })));
}

// ── Policy upload ───────────────────────────────────────────────────

#[tokio::test]
async fn test_set_policy() {
    let (server, client) = setup().await;
    let document = r#"{"acls":[]}"#;

    Mock::given(method("PUT"))
        .and(path("/api/v1/policy"))
        .and(body_json(json!({ "policy": document })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "policy": document,
            "updatedAt": "2026-01-02T03:04:05Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let updated = client.set_policy(document).await.unwrap();
    assert!(updated.is_some());
}

#[tokio::test]
async fn test_set_policy_rejected() {
    let (server, client) = setup().await;

    Mock::given(method("PUT"))
        .and(path("/api/v1/policy"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": 3,
            "message": "parsing policy: unknown host \"nas\""
        })))
        .mount(&server)
        .await;

    let err = client.set_policy("{}").await.unwrap_err();
    assert!(err.is_rejection(), "expected rejection, got: {err:?}");
    assert!(err.to_string().contains("unknown host"));
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/policy"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client.get_policy().await.unwrap_err();
    assert!(err.is_transient());
}
