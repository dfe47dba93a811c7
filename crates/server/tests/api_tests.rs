//! Integration tests for HTTP API endpoints.

mod common;

use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_DISPOSITION, CONTENT_LENGTH};
use axum::http::{Request, StatusCode};
use common::{ADMIN_TOKEN, MultipartBody, TestServer, seeded_bytes};
use depot_core::{ARTIFACT_KEY_PREFIX, ArtifactHash, STAGING_KEY_PREFIX};
use serde_json::{Value, json};

async fn set_limit(server: &TestServer, user: &str, limit: u64) {
    let (status, _) = server
        .json_request(
            "POST",
            "/v1/quota",
            Some(json!({ "user": user, "quota": limit })),
            Some(ADMIN_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

async fn used(server: &TestServer, user: &str) -> u64 {
    server.metadata().quota_used(user).await.unwrap()
}

async fn stored_keys(server: &TestServer, prefix: &str) -> Vec<String> {
    server.storage().list(prefix).await.unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::new().await;
    let (status, body) = server.json_request("GET", "/v1/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storage"], "filesystem");
}

#[tokio::test]
async fn test_upload_then_info_and_download() {
    let server = TestServer::new().await;
    let alice = server.create_token("alice").await;
    let data = seeded_bytes(1, 5000);

    let form = MultipartBody::new()
        .text("token", &alice)
        .text("version", "1.2.0")
        .text("colour", "ignored")
        .file("file", "tool.tar.gz", &data);
    let (status, body) = server.upload_form("raw", form, true).await;

    assert_eq!(status, StatusCode::CREATED, "{body}");
    let hash = ArtifactHash::compute(&data).to_hex();
    assert_eq!(body["hash"], hash.as_str());
    assert_eq!(body["size"], 5000);
    assert_eq!(body["owner"], "alice");
    assert_eq!(body["deduplicated"], false);
    assert_eq!(used(&server, "alice").await, 5000);

    let (status, info) = server
        .json_request("GET", &format!("/v1/artifacts/info?id={hash}"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["name"], "tool.tar.gz");
    assert_eq!(info["owner"], "alice");
    assert_eq!(info["type"], "raw");
    assert_eq!(info["size"], "5000");
    assert_eq!(info["version"], "1.2.0");
    assert!(info.get("colour").is_none());

    let request = Request::builder()
        .uri(format!("/v1/artifacts/download?id={hash}"))
        .body(Body::empty())
        .unwrap();
    let response = server.send(request).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, data.as_ref());
    assert_eq!(response.headers[CONTENT_LENGTH], "5000");
    assert_eq!(
        response.headers[CONTENT_DISPOSITION],
        "attachment; filename=\"tool.tar.gz\""
    );

    assert!(stored_keys(&server, STAGING_KEY_PREFIX).await.is_empty());
    assert_eq!(
        stored_keys(&server, ARTIFACT_KEY_PREFIX).await,
        vec![format!("{ARTIFACT_KEY_PREFIX}{hash}")]
    );
}

#[tokio::test]
async fn test_reupload_by_owner_is_not_charged_twice() {
    let server = TestServer::new().await;
    let alice = server.create_token("alice").await;
    let data = seeded_bytes(2, 1200);

    let (status, _) = server.upload("raw", &alice, "a.bin", &data).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = server.upload("raw", &alice, "a-renamed.bin", &data).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deduplicated"], true);
    assert_eq!(body["name"], "a-renamed.bin");
    assert_eq!(used(&server, "alice").await, 1200);
    assert_eq!(stored_keys(&server, ARTIFACT_KEY_PREFIX).await.len(), 1);
}

#[tokio::test]
async fn test_reupload_by_other_owner_moves_the_charge() {
    let server = TestServer::new().await;
    let alice = server.create_token("alice").await;
    let bob = server.create_token("bob").await;
    let data = seeded_bytes(3, 800);

    server.upload("raw", &alice, "x.bin", &data).await;
    let (status, body) = server.upload("raw", &bob, "x.bin", &data).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["owner"], "bob");
    assert_eq!(used(&server, "alice").await, 0);
    assert_eq!(used(&server, "bob").await, 800);
}

#[tokio::test]
async fn test_declared_length_over_quota_is_rejected_before_storing() {
    let server = TestServer::new().await;
    let alice = server.create_token("alice").await;
    set_limit(&server, "alice", 1000).await;

    let (status, _) = server
        .upload("raw", &alice, "first.bin", &seeded_bytes(4, 400))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(used(&server, "alice").await, 400);

    let (status, body) = server
        .upload("raw", &alice, "second.bin", &seeded_bytes(5, 500))
        .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["code"], "quota_exceeded");
    assert_eq!(used(&server, "alice").await, 400);
    assert!(stored_keys(&server, STAGING_KEY_PREFIX).await.is_empty());
    assert_eq!(stored_keys(&server, ARTIFACT_KEY_PREFIX).await.len(), 1);
}

#[tokio::test]
async fn test_undeclared_upload_over_quota_is_cut_off() {
    let server = TestServer::new().await;
    let alice = server.create_token("alice").await;
    set_limit(&server, "alice", 1000).await;

    let form = MultipartBody::new()
        .text("token", &alice)
        .file("file", "big.bin", &seeded_bytes(6, 1500));
    let (status, body) = server.upload_form("raw", form, false).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["code"], "quota_exceeded");
    assert_eq!(used(&server, "alice").await, 0);
    assert!(stored_keys(&server, STAGING_KEY_PREFIX).await.is_empty());
    assert!(stored_keys(&server, ARTIFACT_KEY_PREFIX).await.is_empty());

    // Exactly the remaining quota is accepted.
    let form = MultipartBody::new()
        .text("token", &alice)
        .file("file", "fits.bin", &seeded_bytes(7, 1000));
    let (status, _) = server.upload_form("raw", form, false).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(used(&server, "alice").await, 1000);
}

#[tokio::test]
async fn test_body_over_server_limit_is_413() {
    let server = TestServer::with_config(|config| config.server.max_body_bytes = 2048).await;
    let alice = server.create_token("alice").await;

    let (status, body) = server
        .upload("raw", &alice, "large.bin", &seeded_bytes(9, 10_000))
        .await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["code"], "payload_too_large");
    assert_eq!(used(&server, "alice").await, 0);
    assert!(stored_keys(&server, STAGING_KEY_PREFIX).await.is_empty());
    assert!(stored_keys(&server, ARTIFACT_KEY_PREFIX).await.is_empty());
}

#[tokio::test]
async fn test_upload_requires_token() {
    let server = TestServer::new().await;

    let form = MultipartBody::new().file("file", "anon.bin", b"data");
    let (status, body) = server.upload_form("raw", form, true).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");

    let (status, _) = server.upload("raw", "not-a-token", "anon.bin", b"data").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_upload_rejects_unknown_kind_and_missing_file() {
    let server = TestServer::new().await;
    let alice = server.create_token("alice").await;

    let (status, _) = server.upload("docker", &alice, "a.bin", b"data").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let form = MultipartBody::new().text("token", &alice);
    let (status, body) = server.upload_form("raw", form, true).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");
}

#[tokio::test]
async fn test_bearer_header_authenticates_upload() {
    let server = TestServer::new().await;
    let alice = server.create_token("alice").await;

    let (content_type, body) = MultipartBody::new()
        .file("file", "bearer.bin", b"payload")
        .finish();
    let request = Request::builder()
        .method("POST")
        .uri("/v1/artifacts/raw")
        .header("content-type", content_type)
        .header(AUTHORIZATION, format!("Bearer {alice}"))
        .body(Body::from(body))
        .unwrap();
    let response = server.send(request).await;

    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.json()["owner"], "alice");
}

#[tokio::test]
async fn test_invalid_bearer_is_rejected() {
    let server = TestServer::new().await;
    let (status, body) = server
        .json_request("GET", "/v1/search", None, Some("bogus"))
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");
}

#[tokio::test]
async fn test_mutations_are_owner_only() {
    let server = TestServer::new().await;
    let alice = server.create_token("alice").await;
    let bob = server.create_token("bob").await;
    let data = seeded_bytes(8, 300);

    let (_, body) = server.upload("raw", &alice, "owned.bin", &data).await;
    let hash = body["hash"].as_str().unwrap().to_string();

    let (status, body) = server
        .json_request(
            "DELETE",
            &format!("/v1/artifacts?id={hash}&token={bob}"),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");

    let (status, _) = server
        .json_request(
            "POST",
            "/v1/share",
            Some(json!({ "token": bob, "id": hash, "add": ["carol"] })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = server
        .json_request(
            "POST",
            "/v1/artifacts/attributes",
            Some(json!({ "token": bob, "id": hash, "attributes": { "note": "x" } })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = server
        .json_request(
            "DELETE",
            &format!("/v1/artifacts?id={hash}&token={alice}"),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["freed"], 300);
    assert_eq!(used(&server, "alice").await, 0);
    assert!(stored_keys(&server, ARTIFACT_KEY_PREFIX).await.is_empty());

    let (status, _) = server
        .json_request("GET", &format!("/v1/artifacts/info?id={hash}"), None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_unknown_artifact_is_not_found() {
    let server = TestServer::new().await;
    let alice = server.create_token("alice").await;
    let hash = ArtifactHash::compute(b"never uploaded");

    let (status, body) = server
        .json_request(
            "DELETE",
            &format!("/v1/artifacts?id={hash}&token={alice}"),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_append_attributes_keeps_existing_keys() {
    let server = TestServer::new().await;
    let alice = server.create_token("alice").await;
    let form = MultipartBody::new()
        .text("token", &alice)
        .text("version", "1")
        .file("file", "attrs.bin", b"attrs");
    let (_, body) = server.upload_form("raw", form, true).await;
    let hash = body["hash"].as_str().unwrap().to_string();

    let (status, body) = server
        .json_request(
            "POST",
            "/v1/artifacts/attributes",
            Some(json!({
                "id": hash,
                "attributes": { "version": "2", "channel": "beta" }
            })),
            Some(alice.as_str()),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["added"], 1);

    let (_, info) = server
        .json_request("GET", &format!("/v1/artifacts/info?id={hash}"), None, None)
        .await;
    assert_eq!(info["version"], "1");
    assert_eq!(info["channel"], "beta");

    let (status, _) = server
        .json_request(
            "POST",
            "/v1/artifacts/attributes",
            Some(json!({ "id": hash, "attributes": { "owner": "mallory" } })),
            Some(alice.as_str()),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_search_and_latest() {
    let server = TestServer::new().await;
    let alice = server.create_token("alice").await;

    let (_, first) = server
        .upload("template", &alice, "tpl-debian", b"debian v1")
        .await;
    let (_, second) = server
        .upload("template", &alice, "tpl-debian", b"debian v2")
        .await;
    let (_, other) = server
        .upload("template", &alice, "tpl-alpine", b"alpine")
        .await;
    server.upload("raw", &alice, "unrelated", b"other").await;

    let (status, results) = server
        .json_request("GET", "/v1/search?name=tpl", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let pairs: Vec<(String, String)> = results
        .as_array()
        .unwrap()
        .iter()
        .map(|r| {
            (
                r["name"].as_str().unwrap().to_string(),
                r["hash"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("tpl-alpine".to_string(), other["hash"].as_str().unwrap().to_string()),
            ("tpl-debian".to_string(), first["hash"].as_str().unwrap().to_string()),
            ("tpl-debian".to_string(), second["hash"].as_str().unwrap().to_string()),
        ]
    );

    let (status, latest) = server
        .json_request("GET", "/v1/artifacts/latest?name=tpl-debian", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(latest["hash"], second["hash"]);

    let request = Request::builder()
        .uri("/v1/artifacts/download?name=tpl-debian")
        .body(Body::empty())
        .unwrap();
    let response = server.send(request).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, b"debian v2");

    let (status, _) = server
        .json_request("GET", "/v1/artifacts/latest?name=tpl-missing", None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, everything) = server.json_request("GET", "/v1/search", None, None).await;
    assert_eq!(everything.as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_list_by_kind() {
    let server = TestServer::new().await;
    let alice = server.create_token("alice").await;

    server.upload("apt", &alice, "pkg_1.0.deb", b"deb one").await;
    server.upload("apt", &alice, "pkg_1.1.deb", b"deb two").await;
    server.upload("raw", &alice, "raw.bin", b"raw").await;

    let (status, body) = server
        .json_request("GET", "/v1/artifacts/apt", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["pkg_1.0.deb", "pkg_1.1.deb"]);
}

#[tokio::test]
async fn test_shared_artifacts_are_private_to_scope() {
    let server = TestServer::new().await;
    let alice = server.create_token("alice").await;
    let bob = server.create_token("bob").await;
    let carol = server.create_token("carol").await;

    let (_, body) = server.upload("raw", &alice, "secret.bin", b"secret").await;
    let hash = body["hash"].as_str().unwrap().to_string();
    let download = |token: Option<&str>| {
        let uri = match token {
            Some(t) => format!("/v1/artifacts/download?id={hash}&token={t}"),
            None => format!("/v1/artifacts/download?id={hash}"),
        };
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    };

    // Unshared artifacts are public.
    assert_eq!(server.send(download(None)).await.status, StatusCode::OK);

    let (status, scope) = server
        .json_request(
            "POST",
            "/v1/share",
            Some(json!({ "id": hash, "add": ["bob"] })),
            Some(alice.as_str()),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(scope["scope"], json!(["bob"]));

    assert_eq!(
        server.send(download(None)).await.status,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        server.send(download(Some(carol.as_str()))).await.status,
        StatusCode::FORBIDDEN
    );
    assert_eq!(server.send(download(Some(bob.as_str()))).await.status, StatusCode::OK);
    assert_eq!(
        server.send(download(Some(alice.as_str()))).await.status,
        StatusCode::OK
    );

    // Listings follow the same rule.
    let (_, listed) = server
        .json_request("GET", &format!("/v1/artifacts/raw?token={carol}"), None, None)
        .await;
    assert!(listed.as_array().unwrap().is_empty());
    let (_, listed) = server
        .json_request("GET", &format!("/v1/artifacts/raw?token={bob}"), None, None)
        .await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    // So do info and search.
    let info_uri = format!("/v1/artifacts/info?id={hash}");
    let (status, _) = server.json_request("GET", &info_uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = server
        .json_request("GET", &info_uri, None, Some(carol.as_str()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, info) = server
        .json_request("GET", &info_uri, None, Some(bob.as_str()))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["owner"], "alice");

    let (_, found) = server
        .json_request("GET", "/v1/search?name=secret", None, None)
        .await;
    assert!(found.as_array().unwrap().is_empty());
    let (_, found) = server
        .json_request("GET", "/v1/search?name=secret", None, Some(bob.as_str()))
        .await;
    assert_eq!(found[0]["hash"], hash.as_str());

    let (status, scope) = server
        .json_request(
            "GET",
            &format!("/v1/share?id={hash}&token={alice}"),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(scope["scope"], json!(["bob"]));

    let (_, scope) = server
        .json_request(
            "POST",
            "/v1/share",
            Some(json!({ "id": hash, "remove": ["bob"] })),
            Some(alice.as_str()),
        )
        .await;
    assert_eq!(scope["scope"], json!([]));
    assert_eq!(server.send(download(None)).await.status, StatusCode::OK);
}

#[tokio::test]
async fn test_quota_endpoints_are_admin_only() {
    let server = TestServer::new().await;
    let alice = server.create_token("alice").await;

    let (status, _) = server
        .json_request("GET", "/v1/quota?user=alice", None, Some(alice.as_str()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = server.json_request("GET", "/v1/quota?user=alice", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = server
        .json_request(
            "GET",
            &format!("/v1/quota?user=alice&token={ADMIN_TOKEN}"),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"], "alice");
    assert_eq!(body["quota"], depot_core::DEFAULT_QUOTA_BYTES);
    assert_eq!(body["used"], 0);

    server.upload("raw", &alice, "q.bin", &seeded_bytes(9, 100)).await;
    let (status, body) = server
        .json_request(
            "POST",
            "/v1/quota",
            Some(json!({ "token": ADMIN_TOKEN, "user": "alice", "quota": 150 })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "user": "alice", "quota": 150, "used": 100, "left": 50 })
    );

    let (status, _) = server
        .json_request(
            "POST",
            "/v1/quota",
            Some(json!({ "user": "alice", "quota": -1 })),
            Some(ADMIN_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_lowered_quota_reports_nothing_left() {
    let server = TestServer::new().await;
    let alice = server.create_token("alice").await;

    server.upload("raw", &alice, "big.bin", &seeded_bytes(10, 400)).await;
    set_limit(&server, "alice", 100).await;

    let (_, body) = server
        .json_request("GET", "/v1/quota?user=alice", None, Some(ADMIN_TOKEN))
        .await;
    assert_eq!(body["used"], 400);
    assert_eq!(body["left"], 0);

    let (status, _) = server.upload("raw", &alice, "more.bin", b"x").await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_metrics_endpoint_toggle() {
    let server = TestServer::new().await;
    let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    assert_eq!(server.send(request).await.status, StatusCode::OK);

    let server = TestServer::with_config(|config| config.server.metrics_enabled = false).await;
    let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    assert_eq!(server.send(request).await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_error_body_shape() {
    let server = TestServer::new().await;
    let (status, body) = server
        .json_request("GET", "/v1/artifacts/info?id=not-hex", None, None)
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(matches!(body["code"], Value::String(_)));
    assert!(matches!(body["message"], Value::String(_)));
}
