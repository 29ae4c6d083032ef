//! End-to-end scenarios driven straight through the HTTP router, in the
//! style of `pds-axum`'s extractor tests: build the full `Router`, send it
//! requests with `tower::ServiceExt::oneshot`, and assert on status/body.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use p256::pkcs8::{EncodePrivateKey, LineEnding};
use pds_blob::FsBlobStore;
use pds_proxy::{Backend, BackendPool};
use pds_server::{config, identity, middleware, routes, state};
use serde_json::{Value, json};
use tower::ServiceExt;

const HOST: &str = "pds.test";

/// Builds the same `Router` `main` serves, backed by a temporary store and
/// a single-use host config naming one ES256 signing key for `pds.test`.
async fn build_app(appview: Vec<Backend>) -> Router {
    let store = pds_store::Store::open_temporary().unwrap();
    let blob_dir = tempfile::tempdir().unwrap();
    let blobstore = FsBlobStore::new(blob_dir.into_path());

    let signing_key = p256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
    let pem = signing_key.to_pkcs8_pem(LineEnding::LF).unwrap();
    let indented_pem = pem
        .lines()
        .map(|l| format!("      {l}"))
        .collect::<Vec<_>>()
        .join("\n");
    let host_yaml = format!(
        "hosts:\n  - hostname: {HOST}\n    service_did: did:web:{HOST}\n    signing_key_pem: |\n{indented_pem}\n    user_domains: [\"{HOST}\"]\n"
    );
    let host_file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(host_file.path(), host_yaml).unwrap();
    let hosts = Arc::new(config::HostTable::load(host_file.path()).unwrap());

    let http = reqwest::Client::new();
    let pool = BackendPool::new(appview, http.clone());
    let resolver = Arc::new(identity::LocalIdentityResolver::new(
        store.clone(),
        hosts.clone(),
        http,
        url::Url::parse("https://plc.directory").unwrap(),
    ));
    let app_state = state::AppState::new(store, blobstore, hosts, pool, resolver);

    routes::router()
        .layer(axum::middleware::from_fn_with_state(
            app_state.clone(),
            middleware::bind_host,
        ))
        .with_state(app_state)
}

fn json_req(method: &str, path: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(path)
        .header(header::HOST, HOST)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn auth_json_req(method: &str, path: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(path)
        .header(header::HOST, HOST)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn create_account(app: &Router, handle: &str, email: &str) -> Value {
    let req = json_req(
        "POST",
        "/xrpc/com.atproto.server.createAccount",
        json!({"email": email, "handle": handle, "password": "secure-password-123"}),
    );
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    body_json(resp).await
}

#[tokio::test]
async fn create_account_then_duplicate_handle_rejected() {
    let app = build_app(vec![]).await;

    let out = create_account(&app, "a.test", "a@x.example").await;
    assert!(out["did"].as_str().unwrap().starts_with("did:plc:"));
    assert_eq!(out["handle"], "a.test");
    assert!(!out["accessJwt"].as_str().unwrap().is_empty());
    assert!(!out["refreshJwt"].as_str().unwrap().is_empty());

    let dup = json_req(
        "POST",
        "/xrpc/com.atproto.server.createAccount",
        json!({"email": "other@x.example", "handle": "a.test", "password": "secure-password-123"}),
    );
    let resp = app.clone().oneshot(dup).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert!(body["msg"].as_str().unwrap().contains("already taken"));
}

#[tokio::test]
async fn record_create_and_get_roundtrip() {
    let app = build_app(vec![]).await;
    let account = create_account(&app, "b.test", "b@x.example").await;
    let did = account["did"].as_str().unwrap().to_string();
    let access = account["accessJwt"].as_str().unwrap().to_string();

    let create = auth_json_req(
        "POST",
        "/xrpc/com.atproto.repo.createRecord",
        &access,
        json!({
            "repo": did,
            "collection": "app.bsky.feed.post",
            "record": {"$type": "app.bsky.feed.post", "text": "hi", "createdAt": "2024-01-01T00:00:00Z"},
        }),
    );
    let resp = app.clone().oneshot(create).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let created = body_json(resp).await;
    let uri = created["uri"].as_str().unwrap().to_string();
    let rkey = uri.rsplit('/').next().unwrap().to_string();
    assert_eq!(uri, format!("at://{did}/app.bsky.feed.post/{rkey}"));
    let record_cid = created["cid"].as_str().unwrap().to_string();

    let get = Request::builder()
        .method("GET")
        .uri(format!(
            "/xrpc/com.atproto.repo.getRecord?repo={did}&collection=app.bsky.feed.post&rkey={rkey}"
        ))
        .header(header::HOST, HOST)
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(get).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let fetched = body_json(resp).await;
    assert_eq!(fetched["value"]["text"], "hi");
    assert_eq!(fetched["cid"], record_cid);
}

#[tokio::test]
async fn put_record_with_changed_content_roundtrips() {
    let app = build_app(vec![]).await;
    let account = create_account(&app, "u.test", "u@x.example").await;
    let did = account["did"].as_str().unwrap().to_string();
    let access = account["accessJwt"].as_str().unwrap().to_string();

    let create = auth_json_req(
        "POST",
        "/xrpc/com.atproto.repo.createRecord",
        &access,
        json!({
            "repo": did,
            "collection": "app.bsky.feed.post",
            "record": {"$type": "app.bsky.feed.post", "text": "original", "createdAt": "2024-01-01T00:00:00Z"},
        }),
    );
    let resp = app.clone().oneshot(create).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let created = body_json(resp).await;
    let uri = created["uri"].as_str().unwrap().to_string();
    let rkey = uri.rsplit('/').next().unwrap().to_string();

    // A content-changing putRecord must succeed: the record's new CID
    // necessarily differs from its old one, so nothing in the write path
    // may compare `prev` against the freshly serialized content.
    let put = auth_json_req(
        "POST",
        "/xrpc/com.atproto.repo.putRecord",
        &access,
        json!({
            "repo": did,
            "collection": "app.bsky.feed.post",
            "rkey": rkey,
            "record": {"$type": "app.bsky.feed.post", "text": "updated", "createdAt": "2024-01-01T00:00:00Z"},
        }),
    );
    let resp = app.clone().oneshot(put).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let updated = body_json(resp).await;
    let new_cid = updated["cid"].as_str().unwrap().to_string();

    let get = Request::builder()
        .method("GET")
        .uri(format!(
            "/xrpc/com.atproto.repo.getRecord?repo={did}&collection=app.bsky.feed.post&rkey={rkey}"
        ))
        .header(header::HOST, HOST)
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(get).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let fetched = body_json(resp).await;
    assert_eq!(fetched["value"]["text"], "updated");
    assert_eq!(fetched["cid"], new_cid);
}

#[tokio::test]
async fn apply_writes_update_with_changed_content_roundtrips() {
    let app = build_app(vec![]).await;
    let account = create_account(&app, "v.test", "v@x.example").await;
    let did = account["did"].as_str().unwrap().to_string();
    let access = account["accessJwt"].as_str().unwrap().to_string();

    let create = auth_json_req(
        "POST",
        "/xrpc/com.atproto.repo.createRecord",
        &access,
        json!({
            "repo": did,
            "collection": "app.bsky.feed.post",
            "record": {"$type": "app.bsky.feed.post", "text": "original", "createdAt": "2024-01-01T00:00:00Z"},
        }),
    );
    let resp = app.clone().oneshot(create).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let created = body_json(resp).await;
    let uri = created["uri"].as_str().unwrap().to_string();
    let rkey = uri.rsplit('/').next().unwrap().to_string();

    let apply = auth_json_req(
        "POST",
        "/xrpc/com.atproto.repo.applyWrites",
        &access,
        json!({
            "repo": did,
            "writes": [{
                "$type": "com.atproto.repo.applyWrites#update",
                "collection": "app.bsky.feed.post",
                "rkey": rkey,
                "value": {"$type": "app.bsky.feed.post", "text": "via applyWrites", "createdAt": "2024-01-01T00:00:00Z"},
            }],
        }),
    );
    let resp = app.clone().oneshot(apply).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let get = Request::builder()
        .method("GET")
        .uri(format!(
            "/xrpc/com.atproto.repo.getRecord?repo={did}&collection=app.bsky.feed.post&rkey={rkey}"
        ))
        .header(header::HOST, HOST)
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(get).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let fetched = body_json(resp).await;
    assert_eq!(fetched["value"]["text"], "via applyWrites");
}

#[tokio::test]
async fn concurrent_update_conflict_leaves_winner_readable() {
    let app = build_app(vec![]).await;
    let account = create_account(&app, "w.test", "w@x.example").await;
    let did = account["did"].as_str().unwrap().to_string();
    let access = account["accessJwt"].as_str().unwrap().to_string();

    let create = auth_json_req(
        "POST",
        "/xrpc/com.atproto.repo.createRecord",
        &access,
        json!({
            "repo": did,
            "collection": "app.bsky.feed.post",
            "record": {"$type": "app.bsky.feed.post", "text": "first", "createdAt": "2024-01-01T00:00:00Z"},
        }),
    );
    let resp = app.clone().oneshot(create).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let created = body_json(resp).await;
    let uri = created["uri"].as_str().unwrap().to_string();
    let rkey = uri.rsplit('/').next().unwrap().to_string();
    let head_cid = created["commit"]["cid"].as_str().unwrap().to_string();

    // Two writers race from the same observed head: one updates the
    // existing record, the other deletes it, each asserting the same
    // stale swapCommit. Driving both through tokio::join! (rather than
    // sequential awaits) lets them genuinely race on the store's
    // optimistic CAS instead of the loser simply observing an
    // already-advanced head.
    let update = auth_json_req(
        "POST",
        "/xrpc/com.atproto.repo.putRecord",
        &access,
        json!({
            "repo": did,
            "collection": "app.bsky.feed.post",
            "rkey": rkey,
            "record": {"$type": "app.bsky.feed.post", "text": "updated", "createdAt": "2024-01-01T00:00:00Z"},
            "swapCommit": head_cid,
        }),
    );
    let delete = auth_json_req(
        "POST",
        "/xrpc/com.atproto.repo.deleteRecord",
        &access,
        json!({
            "repo": did,
            "collection": "app.bsky.feed.post",
            "rkey": rkey,
            "swapCommit": head_cid,
        }),
    );
    let (update_resp, delete_resp) =
        tokio::join!(app.clone().oneshot(update), app.clone().oneshot(delete));
    let update_status = update_resp.unwrap().status();
    let delete_status = delete_resp.unwrap().status();

    // Exactly one writer can win the race against the same stale head.
    let outcomes = [update_status, delete_status];
    assert_eq!(outcomes.iter().filter(|s| **s == StatusCode::OK).count(), 1);
    assert_eq!(
        outcomes.iter().filter(|s| **s == StatusCode::CONFLICT).count(),
        1
    );

    // Whichever writer won, the repo must remain internally consistent:
    // the loser's rejected commit must not have torn blocks the winner's
    // head still references out of the shared blockstore.
    let get = Request::builder()
        .method("GET")
        .uri(format!(
            "/xrpc/com.atproto.repo.getRecord?repo={did}&collection=app.bsky.feed.post&rkey={rkey}"
        ))
        .header(header::HOST, HOST)
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(get).await.unwrap();
    if update_status == StatusCode::OK {
        assert_eq!(resp.status(), StatusCode::OK);
        let fetched = body_json(resp).await;
        assert_eq!(fetched["value"]["text"], "updated");
    } else {
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn optimistic_conflict_on_swap_commit_mismatch() {
    let app = build_app(vec![]).await;
    let account = create_account(&app, "c.test", "c@x.example").await;
    let did = account["did"].as_str().unwrap().to_string();
    let access = account["accessJwt"].as_str().unwrap().to_string();

    let create = auth_json_req(
        "POST",
        "/xrpc/com.atproto.repo.createRecord",
        &access,
        json!({
            "repo": did,
            "collection": "app.bsky.feed.post",
            "record": {"text": "stale swap", "createdAt": "2024-01-01T00:00:00Z"},
            "swapCommit": "bafyreigibsonn5o3qhzlztwqr4rsd7eb4rpj2w73gkxhr2wxhz6rbsxvta",
        }),
    );
    let resp = app.clone().oneshot(create).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn refresh_rotation_invalidates_old_token() {
    let app = build_app(vec![]).await;
    let account = create_account(&app, "d.test", "d@x.example").await;
    let refresh0 = account["refreshJwt"].as_str().unwrap().to_string();

    let first = auth_json_req(
        "POST",
        "/xrpc/com.atproto.server.refreshSession",
        &refresh0,
        json!({}),
    );
    let resp = app.clone().oneshot(first).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let rotated = body_json(resp).await;
    let refresh1 = rotated["refreshJwt"].as_str().unwrap().to_string();
    assert_ne!(refresh0, refresh1);

    let reuse = auth_json_req(
        "POST",
        "/xrpc/com.atproto.server.refreshSession",
        &refresh0,
        json!({}),
    );
    let resp = app.clone().oneshot(reuse).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let second = auth_json_req(
        "POST",
        "/xrpc/com.atproto.server.refreshSession",
        &refresh1,
        json!({}),
    );
    let resp = app.clone().oneshot(second).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn resolve_handle_unknown_handle_is_not_found() {
    let app = build_app(vec![]).await;
    let req = Request::builder()
        .method("GET")
        .uri("/xrpc/com.atproto.identity.resolveHandle?handle=nobody.test")
        .header(header::HOST, HOST)
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn proxy_without_healthy_backend_degrades_to_bad_gateway() {
    let app = build_app(vec![]).await;
    let req = Request::builder()
        .method("GET")
        .uri("/xrpc/app.bsky.notification.listNotifications")
        .header(header::HOST, HOST)
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn unbound_host_header_is_rejected() {
    let app = build_app(vec![]).await;
    let req = Request::builder()
        .method("GET")
        .uri("/xrpc/com.atproto.server.getSession")
        .header(header::HOST, "someone-elses-pds.example")
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
