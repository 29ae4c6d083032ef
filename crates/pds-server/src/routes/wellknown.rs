//! Unauthenticated host-level endpoints: health, robots, and this
//! instance's own `did:web` document per bound host.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};
use p256::ecdsa::VerifyingKey;
use pds_common::types::did_doc::{DidDocument, Service, VerificationMethod};
use pds_common::types::string::Did;
use serde_json::json;

use crate::config::HostConfig;
use crate::state::AppState;

async fn ping() -> &'static str {
    "OK"
}

async fn health() -> impl IntoResponse {
    Json(json!({"version": env!("CARGO_PKG_VERSION")}))
}

async fn robots() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
        "User-agent: *\nDisallow: /\n",
    )
}

/// `did:web` document for the bound host itself (not an actor). Each host
/// has its own document since each has its own session-signing key and
/// service DID, so a single static router (as `pds_axum::did_web` assumes)
/// can't serve every tenant.
async fn host_did_doc(Extension(host): Extension<HostConfig>) -> impl IntoResponse {
    let verifying_key = host.signing_key.verifying_key();
    let public_key_multibase = encode_p256_multikey(verifying_key);

    let doc = DidDocument {
        id: match Did::new_owned(&host.service_did) {
            Ok(did) => did,
            Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        },
        also_known_as: Some(vec![format!("https://{}", host.hostname).into()]),
        verification_method: Some(vec![VerificationMethod {
            id: format!("{}#atproto_label", host.service_did).into(),
            r#type: "Multikey".into(),
            controller: Some(host.service_did.clone().into()),
            public_key_multibase: Some(public_key_multibase.into()),
            extra_data: BTreeMap::new(),
        }]),
        service: Some(vec![Service {
            id: "#atproto_pds".into(),
            r#type: "AtprotoPersonalDataServer".into(),
            service_endpoint: Some(serde_json::Value::String(format!(
                "https://{}",
                host.hostname
            ))),
            extra_data: BTreeMap::new(),
        }]),
        extra_data: BTreeMap::new(),
    };

    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/did+json"),
        )],
        Json(doc),
    )
        .into_response()
}

/// `atproto-did` for user domains that resolve via `did:web` handle
/// verification: the host just asserts the DID behind a known handle.
async fn atproto_did(
    State(state): State<AppState>,
    Extension(host): Extension<HostConfig>,
) -> impl IntoResponse {
    match state.store.get_actor_by_handle(&host.hostname, &host.hostname) {
        Ok(Some(actor)) => (StatusCode::OK, actor.did).into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

const SECP256R1_MULTICODEC: u64 = 0x1200;

fn encode_uvarint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

fn encode_p256_multikey(verifying_key: &VerifyingKey) -> String {
    let compressed = verifying_key.to_encoded_point(true);
    let mut buf = Vec::with_capacity(3 + compressed.len());
    encode_uvarint(SECP256R1_MULTICODEC, &mut buf);
    buf.extend_from_slice(compressed.as_bytes());
    multibase::encode(multibase::Base::Base58Btc, buf)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ping", get(ping))
        .route("/xrpc/_health", get(health))
        .route("/robots.txt", get(robots))
        .route("/.well-known/did.json", get(host_did_doc))
        .route("/.well-known/atproto-did", get(atproto_did))
}
