//! `/xrpc/*` catch-all: forwards any lexicon this instance doesn't
//! implement itself to a health-checked upstream, per §4.5. Registered
//! last so every literal route declared by the other modules still wins.

use axum::Router;
use axum::body::Bytes;
use axum::extract::{OriginalUri, State};
use axum::http::{HeaderMap, Method, header};
use axum::response::{IntoResponse, Response};
use axum::routing::any;

use crate::config::HostConfig;
use crate::error::ApiError;
use crate::state::AppState;

/// Backends declared with `--appview` share this sentinel service DID —
/// they're the fallback target for any request carrying no `atproto-proxy`
/// header, distinct from a header naming an explicit third-party service.
pub const DEFAULT_APPVIEW_SERVICE_DID: &str = "#default-appview";

/// An access JWT that validates against this host, if one was offered.
/// Unlike [`crate::middleware::AccessAuth`] this never rejects the
/// request — an absent or invalid token just means "not authenticable",
/// per the proxy's strip-rather-than-401 rule.
async fn authenticable_actor(
    state: &AppState,
    host: &HostConfig,
    headers: &HeaderMap,
) -> Option<pds_store::Actor> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))?;
    let public_key = host.signing_key.verifying_key();
    let claims = pds_auth::session::verify(
        token,
        &public_key,
        pds_auth::session::ACCESS_SCOPE,
        &host.service_did,
    )
    .ok()?;
    crate::middleware::check_actor_host(state, &claims.sub, &host.hostname).ok()?;
    state.store.get_actor_by_did(&claims.sub).ok().flatten()
}

async fn proxy(
    State(state): State<AppState>,
    axum::Extension(host): axum::Extension<HostConfig>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let path = uri.path();
    let lxm = pds_proxy::parse_xrpc_method(path)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
        .to_string();

    let (service_did, actor) = match headers.get("atproto-proxy").and_then(|v| v.to_str().ok()) {
        Some(value) => {
            let (service_did, _fragment) =
                pds_proxy::parse_proxy_header(value).map_err(|e| ApiError::BadRequest(e.to_string()))?;
            let actor = authenticable_actor(&state, &host, &headers).await;
            (service_did.to_string(), actor)
        }
        None => (DEFAULT_APPVIEW_SERVICE_DID.to_string(), None),
    };

    let mint = actor.as_ref().and_then(|actor| {
        let signing_key = k256::ecdsa::SigningKey::from_slice(&actor.signing_key).ok()?;
        Some((actor.did.clone(), signing_key))
    });

    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or(path)
        .to_string();

    let resp = match &mint {
        Some((actor_did, signing_key)) => {
            pds_proxy::forward(
                &state.proxy_pool,
                &service_did,
                &lxm,
                Some(pds_proxy::MintContext {
                    repo_signing_key: signing_key,
                    actor_did,
                }),
                method,
                &path_and_query,
                &headers,
                body.to_vec(),
            )
            .await?
        }
        None => {
            pds_proxy::forward(
                &state.proxy_pool,
                &service_did,
                &lxm,
                None,
                method,
                &path_and_query,
                &headers,
                body.to_vec(),
            )
            .await?
        }
    };

    let (parts, body) = resp.into_parts();
    Ok((parts.status, parts.headers, body).into_response())
}

pub fn router() -> Router<AppState> {
    Router::new().route("/xrpc/{*lxm}", any(proxy))
}
