//! Host binding and session-JWT extractors shared by the route handlers.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::{StatusCode, header, request::Parts};
use axum::middleware::Next;
use axum::response::Response;

use crate::config::HostConfig;
use crate::error::ApiError;
use crate::state::AppState;

/// Resolve the `Host` header to a configured [`HostConfig`] and stash it in
/// request extensions. Requests for hostnames this instance doesn't serve
/// are rejected before reaching any handler.
pub async fn bind_host(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let host_header = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::BAD_REQUEST)?;
    let hostname = host_header.split(':').next().unwrap_or(host_header);

    let Some(host) = state.hosts.get(hostname).await else {
        return Err(StatusCode::NOT_FOUND);
    };

    req.extensions_mut().insert(host);
    Ok(next.run(req).await)
}

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))
}

fn bound_host(parts: &Parts) -> Result<HostConfig, ApiError> {
    parts
        .extensions
        .get::<HostConfig>()
        .cloned()
        .ok_or_else(|| ApiError::Unauthorized("no host bound".into()))
}

/// An authenticated actor DID, extracted from a verified access-scope JWT.
pub struct AccessAuth {
    pub did: String,
}

/// Reject cross-tenant token reuse: a token minted by one host's key must
/// not authenticate an actor whose repo lives on a different host, even
/// if the signature and audience both check out.
pub(crate) fn check_actor_host(state: &AppState, did: &str, host: &str) -> Result<(), ApiError> {
    let actor = state
        .store
        .get_actor_by_did(did)?
        .ok_or_else(|| ApiError::Unauthorized(format!("unknown actor {did}")))?;
    if actor.host != host {
        return Err(ApiError::Unauthorized(format!("{did} is not hosted here")));
    }
    Ok(())
}

impl FromRequestParts<AppState> for AccessAuth {
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let token = bearer_token(parts).map(str::to_owned);
        let host = bound_host(parts);
        let state = state.clone();
        async move {
            let token = token?;
            let host = host?;
            let public_key = host.signing_key.verifying_key();
            let claims = pds_auth::session::verify(
                &token,
                &public_key,
                pds_auth::session::ACCESS_SCOPE,
                &host.service_did,
            )
            .map_err(ApiError::Auth)?;
            check_actor_host(&state, &claims.sub, &host.hostname)?;
            Ok(AccessAuth { did: claims.sub })
        }
    }
}

/// A verified refresh JWT, carried raw so the handler can rotate it.
pub struct RefreshAuth {
    pub did: String,
    pub refresh_jwt: String,
}

impl FromRequestParts<AppState> for RefreshAuth {
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let token = bearer_token(parts).map(str::to_owned);
        let host = bound_host(parts);
        let state = state.clone();
        async move {
            let token = token?;
            let host = host?;
            let public_key = host.signing_key.verifying_key();
            let claims = pds_auth::session::verify(
                &token,
                &public_key,
                pds_auth::session::REFRESH_SCOPE,
                &host.service_did,
            )
            .map_err(ApiError::Auth)?;
            check_actor_host(&state, &claims.sub, &host.hostname)?;
            Ok(RefreshAuth {
                did: claims.sub,
                refresh_jwt: token,
            })
        }
    }
}
