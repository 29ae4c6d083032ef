//! `com.atproto.server.*`: account and session lifecycle.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use pds_common::IntoStatic;
use pds_common::types::string::Did;
use pds_common::xrpc::XrpcMethod;
use pds_repo::Repository;
use pds_store::Actor;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::firehose::encode_commit_frame;
use crate::ids::generate_plc_did;
use crate::middleware::{AccessAuth, RefreshAuth};
use crate::state::AppState;
use crate::xrpc_util::xrpc_endpoint;
use pds_axum::IntoRouter;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    pub email: String,
    pub handle: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountOutput {
    pub did: String,
    pub handle: String,
    pub access_jwt: String,
    pub refresh_jwt: String,
}

xrpc_endpoint! {
    nsid: "com.atproto.server.createAccount",
    method: XrpcMethod::Procedure("application/json"),
    endpoint: CreateAccount,
    response: CreateAccountResponse,
    request: CreateAccountRequest,
    output: CreateAccountOutput,
}

async fn create_account(
    State(state): State<AppState>,
    axum::Extension(host): axum::Extension<crate::config::HostConfig>,
    pds_axum::ExtractXrpc(req): pds_axum::ExtractXrpc<CreateAccount>,
) -> Result<axum::Json<CreateAccountOutput>, ApiError> {
    let handle = req.handle.trim().to_lowercase();

    if state
        .store
        .get_actor_by_handle(&host.hostname, &handle)?
        .is_some()
    {
        return Err(ApiError::BadRequest(format!("handle {handle} already taken")));
    }
    if state
        .store
        .get_actor_by_email(&host.hostname, &req.email)?
        .is_some()
    {
        return Err(ApiError::BadRequest("email already taken".into()));
    }

    let did_str = generate_plc_did();
    let did = Did::new_owned(&did_str).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let repo_key = k256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
    let repo_key_bytes = repo_key.to_bytes().to_vec();

    let blockstore = Arc::new(state.store.blockstore_for(&did_str)?);
    let commit_data =
        Repository::format_init_commit(blockstore.clone(), did.clone().into_static(), &repo_key, None)
            .await?;
    let genesis = commit_data.clone();
    let repo = Repository::create_from_commit(blockstore, commit_data).await?;

    let password_hash = pds_auth::password::hash(&req.password)?;
    let tokens = pds_auth::session::mint_pair(&host.signing_key, &host.service_did, &did_str)?;

    let actor = Actor {
        did: did_str.clone(),
        handle: handle.clone(),
        host: host.hostname.clone(),
        password_hash,
        signing_key: repo_key_bytes,
        rotation_keys: vec![],
        email: req.email.clone(),
        email_verified: false,
        active: true,
        head: Some(repo.current_commit_cid().to_string()),
        rev: Some(repo.current_commit().rev.to_string()),
        refresh_tokens: vec![pds_store::RefreshToken {
            token: tokens.refresh_jwt.clone(),
            created_at: chrono::Utc::now(),
            expires_at: chrono::Utc::now() + chrono::Duration::days(7),
        }],
        preferences: serde_json::json!({}),
        created_at: chrono::Utc::now(),
    };
    state.store.save_actor(&actor)?;

    let seq = state.next_seq();
    let firehose_commit = genesis
        .to_firehose_commit(&did, seq, pds_common::types::string::Datetime::now(), vec![], vec![])
        .await?;
    match encode_commit_frame(&firehose_commit) {
        Ok(frame) => state.publish_firehose(frame),
        Err(e) => tracing::warn!(error = %e, did = %did_str, "failed to encode genesis firehose frame"),
    }

    Ok(axum::Json(CreateAccountOutput {
        did: did_str,
        handle,
        access_jwt: tokens.access_jwt,
        refresh_jwt: tokens.refresh_jwt,
    }))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionOutput {
    pub did: String,
    pub handle: String,
    pub access_jwt: String,
    pub refresh_jwt: String,
}

xrpc_endpoint! {
    nsid: "com.atproto.server.createSession",
    method: XrpcMethod::Procedure("application/json"),
    endpoint: CreateSession,
    response: CreateSessionResponse,
    request: CreateSessionRequest,
    output: CreateSessionOutput,
}

async fn create_session(
    State(state): State<AppState>,
    axum::Extension(host): axum::Extension<crate::config::HostConfig>,
    pds_axum::ExtractXrpc(req): pds_axum::ExtractXrpc<CreateSession>,
) -> Result<axum::Json<CreateSessionOutput>, ApiError> {
    let (actor, tokens) = pds_auth::session::create_session(
        &state.store,
        &host.signing_key,
        &host.service_did,
        &host.hostname,
        &req.identifier,
        &req.password,
    )?;
    Ok(axum::Json(CreateSessionOutput {
        did: actor.did,
        handle: actor.handle,
        access_jwt: tokens.access_jwt,
        refresh_jwt: tokens.refresh_jwt,
    }))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSessionRequest;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetSessionOutput {
    pub did: String,
    pub handle: String,
    pub email: String,
    pub email_confirmed: bool,
}

xrpc_endpoint! {
    nsid: "com.atproto.server.getSession",
    method: XrpcMethod::Query,
    endpoint: GetSession,
    response: GetSessionResponse,
    request: GetSessionRequest,
    output: GetSessionOutput,
}

async fn get_session(
    State(state): State<AppState>,
    access: AccessAuth,
    pds_axum::ExtractXrpc(_req): pds_axum::ExtractXrpc<GetSession>,
) -> Result<axum::Json<GetSessionOutput>, ApiError> {
    let actor = state
        .store
        .get_actor_by_did(&access.did)?
        .ok_or_else(|| ApiError::NotFound(format!("actor {}", access.did)))?;
    Ok(axum::Json(GetSessionOutput {
        did: actor.did,
        handle: actor.handle,
        email: actor.email,
        email_confirmed: actor.email_verified,
    }))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshSessionRequest;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSessionOutput {
    pub did: String,
    pub handle: String,
    pub access_jwt: String,
    pub refresh_jwt: String,
}

xrpc_endpoint! {
    nsid: "com.atproto.server.refreshSession",
    method: XrpcMethod::Procedure("application/json"),
    endpoint: RefreshSession,
    response: RefreshSessionResponse,
    request: RefreshSessionRequest,
    output: RefreshSessionOutput,
}

async fn refresh_session(
    State(state): State<AppState>,
    axum::Extension(host): axum::Extension<crate::config::HostConfig>,
    refresh: RefreshAuth,
    pds_axum::ExtractXrpc(_req): pds_axum::ExtractXrpc<RefreshSession>,
) -> Result<axum::Json<RefreshSessionOutput>, ApiError> {
    let public_key = host.signing_key.verifying_key();
    let tokens = pds_auth::session::refresh_session(
        &state.store,
        &host.signing_key,
        &public_key,
        &host.service_did,
        &host.hostname,
        &refresh.refresh_jwt,
    )?;
    let actor = state
        .store
        .get_actor_by_did(&refresh.did)?
        .ok_or_else(|| ApiError::NotFound(format!("actor {}", refresh.did)))?;
    Ok(axum::Json(RefreshSessionOutput {
        did: actor.did,
        handle: actor.handle,
        access_jwt: tokens.access_jwt,
        refresh_jwt: tokens.refresh_jwt,
    }))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteSessionRequest;

xrpc_endpoint! {
    nsid: "com.atproto.server.deleteSession",
    method: XrpcMethod::Procedure("application/json"),
    endpoint: DeleteSession,
    response: DeleteSessionResponse,
    request: DeleteSessionRequest,
    output: crate::xrpc_util::NoOutput,
}

/// `delete_session` re-verifies the access JWT itself (scope, audience,
/// expiry), so this needs the raw bearer token rather than `AccessAuth`'s
/// already-parsed claims.
fn bearer_token(headers: &axum::http::HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))
}

async fn delete_session(
    State(state): State<AppState>,
    axum::Extension(host): axum::Extension<crate::config::HostConfig>,
    headers: axum::http::HeaderMap,
    pds_axum::ExtractXrpc(_req): pds_axum::ExtractXrpc<DeleteSession>,
) -> Result<axum::Json<crate::xrpc_util::NoOutput>, ApiError> {
    let token = bearer_token(&headers)?;
    let public_key = host.signing_key.verifying_key();
    let claims = pds_auth::session::verify(
        token,
        &public_key,
        pds_auth::session::ACCESS_SCOPE,
        &host.service_did,
    )
    .map_err(ApiError::Auth)?;
    crate::middleware::check_actor_host(&state, &claims.sub, &host.hostname)?;
    pds_auth::session::delete_session(&state.store, &public_key, &host.service_did, token)?;
    Ok(axum::Json(crate::xrpc_util::NoOutput))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(CreateAccount::into_router(create_account))
        .merge(CreateSession::into_router(create_session))
        .merge(GetSession::into_router(get_session))
        .merge(RefreshSession::into_router(refresh_session))
        .merge(DeleteSession::into_router(delete_session))
}
