//! `com.atproto.identity.resolveHandle`: map a handle hosted on this
//! instance to its DID. Foreign handles are out of scope — resolution for
//! those belongs to the client's own identity resolver, not this PDS.

use axum::Router;
use axum::extract::State;
use pds_common::xrpc::XrpcMethod;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;
use crate::xrpc_util::xrpc_endpoint;
use pds_axum::IntoRouter;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveHandleRequest {
    pub handle: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveHandleOutput {
    pub did: String,
}

xrpc_endpoint! {
    nsid: "com.atproto.identity.resolveHandle",
    method: XrpcMethod::Query,
    endpoint: ResolveHandle,
    response: ResolveHandleResponse,
    request: ResolveHandleRequest,
    output: ResolveHandleOutput,
}

async fn resolve_handle(
    State(state): State<AppState>,
    axum::Extension(host): axum::Extension<crate::config::HostConfig>,
    pds_axum::ExtractXrpc(req): pds_axum::ExtractXrpc<ResolveHandle>,
) -> Result<axum::Json<ResolveHandleOutput>, ApiError> {
    let actor = state
        .store
        .get_actor_by_handle(&host.hostname, &req.handle)?
        .ok_or_else(|| ApiError::NotFound(format!("handle {}", req.handle)))?;

    Ok(axum::Json(ResolveHandleOutput { did: actor.did }))
}

pub fn router() -> Router<AppState> {
    Router::new().merge(ResolveHandle::into_router(resolve_handle))
}
