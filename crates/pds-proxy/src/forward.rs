//! Request shaping and forwarding for proxied `/xrpc/*` calls.
//!
//! `pds-server`'s dispatch layer resolves *which* service DID a request
//! targets (from the `atproto-proxy` header, or a configured appview
//! fallback) and whether the caller is authenticable; this module only
//! knows how to mint the outbound credential and copy the request across.

use std::time::Duration;

use http::{HeaderMap, HeaderName, Method};
use k256::ecdsa::SigningKey;

use crate::backend::BackendPool;
use crate::error::{ProxyError, Result};

const FORWARD_TIMEOUT: Duration = Duration::from_secs(15);

/// Extract the lexicon method from `/xrpc/<lxm>`.
pub fn parse_xrpc_method(path: &str) -> Result<&str> {
    path.strip_prefix("/xrpc/")
        .filter(|rest| !rest.is_empty())
        .ok_or_else(|| ProxyError::MalformedPath(path.to_string()))
}

/// Parse `"<serviceDID>#<serviceFragment>"` from an `atproto-proxy` header.
pub fn parse_proxy_header(value: &str) -> Result<(&str, &str)> {
    value
        .split_once('#')
        .filter(|(did, frag)| !did.is_empty() && !frag.is_empty())
        .ok_or_else(|| ProxyError::MalformedProxyHeader(value.to_string()))
}

/// An authenticated caller, eligible to have a service-auth JWT minted on
/// their behalf. Callers that offered no token, or an invalid one, must
/// not reach this path — the inbound `Authorization` header is stripped
/// instead (see module docs).
pub struct MintContext<'a> {
    pub repo_signing_key: &'a SigningKey,
    pub actor_did: &'a str,
}

/// Forward `method path_and_query` to `service_did` through `pool`,
/// stripping `Authorization`/`Access-Control-*` and re-minting
/// `Authorization` only when `mint` is `Some`.
pub async fn forward(
    pool: &BackendPool,
    service_did: &str,
    lxm: &str,
    mint: Option<MintContext<'_>>,
    method: Method,
    path_and_query: &str,
    inbound_headers: &HeaderMap,
    body: Vec<u8>,
) -> Result<http::Response<Vec<u8>>> {
    let backend = pool
        .select(service_did)
        .ok_or_else(|| ProxyError::NoHealthyBackend(service_did.to_string()))?;

    let url = backend
        .base_url
        .join(path_and_query.trim_start_matches('/'))
        .map_err(|_| ProxyError::MalformedPath(path_and_query.to_string()))?;

    let mut req = pool
        .client()
        .request(method.clone(), url)
        .timeout(FORWARD_TIMEOUT);

    for (name, value) in inbound_headers.iter() {
        if is_stripped_header(name) {
            continue;
        }
        req = req.header(name.as_str(), value.as_bytes());
    }

    if let Some(ctx) = mint {
        let jwt = pds_auth::service_auth::mint(ctx.repo_signing_key, ctx.actor_did, service_did, lxm, 60)?;
        req = req.header(http::header::AUTHORIZATION, format!("Bearer {jwt}"));
    }

    if method != Method::GET && method != Method::HEAD {
        req = req.body(body);
    }

    let resp = req.send().await?;
    let mut builder = http::Response::builder().status(resp.status());
    for (name, value) in resp.headers().iter() {
        if is_stripped_response_header(name) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_bytes());
    }
    let bytes = resp.bytes().await?.to_vec();
    Ok(builder.body(bytes).expect("valid response builder"))
}

fn is_stripped_header(name: &HeaderName) -> bool {
    name == http::header::AUTHORIZATION || name == http::header::HOST
}

fn is_stripped_response_header(name: &HeaderName) -> bool {
    name.as_str()
        .to_ascii_lowercase()
        .starts_with("access-control-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_xrpc_method() {
        assert_eq!(
            parse_xrpc_method("/xrpc/app.bsky.feed.getTimeline").unwrap(),
            "app.bsky.feed.getTimeline"
        );
        assert!(parse_xrpc_method("/xrpc/").is_err());
        assert!(parse_xrpc_method("/not-xrpc").is_err());
    }

    #[test]
    fn parses_proxy_header() {
        let (did, frag) = parse_proxy_header("did:web:feedgen.example#bsky_fg").unwrap();
        assert_eq!(did, "did:web:feedgen.example");
        assert_eq!(frag, "bsky_fg");

        assert!(parse_proxy_header("did:web:feedgen.example").is_err());
        assert!(parse_proxy_header("#bsky_fg").is_err());
    }
}
