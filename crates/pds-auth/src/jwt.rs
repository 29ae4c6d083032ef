//! JWT encoding shared by session tokens and service-auth tokens.
//!
//! Mirrors the wire format `pds_common::service_auth` already parses:
//! `base64url(header).base64url(payload).base64url(signature)`, no padding.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Serialize;

use crate::error::Result;

#[derive(Serialize)]
struct Header<'a> {
    alg: &'a str,
    typ: &'static str,
}

/// Build the signing input (`header.payload`) and sign it with `sign`,
/// returning the complete compact-serialization JWT.
pub fn encode<T, F>(alg: &str, claims: &T, sign: F) -> Result<String>
where
    T: Serialize,
    F: FnOnce(&[u8]) -> Vec<u8>,
{
    let header = Header { alg, typ: "JWT" };
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
    let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let signing_input = format!("{header_b64}.{payload_b64}");
    let signature = sign(signing_input.as_bytes());
    let sig_b64 = URL_SAFE_NO_PAD.encode(signature);
    Ok(format!("{signing_input}.{sig_b64}"))
}

/// Generate a random 128-bit `jti`, hex-encoded.
pub fn random_jti() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
