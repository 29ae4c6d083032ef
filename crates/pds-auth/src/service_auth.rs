//! Outbound service-auth JWT minting, signed with the actor's repo
//! signing key (ES256K). The wire shape mirrors
//! `pds_common::service_auth::ServiceAuthClaims` exactly so the same
//! struct can be reused for both minting here and verification there.

use chrono::Utc;
use k256::ecdsa::signature::Signer;
use k256::ecdsa::{Signature, SigningKey};
use pds_common::service_auth::ServiceAuthClaims;
use pds_common::types::string::{Did, Nsid};

use crate::error::Result;
use crate::jwt;

/// Service-auth tokens are capped at 60 seconds per the data model.
const MAX_TTL_SECS: i64 = 60;

/// Mint a service-auth JWT authorizing `lxm` against `aud`, signed with
/// the actor's repo key. `ttl_secs` is clamped to 60 seconds.
pub fn mint(
    repo_signing_key: &SigningKey,
    iss: &str,
    aud: &str,
    lxm: &str,
    ttl_secs: i64,
) -> Result<String> {
    let now = Utc::now().timestamp();
    let ttl = ttl_secs.clamp(1, MAX_TTL_SECS);
    let claims = ServiceAuthClaims {
        iss: Did::new(iss).map_err(|e| crate::error::AuthError::Malformed(e.to_string()))?,
        aud: Did::new(aud).map_err(|e| crate::error::AuthError::Malformed(e.to_string()))?,
        exp: now + ttl,
        iat: now,
        jti: Some(jwt::random_jti().into()),
        lxm: Some(Nsid::new(lxm).map_err(|e| crate::error::AuthError::Malformed(e.to_string()))?),
    };

    jwt::encode("ES256K", &claims, |input| {
        let sig: Signature = repo_signing_key.sign(input);
        sig.to_bytes().to_vec()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pds_common::service_auth::{PublicKey, verify_service_jwt};
    use rand::rngs::OsRng;

    #[test]
    fn minted_token_verifies() {
        let key = SigningKey::random(&mut OsRng);
        let verifying_key = *key.verifying_key();

        let token = mint(
            &key,
            "did:plc:alice",
            "did:web:feedgen.example",
            "app.bsky.feed.getFeedSkeleton",
            60,
        )
        .unwrap();

        let public_key =
            PublicKey::from_k256_bytes(&verifying_key.to_encoded_point(true).as_bytes().to_vec())
                .unwrap();
        let claims = verify_service_jwt(&token, &public_key).unwrap();
        assert_eq!(claims.iss.as_str(), "did:plc:alice");
        assert_eq!(claims.aud.as_str(), "did:web:feedgen.example");
    }

    #[test]
    fn ttl_is_clamped_to_60_seconds() {
        let key = SigningKey::random(&mut OsRng);
        let token = mint(
            &key,
            "did:plc:alice",
            "did:web:feedgen.example",
            "app.bsky.feed.getFeedSkeleton",
            3600,
        )
        .unwrap();

        let parts: Vec<&str> = token.split('.').collect();
        use base64::Engine;
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let payload = URL_SAFE_NO_PAD.decode(parts[1]).unwrap();
        let claims: ServiceAuthClaims = serde_json::from_slice(&payload).unwrap();
        assert!(claims.exp - claims.iat <= MAX_TTL_SECS);
    }
}
