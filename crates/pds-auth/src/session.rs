//! Session FSM: `createSession` / `authMiddleware` / `refreshSession` /
//! `deleteSession`, per the `[None] -> [Active] -> [Active'] -> [Revoked]`
//! state machine.
//!
//! Access and refresh JWTs are signed with the host's P-256 (ES256) key
//! and share a `jti`; only the refresh token is persisted (inside the
//! owning actor's `refresh_tokens` list), so access-token validity is
//! entirely signature + claims based.

use chrono::{Duration, Utc};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

use pds_store::{Actor, RefreshToken, Store};

use crate::error::{AuthError, Result};
use crate::jwt;
use crate::password;

pub const ACCESS_SCOPE: &str = "com.atproto.access";
pub const REFRESH_SCOPE: &str = "com.atproto.refresh";

const ACCESS_TTL: Duration = Duration::hours(3);
const REFRESH_TTL: Duration = Duration::days(7);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub scope: String,
    pub aud: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// A minted access/refresh pair, sharing a `jti`.
pub struct SessionTokens {
    pub access_jwt: String,
    pub refresh_jwt: String,
    pub jti: String,
}

fn mint(host_key: &SigningKey, scope: &str, aud: &str, sub: &str, jti: &str, ttl: Duration) -> Result<String> {
    let now = Utc::now();
    let claims = SessionClaims {
        scope: scope.to_string(),
        aud: aud.to_string(),
        sub: sub.to_string(),
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
        jti: jti.to_string(),
    };
    jwt::encode("ES256", &claims, |input| {
        let sig: Signature = host_key.sign(input);
        sig.to_bytes().to_vec()
    })
}

/// Mint a fresh access/refresh pair for `actor_did` against `service_did`.
pub fn mint_pair(host_key: &SigningKey, service_did: &str, actor_did: &str) -> Result<SessionTokens> {
    let jti = jwt::random_jti();
    let access_jwt = mint(host_key, ACCESS_SCOPE, service_did, actor_did, &jti, ACCESS_TTL)?;
    let refresh_jwt = mint(host_key, REFRESH_SCOPE, service_did, actor_did, &jti, REFRESH_TTL)?;
    Ok(SessionTokens {
        access_jwt,
        refresh_jwt,
        jti,
    })
}

/// Parse and verify a session JWT against the host's public key,
/// requiring `expected_scope` and `expected_aud`.
pub fn verify(
    token: &str,
    host_public_key: &VerifyingKey,
    expected_scope: &str,
    expected_aud: &str,
) -> Result<SessionClaims> {
    let mut parts = token.split('.');
    let (header_b64, payload_b64, sig_b64) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(p), Some(s), None) => (h, p, s),
        _ => return Err(AuthError::Malformed("expected 3 dot-separated parts".into())),
    };

    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let payload_buf = URL_SAFE_NO_PAD.decode(payload_b64)?;
    let sig_buf = URL_SAFE_NO_PAD.decode(sig_b64)?;
    let claims: SessionClaims = serde_json::from_slice(&payload_buf)?;

    let signing_input = format!("{header_b64}.{payload_b64}");
    let sig = Signature::from_slice(&sig_buf).map_err(|e| AuthError::Crypto(e.to_string()))?;
    host_public_key
        .verify(signing_input.as_bytes(), &sig)
        .map_err(|_| AuthError::Crypto("invalid signature".into()))?;

    if claims.scope != expected_scope {
        return Err(AuthError::Malformed(format!(
            "expected scope {expected_scope}, got {}",
            claims.scope
        )));
    }
    if claims.aud != expected_aud {
        return Err(AuthError::WrongAudience);
    }
    if claims.exp <= Utc::now().timestamp() {
        return Err(AuthError::Expired);
    }

    Ok(claims)
}

/// `createSession`: resolve `identifier` as DID, then email, then handle
/// (each scoped to `host`), check the password, and mint a fresh pair.
pub fn create_session(
    store: &Store,
    host_key: &SigningKey,
    service_did: &str,
    host: &str,
    identifier: &str,
    password: &str,
) -> Result<(Actor, SessionTokens)> {
    let actor = store
        .get_actor_by_did(identifier)?
        .or(store.get_actor_by_email(host, identifier)?)
        .or(store.get_actor_by_handle(host, identifier)?)
        .ok_or(AuthError::InvalidCredentials)?;

    if actor.host != host {
        return Err(AuthError::InvalidCredentials);
    }
    if !password::verify(password, &actor.password_hash)? {
        return Err(AuthError::InvalidCredentials);
    }

    let tokens = mint_pair(host_key, service_did, &actor.did)?;
    let mut updated = actor.clone();
    updated.refresh_tokens.push(RefreshToken {
        token: tokens.refresh_jwt.clone(),
        created_at: Utc::now(),
        expires_at: Utc::now() + REFRESH_TTL,
    });
    store.save_actor(&updated)?;

    Ok((updated, tokens))
}

/// `refreshSession`: verify the refresh JWT, require it still be listed on
/// the actor, atomically swap it for a freshly minted pair.
pub fn refresh_session(
    store: &Store,
    host_key: &SigningKey,
    host_public_key: &VerifyingKey,
    service_did: &str,
    host: &str,
    refresh_jwt: &str,
) -> Result<SessionTokens> {
    let claims = verify(refresh_jwt, host_public_key, REFRESH_SCOPE, service_did)?;

    let actor = store
        .get_actor_by_did(&claims.sub)?
        .ok_or(AuthError::InvalidCredentials)?;
    if actor.host != host {
        return Err(AuthError::WrongHost);
    }
    if !actor.refresh_tokens.iter().any(|t| t.token == refresh_jwt) {
        return Err(AuthError::RefreshTokenUnknown);
    }

    let tokens = mint_pair(host_key, service_did, &actor.did)?;
    let mut updated = actor;
    updated.refresh_tokens.retain(|t| t.token != refresh_jwt);
    updated.refresh_tokens.push(RefreshToken {
        token: tokens.refresh_jwt.clone(),
        created_at: Utc::now(),
        expires_at: Utc::now() + REFRESH_TTL,
    });
    store.save_actor(&updated)?;

    Ok(tokens)
}

/// `deleteSession`: verify the access JWT, drop every refresh token
/// sharing its `jti` from the owning actor.
pub fn delete_session(
    store: &Store,
    host_public_key: &VerifyingKey,
    service_did: &str,
    access_jwt: &str,
) -> Result<()> {
    let claims = verify(access_jwt, host_public_key, ACCESS_SCOPE, service_did)?;
    let actor = store
        .get_actor_by_did(&claims.sub)?
        .ok_or(AuthError::InvalidCredentials)?;

    let mut updated = actor;
    let before = updated.refresh_tokens.len();
    updated
        .refresh_tokens
        .retain(|t| !token_jti_matches(&t.token, &claims.jti));
    if updated.refresh_tokens.len() != before {
        store.save_actor(&updated)?;
    }
    Ok(())
}

fn token_jti_matches(token: &str, jti: &str) -> bool {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let payload_b64 = match token.split('.').nth(1) {
        Some(p) => p,
        None => return false,
    };
    let Ok(payload) = URL_SAFE_NO_PAD.decode(payload_b64) else {
        return false;
    };
    let Ok(claims) = serde_json::from_slice::<SessionClaims>(&payload) else {
        return false;
    };
    claims.jti == jti
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn host_key() -> SigningKey {
        SigningKey::random(&mut OsRng)
    }

    #[test]
    fn mint_and_verify_roundtrip() {
        let key = host_key();
        let pubkey = VerifyingKey::from(&key);
        let tokens = mint_pair(&key, "did:web:pds.example", "did:plc:alice").unwrap();

        let claims = verify(
            &tokens.access_jwt,
            &pubkey,
            ACCESS_SCOPE,
            "did:web:pds.example",
        )
        .unwrap();
        assert_eq!(claims.sub, "did:plc:alice");
        assert_eq!(claims.jti, tokens.jti);
    }

    #[test]
    fn wrong_scope_is_rejected() {
        let key = host_key();
        let pubkey = VerifyingKey::from(&key);
        let tokens = mint_pair(&key, "did:web:pds.example", "did:plc:alice").unwrap();

        assert!(verify(&tokens.access_jwt, &pubkey, REFRESH_SCOPE, "did:web:pds.example").is_err());
    }

    #[test]
    fn full_session_lifecycle() {
        let store = Store::open_temporary().unwrap();
        let key = host_key();
        let pubkey = VerifyingKey::from(&key);

        let mut actor = Actor {
            did: "did:plc:alice".to_string(),
            handle: "alice.example.com".to_string(),
            host: "example.com".to_string(),
            password_hash: password::hash("hunter2").unwrap(),
            signing_key: vec![],
            rotation_keys: vec![],
            email: "alice@example.com".to_string(),
            email_verified: true,
            active: true,
            head: None,
            rev: None,
            refresh_tokens: vec![],
            preferences: serde_json::json!({}),
            created_at: Utc::now(),
        };
        store.save_actor(&actor).unwrap();

        let (updated, tokens) = create_session(
            &store,
            &key,
            "did:web:pds.example",
            "example.com",
            "alice.example.com",
            "hunter2",
        )
        .unwrap();
        actor = updated;
        assert_eq!(actor.refresh_tokens.len(), 1);

        let refreshed = refresh_session(
            &store,
            &key,
            &pubkey,
            "did:web:pds.example",
            "example.com",
            &tokens.refresh_jwt,
        )
        .unwrap();
        assert_ne!(refreshed.refresh_jwt, tokens.refresh_jwt);

        // The consumed refresh token must now be rejected.
        assert!(refresh_session(
            &store,
            &key,
            &pubkey,
            "did:web:pds.example",
            "example.com",
            &tokens.refresh_jwt,
        )
        .is_err());

        delete_session(&store, &pubkey, "did:web:pds.example", &refreshed.access_jwt).unwrap();
        let actor = store.get_actor_by_did("did:plc:alice").unwrap().unwrap();
        assert!(actor.refresh_tokens.is_empty());
    }
}
