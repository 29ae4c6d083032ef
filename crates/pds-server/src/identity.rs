//! DID resolution: serves DID documents for this instance's own hosted
//! actors directly from the store, and falls back to `did:plc`/`did:web`
//! resolution over HTTP for everyone else.

use std::collections::BTreeMap;
use std::sync::Arc;

use k256::ecdsa::{SigningKey, VerifyingKey};
use pds_common::identity::{IdentityError, IdentityResolver};
use pds_common::types::did_doc::{DidDocument, Service, VerificationMethod};
use pds_common::types::string::Did;
use pds_store::Store;
use url::Url;

use crate::config::HostTable;

/// Multicodec code for a secp256k1 public key, per the Multikey registry —
/// matches the decode side in `pds_axum::service_auth::extract_signing_key`.
const SECP256K1_MULTICODEC: u64 = 0xE7;

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

/// Encode a compressed secp256k1 public key as a Multikey string.
fn encode_k256_multikey(verifying_key: &VerifyingKey) -> String {
    let compressed = verifying_key.to_encoded_point(true);
    let mut buf = Vec::with_capacity(2 + compressed.len());
    encode_uvarint(SECP256K1_MULTICODEC, &mut buf);
    buf.extend_from_slice(compressed.as_bytes());
    multibase::encode(multibase::Base::Base58Btc, buf)
}

/// Resolves DIDs to DID documents, authoritatively for locally-hosted actors
/// and via the wider network for everyone else.
pub struct LocalIdentityResolver {
    store: Store,
    hosts: Arc<HostTable>,
    http: reqwest::Client,
    plc_url: Url,
}

impl LocalIdentityResolver {
    pub fn new(store: Store, hosts: Arc<HostTable>, http: reqwest::Client, plc_url: Url) -> Self {
        Self {
            store,
            hosts,
            http,
            plc_url,
        }
    }

    /// Build the DID document this instance serves for one of its own actors.
    async fn local_doc(&self, did: &Did<'_>) -> Result<Option<DidDocument<'static>>, IdentityError> {
        let Some(actor) = self.store.get_actor_by_did(did.as_str()).map_err(|e| {
            IdentityError::Transport(Box::new(e))
        })?
        else {
            return Ok(None);
        };
        let Some(host) = self.hosts.get(&actor.host).await else {
            return Err(IdentityError::InvalidDocument(
                did.as_str().to_string(),
                format!("unknown host {}", actor.host),
            ));
        };
        let signing_key = SigningKey::from_slice(&actor.signing_key).map_err(|e| {
            IdentityError::InvalidDocument(did.as_str().to_string(), format!("stored signing key: {e}"))
        })?;
        let multikey = encode_k256_multikey(signing_key.verifying_key());

        let pds_endpoint_url = format!("https://{}", host.hostname);
        let doc = DidDocument {
            id: Did::new_owned(did.as_str())
                .map_err(|e| IdentityError::InvalidDocument(did.as_str().to_string(), e.to_string()))?,
            also_known_as: Some(vec![format!("at://{}", actor.handle).into()]),
            verification_method: Some(vec![VerificationMethod {
                id: format!("{}#atproto", did.as_str()).into(),
                r#type: "Multikey".into(),
                controller: Some(did.as_str().to_string().into()),
                public_key_multibase: Some(multikey.into()),
                extra_data: BTreeMap::new(),
            }]),
            service: Some(vec![Service {
                id: "#atproto_pds".into(),
                r#type: "AtprotoPersonalDataServer".into(),
                service_endpoint: Some(serde_json::Value::String(pds_endpoint_url)),
                extra_data: BTreeMap::new(),
            }]),
            extra_data: BTreeMap::new(),
        };
        Ok(Some(doc))
    }

    /// `did:web:<host>[:<path>...]` -> `https://<host>/<path.../>.well-known/did.json`.
    fn did_web_url(&self, did: &Did<'_>) -> Result<Url, IdentityError> {
        let s = did.as_str();
        let rest = s
            .strip_prefix("did:web:")
            .ok_or_else(|| IdentityError::InvalidDocument(s.to_string(), "not a did:web".into()))?;
        let mut parts = rest.split(':');
        let host = parts
            .next()
            .ok_or_else(|| IdentityError::InvalidDocument(s.to_string(), "missing host".into()))?;
        let mut url = Url::parse(&format!("https://{host}/"))
            .map_err(|e| IdentityError::InvalidDocument(s.to_string(), e.to_string()))?;
        let path: Vec<&str> = parts.collect();
        if path.is_empty() {
            url.set_path(".well-known/did.json");
        } else {
            {
                let mut segments = url
                    .path_segments_mut()
                    .map_err(|_| IdentityError::InvalidDocument(s.to_string(), "not a base url".into()))?;
                for seg in &path {
                    segments.push(seg);
                }
                segments.push("did.json");
            }
        }
        Ok(url)
    }

    async fn fetch_did_web(&self, did: &Did<'_>) -> Result<DidDocument<'static>, IdentityError> {
        let url = self.did_web_url(did)?;
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| IdentityError::Transport(Box::new(e)))?;
        if !resp.status().is_success() {
            return Err(IdentityError::NotFound(did.as_str().to_string()));
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| IdentityError::Transport(Box::new(e)))?;
        let doc: DidDocument<'_> = serde_json::from_slice(&body)
            .map_err(|e| IdentityError::InvalidDocument(did.as_str().to_string(), e.to_string()))?;
        Ok(pds_common::IntoStatic::into_static(doc))
    }

    async fn fetch_did_plc(&self, did: &Did<'_>) -> Result<DidDocument<'static>, IdentityError> {
        let mut url = self.plc_url.clone();
        url.set_path(did.as_str());
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| IdentityError::Transport(Box::new(e)))?;
        if !resp.status().is_success() {
            return Err(IdentityError::NotFound(did.as_str().to_string()));
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| IdentityError::Transport(Box::new(e)))?;
        let doc: DidDocument<'_> = serde_json::from_slice(&body)
            .map_err(|e| IdentityError::InvalidDocument(did.as_str().to_string(), e.to_string()))?;
        Ok(pds_common::IntoStatic::into_static(doc))
    }
}

impl IdentityResolver for LocalIdentityResolver {
    async fn resolve_did_doc(&self, did: &Did<'_>) -> Result<DidDocument<'static>, IdentityError> {
        if let Some(doc) = self.local_doc(did).await? {
            return Ok(doc);
        }
        if did.as_str().starts_with("did:web:") {
            self.fetch_did_web(did).await
        } else if did.as_str().starts_with("did:plc:") {
            self.fetch_did_plc(did).await
        } else {
            Err(IdentityError::NotFound(did.as_str().to_string()))
        }
    }
}
