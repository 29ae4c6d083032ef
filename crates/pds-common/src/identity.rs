//! Pluggable DID resolution.
//!
//! The PDS is authoritative for the DID documents of actors it hosts, but
//! verifying inbound service-auth JWTs may require resolving a caller's
//! signing key for a DID hosted elsewhere. That lookup is modeled as this
//! trait so the core never talks to a directory network itself; a concrete
//! resolver (local actor table, PLC directory client, or some combination)
//! is supplied by the binary that wires the server together.

use crate::types::did_doc::DidDocument;
use crate::types::string::Did;
use std::future::Future;

/// Failure modes when resolving a DID to its document.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum IdentityError {
    /// No document is known for this DID
    #[error("DID not found: {0}")]
    NotFound(String),

    /// The resolver's backing transport failed
    #[error("identity resolution failed: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The document fetched does not parse as a valid DID document
    #[error("invalid DID document for {0}: {1}")]
    InvalidDocument(String, String),
}

/// Resolves a DID to its current DID document.
#[trait_variant::make(Send)]
pub trait IdentityResolver {
    /// Resolve `did` to its DID document.
    fn resolve_did_doc(&self, did: &Did<'_>) -> impl Future<Output = Result<DidDocument<'static>, IdentityError>>;
}
