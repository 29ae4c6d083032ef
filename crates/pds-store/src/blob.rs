//! Blob metadata rows.
//!
//! The byte stream itself lives in external object storage keyed by
//! `blobs/<did>/<cid>` (see `pds-blob`); this module only persists the
//! `(did, cid, mime_type, size, created_at)` row the data model names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::Store;

/// Metadata for one uploaded blob.
///
/// Invariant: `cid` is the CIDv1 raw-codec sha2-256 digest of the blob's
/// full byte stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blob {
    pub did: String,
    pub cid: String,
    pub mime_type: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

fn blob_key(did: &str, cid: &str) -> Vec<u8> {
    let mut key = did.as_bytes().to_vec();
    key.push(0);
    key.extend_from_slice(cid.as_bytes());
    key
}

impl Store {
    pub fn save_blob(&self, blob: &Blob) -> Result<()> {
        let key = blob_key(&blob.did, &blob.cid);
        let row = serde_json::to_vec(blob)?;
        self.blobs().insert(key, row)?;
        Ok(())
    }

    pub fn get_blob(&self, did: &str, cid: &str) -> Result<Option<Blob>> {
        let key = blob_key(did, cid);
        match self.blobs().get(key)? {
            Some(row) => Ok(Some(serde_json::from_slice(&row)?)),
            None => Ok(None),
        }
    }

    /// Blob metadata for `did`, in CID order, paginated by a CID cursor.
    /// `limit` is clamped to 1000.
    pub fn list_blobs(&self, did: &str, cursor: Option<&str>, limit: usize) -> Result<Vec<Blob>> {
        let limit = limit.min(1000);
        let mut prefix = did.as_bytes().to_vec();
        prefix.push(0);

        let start = match cursor {
            Some(c) => {
                let mut key = prefix.clone();
                key.extend_from_slice(c.as_bytes());
                key.push(0);
                key
            }
            None => prefix.clone(),
        };

        let mut out = Vec::with_capacity(limit);
        for entry in self.blobs().range(start..) {
            let (key, row) = entry?;
            if !key.starts_with(&prefix) {
                break;
            }
            out.push(serde_json::from_slice(&row)?);
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }
}
