//! Blob plane: content-addressed upload, download, and listing.
//!
//! Byte storage ([`store::BlobStore`]/[`store::FsBlobStore`]) and metadata
//! persistence (`pds_store::Blob`, via [`pds_store::Store`]) are kept
//! separate, matching the data model's split between the `blobs/<did>/<cid>`
//! object-storage key and the `Blob` metadata row.

mod error;
pub mod store;

use bytes::Bytes;
use chrono::Utc;
use cid::Cid;
use multihash::Multihash;

pub use error::{BlobError, Result};
pub use store::{BlobStore, FsBlobStore};

use pds_store::{Blob, Store};

/// Raw binary multicodec, per the multiformats table.
const RAW_CODEC: u64 = 0x55;
const SHA2_256: u64 = 0x12;

fn compute_blob_cid(data: &[u8]) -> Cid {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(data);
    let mh = Multihash::wrap(SHA2_256, &digest).expect("sha2-256 digest fits multihash");
    Cid::new_v1(RAW_CODEC, mh)
}

/// `uploadBlob`: reject empty bodies, content-address the bytes, persist
/// both the object and its metadata row, and return the minted CID.
pub async fn upload<B: BlobStore>(
    store: &Store,
    blobstore: &B,
    did: &str,
    data: Bytes,
    mime_type: Option<&str>,
) -> Result<Blob> {
    if data.is_empty() {
        return Err(BlobError::Empty);
    }

    let cid = compute_blob_cid(&data);
    let cid_str = cid.to_string();
    let size = data.len() as u64;

    blobstore.put(did, &cid_str, data).await?;

    let blob = Blob {
        did: did.to_string(),
        cid: cid_str,
        mime_type: mime_type.unwrap_or("application/octet-stream").to_string(),
        size,
        created_at: Utc::now(),
    };
    store.save_blob(&blob)?;
    Ok(blob)
}

/// `getBlob`: 404-equivalent `None` when the metadata row is missing;
/// otherwise the metadata plus the full byte stream.
pub async fn download<B: BlobStore>(
    store: &Store,
    blobstore: &B,
    did: &str,
    cid: &str,
) -> Result<Option<(Blob, Bytes)>> {
    let Some(meta) = store.get_blob(did, cid)? else {
        return Ok(None);
    };
    let data = blobstore.get(did, cid).await?.ok_or_else(|| BlobError::NotFound {
        did: did.to_string(),
        cid: cid.to_string(),
    })?;
    Ok(Some((meta, data)))
}

/// `listBlobs`: metadata only, cursor-paginated by CID, limit clamped to
/// 1000 (enforced in `pds_store::Store::list_blobs`).
pub fn list(store: &Store, did: &str, cursor: Option<&str>, limit: usize) -> Result<Vec<Blob>> {
    Ok(store.list_blobs(did, cursor, limit)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_rejects_empty_body() {
        let store = Store::open_temporary().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let blobstore = FsBlobStore::new(dir.path());
        let err = upload(&store, &blobstore, "did:plc:alice", Bytes::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::Empty));
    }

    #[tokio::test]
    async fn upload_then_download_roundtrips() {
        let store = Store::open_temporary().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let blobstore = FsBlobStore::new(dir.path());

        let blob = upload(
            &store,
            &blobstore,
            "did:plc:alice",
            Bytes::from_static(b"binary data"),
            Some("image/png"),
        )
        .await
        .unwrap();

        let (meta, data) = download(&store, &blobstore, "did:plc:alice", &blob.cid)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(meta.mime_type, "image/png");
        assert_eq!(data.as_ref(), b"binary data");
    }

    #[tokio::test]
    async fn download_of_unknown_blob_is_none() {
        let store = Store::open_temporary().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let blobstore = FsBlobStore::new(dir.path());
        assert!(
            download(&store, &blobstore, "did:plc:alice", "bafkreinope")
                .await
                .unwrap()
                .is_none()
        );
    }
}
