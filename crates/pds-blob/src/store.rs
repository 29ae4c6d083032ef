//! Filesystem-backed blob byte storage.
//!
//! One file per blob at `<root>/<did>/<cid>`, mirroring the `blobs/<did>/<cid>`
//! key layout from the data model. Grounded in the load/write shape of
//! `pds_repo::storage::FileBlockStore`, but a blob is an opaque byte stream
//! rather than a CAR-framed block set, so each blob gets its own file
//! instead of sharing one archive.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::Result;

#[trait_variant::make(Send)]
pub trait BlobStore: Clone {
    async fn put(&self, did: &str, cid: &str, data: Bytes) -> Result<()>;
    async fn get(&self, did: &str, cid: &str) -> Result<Option<Bytes>>;
}

#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, did: &str, cid: &str) -> PathBuf {
        self.root.join(did).join(cid)
    }
}

impl BlobStore for FsBlobStore {
    async fn put(&self, did: &str, cid: &str, data: Bytes) -> Result<()> {
        let path = self.path_for(did, cid);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(&data).await?;
        Ok(())
    }

    async fn get(&self, did: &str, cid: &str) -> Result<Option<Bytes>> {
        let path = self.path_for(did, cid);
        match tokio::fs::File::open(&path).await {
            Ok(mut file) => {
                let mut buf = Vec::new();
                file.read_to_end(&mut buf).await?;
                Ok(Some(Bytes::from(buf)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Returns whether `root` exists, for constructors that want to fail fast
/// on a misconfigured data directory rather than lazily on first upload.
pub fn root_exists(root: &Path) -> bool {
    root.exists()
}
