//! Per-actor content-addressed block storage, backed by a [`sled::Tree`].
//!
//! Implements [`pds_repo::storage::BlockStore`] directly so a [`SledBlockStore`]
//! can be handed straight to `pds_repo::repo::Repository` without an adapter.
//! Each actor (DID) gets its own tree, named `blocks:<did>`, so commit GC on
//! one repo never touches another's blocks.

use bytes::Bytes;
use cid::Cid as IpldCid;
use pds_repo::error::{RepoError, Result};
use pds_repo::storage::BlockStore;
use pds_repo::DAG_CBOR_CID_CODEC;

/// A block, keyed by CID, scoped to one actor's sled tree.
///
/// Also maintains a secondary `rev` index (`blocks_by_rev`) so
/// `GetBlocksSince` can scan newly-written blocks without touching the
/// repo's full MST.
#[derive(Clone)]
pub struct SledBlockStore {
    blocks: sled::Tree,
    by_rev: sled::Tree,
}

impl SledBlockStore {
    pub(crate) fn new(blocks: sled::Tree, by_rev: sled::Tree) -> Self {
        Self { blocks, by_rev }
    }

    fn compute_cid(data: &[u8]) -> Result<IpldCid> {
        use sha2::Digest;
        let digest = sha2::Sha256::digest(data);
        let mh = multihash::Multihash::wrap(pds_common::types::crypto::SHA2_256, &digest)
            .map_err(RepoError::crypto)?;
        Ok(IpldCid::new_v1(DAG_CBOR_CID_CODEC, mh))
    }

    /// Record that `cid` was written as part of revision `rev`, for
    /// `GetBlocksSince` cursor scans.
    pub fn mark_rev(&self, rev: &str, cid: &IpldCid) -> Result<()> {
        let mut key = rev.as_bytes().to_vec();
        key.push(0);
        key.extend_from_slice(&cid.to_bytes());
        self.by_rev.insert(key, &[]).map_err(RepoError::storage)?;
        Ok(())
    }

    /// Blocks written at or after `since` (exclusive lower bound), in
    /// revision order.
    pub fn blocks_since(&self, since: Option<&str>) -> Result<Vec<(IpldCid, Bytes)>> {
        let start = since.map(|s| {
            let mut key = s.as_bytes().to_vec();
            key.push(1); // one past the `since` rev's own separator byte
            key
        });
        let iter = match &start {
            Some(start) => self.by_rev.range(start.clone()..),
            None => self.by_rev.range(..),
        };
        let mut out = Vec::new();
        for entry in iter {
            let (key, _) = entry.map_err(RepoError::storage)?;
            let sep = key
                .iter()
                .position(|b| *b == 0)
                .ok_or_else(|| RepoError::invalid("corrupt blocks_by_rev key"))?;
            let cid = IpldCid::try_from(&key[sep + 1..])
                .map_err(|e| RepoError::invalid_cid(e.to_string()))?;
            if let Some(data) = self.blocks.get(cid.to_bytes()).map_err(RepoError::storage)? {
                out.push((cid, Bytes::from(data.to_vec())));
            }
        }
        Ok(out)
    }
}

impl BlockStore for SledBlockStore {
    async fn get(&self, cid: &IpldCid) -> Result<Option<Bytes>> {
        let data = self
            .blocks
            .get(cid.to_bytes())
            .map_err(RepoError::storage)?;
        Ok(data.map(|d| Bytes::from(d.to_vec())))
    }

    async fn put(&self, data: &[u8]) -> Result<IpldCid> {
        let cid = Self::compute_cid(data)?;
        self.blocks
            .insert(cid.to_bytes(), data)
            .map_err(RepoError::storage)?;
        Ok(cid)
    }

    async fn has(&self, cid: &IpldCid) -> Result<bool> {
        self.blocks
            .contains_key(cid.to_bytes())
            .map_err(RepoError::storage)
    }

    async fn put_many(
        &self,
        blocks: impl IntoIterator<Item = (IpldCid, Bytes)> + Send,
    ) -> Result<()> {
        let mut batch = sled::Batch::default();
        for (cid, data) in blocks {
            batch.insert(cid.to_bytes(), data.to_vec());
        }
        self.blocks.apply_batch(batch).map_err(RepoError::storage)
    }

    async fn get_many(&self, cids: &[IpldCid]) -> Result<Vec<Option<Bytes>>> {
        let mut out = Vec::with_capacity(cids.len());
        for cid in cids {
            out.push(self.get(cid).await?);
        }
        Ok(out)
    }

    async fn apply_commit(&self, commit: pds_repo::repo::CommitData) -> Result<()> {
        let rev = commit.rev.to_string();
        let mut batch = sled::Batch::default();
        for (cid, data) in &commit.blocks {
            batch.insert(cid.to_bytes(), data.to_vec());
        }
        self.blocks.apply_batch(batch).map_err(RepoError::storage)?;

        for (cid, _) in &commit.blocks {
            self.mark_rev(&rev, cid)?;
        }

        // `commit.deleted_cids` is intentionally left in place rather than
        // removed here: this call happens before the caller's optimistic
        // `swap_head` CAS, and a commit that loses that race must not have
        // already torn blocks out of the shared per-DID tree out from under
        // the commit that won. Orphaned blocks are lingering garbage, not a
        // correctness problem.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> SledBlockStore {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let blocks = db.open_tree("blocks").unwrap();
        let by_rev = db.open_tree("blocks_by_rev").unwrap();
        SledBlockStore::new(blocks, by_rev)
    }

    #[tokio::test]
    async fn put_and_get_roundtrip() {
        let store = open();
        let cid = store.put(b"hello").await.unwrap();
        let got = store.get(&cid).await.unwrap();
        assert_eq!(got.as_deref(), Some(&b"hello"[..]));
    }

    #[tokio::test]
    async fn has_reports_absence() {
        let store = open();
        let cid = store.put(b"hello").await.unwrap();
        assert!(store.has(&cid).await.unwrap());

        let other = SledBlockStore::compute_cid(b"nope").unwrap();
        assert!(!store.has(&other).await.unwrap());
    }

    #[tokio::test]
    async fn put_many_and_get_many() {
        let store = open();
        let cid1 = SledBlockStore::compute_cid(b"a").unwrap();
        let cid2 = SledBlockStore::compute_cid(b"b").unwrap();
        store
            .put_many(vec![
                (cid1, Bytes::from_static(b"a")),
                (cid2, Bytes::from_static(b"b")),
            ])
            .await
            .unwrap();

        let results = store.get_many(&[cid1, cid2]).await.unwrap();
        assert_eq!(results[0].as_deref(), Some(&b"a"[..]));
        assert_eq!(results[1].as_deref(), Some(&b"b"[..]));
    }
}
