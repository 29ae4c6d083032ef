//! Record rows: the secondary index mirroring MST leaves so lookups and
//! listings don't require walking the tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::Store;

/// A record, keyed by `(did, collection, rkey)`.
///
/// Invariant: `cid` equals the multihash of `value` under dag-cbor, and a
/// row exists here iff the DID's MST has a leaf at `collection/rkey`
/// pointing to the same CID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub did: String,
    pub collection: String,
    pub rkey: String,
    pub cid: String,
    pub value: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl Record {
    /// `at://<did>/<collection>/<rkey>`.
    pub fn uri(&self) -> String {
        format!("at://{}/{}/{}", self.did, self.collection, self.rkey)
    }
}

fn record_key(did: &str, collection: &str, rkey: &str) -> Vec<u8> {
    let mut key = did.as_bytes().to_vec();
    key.push(0);
    key.extend_from_slice(collection.as_bytes());
    key.push(0);
    key.extend_from_slice(rkey.as_bytes());
    key
}

impl Store {
    pub fn save_record(&self, record: &Record) -> Result<()> {
        let key = record_key(&record.did, &record.collection, &record.rkey);
        let row = serde_json::to_vec(record)?;
        self.records().insert(key, row)?;
        Ok(())
    }

    pub fn get_record(&self, did: &str, collection: &str, rkey: &str) -> Result<Option<Record>> {
        let key = record_key(did, collection, rkey);
        match self.records().get(key)? {
            Some(row) => Ok(Some(serde_json::from_slice(&row)?)),
            None => Ok(None),
        }
    }

    pub fn delete_record(&self, did: &str, collection: &str, rkey: &str) -> Result<()> {
        let key = record_key(did, collection, rkey);
        self.records().remove(key)?;
        Ok(())
    }

    /// Records in a collection, in MST key (rkey) order, paginated by an
    /// rkey cursor. `reverse` walks descending instead of ascending.
    pub fn list_records(
        &self,
        did: &str,
        collection: &str,
        cursor: Option<&str>,
        limit: usize,
        reverse: bool,
    ) -> Result<Vec<Record>> {
        let mut prefix = did.as_bytes().to_vec();
        prefix.push(0);
        prefix.extend_from_slice(collection.as_bytes());
        prefix.push(0);

        let mut out = Vec::with_capacity(limit);
        if reverse {
            let end = match cursor {
                Some(c) => {
                    let mut key = prefix.clone();
                    key.extend_from_slice(c.as_bytes());
                    key
                }
                None => {
                    let mut key = prefix.clone();
                    key.push(0xff);
                    key
                }
            };
            for entry in self.records().range(prefix.clone()..end).rev() {
                let (key, row) = entry?;
                if !key.starts_with(&prefix) {
                    break;
                }
                out.push(serde_json::from_slice(&row)?);
                if out.len() >= limit {
                    break;
                }
            }
        } else {
            let start = match cursor {
                Some(c) => {
                    let mut key = prefix.clone();
                    key.extend_from_slice(c.as_bytes());
                    key.push(0);
                    key
                }
                None => prefix.clone(),
            };
            for entry in self.records().range(start..) {
                let (key, row) = entry?;
                if !key.starts_with(&prefix) {
                    break;
                }
                out.push(serde_json::from_slice(&row)?);
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    /// Distinct collection NSIDs with at least one record under `did`, in
    /// lexicographic order. Used by `describeRepo`; walks the same
    /// `did\0collection\0rkey` keyspace `list_records` does, skipping to
    /// the next collection once one is seen instead of visiting every row.
    pub fn list_collections(&self, did: &str) -> Result<Vec<String>> {
        let mut prefix = did.as_bytes().to_vec();
        prefix.push(0);

        let mut out = Vec::new();
        let mut cursor = prefix.clone();
        loop {
            let Some(entry) = self.records().range(cursor.clone()..).next() else {
                break;
            };
            let (key, _) = entry?;
            if !key.starts_with(&prefix) {
                break;
            }
            let rest = &key[prefix.len()..];
            let collection_end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
            let collection = String::from_utf8_lossy(&rest[..collection_end]).into_owned();

            let mut next = prefix.clone();
            next.extend_from_slice(collection.as_bytes());
            next.push(1); // first byte after the 0 separator
            out.push(collection);
            cursor = next;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(did: &str, collection: &str, rkey: &str) -> Record {
        Record {
            did: did.to_string(),
            collection: collection.to_string(),
            rkey: rkey.to_string(),
            cid: "bafyreicid".to_string(),
            value: b"{}".to_vec(),
            created_at: DateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn save_get_delete_roundtrip() {
        let store = Store::open_temporary().unwrap();
        let r = rec("did:plc:alice", "app.bsky.feed.post", "3k1");
        store.save_record(&r).unwrap();

        let got = store
            .get_record("did:plc:alice", "app.bsky.feed.post", "3k1")
            .unwrap()
            .unwrap();
        assert_eq!(got.uri(), "at://did:plc:alice/app.bsky.feed.post/3k1");

        store
            .delete_record("did:plc:alice", "app.bsky.feed.post", "3k1")
            .unwrap();
        assert!(
            store
                .get_record("did:plc:alice", "app.bsky.feed.post", "3k1")
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn list_records_is_rkey_ordered() {
        let store = Store::open_temporary().unwrap();
        for rkey in ["3k1", "3k2", "3k3"] {
            store
                .save_record(&rec("did:plc:alice", "app.bsky.feed.post", rkey))
                .unwrap();
        }

        let ascending = store
            .list_records("did:plc:alice", "app.bsky.feed.post", None, 10, false)
            .unwrap();
        let rkeys: Vec<_> = ascending.iter().map(|r| r.rkey.clone()).collect();
        assert_eq!(rkeys, vec!["3k1", "3k2", "3k3"]);

        let descending = store
            .list_records("did:plc:alice", "app.bsky.feed.post", None, 10, true)
            .unwrap();
        let rkeys: Vec<_> = descending.iter().map(|r| r.rkey.clone()).collect();
        assert_eq!(rkeys, vec!["3k3", "3k2", "3k1"]);
    }

    #[test]
    fn list_collections_is_distinct_and_ordered() {
        let store = Store::open_temporary().unwrap();
        for (collection, rkey) in [
            ("app.bsky.feed.post", "3k1"),
            ("app.bsky.feed.post", "3k2"),
            ("app.bsky.feed.like", "3k1"),
            ("app.bsky.graph.follow", "3k1"),
        ] {
            store
                .save_record(&rec("did:plc:alice", collection, rkey))
                .unwrap();
        }
        // Unrelated DID must not leak in.
        store
            .save_record(&rec("did:plc:bob", "app.bsky.feed.post", "3k1"))
            .unwrap();

        let collections = store.list_collections("did:plc:alice").unwrap();
        assert_eq!(
            collections,
            vec![
                "app.bsky.feed.like",
                "app.bsky.feed.post",
                "app.bsky.graph.follow",
            ]
        );
    }
}
