//! Record-level write operations, as distinct from [`super::tree::WriteOp`]:
//! this variant carries the record payload itself (so `create_commit` can
//! serialize and CID it) rather than a pre-computed CID.

use cid::Cid as IpldCid;
use pds_common::types::recordkey::{RecordKey, Rkey};
use pds_common::types::string::Nsid;

/// A single `applyWrites`-style operation against one collection/rkey.
///
/// `record` is the record's lexicon-shaped value as parsed JSON; `create_commit`
/// re-serializes it to dag-cbor when writing the leaf block.
#[derive(Debug, Clone)]
pub enum RecordWriteOp<'a> {
    Create {
        collection: Nsid<'a>,
        rkey: RecordKey<Rkey<'a>>,
        record: serde_json::Value,
    },
    Update {
        collection: Nsid<'a>,
        rkey: RecordKey<Rkey<'a>>,
        record: serde_json::Value,
        prev: Option<IpldCid>,
    },
    Delete {
        collection: Nsid<'a>,
        rkey: RecordKey<Rkey<'a>>,
        prev: Option<IpldCid>,
    },
}

impl<'a> RecordWriteOp<'a> {
    pub fn collection(&self) -> &Nsid<'a> {
        match self {
            Self::Create { collection, .. } => collection,
            Self::Update { collection, .. } => collection,
            Self::Delete { collection, .. } => collection,
        }
    }

    pub fn rkey(&self) -> &RecordKey<Rkey<'a>> {
        match self {
            Self::Create { rkey, .. } => rkey,
            Self::Update { rkey, .. } => rkey,
            Self::Delete { rkey, .. } => rkey,
        }
    }
}
