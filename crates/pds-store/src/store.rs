//! Top-level transactional store: a single [`sled::Db`] holding every
//! keyspace named in the actor/record/block/blob/TID tables.
//!
//! Each logical table from the KV layout sketch is its own [`sled::Tree`];
//! multi-tree invariants (e.g. "saving an actor also indexes it by host")
//! are enforced with `sled`'s tuple-of-trees `Transactional` API rather
//! than a generic `Transact(fn)` combinator — sled's transaction API is
//! statically typed per tuple of trees, so a handful of named methods on
//! [`Store`] stand in for the abstract `Transact` primitive from the data
//! model.

use std::path::Path;
use std::sync::Arc;

use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};

use crate::blockstore::SledBlockStore;
use crate::error::{Result, StoreError};

/// The transactional substrate: actors, records, blocks, blobs, and the
/// per-DID TID counter, all backed by one embedded database.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

struct Inner {
    db: sled::Db,
    actors_by_did: sled::Tree,
    actors_by_host: sled::Tree,
    actors_by_email: sled::Tree,
    actors_by_handle: sled::Tree,
    records: sled::Tree,
    blobs: sled::Tree,
    tid: sled::Tree,
}

impl Store {
    /// Open (or create) the database rooted at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Open a temporary, in-process-only database. Used by tests.
    pub fn open_temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        let actors_by_did = db.open_tree("actors/by-did")?;
        let actors_by_host = db.open_tree("actors/by-host")?;
        let actors_by_email = db.open_tree("actors/by-email")?;
        let actors_by_handle = db.open_tree("actors/by-handle")?;
        let records = db.open_tree("records")?;
        let blobs = db.open_tree("blobs")?;
        let tid = db.open_tree("tid")?;
        Ok(Self {
            inner: Arc::new(Inner {
                db,
                actors_by_did,
                actors_by_host,
                actors_by_email,
                actors_by_handle,
                records,
                blobs,
                tid,
            }),
        })
    }

    /// Per-actor blockstore view, implementing `pds_repo::storage::BlockStore`.
    ///
    /// Each DID gets its own pair of trees (`blocks/<did>`, `blocks-by-rev/<did>`)
    /// so commit garbage collection on one repo can never reach another's.
    pub fn blockstore_for(&self, did: &str) -> Result<SledBlockStore> {
        let blocks = self.inner.db.open_tree(format!("blocks/{did}"))?;
        let by_rev = self.inner.db.open_tree(format!("blocks-by-rev/{did}"))?;
        Ok(SledBlockStore::new(blocks, by_rev))
    }

    pub(crate) fn actors_by_did(&self) -> &sled::Tree {
        &self.inner.actors_by_did
    }

    pub(crate) fn actors_by_host(&self) -> &sled::Tree {
        &self.inner.actors_by_host
    }

    pub(crate) fn actors_by_email(&self) -> &sled::Tree {
        &self.inner.actors_by_email
    }

    pub(crate) fn actors_by_handle(&self) -> &sled::Tree {
        &self.inner.actors_by_handle
    }

    pub(crate) fn records(&self) -> &sled::Tree {
        &self.inner.records
    }

    pub(crate) fn blobs(&self) -> &sled::Tree {
        &self.inner.blobs
    }

    pub(crate) fn tid(&self) -> &sled::Tree {
        &self.inner.tid
    }

    /// Run `body` against the four actor-index trees as one atomic unit.
    ///
    /// This is the store's `Transact(fn)`: a bounded-retry optimistic
    /// transaction across exactly the trees an actor write touches.
    pub(crate) fn transact_actor<F>(&self, body: F) -> Result<()>
    where
        F: Fn(
            &sled::transaction::TransactionalTree,
            &sled::transaction::TransactionalTree,
            &sled::transaction::TransactionalTree,
            &sled::transaction::TransactionalTree,
        ) -> std::result::Result<(), ConflictableTransactionError<StoreError>>,
    {
        let trees = (
            &self.inner.actors_by_did,
            &self.inner.actors_by_host,
            &self.inner.actors_by_email,
            &self.inner.actors_by_handle,
        );
        trees
            .transaction(|(by_did, by_host, by_email, by_handle)| {
                body(by_did, by_host, by_email, by_handle)
            })
            .map_err(|e| match e {
                TransactionError::Abort(err) => err,
                TransactionError::Storage(e) => StoreError::Backend(e),
            })
    }
}
