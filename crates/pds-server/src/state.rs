//! Shared application state handed to every handler.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use bytes::Bytes;
use pds_blob::FsBlobStore;
use pds_proxy::BackendPool;
use pds_store::Store;
use tokio::sync::broadcast;
use url::Url;

use crate::config::HostTable;
use crate::identity::LocalIdentityResolver;

/// Capacity of the firehose broadcast channel: slow subscribers that fall
/// this far behind a live commit are dropped rather than stalling writers.
const FIREHOSE_CAPACITY: usize = 2048;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub blobstore: FsBlobStore,
    pub hosts: Arc<HostTable>,
    pub proxy_pool: BackendPool,
    pub resolver: Arc<LocalIdentityResolver>,
    firehose: broadcast::Sender<Bytes>,
    seq: Arc<AtomicI64>,
}

impl AppState {
    pub fn new(
        store: Store,
        blobstore: FsBlobStore,
        hosts: Arc<HostTable>,
        proxy_pool: BackendPool,
        resolver: Arc<LocalIdentityResolver>,
    ) -> Self {
        let (firehose, _) = broadcast::channel(FIREHOSE_CAPACITY);
        Self {
            store,
            blobstore,
            hosts,
            proxy_pool,
            resolver,
            firehose,
            seq: Arc::new(AtomicI64::new(1)),
        }
    }

    /// Publish one already-framed firehose message to every live subscriber.
    /// A lagged/absent receiver is not an error: the frame is simply missed.
    pub fn publish_firehose(&self, frame: Bytes) {
        let _ = self.firehose.send(frame);
    }

    pub fn subscribe_firehose(&self) -> broadcast::Receiver<Bytes> {
        self.firehose.subscribe()
    }

    /// Next firehose sequence number. Process-local: `subscribeRepos` is an
    /// external collaborator boundary, not part of the durable repo state,
    /// so this doesn't need to survive a restart.
    pub fn next_seq(&self) -> i64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }
}
