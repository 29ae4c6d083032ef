//! Per-DID TID counter, persisted so revision numbers stay monotonic
//! across process restarts and across server instances sharing the
//! substrate — `Ticker` alone only guarantees monotonicity within one
//! process.

use pds_common::types::tid::{Tid, Ticker};

use crate::error::{Result, StoreError};
use crate::store::Store;

impl Store {
    /// Mint the next TID for `did`, strictly greater than any TID
    /// previously minted for it. Retries under contention via compare-
    /// and-swap against the stored "last TID" value.
    pub fn next_tid(&self, did: &str) -> Result<Tid> {
        let tree = self.tid();
        const MAX_ATTEMPTS: usize = 32;

        for _ in 0..MAX_ATTEMPTS {
            let old = tree.get(did.as_bytes())?;
            let prev = old
                .as_ref()
                .and_then(|v| std::str::from_utf8(v).ok())
                .and_then(|s| Tid::new(s).ok());

            let next = Ticker::new().next(prev);
            let new_bytes = next.to_string().into_bytes();

            match tree.compare_and_swap(did.as_bytes(), old.clone(), Some(new_bytes.clone()))? {
                Ok(()) => return Ok(next),
                Err(_) => continue,
            }
        }

        Err(StoreError::Conflict(format!(
            "could not mint TID for {did} after {MAX_ATTEMPTS} attempts"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tids_are_strictly_increasing() {
        let store = Store::open_temporary().unwrap();
        let mut prev = store.next_tid("did:plc:alice").unwrap();
        for _ in 0..10 {
            let next = store.next_tid("did:plc:alice").unwrap();
            assert!(next.newer_than(&prev));
            prev = next;
        }
    }

    #[test]
    fn counters_are_independent_per_did() {
        let store = Store::open_temporary().unwrap();
        let alice = store.next_tid("did:plc:alice").unwrap();
        let bob = store.next_tid("did:plc:bob").unwrap();
        // Independent counters may coincide in timestamp; just confirm both mint successfully.
        assert_eq!(alice.as_str().len(), 13);
        assert_eq!(bob.as_str().len(), 13);
    }
}
