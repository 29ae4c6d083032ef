//! Actor rows: one per user per host, indexed by DID, host, email, and handle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::store::Store;

/// A refresh token owned by an actor. At-most-once use: consuming one
/// atomically removes it from the actor's list and appends its successor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshToken {
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// One user on one host.
///
/// Invariants: DID is globally unique; `(handle, host)` is unique; `head`
/// and `rev` always name a commit block present in this actor's
/// blockstore; a non-empty actor has `head` set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub did: String,
    pub handle: String,
    pub host: String,
    pub password_hash: String,
    /// Repo signing key, encoded per the actor's atproto crypto scheme.
    pub signing_key: Vec<u8>,
    /// Rotation keys, most-authoritative first.
    pub rotation_keys: Vec<Vec<u8>>,
    pub email: String,
    pub email_verified: bool,
    pub active: bool,
    pub head: Option<String>,
    pub rev: Option<String>,
    pub refresh_tokens: Vec<RefreshToken>,
    /// Opaque client preferences blob (`app.bsky.actor.putPreferences`).
    pub preferences: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

fn host_key(host: &str, did: &str) -> Vec<u8> {
    let mut key = host.as_bytes().to_vec();
    key.push(0);
    key.extend_from_slice(did.as_bytes());
    key
}

impl Store {
    /// Insert or replace an actor, keeping the by-host/by-email/by-handle
    /// indexes consistent with it in one transaction.
    pub fn save_actor(&self, actor: &Actor) -> Result<()> {
        let did_key = actor.did.as_bytes().to_vec();
        let host_key = host_key(&actor.host, &actor.did);
        let email_key = host_key(&actor.host, &actor.email);
        let handle_key = host_key(&actor.host, &actor.handle);
        let row = serde_json::to_vec(actor)?;

        self.transact_actor(move |by_did, by_host, by_email, by_handle| {
            by_did.insert(did_key.clone(), row.clone())?;
            by_host.insert(host_key.clone(), &[][..])?;
            by_email.insert(email_key.clone(), did_key.clone())?;
            by_handle.insert(handle_key.clone(), did_key.clone())?;
            Ok(())
        })
    }

    /// Look up an actor by its DID.
    pub fn get_actor_by_did(&self, did: &str) -> Result<Option<Actor>> {
        match self.actors_by_did().get(did.as_bytes())? {
            Some(row) => Ok(Some(serde_json::from_slice(&row)?)),
            None => Ok(None),
        }
    }

    /// Look up an actor by `(host, email)`.
    pub fn get_actor_by_email(&self, host: &str, email: &str) -> Result<Option<Actor>> {
        let key = host_key(host, email);
        match self.actors_by_email().get(key)? {
            Some(did) => self.get_actor_by_did(std::str::from_utf8(&did).unwrap_or_default()),
            None => Ok(None),
        }
    }

    /// Look up an actor by `(host, handle)`.
    pub fn get_actor_by_handle(&self, host: &str, handle: &str) -> Result<Option<Actor>> {
        let key = host_key(host, handle);
        match self.actors_by_handle().get(key)? {
            Some(did) => self.get_actor_by_did(std::str::from_utf8(&did).unwrap_or_default()),
            None => Ok(None),
        }
    }

    /// DIDs on `host`, lexicographically ordered, paginated by a DID cursor.
    /// `limit` is clamped to 500.
    pub fn list_actors(
        &self,
        host: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Actor>> {
        let limit = limit.min(500);
        let mut prefix = host.as_bytes().to_vec();
        prefix.push(0);

        let start = match cursor {
            Some(c) => {
                let mut key = prefix.clone();
                key.extend_from_slice(c.as_bytes());
                key.push(0); // strictly after the cursor DID
                key
            }
            None => prefix.clone(),
        };

        let mut actors = Vec::with_capacity(limit);
        for entry in self.actors_by_host().range(start..) {
            let (key, _) = entry?;
            if !key.starts_with(&prefix) {
                break;
            }
            let did = std::str::from_utf8(&key[prefix.len()..]).unwrap_or_default();
            if let Some(actor) = self.get_actor_by_did(did)? {
                actors.push(actor);
            }
            if actors.len() >= limit {
                break;
            }
        }
        Ok(actors)
    }

    /// The `(head, rev)` pair currently visible for `did`, for optimistic
    /// concurrency checks ahead of a commit.
    pub fn get_actor_head(&self, did: &str) -> Result<(Option<String>, Option<String>)> {
        match self.get_actor_by_did(did)? {
            Some(actor) => Ok((actor.head, actor.rev)),
            None => Err(StoreError::NotFound(format!("actor {did}"))),
        }
    }

    /// Advance `did`'s head/rev, failing with [`StoreError::Conflict`] if
    /// another writer already moved the actor's `rev` past `expected_rev`
    /// since the caller last read it.
    ///
    /// Bounded-retry CAS on the single `actors_by_did` row, mirroring
    /// `transact_actor`'s framing but scoped to one tree since head/rev
    /// don't touch the host/email/handle indexes.
    pub fn swap_head(
        &self,
        did: &str,
        expected_rev: Option<&str>,
        new_head: &str,
        new_rev: &str,
    ) -> Result<Actor> {
        let key = did.as_bytes().to_vec();
        for _ in 0..8 {
            let current = self
                .actors_by_did()
                .get(&key)?
                .ok_or_else(|| StoreError::NotFound(format!("actor {did}")))?;
            let mut actor: Actor = serde_json::from_slice(&current)?;
            if actor.rev.as_deref() != expected_rev {
                return Err(StoreError::Conflict(format!(
                    "head moved for actor {did}: expected rev {expected_rev:?}, found {:?}",
                    actor.rev
                )));
            }
            actor.head = Some(new_head.to_string());
            actor.rev = Some(new_rev.to_string());
            let new_row = serde_json::to_vec(&actor)?;
            if self
                .actors_by_did()
                .compare_and_swap(&key, Some(current.as_ref()), Some(new_row))?
                .is_ok()
            {
                return Ok(actor);
            }
        }
        Err(StoreError::Conflict(format!(
            "too much contention advancing head for actor {did}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(did: &str, host: &str, handle: &str) -> Actor {
        Actor {
            did: did.to_string(),
            handle: handle.to_string(),
            host: host.to_string(),
            password_hash: "hash".to_string(),
            signing_key: vec![1, 2, 3],
            rotation_keys: vec![],
            email: format!("{handle}@example.com"),
            email_verified: false,
            active: true,
            head: None,
            rev: None,
            refresh_tokens: vec![],
            preferences: serde_json::json!({}),
            created_at: DateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn save_and_lookup_by_all_indexes() {
        let store = Store::open_temporary().unwrap();
        let a = actor("did:plc:alice", "example.com", "alice.example.com");
        store.save_actor(&a).unwrap();

        assert_eq!(
            store.get_actor_by_did("did:plc:alice").unwrap().unwrap().did,
            "did:plc:alice"
        );
        assert_eq!(
            store
                .get_actor_by_email("example.com", "alice.example.com@example.com")
                .unwrap()
                .unwrap()
                .did,
            "did:plc:alice"
        );
        assert_eq!(
            store
                .get_actor_by_handle("example.com", "alice.example.com")
                .unwrap()
                .unwrap()
                .did,
            "did:plc:alice"
        );
    }

    #[test]
    fn list_actors_is_ordered_and_paginated() {
        let store = Store::open_temporary().unwrap();
        for name in ["alice", "bob", "carol"] {
            store
                .save_actor(&actor(&format!("did:plc:{name}"), "example.com", name))
                .unwrap();
        }

        let page1 = store.list_actors("example.com", None, 2).unwrap();
        assert_eq!(page1.len(), 2);
        assert_eq!(page1[0].did, "did:plc:alice");
        assert_eq!(page1[1].did, "did:plc:bob");

        let page2 = store
            .list_actors("example.com", Some(&page1[1].did), 2)
            .unwrap();
        assert_eq!(page2.len(), 1);
        assert_eq!(page2[0].did, "did:plc:carol");
    }

    #[test]
    fn missing_actor_head_is_not_found() {
        let store = Store::open_temporary().unwrap();
        assert!(store.get_actor_head("did:plc:nobody").is_err());
    }
}
