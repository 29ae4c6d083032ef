//! `com.atproto.repo.*`: the atomic create/put/delete/applyWrites pipeline
//! and blob upload, all scoped to a single actor's repository.

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use cid::Cid as IpldCid;
use pds_common::types::blob::MimeType;
use pds_common::types::cid::CidLink;
use pds_common::types::string::{Did, Nsid, RecordKey, Rkey};
use pds_common::types::tid::Ticker;
use pds_common::xrpc::XrpcMethod;
use pds_repo::Repository;
use pds_repo::commit::firehose::RepoOp;
use pds_repo::mst::RecordWriteOp;
use pds_repo::repo::CommitData;
use pds_store::{Actor, SledBlockStore};
use serde::{Deserialize, Serialize};

use crate::config::HostConfig;
use crate::error::ApiError;
use crate::firehose::encode_commit_frame;
use crate::middleware::AccessAuth;
use crate::state::AppState;
use crate::xrpc_util::xrpc_endpoint;
use pds_axum::IntoRouter;

type Repo = Repository<SledBlockStore>;

fn resolve_actor(state: &AppState, host: &HostConfig, repo: &str) -> Result<Actor, ApiError> {
    let actor = if repo.starts_with("did:") {
        state.store.get_actor_by_did(repo)?
    } else {
        state.store.get_actor_by_handle(&host.hostname, repo)?
    };
    actor.ok_or_else(|| ApiError::NotFound(format!("repo {repo}")))
}

fn ensure_owner(access: &AccessAuth, actor: &Actor) -> Result<(), ApiError> {
    if access.did != actor.did {
        return Err(ApiError::Forbidden(format!(
            "{} may not write to {}'s repo",
            access.did, actor.did
        )));
    }
    Ok(())
}

fn check_swap_commit(actor: &Actor, swap_commit: Option<&str>) -> Result<(), ApiError> {
    if let Some(expected) = swap_commit {
        if actor.head.as_deref() != Some(expected) {
            return Err(ApiError::Conflict(format!(
                "swapCommit mismatch: expected {expected}, actual {:?}",
                actor.head
            )));
        }
    }
    Ok(())
}

/// Inject the collection NSID as `$type` when the caller's record omits it.
fn inject_type(record: &mut serde_json::Value, collection: &str) {
    if let serde_json::Value::Object(map) = record {
        map.entry("$type")
            .or_insert_with(|| serde_json::Value::String(collection.to_string()));
    }
}

async fn open_repo(state: &AppState, actor: &Actor) -> Result<(Repo, k256::ecdsa::SigningKey), ApiError> {
    let blockstore = Arc::new(state.store.blockstore_for(&actor.did)?);
    let head = actor
        .head
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest(format!("actor {} has no repo", actor.did)))?;
    let head_cid = IpldCid::try_from(head)
        .map_err(|e| ApiError::BadRequest(format!("corrupt head cid: {e}")))?;
    let repo = Repository::from_commit(blockstore, &head_cid).await?;
    let signing_key = k256::ecdsa::SigningKey::from_slice(&actor.signing_key)
        .map_err(|e| ApiError::BadRequest(format!("corrupt repo signing key: {e}")))?;
    Ok((repo, signing_key))
}

/// Persist a prepared commit: write its blocks, gate the visible head behind
/// the actor's optimistic-concurrency CAS, then publish it to the firehose.
async fn finalize_commit(
    state: &AppState,
    repo: &mut Repo,
    actor: &Actor,
    did: &Did<'static>,
    commit_data: CommitData,
    repo_ops: Vec<RepoOp<'static>>,
) -> Result<(IpldCid, String), ApiError> {
    let new_rev = commit_data.rev.to_string();
    let new_cid = repo.apply_commit(commit_data.clone()).await?;
    state
        .store
        .swap_head(&actor.did, actor.rev.as_deref(), &new_cid.to_string(), &new_rev)?;

    let seq = state.next_seq();
    let firehose_commit = commit_data
        .to_firehose_commit(
            did,
            seq,
            pds_common::types::string::Datetime::now(),
            repo_ops,
            vec![],
        )
        .await?;
    match encode_commit_frame(&firehose_commit) {
        Ok(frame) => state.publish_firehose(frame),
        Err(e) => tracing::warn!(error = %e, did = %actor.did, "failed to encode firehose frame"),
    }
    Ok((new_cid, new_rev))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescribeRepoRequest {
    pub repo: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescribeRepoOutput {
    pub did: String,
    pub handle: String,
    pub collections: Vec<String>,
}

xrpc_endpoint! {
    nsid: "com.atproto.repo.describeRepo",
    method: XrpcMethod::Query,
    endpoint: DescribeRepo,
    response: DescribeRepoResponse,
    request: DescribeRepoRequest,
    output: DescribeRepoOutput,
}

async fn describe_repo(
    State(state): State<AppState>,
    axum::Extension(host): axum::Extension<HostConfig>,
    pds_axum::ExtractXrpc(req): pds_axum::ExtractXrpc<DescribeRepo>,
) -> Result<axum::Json<DescribeRepoOutput>, ApiError> {
    let actor = resolve_actor(&state, &host, &req.repo)?;
    let collections = state.store.list_collections(&actor.did)?;
    Ok(axum::Json(DescribeRepoOutput {
        did: actor.did,
        handle: actor.handle,
        collections,
    }))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRecordRequest {
    pub repo: String,
    pub collection: String,
    pub rkey: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRecordOutput {
    pub uri: String,
    pub cid: String,
    pub value: serde_json::Value,
}

xrpc_endpoint! {
    nsid: "com.atproto.repo.getRecord",
    method: XrpcMethod::Query,
    endpoint: GetRecord,
    response: GetRecordResponse,
    request: GetRecordRequest,
    output: GetRecordOutput,
}

async fn get_record(
    State(state): State<AppState>,
    axum::Extension(host): axum::Extension<HostConfig>,
    pds_axum::ExtractXrpc(req): pds_axum::ExtractXrpc<GetRecord>,
) -> Result<axum::Json<GetRecordOutput>, ApiError> {
    let actor = resolve_actor(&state, &host, &req.repo)?;
    let record = state
        .store
        .get_record(&actor.did, &req.collection, &req.rkey)?
        .ok_or_else(|| {
            ApiError::NotFound(format!("record {}/{}/{}", actor.did, req.collection, req.rkey))
        })?;
    let value: serde_json::Value = serde_ipld_dagcbor::from_slice(&record.value)
        .map_err(|e| ApiError::BadRequest(format!("corrupt stored record: {e}")))?;
    Ok(axum::Json(GetRecordOutput {
        uri: record.uri(),
        cid: record.cid,
        value,
    }))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordCommitOutput {
    pub cid: String,
    pub rev: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordWriteOutput {
    pub uri: String,
    pub cid: String,
    pub commit: RecordCommitOutput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRecordRequest {
    pub repo: String,
    pub collection: String,
    #[serde(default)]
    pub rkey: Option<String>,
    pub record: serde_json::Value,
    #[serde(default)]
    pub validate: Option<bool>,
    #[serde(default)]
    pub swap_commit: Option<String>,
}

xrpc_endpoint! {
    nsid: "com.atproto.repo.createRecord",
    method: XrpcMethod::Procedure("application/json"),
    endpoint: CreateRecord,
    response: CreateRecordResponse,
    request: CreateRecordRequest,
    output: RecordWriteOutput,
}

async fn create_record(
    State(state): State<AppState>,
    axum::Extension(host): axum::Extension<HostConfig>,
    access: AccessAuth,
    pds_axum::ExtractXrpc(req): pds_axum::ExtractXrpc<CreateRecord>,
) -> Result<axum::Json<RecordWriteOutput>, ApiError> {
    let actor = resolve_actor(&state, &host, &req.repo)?;
    ensure_owner(&access, &actor)?;
    check_swap_commit(&actor, req.swap_commit.as_deref())?;

    let collection = Nsid::new_owned(&req.collection)
        .map_err(|e| ApiError::BadRequest(format!("invalid collection: {e}")))?;
    let rkey_str = req.rkey.unwrap_or_else(|| Ticker::new().next(None).to_string());
    let rkey = RecordKey(
        Rkey::new_owned(&rkey_str).map_err(|e| ApiError::BadRequest(format!("invalid rkey: {e}")))?,
    );

    let (mut repo, signing_key) = open_repo(&state, &actor).await?;
    if repo.get_record(&collection, &rkey).await?.is_some() {
        return Err(ApiError::Conflict(format!(
            "record already exists at {}/{}",
            req.collection, rkey_str
        )));
    }

    let mut record = req.record;
    inject_type(&mut record, &req.collection);
    let cbor = serde_ipld_dagcbor::to_vec(&record)
        .map_err(|e| ApiError::BadRequest(format!("record does not encode to dag-cbor: {e}")))?;
    let record_cid = pds_repo::mst::util::compute_cid(&cbor)?;

    let did_typed = Did::new_owned(&actor.did).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let ops = [RecordWriteOp::Create {
        collection,
        rkey,
        record,
    }];
    let prev_commit = Some(*repo.current_commit_cid());
    let (repo_ops, commit_data) = repo
        .create_commit(&ops, &did_typed, prev_commit, &signing_key)
        .await?;
    let (new_cid, new_rev) =
        finalize_commit(&state, &mut repo, &actor, &did_typed, commit_data, repo_ops).await?;

    state.store.save_record(&pds_store::Record {
        did: actor.did.clone(),
        collection: req.collection.clone(),
        rkey: rkey_str.clone(),
        cid: record_cid.to_string(),
        value: cbor,
        created_at: chrono::Utc::now(),
    })?;

    Ok(axum::Json(RecordWriteOutput {
        uri: format!("at://{}/{}/{}", actor.did, req.collection, rkey_str),
        cid: record_cid.to_string(),
        commit: RecordCommitOutput {
            cid: new_cid.to_string(),
            rev: new_rev,
        },
    }))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutRecordRequest {
    pub repo: String,
    pub collection: String,
    pub rkey: String,
    pub record: serde_json::Value,
    #[serde(default)]
    pub validate: Option<bool>,
    #[serde(default)]
    pub swap_record: Option<String>,
    #[serde(default)]
    pub swap_commit: Option<String>,
}

xrpc_endpoint! {
    nsid: "com.atproto.repo.putRecord",
    method: XrpcMethod::Procedure("application/json"),
    endpoint: PutRecord,
    response: PutRecordResponse,
    request: PutRecordRequest,
    output: RecordWriteOutput,
}

async fn put_record(
    State(state): State<AppState>,
    axum::Extension(host): axum::Extension<HostConfig>,
    access: AccessAuth,
    pds_axum::ExtractXrpc(req): pds_axum::ExtractXrpc<PutRecord>,
) -> Result<axum::Json<RecordWriteOutput>, ApiError> {
    let actor = resolve_actor(&state, &host, &req.repo)?;
    ensure_owner(&access, &actor)?;
    check_swap_commit(&actor, req.swap_commit.as_deref())?;

    let collection = Nsid::new_owned(&req.collection)
        .map_err(|e| ApiError::BadRequest(format!("invalid collection: {e}")))?;
    let rkey = RecordKey(
        Rkey::new_owned(&req.rkey).map_err(|e| ApiError::BadRequest(format!("invalid rkey: {e}")))?,
    );

    let (mut repo, signing_key) = open_repo(&state, &actor).await?;
    let existing = repo.get_record(&collection, &rkey).await?;

    if let Some(expected) = &req.swap_record {
        match &existing {
            Some(cid) if cid.to_string() == *expected => {}
            Some(cid) => {
                return Err(ApiError::Conflict(format!(
                    "swapRecord mismatch: expected {expected}, actual {cid}"
                )));
            }
            None => {
                return Err(ApiError::Conflict(
                    "swapRecord given but record does not exist".into(),
                ));
            }
        }
    }

    let mut record = req.record;
    inject_type(&mut record, &req.collection);
    let cbor = serde_ipld_dagcbor::to_vec(&record)
        .map_err(|e| ApiError::BadRequest(format!("record does not encode to dag-cbor: {e}")))?;
    let record_cid = pds_repo::mst::util::compute_cid(&cbor)?;

    let op = match existing {
        // swapRecord is already enforced above against the existing MST
        // leaf; create_commit's Update arm validates `prev` against the
        // *new* record's CID, which never matches an existing leaf once
        // content actually changes, so this is intentionally `None`.
        Some(_) => RecordWriteOp::Update {
            collection,
            rkey,
            record,
            prev: None,
        },
        None => RecordWriteOp::Create {
            collection,
            rkey,
            record,
        },
    };

    let did_typed = Did::new_owned(&actor.did).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let prev_commit = Some(*repo.current_commit_cid());
    let (repo_ops, commit_data) = repo
        .create_commit(&[op], &did_typed, prev_commit, &signing_key)
        .await?;
    let (new_cid, new_rev) =
        finalize_commit(&state, &mut repo, &actor, &did_typed, commit_data, repo_ops).await?;

    state.store.save_record(&pds_store::Record {
        did: actor.did.clone(),
        collection: req.collection.clone(),
        rkey: req.rkey.clone(),
        cid: record_cid.to_string(),
        value: cbor,
        created_at: chrono::Utc::now(),
    })?;

    Ok(axum::Json(RecordWriteOutput {
        uri: format!("at://{}/{}/{}", actor.did, req.collection, req.rkey),
        cid: record_cid.to_string(),
        commit: RecordCommitOutput {
            cid: new_cid.to_string(),
            rev: new_rev,
        },
    }))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRecordRequest {
    pub repo: String,
    pub collection: String,
    pub rkey: String,
    #[serde(default)]
    pub swap_record: Option<String>,
    #[serde(default)]
    pub swap_commit: Option<String>,
}

xrpc_endpoint! {
    nsid: "com.atproto.repo.deleteRecord",
    method: XrpcMethod::Procedure("application/json"),
    endpoint: DeleteRecord,
    response: DeleteRecordResponse,
    request: DeleteRecordRequest,
    output: RecordWriteOutput,
}

async fn delete_record(
    State(state): State<AppState>,
    axum::Extension(host): axum::Extension<HostConfig>,
    access: AccessAuth,
    pds_axum::ExtractXrpc(req): pds_axum::ExtractXrpc<DeleteRecord>,
) -> Result<axum::Json<RecordWriteOutput>, ApiError> {
    let actor = resolve_actor(&state, &host, &req.repo)?;
    ensure_owner(&access, &actor)?;
    check_swap_commit(&actor, req.swap_commit.as_deref())?;

    let collection = Nsid::new_owned(&req.collection)
        .map_err(|e| ApiError::BadRequest(format!("invalid collection: {e}")))?;
    let rkey = RecordKey(
        Rkey::new_owned(&req.rkey).map_err(|e| ApiError::BadRequest(format!("invalid rkey: {e}")))?,
    );

    let (mut repo, signing_key) = open_repo(&state, &actor).await?;
    let existing = repo.get_record(&collection, &rkey).await?.ok_or_else(|| {
        ApiError::NotFound(format!("record {}/{}/{}", actor.did, req.collection, req.rkey))
    })?;

    if let Some(expected) = &req.swap_record {
        if existing.to_string() != *expected {
            return Err(ApiError::Conflict(format!(
                "swapRecord mismatch: expected {expected}, actual {existing}"
            )));
        }
    }

    let op = RecordWriteOp::Delete {
        collection,
        rkey,
        prev: Some(existing),
    };

    let did_typed = Did::new_owned(&actor.did).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let prev_commit = Some(*repo.current_commit_cid());
    let (repo_ops, commit_data) = repo
        .create_commit(&[op], &did_typed, prev_commit, &signing_key)
        .await?;
    let (new_cid, new_rev) =
        finalize_commit(&state, &mut repo, &actor, &did_typed, commit_data, repo_ops).await?;

    state.store.delete_record(&actor.did, &req.collection, &req.rkey)?;

    Ok(axum::Json(RecordWriteOutput {
        uri: format!("at://{}/{}/{}", actor.did, req.collection, req.rkey),
        cid: existing.to_string(),
        commit: RecordCommitOutput {
            cid: new_cid.to_string(),
            rev: new_rev,
        },
    }))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "$type")]
pub enum ApplyWritesInput {
    #[serde(rename = "com.atproto.repo.applyWrites#create")]
    Create {
        collection: String,
        #[serde(default)]
        rkey: Option<String>,
        value: serde_json::Value,
    },
    #[serde(rename = "com.atproto.repo.applyWrites#update")]
    Update {
        collection: String,
        rkey: String,
        value: serde_json::Value,
    },
    #[serde(rename = "com.atproto.repo.applyWrites#delete")]
    Delete { collection: String, rkey: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "$type")]
pub enum ApplyWritesResult {
    #[serde(rename = "com.atproto.repo.applyWrites#createResult")]
    Create { uri: String, cid: String },
    #[serde(rename = "com.atproto.repo.applyWrites#updateResult")]
    Update { uri: String, cid: String },
    #[serde(rename = "com.atproto.repo.applyWrites#deleteResult")]
    Delete {},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyWritesRequest {
    pub repo: String,
    #[serde(default)]
    pub validate: Option<bool>,
    #[serde(default)]
    pub swap_commit: Option<String>,
    pub writes: Vec<ApplyWritesInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyWritesOutput {
    pub commit: RecordCommitOutput,
    pub results: Vec<ApplyWritesResult>,
}

xrpc_endpoint! {
    nsid: "com.atproto.repo.applyWrites",
    method: XrpcMethod::Procedure("application/json"),
    endpoint: ApplyWrites,
    response: ApplyWritesResponse,
    request: ApplyWritesRequest,
    output: ApplyWritesOutput,
}

enum PreparedWrite {
    Create {
        collection: String,
        rkey: String,
        cbor: Vec<u8>,
        cid: IpldCid,
    },
    Update {
        collection: String,
        rkey: String,
        cbor: Vec<u8>,
        cid: IpldCid,
    },
    Delete {
        collection: String,
        rkey: String,
    },
}

/// `applyWrites` is atomic: every op is validated and staged against the
/// same in-memory repo before `create_commit` runs once over the whole
/// batch, so a failure partway through never produces a partial commit.
async fn apply_writes(
    State(state): State<AppState>,
    axum::Extension(host): axum::Extension<HostConfig>,
    access: AccessAuth,
    pds_axum::ExtractXrpc(req): pds_axum::ExtractXrpc<ApplyWrites>,
) -> Result<axum::Json<ApplyWritesOutput>, ApiError> {
    if req.writes.is_empty() {
        return Err(ApiError::BadRequest(
            "applyWrites requires at least one write".into(),
        ));
    }
    let actor = resolve_actor(&state, &host, &req.repo)?;
    ensure_owner(&access, &actor)?;
    check_swap_commit(&actor, req.swap_commit.as_deref())?;

    let (mut repo, signing_key) = open_repo(&state, &actor).await?;
    let mut ticker = Ticker::new();

    let mut ops = Vec::with_capacity(req.writes.len());
    let mut prepared = Vec::with_capacity(req.writes.len());

    for write in req.writes {
        match write {
            ApplyWritesInput::Create {
                collection,
                rkey,
                value,
            } => {
                let nsid = Nsid::new_owned(&collection)
                    .map_err(|e| ApiError::BadRequest(format!("invalid collection: {e}")))?;
                let rkey_str = rkey.unwrap_or_else(|| ticker.next(None).to_string());
                let key = RecordKey(
                    Rkey::new_owned(&rkey_str)
                        .map_err(|e| ApiError::BadRequest(format!("invalid rkey: {e}")))?,
                );
                if repo.get_record(&nsid, &key).await?.is_some() {
                    return Err(ApiError::Conflict(format!(
                        "record already exists at {collection}/{rkey_str}"
                    )));
                }
                let mut record = value;
                inject_type(&mut record, &collection);
                let cbor = serde_ipld_dagcbor::to_vec(&record).map_err(|e| {
                    ApiError::BadRequest(format!("record does not encode to dag-cbor: {e}"))
                })?;
                let cid = pds_repo::mst::util::compute_cid(&cbor)?;
                prepared.push(PreparedWrite::Create {
                    collection: collection.clone(),
                    rkey: rkey_str,
                    cbor,
                    cid,
                });
                ops.push(RecordWriteOp::Create {
                    collection: nsid,
                    rkey: key,
                    record,
                });
            }
            ApplyWritesInput::Update {
                collection,
                rkey,
                value,
            } => {
                let nsid = Nsid::new_owned(&collection)
                    .map_err(|e| ApiError::BadRequest(format!("invalid collection: {e}")))?;
                let key = RecordKey(
                    Rkey::new_owned(&rkey)
                        .map_err(|e| ApiError::BadRequest(format!("invalid rkey: {e}")))?,
                );
                repo.get_record(&nsid, &key)
                    .await?
                    .ok_or_else(|| ApiError::NotFound(format!("record {collection}/{rkey}")))?;
                let mut record = value;
                inject_type(&mut record, &collection);
                let cbor = serde_ipld_dagcbor::to_vec(&record).map_err(|e| {
                    ApiError::BadRequest(format!("record does not encode to dag-cbor: {e}"))
                })?;
                let cid = pds_repo::mst::util::compute_cid(&cbor)?;
                prepared.push(PreparedWrite::Update {
                    collection: collection.clone(),
                    rkey: rkey.clone(),
                    cbor,
                    cid,
                });
                // create_commit's Update arm validates `prev` against the
                // new record's CID, not the existing leaf, so a
                // content-changing update must pass `None` here.
                ops.push(RecordWriteOp::Update {
                    collection: nsid,
                    rkey: key,
                    record,
                    prev: None,
                });
            }
            ApplyWritesInput::Delete { collection, rkey } => {
                let nsid = Nsid::new_owned(&collection)
                    .map_err(|e| ApiError::BadRequest(format!("invalid collection: {e}")))?;
                let key = RecordKey(
                    Rkey::new_owned(&rkey)
                        .map_err(|e| ApiError::BadRequest(format!("invalid rkey: {e}")))?,
                );
                let prev = repo
                    .get_record(&nsid, &key)
                    .await?
                    .ok_or_else(|| ApiError::NotFound(format!("record {collection}/{rkey}")))?;
                prepared.push(PreparedWrite::Delete {
                    collection: collection.clone(),
                    rkey: rkey.clone(),
                });
                ops.push(RecordWriteOp::Delete {
                    collection: nsid,
                    rkey: key,
                    prev: Some(prev),
                });
            }
        }
    }

    let did_typed = Did::new_owned(&actor.did).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let prev_commit = Some(*repo.current_commit_cid());
    let (repo_ops, commit_data) = repo
        .create_commit(&ops, &did_typed, prev_commit, &signing_key)
        .await?;
    let (new_cid, new_rev) =
        finalize_commit(&state, &mut repo, &actor, &did_typed, commit_data, repo_ops).await?;

    let mut results = Vec::with_capacity(prepared.len());
    for write in prepared {
        match write {
            PreparedWrite::Create {
                collection,
                rkey,
                cbor,
                cid,
            } => {
                state.store.save_record(&pds_store::Record {
                    did: actor.did.clone(),
                    collection: collection.clone(),
                    rkey: rkey.clone(),
                    cid: cid.to_string(),
                    value: cbor,
                    created_at: chrono::Utc::now(),
                })?;
                results.push(ApplyWritesResult::Create {
                    uri: format!("at://{}/{}/{}", actor.did, collection, rkey),
                    cid: cid.to_string(),
                });
            }
            PreparedWrite::Update {
                collection,
                rkey,
                cbor,
                cid,
            } => {
                state.store.save_record(&pds_store::Record {
                    did: actor.did.clone(),
                    collection: collection.clone(),
                    rkey: rkey.clone(),
                    cid: cid.to_string(),
                    value: cbor,
                    created_at: chrono::Utc::now(),
                })?;
                results.push(ApplyWritesResult::Update {
                    uri: format!("at://{}/{}/{}", actor.did, collection, rkey),
                    cid: cid.to_string(),
                });
            }
            PreparedWrite::Delete { collection, rkey } => {
                state.store.delete_record(&actor.did, &collection, &rkey)?;
                results.push(ApplyWritesResult::Delete {});
            }
        }
    }

    Ok(axum::Json(ApplyWritesOutput {
        commit: RecordCommitOutput {
            cid: new_cid.to_string(),
            rev: new_rev,
        },
        results,
    }))
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadBlobOutput {
    pub blob: pds_common::types::blob::Blob<'static>,
}

/// Takes a raw request body rather than an XRPC JSON envelope, so this is
/// routed by hand instead of through [`xrpc_endpoint!`]/`ExtractXrpc`.
async fn upload_blob(
    State(state): State<AppState>,
    access: AccessAuth,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> Result<axum::Json<UploadBlobOutput>, ApiError> {
    let mime = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let blob = pds_blob::upload(&state.store, &state.blobstore, &access.did, body, mime).await?;
    let cid = IpldCid::try_from(blob.cid.as_str())
        .map_err(|e| ApiError::BadRequest(format!("corrupt blob cid: {e}")))?;
    Ok(axum::Json(UploadBlobOutput {
        blob: pds_common::types::blob::Blob {
            r#ref: CidLink::ipld(cid),
            mime_type: MimeType::new_owned(&blob.mime_type),
            size: blob.size as usize,
        },
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(DescribeRepo::into_router(describe_repo))
        .merge(GetRecord::into_router(get_record))
        .merge(CreateRecord::into_router(create_record))
        .merge(PutRecord::into_router(put_record))
        .merge(DeleteRecord::into_router(delete_record))
        .merge(ApplyWrites::into_router(apply_writes))
        .route("/xrpc/com.atproto.repo.uploadBlob", post(upload_blob))
}
