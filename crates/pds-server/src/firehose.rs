//! `subscribeRepos` wire framing: a CBOR header followed by a CBOR body,
//! concatenated into one WebSocket binary frame.
//!
//! `pds_common::xrpc::subscription::EventHeader` only derives `Deserialize`
//! (it's a client-side decode helper); emitting frames needs a
//! `Serialize`-capable mirror, so it lives here instead.

use bytes::Bytes;
use pds_repo::commit::firehose::FirehoseCommit;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct FrameHeader {
    pub op: i64,
    pub t: &'static str,
}

/// Frame a `#commit` message: header `{op: 1, t: "#commit"}` followed by
/// the commit body, both dag-cbor, concatenated.
pub fn encode_commit_frame(commit: &FirehoseCommit<'_>) -> Result<Bytes, serde_ipld_dagcbor::EncodeError<std::collections::TryReserveError>> {
    encode_frame("#commit", commit)
}

fn encode_frame<T: Serialize>(
    t: &'static str,
    body: &T,
) -> Result<Bytes, serde_ipld_dagcbor::EncodeError<std::collections::TryReserveError>> {
    let header = FrameHeader { op: 1, t };
    let mut buf = serde_ipld_dagcbor::to_vec(&header)?;
    buf.extend(serde_ipld_dagcbor::to_vec(body)?);
    Ok(Bytes::from(buf))
}
