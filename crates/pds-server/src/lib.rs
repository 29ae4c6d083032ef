//! Library half of `pds-server`: every module the binary wires together,
//! exposed so integration tests can build the same `Router` the real
//! process serves without going through a socket.

pub mod config;
pub mod error;
pub mod firehose;
pub mod identity;
pub mod ids;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod xrpc_util;
