//! HTTP surface assembly: one `Router<AppState>` per lexicon area, merged
//! by `main`.

pub mod handle;
pub mod proxy;
pub mod repo;
pub mod server;
pub mod sync;
pub mod wellknown;

use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(wellknown::router())
        .merge(server::router())
        .merge(repo::router())
        .merge(sync::router())
        .merge(handle::router())
        .merge(proxy::router())
}
