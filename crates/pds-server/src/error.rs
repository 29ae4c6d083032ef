//! Unified API error, mapped to the `{"msg": "<message>"}` body shape and
//! the status taxonomy every handler returns through.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pds_repo::error::RepoErrorKind;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Store(#[from] pds_store::StoreError),

    #[error(transparent)]
    Repo(#[from] pds_repo::error::RepoError),

    #[error(transparent)]
    Auth(#[from] pds_auth::AuthError),

    #[error(transparent)]
    Blob(#[from] pds_blob::BlobError),

    #[error(transparent)]
    Proxy(#[from] pds_proxy::ProxyError),
}

#[derive(Serialize)]
struct ErrorBody {
    msg: String,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Store(pds_store::StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Store(pds_store::StoreError::Conflict(_)) => StatusCode::CONFLICT,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Repo(e) => match e.kind() {
                RepoErrorKind::NotFound => StatusCode::NOT_FOUND,
                RepoErrorKind::InvalidCid
                | RepoErrorKind::InvalidKey
                | RepoErrorKind::InvalidMst
                | RepoErrorKind::InvalidCommit
                | RepoErrorKind::TooLarge => StatusCode::BAD_REQUEST,
                RepoErrorKind::Storage
                | RepoErrorKind::Crypto
                | RepoErrorKind::Serialization
                | RepoErrorKind::Car
                | RepoErrorKind::Io => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Auth(e) => match e {
                pds_auth::AuthError::InvalidCredentials
                | pds_auth::AuthError::Expired
                | pds_auth::AuthError::WrongAudience
                | pds_auth::AuthError::WrongHost
                | pds_auth::AuthError::RefreshTokenUnknown
                | pds_auth::AuthError::Crypto(_) => StatusCode::UNAUTHORIZED,
                pds_auth::AuthError::Malformed(_) => StatusCode::BAD_REQUEST,
                pds_auth::AuthError::Store(_)
                | pds_auth::AuthError::Bcrypt(_)
                | pds_auth::AuthError::Json(_)
                | pds_auth::AuthError::Base64(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Blob(pds_blob::BlobError::Empty) => StatusCode::BAD_REQUEST,
            Self::Blob(pds_blob::BlobError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Self::Blob(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Proxy(pds_proxy::ProxyError::MalformedPath(_))
            | Self::Proxy(pds_proxy::ProxyError::MalformedProxyHeader(_)) => {
                StatusCode::BAD_REQUEST
            }
            Self::Proxy(pds_proxy::ProxyError::NoHealthyBackend(_)) => StatusCode::BAD_GATEWAY,
            Self::Proxy(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(ErrorBody { msg: self.to_string() })).into_response()
    }
}
