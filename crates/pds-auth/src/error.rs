//! Errors for session and service-auth JWT handling.

use thiserror::Error;

#[derive(Debug, Error, miette::Diagnostic)]
pub enum AuthError {
    /// Uniform message for any credential failure, to avoid account
    /// enumeration via distinguishable error text.
    #[error("invalid identifier or password")]
    InvalidCredentials,

    #[error("token malformed: {0}")]
    Malformed(String),

    #[error("token expired")]
    Expired,

    #[error("audience mismatch")]
    WrongAudience,

    #[error("token issued for a different host")]
    WrongHost,

    #[error("refresh token not recognized")]
    RefreshTokenUnknown,

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error(transparent)]
    Store(#[from] pds_store::StoreError),

    #[error(transparent)]
    Bcrypt(#[from] bcrypt::BcryptError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Base64(#[from] base64::DecodeError),
}

pub type Result<T> = std::result::Result<T, AuthError>;
