use thiserror::Error;

#[derive(Debug, Error, miette::Diagnostic)]
pub enum ProxyError {
    #[error("malformed xrpc path: {0}")]
    MalformedPath(String),

    #[error("malformed atproto-proxy header: {0}")]
    MalformedProxyHeader(String),

    #[error("no healthy backend for service {0}")]
    NoHealthyBackend(String),

    #[error(transparent)]
    Auth(#[from] pds_auth::AuthError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
