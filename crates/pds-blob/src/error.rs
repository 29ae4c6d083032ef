use thiserror::Error;

#[derive(Debug, Error, miette::Diagnostic)]
pub enum BlobError {
    #[error("empty upload body")]
    Empty,

    #[error("blob not found: {did}/{cid}")]
    NotFound { did: String, cid: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] pds_store::StoreError),
}

pub type Result<T> = std::result::Result<T, BlobError>;
