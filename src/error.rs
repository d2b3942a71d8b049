use thiserror::Error;

/// Result type used across the persistence engine.
pub type BundleResult<T> = Result<T, BundleStoreError>;

#[derive(Debug, Error)]
pub enum BundleStoreError {
    #[error("operation attempted before init or after close")]
    NotInitialized,

    #[error("store was already initialized")]
    AlreadyInitialized,

    #[error("schema error: {0}")]
    SchemaError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("store error: {0}")]
    StoreError(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),

    #[error("no such item: {0}")]
    NoSuchItem(String),

    #[error("blob error: {0}")]
    BlobError(String),

    #[error("unsupported bundle format version {0}")]
    FormatVersionUnsupported(u8),
}

impl From<rusqlite::Error> for BundleStoreError {
    fn from(value: rusqlite::Error) -> Self {
        BundleStoreError::StoreError(value.to_string())
    }
}

impl From<std::io::Error> for BundleStoreError {
    fn from(value: std::io::Error) -> Self {
        BundleStoreError::BlobError(value.to_string())
    }
}
