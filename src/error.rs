use thiserror::Error;

/// Error kinds surfaced by the storage core.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("no empty slot on the page")]
    PageFull,

    #[error("slot is empty: {0}")]
    SlotEmpty(String),

    #[error("no such field: {0}")]
    NoSuchField(String),

    #[error("no such table: {0}")]
    NoSuchTable(String),

    #[error("transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("all pages in the buffer pool are dirty")]
    BufferFull,

    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

impl DbError {
    pub fn internal(msg: &str) -> Self {
        DbError::Internal(msg.to_string())
    }
}
