//! Error types for the store

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database lock poisoned")]
    Poisoned,

    #[error("credential cipher error: {0}")]
    Codec(#[from] common::CodecError),
}

pub type Result<T> = std::result::Result<T, Error>;
