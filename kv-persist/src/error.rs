//! # Persistence Error Kinds

use thiserror::Error;

pub type PersistResult<T> = Result<T, PersistError>;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed command frame in the append log")]
    Protocol,
}

impl From<PersistError> for kv_common::KvError {
    fn from(err: PersistError) -> Self {
        kv_common::KvError::Io(err.to_string())
    }
}
