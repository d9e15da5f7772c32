//! # ACL Error Kinds

use thiserror::Error;

pub type AclResult<T> = Result<T, AclError>;

#[derive(Debug, Error)]
pub enum AclError {
    #[error("unknown user '{0}'")]
    UnknownUser(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unrecognized ACL file extension: {0}")]
    UnknownFormat(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
