//! # Error Kinds
//!
//! One error type shared by the keyspace, the command dispatcher, and the
//! persistence layers. Each variant maps to one of the RESP error prefixes
//! the wire protocol exposes (`-ERR`, `-WRONGTYPE`, `-NOAUTH`, `-NOPERM`,
//! `-WRONGPASS`, `-OOM`).

use thiserror::Error;

/// Result alias used throughout the workspace.
pub type KvResult<T> = Result<T, KvError>;

/// Errors surfaced by the keyspace engine and command handlers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KvError {
    /// Wrong number of arguments or an unrecognized option.
    #[error("wrong number of arguments or unknown option: {0}")]
    Syntax(String),

    /// Operation attempted on a key holding a different value variant.
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    /// Index out of bounds, integer overflow, non-finite increment, etc.
    #[error("ERR {0}")]
    Range(String),

    /// Connection is not authenticated.
    #[error("NOAUTH Authentication required")]
    NoAuth,

    /// `AUTH` supplied an unknown user, a disabled user, or the wrong password.
    #[error("WRONGPASS invalid username-password pair or user is disabled")]
    WrongPass,

    /// Connection is authenticated but lacks permission for this operation.
    #[error("NOPERM {0}")]
    NoPerm(String),

    /// Used only where the protocol differentiates "absent" from "empty".
    #[error("ERR no such key")]
    NotFound,

    /// Unknown command or subcommand name.
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    /// Memory ceiling exceeded and the eviction policy is `noeviction`.
    #[error("OOM command not allowed when used memory > 'maxmemory'")]
    OutOfMemory,

    /// Disk I/O failure in the AOF or snapshot writer.
    #[error("ERR {0}")]
    Io(String),

    /// Durability has been broken (AOF writer failed); writes are rejected
    /// until the writer is healthy again.
    #[error("ERR AOF write failed, rejecting writes until healthy: {0}")]
    Fatal(String),

    /// A lock acquisition was waiting when its connection's context was
    /// cancelled; no mutation was performed.
    #[error("ERR operation cancelled")]
    Cancelled,
}

impl KvError {
    /// Returns the RESP error-reply prefix for this error kind.
    pub fn resp_prefix(&self) -> &'static str {
        match self {
            KvError::WrongType => "WRONGTYPE",
            KvError::NoAuth => "NOAUTH",
            KvError::NoPerm(_) => "NOPERM",
            KvError::WrongPass => "WRONGPASS",
            KvError::OutOfMemory => "OOM",
            _ => "ERR",
        }
    }

    /// Renders the error message without the RESP prefix, for use inside a
    /// `-<PREFIX> <message>\r\n` reply.
    pub fn message(&self) -> String {
        match self {
            KvError::Syntax(msg) => msg.clone(),
            KvError::WrongType => {
                "Operation against a key holding the wrong kind of value".to_string()
            }
            KvError::Range(msg) => msg.clone(),
            KvError::NoAuth => "Authentication required".to_string(),
            KvError::NoPerm(msg) => msg.clone(),
            KvError::WrongPass => "invalid username-password pair or user is disabled".to_string(),
            KvError::NotFound => "no such key".to_string(),
            KvError::UnknownCommand(name) => format!("unknown command '{name}'"),
            KvError::OutOfMemory => {
                "command not allowed when used memory > 'maxmemory'".to_string()
            }
            KvError::Io(msg) => msg.clone(),
            KvError::Fatal(msg) => {
                format!("AOF write failed, rejecting writes until healthy: {msg}")
            }
            KvError::Cancelled => "operation cancelled".to_string(),
        }
    }
}

impl From<std::io::Error> for KvError {
    fn from(err: std::io::Error) -> Self {
        KvError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for KvError {
    fn from(err: serde_json::Error) -> Self {
        KvError::Io(err.to_string())
    }
}
