//! # Shared Types and Wire Protocol
//!
//! Error types, the RESP2 value model, and small byte-string helpers shared
//! between the engine, the server, and the test client.

pub mod cancel;
pub mod error;
pub mod glob;
pub mod resp;

pub use cancel::CancelToken;
pub use error::{KvError, KvResult};
pub use resp::RespValue;
