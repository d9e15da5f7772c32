//! # Sync RESP Client
//!
//! Lightweight, synchronous client with connection pooling to minimize TCP
//! handshake overhead, used by the server's own integration tests.

mod client;
mod pool;
mod resp;

pub use client::{ClientConfig, ClientError, ClientResult, ClientTtl, KVClient};
pub use resp::RespValue;
