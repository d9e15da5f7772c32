//! # Command Handlers
//!
//! One module per value family, mirroring the donor's module-per-concern
//! layout. Every handler has the signature `fn(&ServerContext, &mut
//! ConnectionState, &[Vec<u8>]) -> KvResult<RespValue>` so the dispatch
//! registry can store them as plain function pointers.

pub mod admin;
pub mod generic;
pub mod hash;
pub mod list;
pub mod pubsub;
pub mod set;
pub mod string;
pub mod zset;

use bytes::Bytes;
use kv_common::{CancelToken, KvError, KvResult};
use kv_engine::{KeyWriteGuard, Value};

use crate::context::ServerContext;

pub(crate) fn parse_i64(b: &[u8]) -> KvResult<i64> {
    std::str::from_utf8(b)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| KvError::Range("value is not an integer or out of range".to_string()))
}

pub(crate) fn parse_f64(b: &[u8]) -> KvResult<f64> {
    std::str::from_utf8(b)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| KvError::Range("value is not a valid float".to_string()))
}

/// Acquires the write lock for `key`, creating it with `make()` if absent.
/// If an existing entry holds a different variant, the caller's own
/// `as_*_mut()` call surfaces `WRONGTYPE`, matching every other handler.
pub(crate) fn get_or_create_write(
    ctx: &ServerContext,
    key: &[u8],
    cancel: &CancelToken,
    make: impl FnOnce() -> Value,
) -> KvResult<KeyWriteGuard> {
    match ctx.keyspace.lock(key, cancel) {
        Ok(guard) => Ok(guard),
        Err(KvError::NotFound) => ctx.keyspace.create_and_lock(Bytes::copy_from_slice(key), make()),
        Err(e) => Err(e),
    }
}
