//! # Generic Commands
//!
//! Key-family-agnostic commands: connection liveness, key lifetime, and
//! introspection (`TYPE`, `KEYS`).

use std::time::Instant;

use kv_common::glob::glob_match;
use kv_common::{KvError, KvResult, RespValue};
use kv_engine::keyspace::{expiry_policy_allows, ExpiryPolicy};

use super::parse_i64;
use crate::context::ServerContext;
use crate::dispatch::ConnectionState;

pub fn ping(_ctx: &ServerContext, _conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    match argv.get(1) {
        Some(msg) => Ok(RespValue::bulk(msg.clone())),
        None => Ok(RespValue::simple("PONG")),
    }
}

pub fn echo(_ctx: &ServerContext, _conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    Ok(RespValue::bulk(argv[1].clone()))
}

pub fn del(ctx: &ServerContext, _conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let mut removed = 0i64;
    for key in &argv[1..] {
        if ctx.keyspace.delete(key)? {
            removed += 1;
        }
    }
    Ok(RespValue::Integer(removed))
}

pub fn exists(ctx: &ServerContext, _conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let count = argv[1..].iter().filter(|key| ctx.keyspace.exists(key)).count();
    Ok(RespValue::Integer(count as i64))
}

/// Shared by `EXPIRE`/`PEXPIRE`/`EXPIREAT`: resolves the absolute deadline,
/// the optional `NX`/`XX`/`GT`/`LT` condition in `argv[3]`, and applies it.
/// A non-positive relative `duration` behaves as an immediate delete, per
/// the usual key-expiry semantics.
fn apply_expiry(
    ctx: &ServerContext,
    conn: &mut ConnectionState,
    key: &[u8],
    deadline: Instant,
    is_past: bool,
    argv: &[Vec<u8>],
) -> KvResult<RespValue> {
    let policy = match argv.get(3) {
        None => ExpiryPolicy::Always,
        Some(opt) => match opt.to_ascii_uppercase().as_slice() {
            b"NX" => ExpiryPolicy::Nx,
            b"XX" => ExpiryPolicy::Xx,
            b"GT" => ExpiryPolicy::Gt,
            b"LT" => ExpiryPolicy::Lt,
            _ => return Err(KvError::Syntax("unsupported option".to_string())),
        },
    };

    if is_past {
        return match ctx.keyspace.delete(key)? {
            true => Ok(RespValue::Integer(1)),
            false => Ok(RespValue::Integer(0)),
        };
    }

    match ctx.keyspace.lock(key, &conn.cancel) {
        Ok(mut guard) => {
            if !expiry_policy_allows(guard.expire_at, deadline, policy) {
                return Ok(RespValue::Integer(0));
            }
            guard.expire_at = Some(deadline);
            Ok(RespValue::Integer(1))
        }
        Err(KvError::NotFound) => Ok(RespValue::Integer(0)),
        Err(e) => Err(e),
    }
}

pub fn expire(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let secs = parse_i64(&argv[2])?;
    let deadline = Instant::now() + std::time::Duration::from_secs(secs.max(0) as u64);
    apply_expiry(ctx, conn, &argv[1], deadline, secs <= 0, argv)
}

pub fn pexpire(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let millis = parse_i64(&argv[2])?;
    let deadline = Instant::now() + std::time::Duration::from_millis(millis.max(0) as u64);
    apply_expiry(ctx, conn, &argv[1], deadline, millis <= 0, argv)
}

pub fn expireat(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let unix_secs = parse_i64(&argv[2])?;
    let unix_ms = unix_secs.saturating_mul(1000);
    let deadline = ctx.keyspace.unix_ms_to_instant(unix_ms);
    let is_past = unix_ms <= ctx.unix_ms_now();
    apply_expiry(ctx, conn, &argv[1], deadline, is_past, argv)
}

pub fn ttl(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    match ctx.keyspace.r_lock(&argv[1], &conn.cancel) {
        Ok(guard) => match guard.expire_at {
            None => Ok(RespValue::Integer(-1)),
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                Ok(RespValue::Integer(remaining.as_secs() as i64))
            }
        },
        Err(KvError::NotFound) => Ok(RespValue::Integer(-2)),
        Err(e) => Err(e),
    }
}

pub fn pttl(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    match ctx.keyspace.r_lock(&argv[1], &conn.cancel) {
        Ok(guard) => match guard.expire_at {
            None => Ok(RespValue::Integer(-1)),
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                Ok(RespValue::Integer(remaining.as_millis() as i64))
            }
        },
        Err(KvError::NotFound) => Ok(RespValue::Integer(-2)),
        Err(e) => Err(e),
    }
}

pub fn persist(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    match ctx.keyspace.lock(&argv[1], &conn.cancel) {
        Ok(mut guard) => {
            if guard.expire_at.take().is_some() {
                Ok(RespValue::Integer(1))
            } else {
                Ok(RespValue::Integer(0))
            }
        }
        Err(KvError::NotFound) => Ok(RespValue::Integer(0)),
        Err(e) => Err(e),
    }
}

pub fn type_cmd(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    match ctx.keyspace.r_lock(&argv[1], &conn.cancel) {
        Ok(guard) => Ok(RespValue::simple(guard.value.type_name())),
        Err(KvError::NotFound) => Ok(RespValue::simple("none")),
        Err(e) => Err(e),
    }
}

pub fn keys(ctx: &ServerContext, _conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let pattern = &argv[1];
    let matches: Vec<RespValue> = ctx
        .keyspace
        .all_keys()
        .into_iter()
        .filter(|key| glob_match(pattern, key))
        .map(RespValue::bulk)
        .collect();
    Ok(RespValue::array(matches))
}
