//! # String Commands

use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use kv_common::{KvError, KvResult, RespValue};
use kv_engine::Value;

use super::{get_or_create_write, parse_i64};
use crate::context::ServerContext;
use crate::dispatch::ConnectionState;

pub fn set(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let key = argv[1].as_slice();
    let value = Bytes::copy_from_slice(&argv[2]);

    let mut ttl: Option<Duration> = None;
    let mut nx = false;
    let mut xx = false;
    let mut i = 3;
    while i < argv.len() {
        match argv[i].to_ascii_uppercase().as_slice() {
            b"EX" => {
                let secs = parse_i64(argv.get(i + 1).ok_or_else(|| KvError::Syntax("syntax error".to_string()))?)?;
                ttl = Some(Duration::from_secs(secs.max(0) as u64));
                i += 2;
            }
            b"PX" => {
                let millis = parse_i64(argv.get(i + 1).ok_or_else(|| KvError::Syntax("syntax error".to_string()))?)?;
                ttl = Some(Duration::from_millis(millis.max(0) as u64));
                i += 2;
            }
            b"NX" => {
                nx = true;
                i += 1;
            }
            b"XX" => {
                xx = true;
                i += 1;
            }
            _ => return Err(KvError::Syntax("syntax error".to_string())),
        }
    }

    let exists = ctx.keyspace.exists(key);
    if nx && exists {
        return Ok(RespValue::nil());
    }
    if xx && !exists {
        return Ok(RespValue::nil());
    }

    let mut guard = get_or_create_write(ctx, key, &conn.cancel, || Value::String(value.clone()))?;
    let old = guard.value.clone();
    guard.value = Value::String(value);
    guard.expire_at = ttl.map(|d| Instant::now() + d);
    ctx.keyspace.account_resize(key, &old, &guard.value);
    Ok(RespValue::simple("OK"))
}

pub fn get(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    match ctx.keyspace.r_lock(&argv[1], &conn.cancel) {
        Ok(guard) => Ok(RespValue::bulk(guard.value.as_string()?.clone())),
        Err(KvError::NotFound) => Ok(RespValue::nil()),
        Err(e) => Err(e),
    }
}

pub fn getset(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let key = argv[1].as_slice();
    let value = Bytes::copy_from_slice(&argv[2]);

    match ctx.keyspace.lock(key, &conn.cancel) {
        Ok(mut guard) => {
            let old = guard.value.as_string()?.clone();
            let previous = guard.value.clone();
            guard.value = Value::String(value);
            guard.expire_at = None;
            ctx.keyspace.account_resize(key, &previous, &guard.value);
            Ok(RespValue::bulk(old))
        }
        Err(KvError::NotFound) => {
            ctx.keyspace.create_and_lock(Bytes::copy_from_slice(key), Value::String(value))?;
            Ok(RespValue::nil())
        }
        Err(e) => Err(e),
    }
}

pub fn mset(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    if (argv.len() - 1) % 2 != 0 {
        return Err(KvError::Syntax("wrong number of arguments for MSET".to_string()));
    }
    let mut pairs: Vec<(&[u8], &[u8])> =
        argv[1..].chunks(2).map(|pair| (pair[0].as_slice(), pair[1].as_slice())).collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    for (key, value) in pairs {
        let value = Bytes::copy_from_slice(value);
        let mut guard = get_or_create_write(ctx, key, &conn.cancel, || Value::String(value.clone()))?;
        let old = guard.value.clone();
        guard.value = Value::String(value);
        guard.expire_at = None;
        ctx.keyspace.account_resize(key, &old, &guard.value);
    }
    Ok(RespValue::simple("OK"))
}

pub fn mget(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let replies = argv[1..]
        .iter()
        .map(|key| match ctx.keyspace.r_lock(key, &conn.cancel) {
            Ok(guard) => match guard.value.as_string() {
                Ok(b) => RespValue::bulk(b.clone()),
                Err(_) => RespValue::nil(),
            },
            Err(_) => RespValue::nil(),
        })
        .collect();
    Ok(RespValue::array(replies))
}

fn incr_by(ctx: &ServerContext, conn: &mut ConnectionState, key: &[u8], delta: i64) -> KvResult<i64> {
    let mut guard = get_or_create_write(ctx, key, &conn.cancel, || Value::String(Bytes::from_static(b"0")))?;
    let current = parse_i64(guard.value.as_string()?)?;
    let next = current.checked_add(delta).ok_or_else(|| KvError::Range("increment or decrement would overflow".to_string()))?;
    let old = guard.value.clone();
    guard.value = Value::String(Bytes::from(next.to_string()));
    ctx.keyspace.account_resize(key, &old, &guard.value);
    Ok(next)
}

pub fn incr(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    Ok(RespValue::Integer(incr_by(ctx, conn, &argv[1], 1)?))
}

pub fn decr(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    Ok(RespValue::Integer(incr_by(ctx, conn, &argv[1], -1)?))
}

pub fn incrby(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let delta = parse_i64(&argv[2])?;
    Ok(RespValue::Integer(incr_by(ctx, conn, &argv[1], delta)?))
}

pub fn decrby(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let delta = parse_i64(&argv[2])?;
    Ok(RespValue::Integer(incr_by(ctx, conn, &argv[1], delta.checked_neg().unwrap_or(i64::MAX))?))
}

pub fn append(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let key = argv[1].as_slice();
    let suffix = &argv[2];

    let mut guard = get_or_create_write(ctx, key, &conn.cancel, || Value::String(Bytes::new()))?;
    let old = guard.value.clone();
    let mut buf = BytesMut::from(&guard.value.as_string()?[..]);
    buf.extend_from_slice(suffix);
    guard.value = Value::String(buf.freeze());
    ctx.keyspace.account_resize(key, &old, &guard.value);
    Ok(RespValue::Integer(guard.value.as_string()?.len() as i64))
}

pub fn strlen(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    match ctx.keyspace.r_lock(&argv[1], &conn.cancel) {
        Ok(guard) => Ok(RespValue::Integer(guard.value.as_string()?.len() as i64)),
        Err(KvError::NotFound) => Ok(RespValue::Integer(0)),
        Err(e) => Err(e),
    }
}
