//! # Hash Commands

use bytes::Bytes;
use kv_common::{KvError, KvResult, RespValue};
use kv_engine::value::hash;
use kv_engine::Value;

use super::{get_or_create_write, parse_f64, parse_i64};
use crate::context::ServerContext;
use crate::dispatch::ConnectionState;

pub fn hset(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    if (argv.len() - 2) % 2 != 0 {
        return Err(KvError::Syntax("wrong number of arguments for HSET".to_string()));
    }
    let mut guard = get_or_create_write(ctx, &argv[1], &conn.cancel, Value::new_hash)?;
    let map = guard.value.as_hash_mut()?;
    let mut added = 0i64;
    for pair in argv[2..].chunks(2) {
        let field = Bytes::copy_from_slice(&pair[0]);
        let value = Bytes::copy_from_slice(&pair[1]);
        if hash::set(map, field, value) {
            added += 1;
        }
    }
    Ok(RespValue::Integer(added))
}

pub fn hget(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    match ctx.keyspace.r_lock(&argv[1], &conn.cancel) {
        Ok(guard) => {
            let map = guard.value.as_hash()?;
            match hash::get(map, &Bytes::copy_from_slice(&argv[2])) {
                Some(v) => Ok(RespValue::bulk(v.clone())),
                None => Ok(RespValue::nil()),
            }
        }
        Err(KvError::NotFound) => Ok(RespValue::nil()),
        Err(e) => Err(e),
    }
}

pub fn hdel(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let key = argv[1].as_slice();
    let mut guard = match ctx.keyspace.lock(key, &conn.cancel) {
        Ok(g) => g,
        Err(KvError::NotFound) => return Ok(RespValue::Integer(0)),
        Err(e) => return Err(e),
    };
    let fields: Vec<Bytes> = argv[2..].iter().map(|f| Bytes::copy_from_slice(f)).collect();
    let map = guard.value.as_hash_mut()?;
    let removed = hash::delete(map, &fields);
    let empty = map.is_empty();
    drop(guard);
    if empty {
        ctx.keyspace.delete(key)?;
    }
    Ok(RespValue::Integer(removed as i64))
}

pub fn hexists(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    match ctx.keyspace.r_lock(&argv[1], &conn.cancel) {
        Ok(guard) => {
            let map = guard.value.as_hash()?;
            Ok(RespValue::Integer(map.contains_key(argv[2].as_slice()) as i64))
        }
        Err(KvError::NotFound) => Ok(RespValue::Integer(0)),
        Err(e) => Err(e),
    }
}

pub fn hgetall(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    match ctx.keyspace.r_lock(&argv[1], &conn.cancel) {
        Ok(guard) => {
            let map = guard.value.as_hash()?;
            let mut out = Vec::with_capacity(map.len() * 2);
            for (field, value) in map.iter() {
                out.push(RespValue::bulk(field.clone()));
                out.push(RespValue::bulk(value.clone()));
            }
            Ok(RespValue::array(out))
        }
        Err(KvError::NotFound) => Ok(RespValue::array(Vec::new())),
        Err(e) => Err(e),
    }
}

pub fn hkeys(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    match ctx.keyspace.r_lock(&argv[1], &conn.cancel) {
        Ok(guard) => {
            let map = guard.value.as_hash()?;
            Ok(RespValue::array(map.keys().map(|k| RespValue::bulk(k.clone())).collect()))
        }
        Err(KvError::NotFound) => Ok(RespValue::array(Vec::new())),
        Err(e) => Err(e),
    }
}

pub fn hvals(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    match ctx.keyspace.r_lock(&argv[1], &conn.cancel) {
        Ok(guard) => {
            let map = guard.value.as_hash()?;
            Ok(RespValue::array(map.values().map(|v| RespValue::bulk(v.clone())).collect()))
        }
        Err(KvError::NotFound) => Ok(RespValue::array(Vec::new())),
        Err(e) => Err(e),
    }
}

pub fn hlen(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    match ctx.keyspace.r_lock(&argv[1], &conn.cancel) {
        Ok(guard) => Ok(RespValue::Integer(guard.value.as_hash()?.len() as i64)),
        Err(KvError::NotFound) => Ok(RespValue::Integer(0)),
        Err(e) => Err(e),
    }
}

pub fn hincrby(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let by = parse_i64(&argv[3])?;
    let mut guard = get_or_create_write(ctx, &argv[1], &conn.cancel, Value::new_hash)?;
    let map = guard.value.as_hash_mut()?;
    let next = hash::incr_by(map, &Bytes::copy_from_slice(&argv[2]), by)?;
    Ok(RespValue::Integer(next))
}

pub fn hincrbyfloat(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let by = parse_f64(&argv[3])?;
    let mut guard = get_or_create_write(ctx, &argv[1], &conn.cancel, Value::new_hash)?;
    let map = guard.value.as_hash_mut()?;
    let next = hash::incr_by_float(map, &Bytes::copy_from_slice(&argv[2]), by)?;
    Ok(RespValue::bulk(hash::format_float(next)))
}

pub fn hrandfield(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let guard = match ctx.keyspace.r_lock(&argv[1], &conn.cancel) {
        Ok(g) => g,
        Err(KvError::NotFound) => {
            return if argv.len() >= 3 { Ok(RespValue::array(Vec::new())) } else { Ok(RespValue::nil()) };
        }
        Err(e) => return Err(e),
    };
    let map = guard.value.as_hash()?;

    if argv.len() < 3 {
        return Ok(match hash::random_fields(map, 1, false).into_iter().next() {
            Some((field, _)) => RespValue::bulk(field),
            None => RespValue::nil(),
        });
    }

    let count = parse_i64(&argv[2])?;
    let with_values = argv.get(3).map(|o| o.eq_ignore_ascii_case(b"WITHVALUES")).unwrap_or(false);
    let picked = hash::random_fields(map, count, with_values);
    let mut out = Vec::with_capacity(picked.len() * if with_values { 2 } else { 1 });
    for (field, value) in picked {
        out.push(RespValue::bulk(field));
        if let Some(value) = value {
            out.push(RespValue::bulk(value));
        }
    }
    Ok(RespValue::array(out))
}

pub fn hsetnx(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let mut guard = get_or_create_write(ctx, &argv[1], &conn.cancel, Value::new_hash)?;
    let map = guard.value.as_hash_mut()?;
    let set = hash::set_if_absent(map, Bytes::copy_from_slice(&argv[2]), Bytes::copy_from_slice(&argv[3]));
    Ok(RespValue::Integer(set as i64))
}
