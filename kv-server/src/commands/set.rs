//! # Set Commands

use bytes::Bytes;
use kv_common::{KvError, KvResult, RespValue};
use kv_engine::value::set;
use kv_engine::Value;

use super::{get_or_create_write, parse_i64};
use crate::context::ServerContext;
use crate::dispatch::ConnectionState;

pub fn sadd(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let mut guard = get_or_create_write(ctx, &argv[1], &conn.cancel, Value::new_set)?;
    let s = guard.value.as_set_mut()?;
    let added = set::add(s, argv[2..].iter().map(|v| Bytes::copy_from_slice(v)));
    Ok(RespValue::Integer(added as i64))
}

pub fn srem(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let key = argv[1].as_slice();
    let mut guard = match ctx.keyspace.lock(key, &conn.cancel) {
        Ok(g) => g,
        Err(KvError::NotFound) => return Ok(RespValue::Integer(0)),
        Err(e) => return Err(e),
    };
    let members: Vec<Bytes> = argv[2..].iter().map(|v| Bytes::copy_from_slice(v)).collect();
    let s = guard.value.as_set_mut()?;
    let removed = set::remove(s, &members);
    let empty = s.is_empty();
    drop(guard);
    if empty {
        ctx.keyspace.delete(key)?;
    }
    Ok(RespValue::Integer(removed as i64))
}

pub fn smembers(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    match ctx.keyspace.r_lock(&argv[1], &conn.cancel) {
        Ok(guard) => {
            let s = guard.value.as_set()?;
            Ok(RespValue::array(s.iter().map(|m| RespValue::bulk(m.clone())).collect()))
        }
        Err(KvError::NotFound) => Ok(RespValue::array(Vec::new())),
        Err(e) => Err(e),
    }
}

pub fn scard(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    match ctx.keyspace.r_lock(&argv[1], &conn.cancel) {
        Ok(guard) => Ok(RespValue::Integer(guard.value.as_set()?.len() as i64)),
        Err(KvError::NotFound) => Ok(RespValue::Integer(0)),
        Err(e) => Err(e),
    }
}

pub fn sismember(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    match ctx.keyspace.r_lock(&argv[1], &conn.cancel) {
        Ok(guard) => {
            let s = guard.value.as_set()?;
            Ok(RespValue::Integer(s.contains(argv[2].as_slice()) as i64))
        }
        Err(KvError::NotFound) => Ok(RespValue::Integer(0)),
        Err(e) => Err(e),
    }
}

pub fn spop(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let count = match argv.get(2) {
        Some(c) => Some(parse_i64(c)?),
        None => None,
    };
    let key = argv[1].as_slice();
    let mut guard = match ctx.keyspace.lock(key, &conn.cancel) {
        Ok(g) => g,
        Err(KvError::NotFound) => {
            return Ok(if count.is_some() { RespValue::array(Vec::new()) } else { RespValue::nil() });
        }
        Err(e) => return Err(e),
    };
    let s = guard.value.as_set_mut()?;
    let picked = set::pop(s, count.unwrap_or(1));
    let empty = s.is_empty();
    drop(guard);
    if empty {
        ctx.keyspace.delete(key)?;
    }
    Ok(match count {
        None => match picked.into_iter().next() {
            Some(m) => RespValue::bulk(m),
            None => RespValue::nil(),
        },
        Some(_) => RespValue::array(picked.into_iter().map(RespValue::bulk).collect()),
    })
}

pub fn srandmember(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let count = match argv.get(2) {
        Some(c) => Some(parse_i64(c)?),
        None => None,
    };
    let guard = match ctx.keyspace.r_lock(&argv[1], &conn.cancel) {
        Ok(g) => g,
        Err(KvError::NotFound) => {
            return Ok(if count.is_some() { RespValue::array(Vec::new()) } else { RespValue::nil() });
        }
        Err(e) => return Err(e),
    };
    let s = guard.value.as_set()?;
    let picked = set::random(s, count.unwrap_or(1));
    Ok(match count {
        None => match picked.into_iter().next() {
            Some(m) => RespValue::bulk(m),
            None => RespValue::nil(),
        },
        Some(_) => RespValue::array(picked.into_iter().map(RespValue::bulk).collect()),
    })
}

/// Locks every key with a shared guard, skipping any that don't exist
/// (an absent key behaves as an empty set for union/intersect/diff).
fn lock_all<'a>(ctx: &'a ServerContext, conn: &ConnectionState, keys: &[Vec<u8>]) -> KvResult<Vec<kv_engine::KeyReadGuard>> {
    let mut guards = Vec::new();
    for key in keys {
        match ctx.keyspace.r_lock(key, &conn.cancel) {
            Ok(guard) => guards.push(guard),
            Err(KvError::NotFound) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(guards)
}

pub fn sunion(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let guards = lock_all(ctx, conn, &argv[1..])?;
    let sets = guards.iter().map(|g| g.value.as_set()).collect::<KvResult<Vec<_>>>()?;
    let result = set::union(&sets);
    Ok(RespValue::array(result.into_iter().map(RespValue::bulk).collect()))
}

pub fn sinter(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let missing = argv[1..].iter().any(|k| !ctx.keyspace.exists(k));
    if missing {
        return Ok(RespValue::array(Vec::new()));
    }
    let guards = lock_all(ctx, conn, &argv[1..])?;
    let sets = guards.iter().map(|g| g.value.as_set()).collect::<KvResult<Vec<_>>>()?;
    let result = set::intersect(0, &sets);
    Ok(RespValue::array(result.into_iter().map(RespValue::bulk).collect()))
}

pub fn sdiff(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let baseline_guard = match ctx.keyspace.r_lock(&argv[1], &conn.cancel) {
        Ok(g) => g,
        Err(KvError::NotFound) => return Ok(RespValue::array(Vec::new())),
        Err(e) => return Err(e),
    };
    let baseline = baseline_guard.value.as_set()?;
    let guards = lock_all(ctx, conn, &argv[2..])?;
    let others = guards.iter().map(|g| g.value.as_set()).collect::<KvResult<Vec<_>>>()?;
    let result = set::difference(baseline, &others);
    Ok(RespValue::array(result.into_iter().map(RespValue::bulk).collect()))
}

/// Moves a single member from `src` to `dst`. Distinct keys are both held
/// via `Keyspace::lock_many` for the whole move, so no observer can see the
/// member missing from both sets at once.
pub fn smove(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let src = argv[1].as_slice();
    let dst = argv[2].as_slice();
    let member = Bytes::copy_from_slice(&argv[3]);

    if src == dst {
        return match ctx.keyspace.r_lock(src, &conn.cancel) {
            Ok(guard) => Ok(RespValue::Integer(guard.value.as_set()?.contains(&member) as i64)),
            Err(KvError::NotFound) => Ok(RespValue::Integer(0)),
            Err(e) => Err(e),
        };
    }

    if !ctx.keyspace.exists(src) {
        return Ok(RespValue::Integer(0));
    }

    let mut guards = loop {
        if !ctx.keyspace.exists(dst) {
            drop(ctx.keyspace.create_and_lock(Bytes::copy_from_slice(dst), Value::new_set()));
        }
        match ctx.keyspace.lock_many(&[src, dst], &conn.cancel) {
            Ok(g) => break g,
            Err(KvError::NotFound) => {
                if !ctx.keyspace.exists(src) {
                    return Ok(RespValue::Integer(0));
                }
                continue;
            }
            Err(e) => return Err(e),
        }
    };
    let src_pos = guards.iter().position(|(k, _)| k.as_slice() == src).expect("src held by lock_many");
    let (_, mut src_guard) = guards.remove(src_pos);
    let (_, mut dst_guard) = guards.remove(0);

    let removed = src_guard.value.as_set_mut()?.remove(&member);
    if !removed {
        return Ok(RespValue::Integer(0));
    }

    dst_guard.value.as_set_mut()?.insert(member);
    drop(dst_guard);

    let empty = src_guard.value.as_set()?.is_empty();
    drop(src_guard);
    if empty {
        ctx.keyspace.delete(src)?;
    }

    Ok(RespValue::Integer(1))
}
