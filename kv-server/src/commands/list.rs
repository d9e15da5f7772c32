//! # List Commands

use bytes::Bytes;
use kv_common::{KvError, KvResult, RespValue};
use kv_engine::value::list;
use kv_engine::Value;

use super::{get_or_create_write, parse_i64};
use crate::context::ServerContext;
use crate::dispatch::ConnectionState;

fn parse_side(b: &[u8]) -> KvResult<list::Side> {
    match b.to_ascii_uppercase().as_slice() {
        b"LEFT" => Ok(list::Side::Left),
        b"RIGHT" => Ok(list::Side::Right),
        _ => Err(KvError::Syntax("syntax error".to_string())),
    }
}

pub fn lpush(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let mut guard = get_or_create_write(ctx, &argv[1], &conn.cancel, Value::new_list)?;
    let l = guard.value.as_list_mut()?;
    list::push_front(l, argv[2..].iter().map(|v| Bytes::copy_from_slice(v)));
    Ok(RespValue::Integer(l.len() as i64))
}

pub fn rpush(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let mut guard = get_or_create_write(ctx, &argv[1], &conn.cancel, Value::new_list)?;
    let l = guard.value.as_list_mut()?;
    list::push_back(l, argv[2..].iter().map(|v| Bytes::copy_from_slice(v)));
    Ok(RespValue::Integer(l.len() as i64))
}

fn pop_one(ctx: &ServerContext, conn: &mut ConnectionState, key: &[u8], from_front: bool) -> KvResult<RespValue> {
    let mut guard = match ctx.keyspace.lock(key, &conn.cancel) {
        Ok(g) => g,
        Err(KvError::NotFound) => return Ok(RespValue::nil()),
        Err(e) => return Err(e),
    };
    let l = guard.value.as_list_mut()?;
    let popped = if from_front { list::pop_front(l) } else { list::pop_back(l) };
    let empty = l.is_empty();
    drop(guard);
    if empty {
        ctx.keyspace.delete(key)?;
    }
    Ok(match popped {
        Some(v) => RespValue::bulk(v),
        None => RespValue::nil(),
    })
}

pub fn lpop(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    pop_one(ctx, conn, &argv[1], true)
}

pub fn rpop(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    pop_one(ctx, conn, &argv[1], false)
}

pub fn lrange(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let start = parse_i64(&argv[2])?;
    let end = parse_i64(&argv[3])?;
    match ctx.keyspace.r_lock(&argv[1], &conn.cancel) {
        Ok(guard) => {
            let l = guard.value.as_list()?;
            Ok(RespValue::array(list::range_from_to(l, start, end).into_iter().map(RespValue::bulk).collect()))
        }
        Err(KvError::NotFound) => Ok(RespValue::array(Vec::new())),
        Err(e) => Err(e),
    }
}

pub fn llen(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    match ctx.keyspace.r_lock(&argv[1], &conn.cancel) {
        Ok(guard) => Ok(RespValue::Integer(guard.value.as_list()?.len() as i64)),
        Err(KvError::NotFound) => Ok(RespValue::Integer(0)),
        Err(e) => Err(e),
    }
}

pub fn lindex(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let idx = parse_i64(&argv[2])?;
    match ctx.keyspace.r_lock(&argv[1], &conn.cancel) {
        Ok(guard) => {
            let l = guard.value.as_list()?;
            Ok(match list::index_at(l, idx) {
                Some(v) => RespValue::bulk(v.clone()),
                None => RespValue::nil(),
            })
        }
        Err(KvError::NotFound) => Ok(RespValue::nil()),
        Err(e) => Err(e),
    }
}

pub fn lset(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let idx = parse_i64(&argv[2])?;
    let mut guard = ctx.keyspace.lock(&argv[1], &conn.cancel)?;
    let l = guard.value.as_list_mut()?;
    list::set_at(l, idx, Bytes::copy_from_slice(&argv[3]))?;
    Ok(RespValue::simple("OK"))
}

pub fn ltrim(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let start = parse_i64(&argv[2])?;
    let end = parse_i64(&argv[3])?;
    let key = argv[1].as_slice();
    let mut guard = match ctx.keyspace.lock(key, &conn.cancel) {
        Ok(g) => g,
        Err(KvError::NotFound) => return Ok(RespValue::simple("OK")),
        Err(e) => return Err(e),
    };
    let l = guard.value.as_list_mut()?;
    list::trim_inclusive(l, start, end);
    let empty = l.is_empty();
    drop(guard);
    if empty {
        ctx.keyspace.delete(key)?;
    }
    Ok(RespValue::simple("OK"))
}

pub fn lrem(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let count = parse_i64(&argv[2])?;
    let value = Bytes::copy_from_slice(&argv[3]);
    let key = argv[1].as_slice();
    let mut guard = match ctx.keyspace.lock(key, &conn.cancel) {
        Ok(g) => g,
        Err(KvError::NotFound) => return Ok(RespValue::Integer(0)),
        Err(e) => return Err(e),
    };
    let l = guard.value.as_list_mut()?;
    let removed = list::remove(l, count, &value);
    let empty = l.is_empty();
    drop(guard);
    if empty {
        ctx.keyspace.delete(key)?;
    }
    Ok(RespValue::Integer(removed as i64))
}

/// Locks `src`, pops from `from_side`, and pushes the popped element onto
/// `dst`'s `to_side`. `src == dst` is handled on the single guard; distinct
/// keys are both held via `Keyspace::lock_many` for the whole move, so no
/// observer can see the element missing from both lists at once.
pub fn lmove(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let src = argv[1].as_slice();
    let dst = argv[2].as_slice();
    let from_side = parse_side(&argv[3])?;
    let to_side = parse_side(&argv[4])?;

    if src == dst {
        let mut guard = match ctx.keyspace.lock(src, &conn.cancel) {
            Ok(g) => g,
            Err(KvError::NotFound) => return Ok(RespValue::nil()),
            Err(e) => return Err(e),
        };
        let l = guard.value.as_list_mut()?;
        let popped = match from_side {
            list::Side::Left => list::pop_front(l),
            list::Side::Right => list::pop_back(l),
        };
        let Some(value) = popped else { return Ok(RespValue::nil()) };
        match to_side {
            list::Side::Left => l.push_front(value.clone()),
            list::Side::Right => l.push_back(value.clone()),
        }
        return Ok(RespValue::bulk(value));
    }

    if !ctx.keyspace.exists(src) {
        return Ok(RespValue::nil());
    }

    let mut guards = loop {
        if !ctx.keyspace.exists(dst) {
            drop(ctx.keyspace.create_and_lock(Bytes::copy_from_slice(dst), Value::new_list()));
        }
        match ctx.keyspace.lock_many(&[src, dst], &conn.cancel) {
            Ok(g) => break g,
            Err(KvError::NotFound) => {
                if !ctx.keyspace.exists(src) {
                    return Ok(RespValue::nil());
                }
                continue;
            }
            Err(e) => return Err(e),
        }
    };
    let src_pos = guards.iter().position(|(k, _)| k.as_slice() == src).expect("src held by lock_many");
    let (_, mut src_guard) = guards.remove(src_pos);
    let (_, mut dst_guard) = guards.remove(0);

    let popped = {
        let l = src_guard.value.as_list_mut()?;
        match from_side {
            list::Side::Left => list::pop_front(l),
            list::Side::Right => list::pop_back(l),
        }
    };
    let Some(value) = popped else { return Ok(RespValue::nil()) };

    let dst_list = dst_guard.value.as_list_mut()?;
    match to_side {
        list::Side::Left => dst_list.push_front(value.clone()),
        list::Side::Right => dst_list.push_back(value.clone()),
    }
    drop(dst_guard);

    let empty = src_guard.value.as_list()?.is_empty();
    drop(src_guard);
    if empty {
        ctx.keyspace.delete(src)?;
    }

    Ok(RespValue::bulk(value))
}
