//! # Sorted-Set Commands

use bytes::Bytes;
use kv_common::{KvError, KvResult, RespValue};
use kv_engine::value::hash::format_float;
use kv_engine::zset::{
    self, AddOrUpdateConfig, AddPolicy, AddResult, Aggregate, Comparison, CountMode, Limit, LexBound, PopPolicy,
    RangeSelector, ScoreBound, ZSet,
};
use kv_engine::Value;

use super::{get_or_create_write, parse_f64, parse_i64};
use crate::context::ServerContext;
use crate::dispatch::ConnectionState;

fn parse_score(b: &[u8]) -> KvResult<f64> {
    match b {
        b"+inf" | b"inf" => Ok(f64::INFINITY),
        b"-inf" => Ok(f64::NEG_INFINITY),
        _ => parse_f64(b),
    }
}

fn parse_score_bound(b: &[u8]) -> KvResult<ScoreBound> {
    match b {
        b"-inf" => Ok(ScoreBound::NegInfinity),
        b"+inf" | b"inf" => Ok(ScoreBound::PosInfinity),
        _ if b.first() == Some(&b'(') => Ok(ScoreBound::Exclusive(parse_f64(&b[1..])?)),
        _ => Ok(ScoreBound::Inclusive(parse_f64(b)?)),
    }
}

fn parse_lex_bound(b: &[u8]) -> KvResult<LexBound> {
    match b {
        b"-" => Ok(LexBound::NegInfinity),
        b"+" => Ok(LexBound::PosInfinity),
        _ if b.first() == Some(&b'(') => Ok(LexBound::Exclusive(Bytes::copy_from_slice(&b[1..]))),
        _ if b.first() == Some(&b'[') => Ok(LexBound::Inclusive(Bytes::copy_from_slice(&b[1..]))),
        _ => Err(KvError::Syntax("min or max not valid string range item".to_string())),
    }
}

fn parse_limit(argv: &[Vec<u8>], from: usize) -> KvResult<Option<Limit>> {
    if from >= argv.len() {
        return Ok(None);
    }
    if !argv[from].eq_ignore_ascii_case(b"LIMIT") {
        return Err(KvError::Syntax("syntax error".to_string()));
    }
    let offset = parse_i64(argv.get(from + 1).ok_or_else(|| KvError::Syntax("syntax error".to_string()))?)?;
    let count = parse_i64(argv.get(from + 2).ok_or_else(|| KvError::Syntax("syntax error".to_string()))?)?;
    Ok(Some(Limit { offset: offset.max(0) as usize, count: if count < 0 { None } else { Some(count as usize) } }))
}

fn entries_to_resp(entries: Vec<(Bytes, f64)>, with_scores: bool) -> RespValue {
    let mut out = Vec::with_capacity(entries.len() * if with_scores { 2 } else { 1 });
    for (member, score) in entries {
        out.push(RespValue::bulk(member));
        if with_scores {
            out.push(RespValue::bulk(format_float(score)));
        }
    }
    RespValue::array(out)
}

/// `ZRANGE`'s plain `start stop` form slices the full ascending listing by
/// rank, with the same negative-index and clamping rules as `LRANGE`.
fn slice_by_rank(items: Vec<(Bytes, f64)>, start: i64, end: i64) -> Vec<(Bytes, f64)> {
    let len = items.len();
    if len == 0 {
        return Vec::new();
    }
    let resolve = |i: i64| if i < 0 { i + len as i64 } else { i };
    let s = resolve(start).clamp(0, len as i64 - 1) as usize;
    let e = resolve(end).clamp(0, len as i64 - 1) as usize;
    if s > e {
        return Vec::new();
    }
    items.into_iter().skip(s).take(e - s + 1).collect()
}

pub fn zadd(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let mut policy = AddPolicy::Any;
    let mut comparison = Comparison::None;
    let mut count_mode = CountMode::Added;
    let mut incr = false;
    let mut i = 2;
    while i < argv.len() {
        match argv[i].to_ascii_uppercase().as_slice() {
            b"NX" => {
                policy = AddPolicy::Nx;
                i += 1;
            }
            b"XX" => {
                policy = AddPolicy::Xx;
                i += 1;
            }
            b"GT" => {
                comparison = Comparison::Gt;
                i += 1;
            }
            b"LT" => {
                comparison = Comparison::Lt;
                i += 1;
            }
            b"CH" => {
                count_mode = CountMode::Changed;
                i += 1;
            }
            b"INCR" => {
                incr = true;
                i += 1;
            }
            _ => break,
        }
    }
    if i == argv.len() || (argv.len() - i) % 2 != 0 {
        return Err(KvError::Syntax("wrong number of arguments for ZADD".to_string()));
    }
    let mut members = Vec::new();
    for pair in argv[i..].chunks(2) {
        members.push((Bytes::copy_from_slice(&pair[1]), parse_score(&pair[0])?));
    }

    let mut guard = get_or_create_write(ctx, &argv[1], &conn.cancel, Value::new_sorted_set)?;
    let set = guard.value.as_zset_mut()?;
    let cfg = AddOrUpdateConfig { policy, comparison, count_mode, incr };
    match zset::add_or_update(set, &members, cfg)? {
        AddResult::Count(n) => Ok(RespValue::Integer(n)),
        AddResult::NewScore(s) if s.is_nan() => Ok(RespValue::nil()),
        AddResult::NewScore(s) => Ok(RespValue::bulk(format_float(s))),
    }
}

pub fn zscore(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    match ctx.keyspace.r_lock(&argv[1], &conn.cancel) {
        Ok(guard) => {
            let set = guard.value.as_zset()?;
            match set.score(&Bytes::copy_from_slice(&argv[2])) {
                Some(score) => Ok(RespValue::bulk(format_float(score))),
                None => Ok(RespValue::nil()),
            }
        }
        Err(KvError::NotFound) => Ok(RespValue::nil()),
        Err(e) => Err(e),
    }
}

pub fn zrange(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let start = parse_i64(&argv[2])?;
    let stop = parse_i64(&argv[3])?;
    let with_scores = argv.get(4).map(|o| o.eq_ignore_ascii_case(b"WITHSCORES")).unwrap_or(false);
    match ctx.keyspace.r_lock(&argv[1], &conn.cancel) {
        Ok(guard) => {
            let set = guard.value.as_zset()?;
            let full = zset::range(set, &RangeSelector::ByScore { min: ScoreBound::NegInfinity, max: ScoreBound::PosInfinity }, false, None);
            Ok(entries_to_resp(slice_by_rank(full, start, stop), with_scores))
        }
        Err(KvError::NotFound) => Ok(RespValue::array(Vec::new())),
        Err(e) => Err(e),
    }
}

pub fn zrangebyscore(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let min = parse_score_bound(&argv[2])?;
    let max = parse_score_bound(&argv[3])?;
    let mut with_scores = false;
    let mut limit_from = 4;
    if argv.get(4).map(|o| o.eq_ignore_ascii_case(b"WITHSCORES")).unwrap_or(false) {
        with_scores = true;
        limit_from = 5;
    }
    let limit = parse_limit(argv, limit_from)?;

    match ctx.keyspace.r_lock(&argv[1], &conn.cancel) {
        Ok(guard) => {
            let set = guard.value.as_zset()?;
            let entries = zset::range(set, &RangeSelector::ByScore { min, max }, false, limit);
            Ok(entries_to_resp(entries, with_scores))
        }
        Err(KvError::NotFound) => Ok(RespValue::array(Vec::new())),
        Err(e) => Err(e),
    }
}

pub fn zrangebylex(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let min = parse_lex_bound(&argv[2])?;
    let max = parse_lex_bound(&argv[3])?;
    let limit = parse_limit(argv, 4)?;

    match ctx.keyspace.r_lock(&argv[1], &conn.cancel) {
        Ok(guard) => {
            let set = guard.value.as_zset()?;
            let entries = zset::range(set, &RangeSelector::ByLex { min, max }, false, limit);
            Ok(entries_to_resp(entries, false))
        }
        Err(KvError::NotFound) => Ok(RespValue::array(Vec::new())),
        Err(e) => Err(e),
    }
}

fn rank(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>], reverse: bool) -> KvResult<RespValue> {
    match ctx.keyspace.r_lock(&argv[1], &conn.cancel) {
        Ok(guard) => {
            let set = guard.value.as_zset()?;
            match zset::rank(set, &Bytes::copy_from_slice(&argv[2]), reverse) {
                Some(r) => Ok(RespValue::Integer(r as i64)),
                None => Ok(RespValue::nil()),
            }
        }
        Err(KvError::NotFound) => Ok(RespValue::nil()),
        Err(e) => Err(e),
    }
}

pub fn zrank(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    rank(ctx, conn, argv, false)
}

pub fn zrevrank(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    rank(ctx, conn, argv, true)
}

pub fn zcard(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    match ctx.keyspace.r_lock(&argv[1], &conn.cancel) {
        Ok(guard) => Ok(RespValue::Integer(guard.value.as_zset()?.len() as i64)),
        Err(KvError::NotFound) => Ok(RespValue::Integer(0)),
        Err(e) => Err(e),
    }
}

pub fn zincrby(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let delta = parse_score(&argv[2])?;
    let member = Bytes::copy_from_slice(&argv[3]);
    let mut guard = get_or_create_write(ctx, &argv[1], &conn.cancel, Value::new_sorted_set)?;
    let set = guard.value.as_zset_mut()?;
    let cfg = AddOrUpdateConfig { incr: true, ..Default::default() };
    match zset::add_or_update(set, &[(member, delta)], cfg)? {
        AddResult::NewScore(s) => Ok(RespValue::bulk(format_float(s))),
        AddResult::Count(_) => unreachable!("incr always yields NewScore"),
    }
}

fn pop(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>], policy: PopPolicy) -> KvResult<RespValue> {
    let count = match argv.get(2) {
        Some(c) => parse_i64(c)?,
        None => 1,
    };
    let key = argv[1].as_slice();
    let mut guard = match ctx.keyspace.lock(key, &conn.cancel) {
        Ok(g) => g,
        Err(KvError::NotFound) => return Ok(RespValue::array(Vec::new())),
        Err(e) => return Err(e),
    };
    let set = guard.value.as_zset_mut()?;
    let popped = zset::pop(set, count, policy)?;
    let empty = set.is_empty();
    drop(guard);
    if empty {
        ctx.keyspace.delete(key)?;
    }
    Ok(entries_to_resp(popped, true))
}

pub fn zpopmin(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    pop(ctx, conn, argv, PopPolicy::Min)
}

pub fn zpopmax(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    pop(ctx, conn, argv, PopPolicy::Max)
}

pub fn zrem(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let key = argv[1].as_slice();
    let mut guard = match ctx.keyspace.lock(key, &conn.cancel) {
        Ok(g) => g,
        Err(KvError::NotFound) => return Ok(RespValue::Integer(0)),
        Err(e) => return Err(e),
    };
    let members: Vec<Bytes> = argv[2..].iter().map(|m| Bytes::copy_from_slice(m)).collect();
    let set = guard.value.as_zset_mut()?;
    let removed = zset::remove(set, &members);
    let empty = set.is_empty();
    drop(guard);
    if empty {
        ctx.keyspace.delete(key)?;
    }
    Ok(RespValue::Integer(removed as i64))
}

/// Shared by `ZUNIONSTORE`/`ZINTERSTORE`: `dest numkeys key [key ...]
/// [WEIGHTS w ...] [AGGREGATE SUM|MIN|MAX]`. Missing source keys behave as
/// an empty sorted set rather than an error. `dest` and every source key
/// that currently exists are held via `Keyspace::lock_many` for the whole
/// combine, so a concurrent writer never observes a half-applied result.
fn store_combine(
    ctx: &ServerContext,
    conn: &mut ConnectionState,
    argv: &[Vec<u8>],
    combine: fn(Aggregate, &[(&ZSet, f64)]) -> ZSet,
) -> KvResult<RespValue> {
    let dest = argv[1].as_slice();
    let numkeys = parse_i64(&argv[2])?.max(0) as usize;
    if numkeys == 0 || argv.len() < 3 + numkeys {
        return Err(KvError::Syntax("wrong number of arguments".to_string()));
    }
    let keys = &argv[3..3 + numkeys];

    let mut weights = vec![1.0f64; numkeys];
    let mut aggregate = Aggregate::Sum;
    let mut i = 3 + numkeys;
    while i < argv.len() {
        match argv[i].to_ascii_uppercase().as_slice() {
            b"WEIGHTS" => {
                for (slot, w) in weights.iter_mut().enumerate() {
                    *w = parse_f64(argv.get(i + 1 + slot).ok_or_else(|| KvError::Syntax("syntax error".to_string()))?)?;
                }
                i += 1 + numkeys;
            }
            b"AGGREGATE" => {
                aggregate = match argv.get(i + 1).map(|a| a.to_ascii_uppercase()) {
                    Some(a) if a == b"SUM" => Aggregate::Sum,
                    Some(a) if a == b"MIN" => Aggregate::Min,
                    Some(a) if a == b"MAX" => Aggregate::Max,
                    _ => return Err(KvError::Syntax("syntax error".to_string())),
                };
                i += 2;
            }
            _ => return Err(KvError::Syntax("syntax error".to_string())),
        }
    }

    let mut guards = loop {
        if !ctx.keyspace.exists(dest) {
            drop(ctx.keyspace.create_and_lock(Bytes::copy_from_slice(dest), Value::new_sorted_set()));
        }
        let mut lock_keys: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).filter(|k| ctx.keyspace.exists(k)).collect();
        lock_keys.push(dest);
        match ctx.keyspace.lock_many(&lock_keys, &conn.cancel) {
            Ok(g) => break g,
            Err(KvError::NotFound) => continue,
            Err(e) => return Err(e),
        }
    };

    let owned_sets: Vec<ZSet> = keys
        .iter()
        .map(|key| match guards.iter().find(|(k, _)| k.as_slice() == key.as_slice()) {
            Some((_, g)) => g.value.as_zset().map(|z| z.clone()),
            None => Ok(ZSet::new()),
        })
        .collect::<KvResult<Vec<_>>>()?;
    let pairs: Vec<(&ZSet, f64)> = owned_sets.iter().zip(weights).collect();

    let result = combine(aggregate, &pairs);
    let len = result.len();

    let dest_pos = guards.iter().position(|(k, _)| k.as_slice() == dest).expect("dest held by lock_many");
    guards.remove(dest_pos).1.value = Value::SortedSet(result);

    Ok(RespValue::Integer(len as i64))
}

pub fn zunionstore(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    store_combine(ctx, conn, argv, zset::union)
}

pub fn zinterstore(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    store_combine(ctx, conn, argv, zset::intersect)
}
