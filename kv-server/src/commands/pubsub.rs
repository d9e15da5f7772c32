//! # Pub/Sub Commands
//!
//! `SUBSCRIBE`/`PSUBSCRIBE` (and their `UN-` counterparts) confirm one
//! channel at a time: every confirmation but the last is pushed directly
//! over the connection's push channel, and the last becomes this handler's
//! return value so the ordinary reply path writes it.

use bytes::Bytes;
use kv_common::{KvResult, RespValue};

use crate::context::ServerContext;
use crate::dispatch::ConnectionState;

fn confirmation(kind: &'static str, topic: RespValue, count: usize) -> RespValue {
    RespValue::array(vec![RespValue::bulk(kind), topic, RespValue::Integer(count as i64)])
}

pub fn subscribe(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let channels = &argv[1..];
    let mut last = None;
    for (i, raw) in channels.iter().enumerate() {
        let channel = Bytes::copy_from_slice(raw);
        let id = ctx.pubsub.subscribe_channel(channel.clone(), conn.push_sender.clone());
        conn.subscriptions.push((channel.clone(), id));
        let reply = confirmation("subscribe", RespValue::bulk(channel), conn.subscription_count());
        if i + 1 == channels.len() {
            last = Some(reply);
        } else {
            let _ = conn.push_sender.try_send(reply);
        }
    }
    Ok(last.expect("arity check guarantees at least one channel"))
}

pub fn unsubscribe(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let requested: Vec<Bytes> = if argv.len() > 1 {
        argv[1..].iter().map(|c| Bytes::copy_from_slice(c)).collect()
    } else {
        conn.subscriptions.iter().map(|(c, _)| c.clone()).collect()
    };
    if requested.is_empty() {
        return Ok(confirmation("unsubscribe", RespValue::nil(), conn.subscription_count()));
    }
    let mut last = None;
    let total = requested.len();
    for (i, channel) in requested.into_iter().enumerate() {
        if let Some(pos) = conn.subscriptions.iter().position(|(c, _)| *c == channel) {
            let (_, id) = conn.subscriptions.remove(pos);
            ctx.pubsub.unsubscribe_channel(&channel, id);
        }
        let reply = confirmation("unsubscribe", RespValue::bulk(channel), conn.subscription_count());
        if i + 1 == total {
            last = Some(reply);
        } else {
            let _ = conn.push_sender.try_send(reply);
        }
    }
    Ok(last.expect("checked non-empty above"))
}

pub fn publish(ctx: &ServerContext, _conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let payload = Bytes::copy_from_slice(&argv[2]);
    let delivered = ctx.pubsub.publish(&argv[1], &payload);
    Ok(RespValue::Integer(delivered as i64))
}

pub fn psubscribe(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let patterns = &argv[1..];
    let mut last = None;
    for (i, raw) in patterns.iter().enumerate() {
        let pattern = Bytes::copy_from_slice(raw);
        let id = ctx.pubsub.subscribe_pattern(pattern.clone(), conn.push_sender.clone());
        conn.psubscriptions.push((pattern.clone(), id));
        let reply = confirmation("psubscribe", RespValue::bulk(pattern), conn.subscription_count());
        if i + 1 == patterns.len() {
            last = Some(reply);
        } else {
            let _ = conn.push_sender.try_send(reply);
        }
    }
    Ok(last.expect("arity check guarantees at least one pattern"))
}

pub fn punsubscribe(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let requested: Vec<Bytes> = if argv.len() > 1 {
        argv[1..].iter().map(|c| Bytes::copy_from_slice(c)).collect()
    } else {
        conn.psubscriptions.iter().map(|(c, _)| c.clone()).collect()
    };
    if requested.is_empty() {
        return Ok(confirmation("punsubscribe", RespValue::nil(), conn.subscription_count()));
    }
    let mut last = None;
    let total = requested.len();
    for (i, pattern) in requested.into_iter().enumerate() {
        if let Some(pos) = conn.psubscriptions.iter().position(|(c, _)| *c == pattern) {
            let (_, id) = conn.psubscriptions.remove(pos);
            ctx.pubsub.unsubscribe_pattern(&pattern, id);
        }
        let reply = confirmation("punsubscribe", RespValue::bulk(pattern), conn.subscription_count());
        if i + 1 == total {
            last = Some(reply);
        } else {
            let _ = conn.push_sender.try_send(reply);
        }
    }
    Ok(last.expect("checked non-empty above"))
}
