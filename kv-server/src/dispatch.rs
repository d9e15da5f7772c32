//! # Command Registry and Dispatch Pipeline
//!
//! One `CommandSpec` per supported command, built once into a static table.
//! `dispatch` runs every request through the same nine stages: parse (done
//! by the connection loop before this is called), lookup, arity check, ACL
//! authorization, leader-forward check, handler execution, AOF append on a
//! successful write, snapshot-threshold check, and lock release (handled by
//! RAII guards dropping when the handler returns).
//!
//! `is_write` does double duty: it is both the ACL read/write key
//! classification and the "append to the AOF on success" flag. Commands
//! that read one key and write another (`LMOVE`, `SMOVE`) are classified as
//! pure writes for both keys — an approximation the ACL model doesn't need
//! finer than for this depth of implementation.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Instant;

use bytes::Bytes;
use kv_acl::{CommandDescriptor, User};
use kv_common::{CancelToken, KvError, KvResult, RespValue};
use tokio::sync::mpsc;

use crate::commands;
use crate::context::ServerContext;
use crate::pubsub::PushSender;

/// Which argv positions a command's key(s) live at.
#[derive(Debug, Clone, Copy)]
pub enum KeySpec {
    None,
    Single(usize),
    Two(usize, usize),
    AllFrom(usize),
    /// `MSET`-style `key value key value ...` starting at `start`.
    Every { start: usize, step: usize },
    /// `ZUNIONSTORE dest numkeys key [key ...]`: the destination is a write
    /// key, the `numkeys` sources (read starting right after the count) are
    /// read keys.
    StoreWithCount { dest: usize, numkeys: usize },
}

pub type CommandHandler = fn(&ServerContext, &mut ConnectionState, &[Vec<u8>]) -> KvResult<RespValue>;

pub struct CommandSpec {
    pub name: &'static str,
    pub min_args: usize,
    pub categories: &'static [kv_acl::Category],
    pub is_write: bool,
    pub key_spec: KeySpec,
    pub handler: CommandHandler,
}

/// Per-connection state the dispatcher and handlers read and mutate: the
/// authenticated user, this connection's pub/sub subscriptions, and a
/// cancellation token handlers pass into every keyspace lock acquisition so
/// a lock wait outstanding when the connection drops unwinds instead of
/// blocking forever.
pub struct ConnectionState {
    pub user: Option<User>,
    pub push_sender: PushSender,
    pub subscriptions: Vec<(Bytes, u64)>,
    pub psubscriptions: Vec<(Bytes, u64)>,
    pub cancel: CancelToken,
}

impl ConnectionState {
    pub fn new(push_sender: mpsc::Sender<RespValue>) -> Self {
        ConnectionState {
            user: None,
            push_sender,
            subscriptions: Vec::new(),
            psubscriptions: Vec::new(),
            cancel: CancelToken::new(),
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len() + self.psubscriptions.len()
    }
}

macro_rules! spec {
    ($name:expr, $min:expr, [$($cat:ident),*], $write:expr, $keys:expr, $handler:expr) => {
        CommandSpec {
            name: $name,
            min_args: $min,
            categories: &[$(kv_acl::Category::$cat),*],
            is_write: $write,
            key_spec: $keys,
            handler: $handler,
        }
    };
}

fn build_registry() -> HashMap<&'static str, CommandSpec> {
    use KeySpec::*;
    let specs = vec![
        // Generic
        spec!("PING", 1, [Fast, Connection], false, None, commands::generic::ping),
        spec!("ECHO", 2, [Fast, Connection], false, None, commands::generic::echo),
        spec!("DEL", 2, [Write, Slow], true, AllFrom(1), commands::generic::del),
        spec!("EXISTS", 2, [Read, Fast], false, AllFrom(1), commands::generic::exists),
        spec!("EXPIRE", 3, [Write, Fast], true, Single(1), commands::generic::expire),
        spec!("PEXPIRE", 3, [Write, Fast], true, Single(1), commands::generic::pexpire),
        spec!("EXPIREAT", 3, [Write, Fast], true, Single(1), commands::generic::expireat),
        spec!("TTL", 2, [Read, Fast], false, Single(1), commands::generic::ttl),
        spec!("PTTL", 2, [Read, Fast], false, Single(1), commands::generic::pttl),
        spec!("PERSIST", 2, [Write, Fast], true, Single(1), commands::generic::persist),
        spec!("TYPE", 2, [Read, Fast], false, Single(1), commands::generic::type_cmd),
        spec!("KEYS", 2, [Read, Slow, Dangerous], false, None, commands::generic::keys),
        // String
        spec!("SET", 3, [Write, Slow], true, Single(1), commands::string::set),
        spec!("GET", 2, [Read, Fast], false, Single(1), commands::string::get),
        spec!("GETSET", 3, [Write, Slow], true, Single(1), commands::string::getset),
        spec!("MSET", 3, [Write, Slow], true, Every { start: 1, step: 2 }, commands::string::mset),
        spec!("MGET", 2, [Read, Fast], false, AllFrom(1), commands::string::mget),
        spec!("INCR", 2, [Write, Fast], true, Single(1), commands::string::incr),
        spec!("DECR", 2, [Write, Fast], true, Single(1), commands::string::decr),
        spec!("INCRBY", 3, [Write, Fast], true, Single(1), commands::string::incrby),
        spec!("DECRBY", 3, [Write, Fast], true, Single(1), commands::string::decrby),
        spec!("APPEND", 3, [Write, Fast], true, Single(1), commands::string::append),
        spec!("STRLEN", 2, [Read, Fast], false, Single(1), commands::string::strlen),
        // Hash
        spec!("HSET", 4, [Write, Fast], true, Single(1), commands::hash::hset),
        spec!("HGET", 3, [Read, Fast], false, Single(1), commands::hash::hget),
        spec!("HDEL", 3, [Write, Fast], true, Single(1), commands::hash::hdel),
        spec!("HEXISTS", 3, [Read, Fast], false, Single(1), commands::hash::hexists),
        spec!("HGETALL", 2, [Read, Slow], false, Single(1), commands::hash::hgetall),
        spec!("HKEYS", 2, [Read, Slow], false, Single(1), commands::hash::hkeys),
        spec!("HVALS", 2, [Read, Slow], false, Single(1), commands::hash::hvals),
        spec!("HLEN", 2, [Read, Fast], false, Single(1), commands::hash::hlen),
        spec!("HINCRBY", 4, [Write, Fast], true, Single(1), commands::hash::hincrby),
        spec!("HINCRBYFLOAT", 4, [Write, Fast], true, Single(1), commands::hash::hincrbyfloat),
        spec!("HRANDFIELD", 2, [Read, Slow], false, Single(1), commands::hash::hrandfield),
        spec!("HSETNX", 4, [Write, Fast], true, Single(1), commands::hash::hsetnx),
        // List
        spec!("LPUSH", 3, [Write, Fast], true, Single(1), commands::list::lpush),
        spec!("RPUSH", 3, [Write, Fast], true, Single(1), commands::list::rpush),
        spec!("LPOP", 2, [Write, Fast], true, Single(1), commands::list::lpop),
        spec!("RPOP", 2, [Write, Fast], true, Single(1), commands::list::rpop),
        spec!("LRANGE", 4, [Read, Slow], false, Single(1), commands::list::lrange),
        spec!("LLEN", 2, [Read, Fast], false, Single(1), commands::list::llen),
        spec!("LINDEX", 3, [Read, Fast], false, Single(1), commands::list::lindex),
        spec!("LSET", 4, [Write, Fast], true, Single(1), commands::list::lset),
        spec!("LTRIM", 4, [Write, Slow], true, Single(1), commands::list::ltrim),
        spec!("LREM", 4, [Write, Slow], true, Single(1), commands::list::lrem),
        spec!("LMOVE", 5, [Write, Slow], true, Two(1, 2), commands::list::lmove),
        // Set
        spec!("SADD", 3, [Write, Fast], true, Single(1), commands::set::sadd),
        spec!("SREM", 3, [Write, Fast], true, Single(1), commands::set::srem),
        spec!("SMEMBERS", 2, [Read, Slow], false, Single(1), commands::set::smembers),
        spec!("SCARD", 2, [Read, Fast], false, Single(1), commands::set::scard),
        spec!("SISMEMBER", 3, [Read, Fast], false, Single(1), commands::set::sismember),
        spec!("SPOP", 2, [Write, Fast], true, Single(1), commands::set::spop),
        spec!("SRANDMEMBER", 2, [Read, Fast], false, Single(1), commands::set::srandmember),
        spec!("SUNION", 2, [Read, Slow], false, AllFrom(1), commands::set::sunion),
        spec!("SINTER", 2, [Read, Slow], false, AllFrom(1), commands::set::sinter),
        spec!("SDIFF", 2, [Read, Slow], false, AllFrom(1), commands::set::sdiff),
        spec!("SMOVE", 4, [Write, Fast], true, Two(1, 2), commands::set::smove),
        // Sorted set
        spec!("ZADD", 4, [Write, Fast], true, Single(1), commands::zset::zadd),
        spec!("ZSCORE", 3, [Read, Fast], false, Single(1), commands::zset::zscore),
        spec!("ZRANGE", 4, [Read, Slow], false, Single(1), commands::zset::zrange),
        spec!("ZRANGEBYSCORE", 4, [Read, Slow], false, Single(1), commands::zset::zrangebyscore),
        spec!("ZRANGEBYLEX", 4, [Read, Slow], false, Single(1), commands::zset::zrangebylex),
        spec!("ZRANK", 3, [Read, Fast], false, Single(1), commands::zset::zrank),
        spec!("ZREVRANK", 3, [Read, Fast], false, Single(1), commands::zset::zrevrank),
        spec!("ZCARD", 2, [Read, Fast], false, Single(1), commands::zset::zcard),
        spec!("ZINCRBY", 4, [Write, Fast], true, Single(1), commands::zset::zincrby),
        spec!("ZPOPMIN", 2, [Write, Fast], true, Single(1), commands::zset::zpopmin),
        spec!("ZPOPMAX", 2, [Write, Fast], true, Single(1), commands::zset::zpopmax),
        spec!("ZREM", 3, [Write, Fast], true, Single(1), commands::zset::zrem),
        spec!(
            "ZUNIONSTORE",
            4,
            [Write, Slow],
            true,
            StoreWithCount { dest: 1, numkeys: 2 },
            commands::zset::zunionstore
        ),
        spec!(
            "ZINTERSTORE",
            4,
            [Write, Slow],
            true,
            StoreWithCount { dest: 1, numkeys: 2 },
            commands::zset::zinterstore
        ),
        // Pub/Sub
        spec!("SUBSCRIBE", 2, [PubSub, Slow], false, None, commands::pubsub::subscribe),
        spec!("UNSUBSCRIBE", 1, [PubSub, Slow], false, None, commands::pubsub::unsubscribe),
        spec!("PUBLISH", 3, [PubSub, Fast], false, None, commands::pubsub::publish),
        spec!("PSUBSCRIBE", 2, [PubSub, Slow], false, None, commands::pubsub::psubscribe),
        spec!("PUNSUBSCRIBE", 1, [PubSub, Slow], false, None, commands::pubsub::punsubscribe),
        // Admin
        spec!("ACL", 2, [Dangerous, Slow], false, None, commands::admin::acl),
        spec!("COMMAND", 1, [Connection, Slow], false, None, commands::admin::command),
        spec!("SAVE", 1, [Dangerous, Slow], false, None, commands::admin::save),
        spec!("LASTSAVE", 1, [Read, Fast], false, None, commands::admin::lastsave),
        spec!("REWRITEAOF", 1, [Dangerous, Slow], false, None, commands::admin::rewriteaof),
        spec!("INFO", 1, [Slow], false, None, commands::admin::info),
    ];

    specs.into_iter().map(|s| (s.name, s)).collect()
}

fn registry() -> &'static HashMap<&'static str, CommandSpec> {
    static REGISTRY: OnceLock<HashMap<&'static str, CommandSpec>> = OnceLock::new();
    REGISTRY.get_or_init(build_registry)
}

/// Every registered command name, lowercase, for the `COMMAND` reply.
pub(crate) fn command_names() -> Vec<String> {
    let mut names: Vec<String> = registry().keys().map(|n| n.to_ascii_lowercase()).collect();
    names.sort();
    names
}

/// Splits a command's keys into read/write sets for ACL authorization only.
/// Handlers re-derive their own keys from `argv` and, where a single
/// operation needs more than one key's guard held at once, acquire them
/// through `Keyspace::lock_many` (which sorts internally) rather than
/// through whatever order this function returns them in.
fn extract_keys<'a>(spec: &CommandSpec, argv: &'a [Vec<u8>]) -> (Vec<&'a [u8]>, Vec<&'a [u8]>) {
    match spec.key_spec {
        KeySpec::None => (Vec::new(), Vec::new()),
        KeySpec::Single(i) => split_by_mode(spec.is_write, vec![argv[i].as_slice()]),
        KeySpec::Two(a, b) => split_by_mode(spec.is_write, vec![argv[a].as_slice(), argv[b].as_slice()]),
        KeySpec::AllFrom(start) => {
            split_by_mode(spec.is_write, argv[start..].iter().map(|v| v.as_slice()).collect())
        }
        KeySpec::Every { start, step } => {
            let keys = argv[start..].iter().step_by(step).map(|v| v.as_slice()).collect();
            split_by_mode(spec.is_write, keys)
        }
        KeySpec::StoreWithCount { dest, numkeys } => {
            let write = vec![argv[dest].as_slice()];
            let mut read = Vec::new();
            if let Some(n) = argv.get(numkeys).and_then(|b| std::str::from_utf8(b).ok()).and_then(|s| s.parse::<usize>().ok()) {
                for i in 0..n {
                    if let Some(key) = argv.get(numkeys + 1 + i) {
                        read.push(key.as_slice());
                    }
                }
            }
            (read, write)
        }
    }
}

fn split_by_mode<'a>(is_write: bool, keys: Vec<&'a [u8]>) -> (Vec<&'a [u8]>, Vec<&'a [u8]>) {
    if is_write {
        (Vec::new(), keys)
    } else {
        (keys, Vec::new())
    }
}

fn extract_channels<'a>(name: &str, argv: &'a [Vec<u8>]) -> Vec<&'a [u8]> {
    match name {
        "PUBLISH" => argv.get(1).map(|c| vec![c.as_slice()]).unwrap_or_default(),
        "SUBSCRIBE" | "UNSUBSCRIBE" | "PSUBSCRIBE" | "PUNSUBSCRIBE" => {
            argv[1..].iter().map(|c| c.as_slice()).collect()
        }
        _ => Vec::new(),
    }
}

/// Runs one parsed command through the full pipeline and returns the reply
/// to write back to the connection. Never panics: every error path becomes
/// a RESP error reply.
pub fn dispatch(ctx: &ServerContext, conn: &mut ConnectionState, argv: Vec<Vec<u8>>) -> RespValue {
    ctx.metrics.record_request_start();
    let started = Instant::now();
    let result = dispatch_inner(ctx, conn, &argv);
    ctx.metrics.record_request_end(started.elapsed());
    match result {
        Ok(reply) => reply,
        Err(err) => {
            ctx.metrics.record_error();
            RespValue::error(format!("{} {}", err.resp_prefix(), err.message()))
        }
    }
}

fn dispatch_inner(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    if argv.is_empty() {
        return Err(KvError::Syntax("empty command".to_string()));
    }
    let name = String::from_utf8_lossy(&argv[0]).to_ascii_uppercase();

    if name == "AUTH" {
        return commands::admin::auth(ctx, conn, argv);
    }

    let spec = registry().get(name.as_str()).ok_or_else(|| KvError::UnknownCommand(name.to_ascii_lowercase()))?;

    if argv.len() < spec.min_args {
        return Err(KvError::Syntax(format!("wrong number of arguments for '{}'", name.to_ascii_lowercase())));
    }

    let user = conn.user.clone().ok_or(KvError::NoAuth)?;

    let (read_keys, write_keys) = extract_keys(spec, argv);
    let channels = extract_channels(&name, argv);
    let desc = CommandDescriptor { name: spec.name, sub: None, categories: spec.categories };
    user.authorize(&desc, &read_keys, &write_keys, &channels)?;

    if spec.is_write && !ctx.cluster.is_leader() {
        let hint = ctx.cluster.leader_hint().unwrap_or_else(|| "unknown".to_string());
        return Err(KvError::Range(format!("MOVED this node is not the leader, try {hint}")));
    }

    let reply = (spec.handler)(ctx, conn, argv)?;

    if spec.is_write {
        if let Some(aof) = &ctx.aof {
            aof.append(argv)?;
        }
        ctx.snapshot.note_change();
        if ctx.snapshot.due(ctx.monotonic_secs()) {
            if let Err(err) = ctx.snapshot.save(&ctx.keyspace, ctx.unix_ms_now(), ctx.monotonic_secs()) {
                tracing::warn!(?err, "threshold-triggered snapshot failed");
            }
        }
    }

    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_contains_expected_commands() {
        let reg = registry();
        assert!(reg.contains_key("GET"));
        assert!(reg.contains_key("ZADD"));
        assert!(reg.contains_key("SUBSCRIBE"));
    }

    #[test]
    fn unknown_command_is_rejected_before_auth_check() {
        let reg = registry();
        assert!(!reg.contains_key("NOPE"));
    }
}
