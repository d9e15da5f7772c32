//! # Admin Commands
//!
//! `AUTH`, the `ACL` family, `COMMAND`, the persistence triggers
//! (`SAVE`/`LASTSAVE`/`REWRITEAOF`), and `INFO`.

use kv_acl::{Category, Password, PasswordKind, User};
use kv_common::{KvError, KvResult, RespValue};

use crate::context::ServerContext;
use crate::dispatch::{self, ConnectionState};

pub fn auth(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    if argv.len() < 2 || argv.len() > 3 {
        return Err(KvError::Syntax("wrong number of arguments for 'auth' command".to_string()));
    }
    let (username, password) = if argv.len() == 3 {
        (String::from_utf8_lossy(&argv[1]).to_string(), String::from_utf8_lossy(&argv[2]).to_string())
    } else {
        ("default".to_string(), String::from_utf8_lossy(&argv[1]).to_string())
    };
    let user = ctx.acl.get(&username).ok_or(KvError::WrongPass)?;
    if !user.enabled || !user.check_password(&password) {
        return Err(KvError::WrongPass);
    }
    conn.user = Some(user);
    Ok(RespValue::simple("OK"))
}

fn category_name(cat: Category) -> &'static str {
    match cat {
        Category::Read => "read",
        Category::Write => "write",
        Category::Fast => "fast",
        Category::Slow => "slow",
        Category::Dangerous => "dangerous",
        Category::PubSub => "pubsub",
        Category::Connection => "connection",
    }
}

const ALL_CATEGORIES: [Category; 7] = [
    Category::Read,
    Category::Write,
    Category::Fast,
    Category::Slow,
    Category::Dangerous,
    Category::PubSub,
    Category::Connection,
];

fn parse_category(name: &[u8]) -> KvResult<Category> {
    let name = name.strip_prefix(b"@").unwrap_or(name);
    ALL_CATEGORIES
        .iter()
        .find(|c| category_name(**c).as_bytes().eq_ignore_ascii_case(name))
        .copied()
        .ok_or_else(|| KvError::Syntax(format!("unknown ACL category '{}'", String::from_utf8_lossy(name))))
}

/// Applies one `ACL SETUSER` rule token to `user`, in the vocabulary the
/// `User` record itself exposes (on/off, nopass, nokeys, `+`/`-@category`,
/// `+`/`-command`, `~pattern`/`%R~`/`%W~`, `&pattern`/`!pattern`, `>password`).
fn apply_rule(user: &mut User, rule: &[u8]) -> KvResult<()> {
    match rule {
        b"on" => user.enabled = true,
        b"off" => user.enabled = false,
        b"nopass" => {
            user.nopass = true;
            user.passwords.clear();
        }
        b"resetpass" => {
            user.nopass = false;
            user.passwords.clear();
        }
        b"nokeys" => user.nokeys = true,
        b"allkeys" => {
            user.nokeys = false;
            user.key_patterns_read = vec!["*".to_string()];
            user.key_patterns_write = vec!["*".to_string()];
        }
        b"resetkeys" => {
            user.key_patterns_read.clear();
            user.key_patterns_write.clear();
        }
        b"allchannels" => user.channel_patterns_include = vec!["*".to_string()],
        b"resetchannels" => {
            user.channel_patterns_include.clear();
            user.channel_patterns_exclude.clear();
        }
        b"allcommands" => {
            user.commands_exclude.clear();
            for cat in ALL_CATEGORIES {
                user.categories_include.insert(cat);
            }
        }
        b"nocommands" => {
            user.categories_include.clear();
            user.commands_include.clear();
        }
        _ if rule.first() == Some(&b'>') => {
            user.nopass = false;
            user.passwords.push(Password {
                kind: PasswordKind::Plain,
                value: String::from_utf8_lossy(&rule[1..]).to_string(),
            });
        }
        _ if rule.first() == Some(&b'+') && rule.get(1) == Some(&b'@') => {
            user.categories_include.insert(parse_category(&rule[1..])?);
        }
        _ if rule.first() == Some(&b'-') && rule.get(1) == Some(&b'@') => {
            user.categories_exclude.insert(parse_category(&rule[1..])?);
        }
        _ if rule.first() == Some(&b'+') => {
            user.commands_include.insert(String::from_utf8_lossy(&rule[1..]).to_ascii_lowercase());
        }
        _ if rule.first() == Some(&b'-') => {
            user.commands_exclude.insert(String::from_utf8_lossy(&rule[1..]).to_ascii_lowercase());
        }
        _ if rule.first() == Some(&b'~') => {
            let pattern = String::from_utf8_lossy(&rule[1..]).to_string();
            user.key_patterns_read.push(pattern.clone());
            user.key_patterns_write.push(pattern);
        }
        _ if rule.starts_with(b"%R~") => user.key_patterns_read.push(String::from_utf8_lossy(&rule[3..]).to_string()),
        _ if rule.starts_with(b"%W~") => user.key_patterns_write.push(String::from_utf8_lossy(&rule[3..]).to_string()),
        _ if rule.first() == Some(&b'&') => {
            user.channel_patterns_include.push(String::from_utf8_lossy(&rule[1..]).to_string());
        }
        _ if rule.first() == Some(&b'!') => {
            user.channel_patterns_exclude.push(String::from_utf8_lossy(&rule[1..]).to_string());
        }
        other => {
            return Err(KvError::Syntax(format!("unknown ACL rule '{}'", String::from_utf8_lossy(other))));
        }
    }
    Ok(())
}

pub fn acl(ctx: &ServerContext, conn: &mut ConnectionState, argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let sub = argv[1].to_ascii_uppercase();
    match sub.as_slice() {
        b"WHOAMI" => {
            let name = conn.user.as_ref().map(|u| u.username.clone()).unwrap_or_default();
            Ok(RespValue::bulk(name))
        }
        b"LIST" => Ok(RespValue::array(ctx.acl.usernames().into_iter().map(RespValue::bulk).collect())),
        b"CAT" => Ok(RespValue::array(ALL_CATEGORIES.iter().map(|c| RespValue::bulk(category_name(*c))).collect())),
        b"GETUSER" => {
            let Some(username) = argv.get(2) else {
                return Err(KvError::Syntax("wrong number of arguments for 'acl|getuser' command".to_string()));
            };
            match ctx.acl.get(&String::from_utf8_lossy(username)) {
                Some(user) => Ok(RespValue::array(vec![
                    RespValue::bulk("flags"),
                    RespValue::array(
                        [user.enabled.then_some("on"), (!user.enabled).then_some("off"), user.nopass.then_some("nopass")]
                            .into_iter()
                            .flatten()
                            .map(RespValue::bulk)
                            .collect(),
                    ),
                    RespValue::bulk("commands"),
                    RespValue::bulk(format!(
                        "+@{} -{}",
                        user.categories_include.iter().map(|c| category_name(*c)).collect::<Vec<_>>().join(" +@"),
                        user.commands_exclude.iter().cloned().collect::<Vec<_>>().join(" -")
                    )),
                    RespValue::bulk("keys"),
                    RespValue::bulk(user.key_patterns_read.join(" ")),
                    RespValue::bulk("channels"),
                    RespValue::bulk(user.channel_patterns_include.join(" ")),
                ])),
                None => Ok(RespValue::nil()),
            }
        }
        b"DELUSER" => {
            let mut removed = 0i64;
            for name in &argv[2..] {
                if ctx.acl.remove(&String::from_utf8_lossy(name)).is_ok() {
                    removed += 1;
                }
            }
            Ok(RespValue::Integer(removed))
        }
        b"SETUSER" => {
            let Some(username) = argv.get(2) else {
                return Err(KvError::Syntax("wrong number of arguments for 'acl|setuser' command".to_string()));
            };
            let username = String::from_utf8_lossy(username).to_string();
            let mut user = ctx.acl.get(&username).unwrap_or_else(|| User::new(&username));
            for rule in &argv[3..] {
                apply_rule(&mut user, rule)?;
            }
            ctx.acl.upsert(user);
            Ok(RespValue::simple("OK"))
        }
        _ => Err(KvError::Syntax(format!("unknown ACL subcommand '{}'", String::from_utf8_lossy(&argv[1])))),
    }
}

pub fn command(_ctx: &ServerContext, _conn: &mut ConnectionState, _argv: &[Vec<u8>]) -> KvResult<RespValue> {
    Ok(RespValue::array(dispatch::command_names().into_iter().map(RespValue::bulk).collect()))
}

pub fn save(ctx: &ServerContext, _conn: &mut ConnectionState, _argv: &[Vec<u8>]) -> KvResult<RespValue> {
    ctx.snapshot.save(&ctx.keyspace, ctx.unix_ms_now(), ctx.monotonic_secs())?;
    Ok(RespValue::simple("OK"))
}

pub fn lastsave(ctx: &ServerContext, _conn: &mut ConnectionState, _argv: &[Vec<u8>]) -> KvResult<RespValue> {
    Ok(RespValue::Integer(ctx.snapshot.last_save_unix_ms()))
}

pub fn rewriteaof(ctx: &ServerContext, _conn: &mut ConnectionState, _argv: &[Vec<u8>]) -> KvResult<RespValue> {
    match &ctx.aof {
        Some(aof) => {
            kv_persist::aof::rewrite(&ctx.keyspace, aof)?;
            Ok(RespValue::simple("OK"))
        }
        None => Err(KvError::Range("AOF is not enabled".to_string())),
    }
}

pub fn info(ctx: &ServerContext, _conn: &mut ConnectionState, _argv: &[Vec<u8>]) -> KvResult<RespValue> {
    let snap = ctx.metrics.snapshot();
    let report = format!(
        "# Server\r\nuptime_in_seconds:{}\r\nrole:{}\r\n\
         # Keyspace\r\ndb0:keys={},used_bytes={}\r\n\
         # Stats\r\ntotal_commands_processed:{}\r\ntotal_errors:{}\r\ninstantaneous_inflight:{}\r\n\
         # Persistence\r\nlast_save_unix_ms:{}\r\n",
        ctx.monotonic_secs(),
        if ctx.cluster.is_leader() { "leader" } else { "follower" },
        ctx.keyspace.all_keys().len(),
        ctx.keyspace.used_bytes(),
        snap.requests_total,
        snap.errors_total,
        snap.inflight,
        ctx.snapshot.last_save_unix_ms(),
    );
    Ok(RespValue::bulk(report))
}
