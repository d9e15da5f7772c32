//! # User Records and Authorization
//!
//! One `User` per ACL entry; `authorize` implements the single rule the
//! command dispatcher calls before running any handler.

use kv_common::glob::glob_match;
use kv_common::{KvError, KvResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Coarse permission group a command belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Read,
    Write,
    Fast,
    Slow,
    Dangerous,
    PubSub,
    Connection,
}

/// Which side of a key access a pattern governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PasswordKind {
    Plain,
    Sha256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Password {
    #[serde(rename = "type")]
    pub kind: PasswordKind,
    pub value: String,
}

impl Password {
    pub fn matches(&self, candidate: &str) -> bool {
        match self.kind {
            PasswordKind::Plain => self.value == candidate,
            PasswordKind::Sha256 => {
                let digest = Sha256::digest(candidate.as_bytes());
                let hex = hex_encode(&digest);
                self.value.eq_ignore_ascii_case(&hex)
            }
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// A command being authorized. The dispatcher supplies the category list
/// from its own registry; this crate holds no knowledge of command names.
pub struct CommandDescriptor<'a> {
    pub name: &'a str,
    pub sub: Option<&'a str>,
    pub categories: &'a [Category],
}

impl<'a> CommandDescriptor<'a> {
    fn full_name(&self) -> String {
        let name = self.name.to_ascii_lowercase();
        match self.sub {
            Some(sub) => format!("{name}|{}", sub.to_ascii_lowercase()),
            None => name,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub nopass: bool,
    #[serde(default)]
    pub nokeys: bool,
    #[serde(default)]
    pub passwords: Vec<Password>,
    #[serde(default)]
    pub categories_include: BTreeSet<Category>,
    #[serde(default)]
    pub categories_exclude: BTreeSet<Category>,
    #[serde(default)]
    pub commands_include: BTreeSet<String>,
    #[serde(default)]
    pub commands_exclude: BTreeSet<String>,
    #[serde(default)]
    pub key_patterns_read: Vec<String>,
    #[serde(default)]
    pub key_patterns_write: Vec<String>,
    #[serde(default)]
    pub channel_patterns_include: Vec<String>,
    #[serde(default)]
    pub channel_patterns_exclude: Vec<String>,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        User { username: username.into(), ..Default::default() }
    }

    /// Deduplicates and sorts every pattern/command list so load and save
    /// are stable regardless of the order the source file listed them in.
    pub fn normalize(&mut self) {
        self.key_patterns_read.sort();
        self.key_patterns_read.dedup();
        self.key_patterns_write.sort();
        self.key_patterns_write.dedup();
        self.channel_patterns_include.sort();
        self.channel_patterns_include.dedup();
        self.channel_patterns_exclude.sort();
        self.channel_patterns_exclude.dedup();
    }

    pub fn check_password(&self, candidate: &str) -> bool {
        if self.nopass {
            return true;
        }
        self.passwords.iter().any(|p| p.matches(candidate))
    }

    fn command_allowed(&self, desc: &CommandDescriptor<'_>) -> bool {
        let full = desc.full_name();
        let bare = desc.name.to_ascii_lowercase();

        let excluded = desc.categories.iter().any(|c| self.categories_exclude.contains(c))
            || self.commands_exclude.contains(&full)
            || self.commands_exclude.contains(&bare);
        if excluded {
            return false;
        }

        let category_ok = desc.categories.iter().any(|c| self.categories_include.contains(c));
        let command_ok = self.commands_include.contains(&full) || self.commands_include.contains(&bare);
        category_ok || command_ok
    }

    fn key_allowed(&self, key: &[u8], mode: AccessMode) -> bool {
        if self.nokeys {
            return false;
        }
        let patterns = match mode {
            AccessMode::Read => &self.key_patterns_read,
            AccessMode::Write => &self.key_patterns_write,
        };
        patterns.iter().any(|p| glob_match(p.as_bytes(), key))
    }

    fn channel_allowed(&self, channel: &[u8]) -> bool {
        let included = self.channel_patterns_include.iter().any(|p| glob_match(p.as_bytes(), channel));
        let excluded = self.channel_patterns_exclude.iter().any(|p| glob_match(p.as_bytes(), channel));
        included && !excluded
    }

    /// The single authorization rule: disabled users are denied outright,
    /// then command, key, and channel access are each checked in turn.
    pub fn authorize(
        &self,
        desc: &CommandDescriptor<'_>,
        read_keys: &[&[u8]],
        write_keys: &[&[u8]],
        channels: &[&[u8]],
    ) -> KvResult<()> {
        if !self.enabled {
            return Err(KvError::NoPerm(format!("user {} is disabled", self.username)));
        }
        if !self.command_allowed(desc) {
            return Err(KvError::NoPerm(format!(
                "this user has no permissions to run the '{}' command",
                desc.name
            )));
        }
        for key in read_keys {
            if !self.key_allowed(key, AccessMode::Read) {
                return Err(KvError::NoPerm(
                    "no permissions to access a key used as a read argument".to_string(),
                ));
            }
        }
        for key in write_keys {
            if !self.key_allowed(key, AccessMode::Write) {
                return Err(KvError::NoPerm(
                    "no permissions to access a key used as a write argument".to_string(),
                ));
            }
        }
        for channel in channels {
            if !self.channel_allowed(channel) {
                return Err(KvError::NoPerm(
                    "no permissions to access a channel used as an argument".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc<'a>(name: &'a str, categories: &'a [Category]) -> CommandDescriptor<'a> {
        CommandDescriptor { name, sub: None, categories }
    }

    #[test]
    fn disabled_user_is_always_denied() {
        let user = User { enabled: false, ..User::new("u") };
        let d = desc("get", &[Category::Read]);
        assert!(user.authorize(&d, &[], &[], &[]).is_err());
    }

    #[test]
    fn category_include_grants_command() {
        let mut user = User::new("u");
        user.enabled = true;
        user.categories_include.insert(Category::Read);
        let d = desc("get", &[Category::Read]);
        assert!(user.authorize(&d, &[], &[], &[]).is_ok());
    }

    #[test]
    fn explicit_exclude_wins_over_category_include() {
        let mut user = User::new("u");
        user.enabled = true;
        user.categories_include.insert(Category::Read);
        user.commands_exclude.insert("get".to_string());
        let d = desc("get", &[Category::Read]);
        assert!(user.authorize(&d, &[], &[], &[]).is_err());
    }

    #[test]
    fn key_pattern_must_match_for_read_access() {
        let mut user = User::new("u");
        user.enabled = true;
        user.categories_include.insert(Category::Read);
        user.key_patterns_read.push("user:*".to_string());
        let d = desc("get", &[Category::Read]);
        assert!(user.authorize(&d, &[b"user:1"], &[], &[]).is_ok());
        assert!(user.authorize(&d, &[b"other:1"], &[], &[]).is_err());
    }

    #[test]
    fn nokeys_denies_any_key_touching_command() {
        let mut user = User::new("u");
        user.enabled = true;
        user.nokeys = true;
        user.categories_include.insert(Category::Read);
        user.key_patterns_read.push("*".to_string());
        let d = desc("get", &[Category::Read]);
        assert!(user.authorize(&d, &[b"anything"], &[], &[]).is_err());
    }

    #[test]
    fn channel_pattern_exclude_wins_over_include() {
        let mut user = User::new("u");
        user.enabled = true;
        user.categories_include.insert(Category::PubSub);
        user.channel_patterns_include.push("*".to_string());
        user.channel_patterns_exclude.push("admin:*".to_string());
        let d = desc("publish", &[Category::PubSub]);
        assert!(user.authorize(&d, &[], &[], &[b"news"]).is_ok());
        assert!(user.authorize(&d, &[], &[], &[b"admin:ops"]).is_err());
    }

    #[test]
    fn plain_password_matches_exact_string() {
        let pw = Password { kind: PasswordKind::Plain, value: "hunter2".to_string() };
        assert!(pw.matches("hunter2"));
        assert!(!pw.matches("wrong"));
    }

    #[test]
    fn sha256_password_matches_digest_hex() {
        let digest = Sha256::digest(b"hunter2");
        let hex = hex_encode(&digest);
        let pw = Password { kind: PasswordKind::Sha256, value: hex };
        assert!(pw.matches("hunter2"));
        assert!(!pw.matches("wrong"));
    }
}
