//! # Server Configuration
//!
//! CLI-only configuration (`clap` derive), matching the pack's
//! configuration-first style: no separate config-file format, every knob
//! is a flag with a sane default.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use kv_engine::EvictionPolicy;
use kv_persist::DurabilityMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EvictionPolicyArg {
    AllkeysLru,
    AllkeysLfu,
    AllkeysRandom,
    VolatileLru,
    VolatileLfu,
    VolatileRandom,
    VolatileTtl,
    Noeviction,
}

impl From<EvictionPolicyArg> for EvictionPolicy {
    fn from(arg: EvictionPolicyArg) -> Self {
        match arg {
            EvictionPolicyArg::AllkeysLru => EvictionPolicy::AllKeysLru,
            EvictionPolicyArg::AllkeysLfu => EvictionPolicy::AllKeysLfu,
            EvictionPolicyArg::AllkeysRandom => EvictionPolicy::AllKeysRandom,
            EvictionPolicyArg::VolatileLru => EvictionPolicy::VolatileLru,
            EvictionPolicyArg::VolatileLfu => EvictionPolicy::VolatileLfu,
            EvictionPolicyArg::VolatileRandom => EvictionPolicy::VolatileRandom,
            EvictionPolicyArg::VolatileTtl => EvictionPolicy::VolatileTtl,
            EvictionPolicyArg::Noeviction => EvictionPolicy::NoEviction,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AofFsyncArg {
    Always,
    Everysec,
    No,
}

impl From<AofFsyncArg> for DurabilityMode {
    fn from(arg: AofFsyncArg) -> Self {
        match arg {
            AofFsyncArg::Always => DurabilityMode::Always,
            AofFsyncArg::Everysec => DurabilityMode::Everysec,
            AofFsyncArg::No => DurabilityMode::No,
        }
    }
}

/// RESP-compatible in-memory key/value server.
#[derive(Debug, Parser)]
#[command(name = "kv-server", version, about)]
pub struct Config {
    /// Address to bind the listener to.
    #[arg(long, default_value = "127.0.0.1")]
    pub bind: String,

    /// TCP port to listen on.
    #[arg(long, default_value_t = 6380)]
    pub port: u16,

    /// Directory holding the AOF and snapshot files.
    #[arg(long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// Optional ACL user-file (JSON or YAML) loaded at startup.
    #[arg(long)]
    pub acl_file: Option<PathBuf>,

    /// Eviction policy applied once `--max-memory` is exceeded.
    #[arg(long, value_enum, default_value_t = EvictionPolicyArg::Noeviction)]
    pub eviction_policy: EvictionPolicyArg,

    /// Memory ceiling in bytes, approximate; unset means unbounded.
    #[arg(long)]
    pub max_memory: Option<usize>,

    /// AOF fsync cadence.
    #[arg(long, value_enum, default_value_t = AofFsyncArg::Everysec)]
    pub aof_fsync: AofFsyncArg,

    /// Trigger an automatic snapshot after this many writes.
    #[arg(long)]
    pub snapshot_every_changes: Option<u64>,

    /// Trigger an automatic snapshot after this many seconds.
    #[arg(long)]
    pub snapshot_every_secs: Option<u64>,

    /// Increase log verbosity; repeatable (`-v`, `-vv`).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Config {
    pub fn tracing_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
