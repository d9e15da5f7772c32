//! # kv-server binary
//!
//! Parses configuration, restores durable state, starts the background
//! maintenance tasks, and runs the TCP accept loop. Exit codes: `0` clean
//! shutdown is never reached (the process runs until killed), `1` startup
//! configuration/IO failure, `2` failed to bind the listener.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use kv_acl::{AclStore, LoadMode, User};
use kv_engine::{run_ttl_sweep, Keyspace};
use kv_persist::{AofPaths, AofWriter, SnapshotScheduler};
use tokio::net::TcpListener;

use kv_server::cluster::SingleNode;
use kv_server::config::Config;
use kv_server::connection::handle_connection;
use kv_server::context::ServerContext;
use kv_server::dispatch::{self, ConnectionState};
use kv_server::metrics::Metrics;
use kv_server::pubsub::PubSub;

#[tokio::main]
async fn main() {
    let config = Config::parse();
    tracing_subscriber::fmt().with_env_filter(config.tracing_filter()).init();

    if let Err(err) = run(config).await {
        tracing::error!(%err, "kv-server exiting");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let keyspace = Arc::new(Keyspace::with_default_shards(config.max_memory, config.eviction_policy.into()));
    let acl = Arc::new(AclStore::new());

    if let Some(path) = &config.acl_file {
        acl.load(path, LoadMode::Merge)?;
    }
    if acl.default_user().is_none() {
        let mut default = User::new("default");
        default.enabled = true;
        default.nopass = true;
        default.categories_include.extend(all_categories());
        default.key_patterns_read.push("*".to_string());
        default.key_patterns_write.push("*".to_string());
        default.channel_patterns_include.push("*".to_string());
        acl.upsert(default);
    }

    let aof_paths = AofPaths::new(&config.data_dir);
    let aof_data_exists = aof_paths.preamble.exists() || aof_paths.log.exists();
    if !aof_data_exists {
        // No AOF data dir at all: fall back to the standalone snapshot
        // engine (`SAVE`'s `.snap` files) as the only available state.
        kv_persist::snapshot::load_latest(&keyspace, &config.data_dir)?;
    }
    // The AOF preamble + append log is the source of truth whenever it
    // exists, independent of whatever standalone snapshots are on disk:
    // writes accepted after the last `SAVE` are only durable in the AOF.
    // `restore` installs its own preamble first and is a no-op if both
    // files are empty, so this always runs.
    {
        // Replays through the real dispatcher, bypassed of AOF/snapshot side
        // effects: there is nothing left to persist and no socket to push to.
        let replay_ctx = ServerContext {
            keyspace: keyspace.clone(),
            acl: acl.clone(),
            pubsub: Arc::new(PubSub::new()),
            aof: None,
            snapshot: Arc::new(SnapshotScheduler::new(&config.data_dir, None, None)),
            cluster: Arc::new(SingleNode),
            metrics: Arc::new(Metrics::new()),
            start_instant: Instant::now(),
        };
        let mut conn = ConnectionState::new(tokio::sync::mpsc::channel(1).0);
        conn.user = acl.default_user();
        let (preamble, replayed) = kv_persist::aof::restore(&keyspace, &aof_paths, |argv| {
            let reply = dispatch::dispatch(&replay_ctx, &mut conn, argv);
            if let kv_common::RespValue::Error(msg) = reply {
                tracing::warn!(msg = %String::from_utf8_lossy(&msg), "aof replay command returned an error");
            }
            Ok(())
        })?;
        tracing::info!(preamble, replayed, "restored durable state");
    }

    let aof = Some(Arc::new(AofWriter::open(&config.data_dir, config.aof_fsync.into())?));
    let snapshot = Arc::new(SnapshotScheduler::new(&config.data_dir, config.snapshot_every_changes, config.snapshot_every_secs));

    let ctx = Arc::new(ServerContext {
        keyspace: keyspace.clone(),
        acl,
        pubsub: Arc::new(PubSub::new()),
        aof,
        snapshot,
        cluster: Arc::new(SingleNode),
        metrics: Arc::new(Metrics::new()),
        start_instant: Instant::now(),
    });

    tokio::spawn(run_ttl_sweep(keyspace.clone(), Duration::from_millis(200), 16));
    if let Some(aof) = ctx.aof.clone() {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                if let Err(err) = aof.flush_tick() {
                    tracing::warn!(?err, "aof flush tick failed");
                }
            }
        });
    }

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(err) => {
            tracing::error!(%err, %addr, "failed to bind listener");
            std::process::exit(2);
        }
    };
    tracing::info!(%addr, "kv-server listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, ctx).await {
                tracing::debug!(%peer, %err, "connection closed with error");
            }
        });
    }
}

fn all_categories() -> Vec<kv_acl::Category> {
    use kv_acl::Category::*;
    vec![Read, Write, Fast, Slow, Dangerous, PubSub, Connection]
}
