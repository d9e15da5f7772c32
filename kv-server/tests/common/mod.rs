//! Shared harness for the black-box integration tests: spins up a real
//! `kv-server` listener on an ephemeral port and hands back a connected
//! `kv-client`, mirroring `kv-client/tests/client.rs`'s socket-level style
//! but against the genuine dispatcher instead of a hand-rolled stub.

use std::net::TcpListener as StdTcpListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use kv_acl::{AclStore, Category, User};
use kv_client::{ClientConfig, KVClient};
use kv_engine::{EvictionPolicy, Keyspace};
use kv_persist::{AofPaths, AofWriter, DurabilityMode, SnapshotScheduler};

use kv_server::cluster::SingleNode;
use kv_server::connection::handle_connection;
use kv_server::context::ServerContext;
use kv_server::dispatch::{self, ConnectionState};
use kv_server::metrics::Metrics;
use kv_server::pubsub::PubSub;

/// Unique per-call scratch directory, cleaned up by the caller. Tests in
/// the same binary run concurrently, so the pid alone isn't distinguishing
/// enough; a process-local counter makes every call collision-free.
pub fn tmp_dir(label: &str) -> PathBuf {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("kv-server-it-{label}-{}-{n}", std::process::id()))
}

fn permissive_default_user() -> User {
    let mut user = User::new("default");
    user.enabled = true;
    user.nopass = true;
    user.categories_include.extend([
        Category::Read,
        Category::Write,
        Category::Fast,
        Category::Slow,
        Category::Dangerous,
        Category::PubSub,
        Category::Connection,
    ]);
    user.key_patterns_read.push("*".to_string());
    user.key_patterns_write.push("*".to_string());
    user.channel_patterns_include.push("*".to_string());
    user
}

/// Starts a server backed by `data_dir` (AOF + snapshots enabled) and
/// returns a client connected to it, plus the address it's listening on
/// (for tests that need a second raw socket, e.g. pub/sub). The server
/// runs on a background thread for the lifetime of the test process;
/// there is no shutdown hook, matching how `kv-client/tests/client.rs`
/// leaks its listener threads too.
pub fn spawn_server_with_dir(data_dir: &Path) -> (KVClient, String) {
    std::fs::create_dir_all(data_dir).unwrap();

    let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    listener.set_nonblocking(true).expect("nonblocking");

    let acl = Arc::new(AclStore::new());
    acl.upsert(permissive_default_user());

    let keyspace = Arc::new(Keyspace::with_default_shards(None, EvictionPolicy::NoEviction));

    let aof_paths = AofPaths::new(data_dir);
    let aof_data_exists = aof_paths.preamble.exists() || aof_paths.log.exists();
    if !aof_data_exists {
        kv_persist::snapshot::load_latest(&keyspace, data_dir).unwrap();
    }
    {
        let replay_ctx = ServerContext {
            keyspace: keyspace.clone(),
            acl: acl.clone(),
            pubsub: Arc::new(PubSub::new()),
            aof: None,
            snapshot: Arc::new(SnapshotScheduler::new(data_dir, None, None)),
            cluster: Arc::new(SingleNode),
            metrics: Arc::new(Metrics::new()),
            start_instant: Instant::now(),
        };
        let mut conn = ConnectionState::new(tokio::sync::mpsc::channel(1).0);
        conn.user = acl.default_user();
        kv_persist::aof::restore(&keyspace, &aof_paths, |argv| {
            dispatch::dispatch(&replay_ctx, &mut conn, argv);
            Ok(())
        })
        .unwrap();
    }

    let aof = Arc::new(AofWriter::open(data_dir, DurabilityMode::Always).expect("aof open"));
    let snapshot = Arc::new(SnapshotScheduler::new(data_dir, None, None));

    let ctx = Arc::new(ServerContext {
        keyspace,
        acl,
        pubsub: Arc::new(PubSub::new()),
        aof: Some(aof),
        snapshot,
        cluster: Arc::new(SingleNode),
        metrics: Arc::new(Metrics::new()),
        start_instant: Instant::now(),
    });

    thread::spawn(move || {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).expect("tokio listener");
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => continue,
                };
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, ctx).await;
                });
            }
        });
    });

    let mut config = ClientConfig::default();
    config.addr = addr.to_string();
    (wait_for_accept(&config), addr.to_string())
}

/// Server over a throwaway directory, for tests that don't care about
/// persistence across restarts.
pub fn spawn_server() -> (KVClient, String) {
    let dir = tmp_dir("ephemeral");
    std::fs::remove_dir_all(&dir).ok();
    spawn_server_with_dir(&dir)
}

fn wait_for_accept(config: &ClientConfig) -> KVClient {
    for _ in 0..200 {
        if let Ok(client) = KVClient::with_config(config.clone()) {
            if client.ping(None).is_ok() {
                return client;
            }
        }
        thread::sleep(std::time::Duration::from_millis(10));
    }
    panic!("server never became ready at {}", config.addr);
}
