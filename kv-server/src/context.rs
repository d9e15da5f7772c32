//! # Server Context
//!
//! Everything a command handler needs, bundled behind `Arc` so every
//! connection task can share it without a central lock wider than the
//! keyspace's own per-key ones.

use std::sync::Arc;
use std::time::Instant;

use kv_acl::AclStore;
use kv_engine::Keyspace;
use kv_persist::{AofWriter, SnapshotScheduler};

use crate::cluster::ClusterRole;
use crate::metrics::Metrics;
use crate::pubsub::PubSub;

pub struct ServerContext {
    pub keyspace: Arc<Keyspace>,
    pub acl: Arc<AclStore>,
    pub pubsub: Arc<PubSub>,
    pub aof: Option<Arc<AofWriter>>,
    pub snapshot: Arc<SnapshotScheduler>,
    pub cluster: Arc<dyn ClusterRole>,
    pub metrics: Arc<Metrics>,
    pub start_instant: Instant,
}

impl ServerContext {
    /// Seconds elapsed since the server started, for the snapshot
    /// scheduler's time-threshold clock.
    pub fn monotonic_secs(&self) -> u64 {
        self.start_instant.elapsed().as_secs()
    }

    /// Current wall-clock time in unix milliseconds, derived from the
    /// keyspace's own epoch conversion so every clock in the process agrees.
    pub fn unix_ms_now(&self) -> i64 {
        self.keyspace.instant_to_unix_ms(Instant::now())
    }
}
