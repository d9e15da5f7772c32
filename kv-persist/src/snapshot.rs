//! # Snapshot Engine
//!
//! A point-in-time full serialization of the keyspace to one file, as a
//! sibling of the AOF preamble (same entry format) under
//! `<data_dir>/snapshot/<unix_ms>.snap`. Triggered on demand (`SAVE`), by a
//! change-count threshold, or by a time threshold; `LASTSAVE` reports the
//! unix-milliseconds of the last successful write.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use kv_engine::Keyspace;
use serde::{Deserialize, Serialize};

use crate::codec::{encode_key, PersistedEntry, PersistedValue};
use crate::error::PersistResult;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    #[serde(rename = "snapshotMs")]
    snapshot_ms: i64,
    state: Vec<PersistedEntry>,
}

/// Tracks when to trigger the next automatic snapshot and the timestamp of
/// the last successful one (`LASTSAVE`).
pub struct SnapshotScheduler {
    dir: PathBuf,
    every_changes: Option<u64>,
    every_secs: Option<u64>,
    changes_since_save: AtomicU64,
    last_save_unix_ms: AtomicI64,
    last_save_monotonic_secs: AtomicU64,
}

impl SnapshotScheduler {
    pub fn new(data_dir: impl AsRef<Path>, every_changes: Option<u64>, every_secs: Option<u64>) -> Self {
        SnapshotScheduler {
            dir: data_dir.as_ref().join("snapshot"),
            every_changes,
            every_secs,
            changes_since_save: AtomicU64::new(0),
            last_save_unix_ms: AtomicI64::new(0),
            last_save_monotonic_secs: AtomicU64::new(0),
        }
    }

    /// Called by the dispatcher after every sync write completes.
    pub fn note_change(&self) {
        self.changes_since_save.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether a threshold (change count or elapsed time) has been crossed
    /// since the last snapshot. `now_monotonic_secs` is supplied by the
    /// caller since this type avoids calling the system clock directly.
    pub fn due(&self, now_monotonic_secs: u64) -> bool {
        if let Some(limit) = self.every_changes {
            if self.changes_since_save.load(Ordering::Relaxed) >= limit {
                return true;
            }
        }
        if let Some(limit) = self.every_secs {
            let last = self.last_save_monotonic_secs.load(Ordering::Relaxed);
            if now_monotonic_secs.saturating_sub(last) >= limit {
                return true;
            }
        }
        false
    }

    pub fn last_save_unix_ms(&self) -> i64 {
        self.last_save_unix_ms.load(Ordering::Relaxed)
    }

    /// Writes a full snapshot file and resets the change counter and
    /// thresholds. `now_unix_ms`/`now_monotonic_secs` are supplied by the
    /// caller (the dispatcher already has both clocks for TTL handling).
    pub fn save(
        &self,
        keyspace: &Keyspace,
        now_unix_ms: i64,
        now_monotonic_secs: u64,
    ) -> PersistResult<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let entries: Vec<PersistedEntry> = keyspace
            .snapshot_entries()
            .into_iter()
            .map(|e| PersistedEntry {
                key: encode_key(&e.key),
                value: PersistedValue::from_value(&e.value),
                expire_at: e.expire_at_unix_ms,
            })
            .collect();
        let file = SnapshotFile { snapshot_ms: now_unix_ms, state: entries };
        let path = self.dir.join(format!("{now_unix_ms}.snap"));
        let bytes = serde_json::to_vec(&file)?;
        std::fs::write(&path, bytes)?;

        self.changes_since_save.store(0, Ordering::Relaxed);
        self.last_save_unix_ms.store(now_unix_ms, Ordering::Relaxed);
        self.last_save_monotonic_secs.store(now_monotonic_secs, Ordering::Relaxed);
        Ok(path)
    }
}

/// Loads the most recent snapshot file in `data_dir/snapshot`, installing
/// every non-expired key into `keyspace`. Returns `None` if no snapshot
/// file exists yet.
pub fn load_latest(keyspace: &Keyspace, data_dir: impl AsRef<Path>) -> PersistResult<Option<i64>> {
    let dir = data_dir.as_ref().join("snapshot");
    if !dir.exists() {
        return Ok(None);
    }
    let mut best: Option<(i64, PathBuf)> = None;
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
        let Ok(ms) = stem.parse::<i64>() else { continue };
        if best.as_ref().map(|(best_ms, _)| ms > *best_ms).unwrap_or(true) {
            best = Some((ms, path));
        }
    }
    let Some((ms, path)) = best else { return Ok(None) };

    let bytes = std::fs::read(&path)?;
    let file: SnapshotFile = serde_json::from_slice(&bytes)?;
    for entry in file.state {
        let Ok(key) = entry.key_bytes() else { continue };
        let Ok(value) = entry.value.clone().into_value() else { continue };
        keyspace.restore_entry(key, value, entry.expire_at);
    }
    Ok(Some(ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use kv_common::CancelToken;
    use kv_engine::{EvictionPolicy, Value};

    fn tmp_dir(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("kv-persist-snap-{label}-{}", std::process::id()))
    }

    #[test]
    fn change_count_threshold_triggers_due() {
        let dir = tmp_dir("due");
        let scheduler = SnapshotScheduler::new(&dir, Some(3), None);
        assert!(!scheduler.due(0));
        scheduler.note_change();
        scheduler.note_change();
        assert!(!scheduler.due(0));
        scheduler.note_change();
        assert!(scheduler.due(0));
    }

    #[test]
    fn save_then_load_latest_restores_keys_and_lastsave() {
        let dir = tmp_dir("roundtrip");
        std::fs::create_dir_all(&dir).unwrap();
        let scheduler = SnapshotScheduler::new(&dir, None, None);

        let ks = Keyspace::new(2, None, EvictionPolicy::NoEviction);
        ks.create_and_lock(Bytes::from("a"), Value::String(Bytes::from("1"))).unwrap();
        scheduler.save(&ks, 12345, 0).unwrap();
        assert_eq!(scheduler.last_save_unix_ms(), 12345);

        let restored = Keyspace::new(2, None, EvictionPolicy::NoEviction);
        let ms = load_latest(&restored, &dir).unwrap();
        assert_eq!(ms, Some(12345));
        let guard = restored.r_lock(b"a", &CancelToken::new()).unwrap();
        assert_eq!(guard.value.as_string().unwrap(), &Bytes::from("1"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn load_latest_with_no_snapshot_dir_returns_none() {
        let dir = tmp_dir("missing");
        let restored = Keyspace::new(2, None, EvictionPolicy::NoEviction);
        assert_eq!(load_latest(&restored, &dir).unwrap(), None);
    }
}
