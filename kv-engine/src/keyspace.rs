//! # Keyspace
//!
//! The concurrency-safe map of key → typed value that every command handler
//! and the persistence subsystem go through. Generalizes the donor's
//! `memory::MemoryEngine` (sharded `RwLock<ShardInner>`, index-free lookup)
//! from raw byte buffers to the tagged [`crate::value::Value`], and moves
//! the per-key lock from an implicit map entry into an explicit RAII guard
//! stored alongside the value, per spec.
//!
//! ## Design Principles
//! 1. **Shard lock outlives nothing; entry lock outlives the shard lock**:
//!    `lock`/`r_lock` copy the entry's `Arc` out of the shard map under a
//!    brief shard-lock hold, then acquire the per-key lock after releasing it.
//! 2. **RAII guards**: lock acquisition returns an owned guard (`arc_lock`)
//!    whose `Drop` releases — no explicit unlock call to forget.
//! 3. **Canonical key ordering lives in `lock_many`**: multi-key commands
//!    that need more than one guard held at once call `lock_many`, which
//!    sorts and dedups the key list itself so two commands racing over an
//!    overlapping key set always acquire in the same order.
//! 4. **Cancellation is cooperative, not preemptive**: `lock`/`r_lock` poll
//!    the caller's `CancelToken` every `CANCEL_POLL_INTERVAL` while waiting
//!    on a contended key; a connection that drops mid-wait stops blocking
//!    without mutating anything.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use ahash::RandomState;
use bytes::Bytes;
use hashbrown::HashMap;
use kv_common::{CancelToken, KvError, KvResult};
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};
use rand::seq::SliceRandom;

use crate::eviction::{self, EvictionCandidate, EvictionPolicy};
use crate::value::Value;

pub type KeyWriteGuard = ArcRwLockWriteGuard<RawRwLock, KeyEntry>;
pub type KeyReadGuard = ArcRwLockReadGuard<RawRwLock, KeyEntry>;

/// One keyspace slot: the typed value, its expiry, and the access stamps
/// eviction policies rank by. The entry's own lock (held one level up, via
/// `Arc<RwLock<KeyEntry>>`) is the per-key RWMutex the spec requires.
#[derive(Debug)]
pub struct KeyEntry {
    pub value: Value,
    pub expire_at: Option<Instant>,
    pub created_at: Instant,
    last_access_nanos: AtomicU64,
    access_count: AtomicU32,
}

impl KeyEntry {
    fn new(value: Value, epoch: Instant) -> Self {
        let now_nanos = epoch.elapsed().as_nanos() as u64;
        KeyEntry {
            value,
            expire_at: None,
            created_at: Instant::now(),
            last_access_nanos: AtomicU64::new(now_nanos),
            access_count: AtomicU32::new(0),
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expire_at, Some(deadline) if deadline <= now)
    }

    /// Bumps LRU/LFU stamps. Callers may hold only a shared lock, hence the
    /// atomics instead of requiring `&mut self`.
    pub fn touch(&self, epoch: Instant) {
        self.last_access_nanos.store(epoch.elapsed().as_nanos() as u64, Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_access_nanos(&self) -> u64 {
        self.last_access_nanos.load(Ordering::Relaxed)
    }

    pub fn access_count(&self) -> u32 {
        self.access_count.load(Ordering::Relaxed)
    }
}

/// NX/XX/GT/LT as used by `EXPIRE`/`PEXPIRE`/`EXPIREAT`. The keyspace's
/// `set_expiry` just writes; the command handler decides the policy and
/// calls this to check it first (kept here since it is pure TTL logic, not
/// wire-format handling).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryPolicy {
    Always,
    Nx,
    Xx,
    Gt,
    Lt,
}

pub fn expiry_policy_allows(existing: Option<Instant>, candidate: Instant, policy: ExpiryPolicy) -> bool {
    match policy {
        ExpiryPolicy::Always => true,
        ExpiryPolicy::Nx => existing.is_none(),
        ExpiryPolicy::Xx => existing.is_some(),
        ExpiryPolicy::Gt => existing.map(|e| candidate > e).unwrap_or(false),
        ExpiryPolicy::Lt => existing.map(|e| candidate < e).unwrap_or(true),
    }
}

type EntryMap = HashMap<Bytes, Arc<RwLock<KeyEntry>>, RandomState>;

struct Shard {
    entries: RwLock<EntryMap>,
}

const DEFAULT_SHARD_MULTIPLIER: usize = 4;
const EVICTION_SAMPLE_SIZE: usize = 5;
/// How often a blocked `lock`/`r_lock` wait wakes to recheck its
/// `CancelToken` instead of parking until the contending lock is free.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// The sharded, per-key-locked store. One instance per server process.
pub struct Keyspace {
    shards: Vec<Shard>,
    shard_mask: usize,
    hash_state: RandomState,
    epoch: Instant,
    wall_epoch: SystemTime,
    max_memory: Option<usize>,
    used_bytes: AtomicUsize,
    eviction_policy: EvictionPolicy,
}

/// One key as captured by [`Keyspace::snapshot_entries`]: its current
/// value and its expiry, if any, in unix milliseconds (preamble/snapshot
/// files are wall-clock, the keyspace itself is monotonic-clock).
pub struct SnapshotEntry {
    pub key: Bytes,
    pub value: Value,
    pub expire_at_unix_ms: Option<i64>,
}

fn normalize_shard_count(count: usize) -> usize {
    count.max(1).next_power_of_two()
}

fn approx_size(key: &[u8], value: &Value) -> usize {
    let payload = match value {
        Value::String(b) => b.len(),
        Value::List(l) => l.iter().map(|b| b.len()).sum(),
        Value::Hash(h) => h.iter().map(|(f, v)| f.len() + v.len()).sum(),
        Value::Set(s) => s.iter().map(|m| m.len()).sum(),
        Value::SortedSet(_) => 0, // scores dominate; approximate via member count elsewhere
    };
    key.len() + payload
}

impl Keyspace {
    pub fn new(shard_count: usize, max_memory: Option<usize>, eviction_policy: EvictionPolicy) -> Self {
        let shard_count = normalize_shard_count(shard_count);
        let hash_state = RandomState::new();
        let shards = (0..shard_count)
            .map(|_| Shard { entries: RwLock::new(HashMap::with_hasher(hash_state.clone())) })
            .collect();

        Keyspace {
            shards,
            shard_mask: shard_count - 1,
            hash_state,
            epoch: Instant::now(),
            wall_epoch: SystemTime::now(),
            max_memory,
            used_bytes: AtomicUsize::new(0),
            eviction_policy,
        }
    }

    /// Converts a monotonic expiry instant to a unix-millisecond timestamp
    /// suitable for the preamble/snapshot file formats.
    pub fn instant_to_unix_ms(&self, instant: Instant) -> i64 {
        let offset = instant.saturating_duration_since(self.epoch);
        let wall = self.wall_epoch + offset;
        wall.duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
    }

    /// Converts a unix-millisecond timestamp read from disk back into the
    /// keyspace's monotonic clock, for reinstalling TTLs on restore.
    pub fn unix_ms_to_instant(&self, unix_ms: i64) -> Instant {
        let target_wall = UNIX_EPOCH + Duration::from_millis(unix_ms.max(0) as u64);
        match target_wall.duration_since(self.wall_epoch) {
            Ok(delta) => self.epoch + delta,
            Err(_) => self.epoch,
        }
    }

    /// Returns every live (non-expired) key's current value, for the
    /// snapshotter and AOF rewrite. Takes only a shared lock per key it can
    /// acquire without blocking; a key held exclusively by another writer
    /// is skipped (eventually consistent with the last completed instant).
    pub fn snapshot_entries(&self) -> Vec<SnapshotEntry> {
        let now = Instant::now();
        let mut out = Vec::new();
        for shard in &self.shards {
            let entries = shard.entries.read();
            for (key, arc) in entries.iter() {
                if let Some(entry) = arc.try_read() {
                    if entry.is_expired(now) {
                        continue;
                    }
                    out.push(SnapshotEntry {
                        key: key.clone(),
                        value: entry.value.clone(),
                        expire_at_unix_ms: entry.expire_at.map(|t| self.instant_to_unix_ms(t)),
                    });
                }
            }
        }
        out
    }

    /// Installs a key loaded from the preamble or a replayed AOF command,
    /// overwriting any existing entry. Used only on restore, before the
    /// server accepts connections.
    pub fn restore_entry(&self, key: Bytes, value: Value, expire_at_unix_ms: Option<i64>) {
        let expire_at = expire_at_unix_ms.map(|ms| self.unix_ms_to_instant(ms));
        let size = approx_size(&key, &value);
        let mut entry = KeyEntry::new(value, self.epoch);
        entry.expire_at = expire_at;
        let shard = self.shard_for(&key);
        shard.entries.write().insert(key, Arc::new(RwLock::new(entry)));
        self.used_bytes.fetch_add(size, Ordering::Relaxed);
    }

    pub fn with_default_shards(max_memory: Option<usize>, eviction_policy: EvictionPolicy) -> Self {
        let threads = std::thread::available_parallelism().map(|c| c.get()).unwrap_or(1);
        Self::new(threads * DEFAULT_SHARD_MULTIPLIER, max_memory, eviction_policy)
    }

    fn shard_index(&self, key: &[u8]) -> usize {
        use std::hash::{BuildHasher, Hasher};
        let mut hasher = self.hash_state.build_hasher();
        hasher.write(key);
        (hasher.finish() as usize) & self.shard_mask
    }

    fn shard_for(&self, key: &[u8]) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    /// Non-blocking existence check. A key contended by another writer is
    /// reported as existing (best-effort, matching the spec's "non-blocking"
    /// requirement over a strict snapshot guarantee).
    pub fn exists(&self, key: &[u8]) -> bool {
        let shard = self.shard_for(key);
        let entries = shard.entries.read();
        match entries.get(key) {
            None => false,
            Some(arc) => match arc.try_read() {
                Some(entry) => !entry.is_expired(Instant::now()),
                None => true,
            },
        }
    }

    fn find_arc(&self, key: &[u8]) -> Option<Arc<RwLock<KeyEntry>>> {
        let shard = self.shard_for(key);
        let entries = shard.entries.read();
        entries.get(key).cloned()
    }

    fn remove_arc(&self, key: &[u8]) -> Option<Arc<RwLock<KeyEntry>>> {
        let shard = self.shard_for(key);
        let mut entries = shard.entries.write();
        entries.remove(key)
    }

    /// Acquires the exclusive per-key lock for an existing, non-expired key.
    /// Blocks until acquirable; wakes every `CANCEL_POLL_INTERVAL` to check
    /// `cancel`, unwinding with no mutation performed if it fires while
    /// still waiting.
    pub fn lock(&self, key: &[u8], cancel: &CancelToken) -> KvResult<KeyWriteGuard> {
        let arc = self.find_arc(key).ok_or(KvError::NotFound)?;
        let guard = Self::wait_write(&arc, cancel)?;
        if guard.is_expired(Instant::now()) {
            self.remove_arc(key);
            return Err(KvError::NotFound);
        }
        Ok(guard)
    }

    /// Acquires the shared per-key lock for an existing, non-expired key.
    /// Cancellation-aware the same way as [`Keyspace::lock`].
    pub fn r_lock(&self, key: &[u8], cancel: &CancelToken) -> KvResult<KeyReadGuard> {
        let arc = self.find_arc(key).ok_or(KvError::NotFound)?;
        let guard = Self::wait_read(&arc, cancel)?;
        if guard.is_expired(Instant::now()) {
            drop(guard);
            self.remove_arc(key);
            return Err(KvError::NotFound);
        }
        guard.touch(self.epoch);
        Ok(guard)
    }

    fn wait_write(arc: &Arc<RwLock<KeyEntry>>, cancel: &CancelToken) -> KvResult<KeyWriteGuard> {
        loop {
            if cancel.is_cancelled() {
                return Err(KvError::Cancelled);
            }
            if let Some(guard) = arc.try_write_arc_for(CANCEL_POLL_INTERVAL) {
                return Ok(guard);
            }
        }
    }

    fn wait_read(arc: &Arc<RwLock<KeyEntry>>, cancel: &CancelToken) -> KvResult<KeyReadGuard> {
        loop {
            if cancel.is_cancelled() {
                return Err(KvError::Cancelled);
            }
            if let Some(guard) = arc.try_read_arc_for(CANCEL_POLL_INTERVAL) {
                return Ok(guard);
            }
        }
    }

    /// Acquires exclusive locks for every (deduplicated) key in `keys`, in
    /// sorted byte-lex order, so two multi-key commands racing over the
    /// same keys never deadlock against each other. On failure, guards
    /// already acquired are dropped before returning.
    pub fn lock_many(&self, keys: &[&[u8]], cancel: &CancelToken) -> KvResult<Vec<(Vec<u8>, KeyWriteGuard)>> {
        let mut sorted: Vec<&[u8]> = keys.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let mut guards = Vec::with_capacity(sorted.len());
        for key in sorted {
            let guard = self.lock(key, cancel)?;
            guards.push((key.to_vec(), guard));
        }
        Ok(guards)
    }

    /// Atomically creates `key` with `initial` and returns it exclusively
    /// locked. Fails if the key already exists (and is not expired).
    pub fn create_and_lock(&self, key: Bytes, initial: Value) -> KvResult<KeyWriteGuard> {
        self.ensure_capacity(approx_size(&key, &initial))?;

        let shard = self.shard_for(&key);
        let mut entries = shard.entries.write();

        if let Some(existing) = entries.get(&key) {
            let still_live = match existing.try_write() {
                Some(guard) => !guard.is_expired(Instant::now()),
                None => true,
            };
            if still_live {
                return Err(KvError::Range(format!("key {:?} already exists", String::from_utf8_lossy(&key))));
            }
            entries.remove(&key);
        }

        let size = approx_size(&key, &initial);
        let arc = Arc::new(RwLock::new(KeyEntry::new(initial, self.epoch)));
        // Lock before publishing so no other task can observe the key
        // without its creator already holding the exclusive lock.
        let guard = arc.write_arc();
        entries.insert(key, arc);
        drop(entries);

        self.used_bytes.fetch_add(size, Ordering::Relaxed);
        Ok(guard)
    }

    /// Deletes `key`. Returns `true` if a live (non-expired) entry existed.
    pub fn delete(&self, key: &[u8]) -> KvResult<bool> {
        let arc = match self.remove_arc(key) {
            Some(arc) => arc,
            None => return Ok(false),
        };
        let guard = arc.write();
        let was_live = !guard.is_expired(Instant::now());
        let size = approx_size(key, &guard.value);
        drop(guard);
        self.used_bytes.fetch_sub(size.min(self.used_bytes.load(Ordering::Relaxed)), Ordering::Relaxed);
        Ok(was_live)
    }

    /// Recomputes and applies the byte delta for a value replaced in place
    /// by a command handler already holding the write guard.
    pub fn account_resize(&self, key: &[u8], old: &Value, new: &Value) {
        let old_size = approx_size(key, old);
        let new_size = approx_size(key, new);
        if new_size >= old_size {
            self.used_bytes.fetch_add(new_size - old_size, Ordering::Relaxed);
        } else {
            self.used_bytes.fetch_sub(old_size - new_size, Ordering::Relaxed);
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes.load(Ordering::Relaxed)
    }

    fn ensure_capacity(&self, incoming: usize) -> KvResult<()> {
        let Some(max) = self.max_memory else { return Ok(()) };
        while self.used_bytes.load(Ordering::Relaxed) + incoming > max {
            if self.eviction_policy.is_noeviction() {
                return Err(KvError::OutOfMemory);
            }
            let candidates = self.sample_candidates(EVICTION_SAMPLE_SIZE);
            match eviction::select_candidate(self.eviction_policy, &candidates) {
                Some(key) => {
                    self.delete(&key)?;
                }
                None => return Err(KvError::OutOfMemory),
            }
        }
        Ok(())
    }

    fn sample_candidates(&self, n: usize) -> Vec<EvictionCandidate> {
        let mut rng = rand::thread_rng();
        let mut shard_indices: Vec<usize> = (0..self.shards.len()).collect();
        shard_indices.shuffle(&mut rng);

        let mut out = Vec::new();
        for &idx in shard_indices.iter().take(n.max(1)) {
            let entries = self.shards[idx].entries.read();
            for (key, arc) in entries.iter() {
                if let Some(entry) = arc.try_read() {
                    out.push(EvictionCandidate {
                        key: key.clone(),
                        has_ttl: entry.expire_at.is_some(),
                        last_access_nanos: entry.last_access_nanos(),
                        access_count: entry.access_count(),
                        expires_at_nanos: entry
                            .expire_at
                            .map(|t| t.saturating_duration_since(self.epoch).as_nanos() as u64),
                    });
                }
            }
        }
        out
    }

    /// Returns every live key, for `KEYS`/`SCAN`-style listing. Callers
    /// filter by glob pattern themselves.
    pub fn all_keys(&self) -> Vec<Bytes> {
        let now = Instant::now();
        let mut out = Vec::new();
        for shard in &self.shards {
            let entries = shard.entries.read();
            for (key, arc) in entries.iter() {
                if let Some(entry) = arc.try_read() {
                    if !entry.is_expired(now) {
                        out.push(key.clone());
                    }
                }
            }
        }
        out
    }

    /// Scans a bounded random sample of shards and deletes expired keys.
    /// Returns the number removed.
    pub fn sweep_expired(&self, sample_shards: usize) -> usize {
        let now = Instant::now();
        let mut rng = rand::thread_rng();
        let mut shard_indices: Vec<usize> = (0..self.shards.len()).collect();
        shard_indices.shuffle(&mut rng);

        let mut removed = 0;
        for &idx in shard_indices.iter().take(sample_shards.max(1)) {
            let expired_keys: Vec<Bytes> = {
                let entries = self.shards[idx].entries.read();
                entries
                    .iter()
                    .filter_map(|(key, arc)| {
                        arc.try_read().filter(|e| e.is_expired(now)).map(|_| key.clone())
                    })
                    .collect()
            };
            for key in expired_keys {
                if self.delete(&key).unwrap_or(false) {
                    removed += 1;
                }
            }
        }
        removed
    }
}

/// Background task: periodically sweeps a bounded random sample of shards
/// for expired keys. Spawned once at startup (see `kv-server::main`),
/// replacing the donor's OS-thread `start_expirer` with a tokio interval
/// task so it shares the runtime the rest of the server uses.
pub async fn run_ttl_sweep(keyspace: Arc<Keyspace>, interval: Duration, sample_shards: usize) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let removed = keyspace.sweep_expired(sample_shards);
        if removed > 0 {
            tracing::debug!(removed, "ttl sweep removed expired keys");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_lock_fails_on_existing_key() {
        let ks = Keyspace::new(2, None, EvictionPolicy::NoEviction);
        ks.create_and_lock(Bytes::from("a"), Value::String(Bytes::from("1"))).unwrap();
        let err = ks.create_and_lock(Bytes::from("a"), Value::String(Bytes::from("2"))).unwrap_err();
        assert!(matches!(err, KvError::Range(_)));
    }

    #[test]
    fn lock_missing_key_is_not_found() {
        let ks = Keyspace::new(2, None, EvictionPolicy::NoEviction);
        assert!(matches!(ks.lock(b"missing", &CancelToken::new()), Err(KvError::NotFound)));
    }

    #[test]
    fn delete_reports_whether_key_existed() {
        let ks = Keyspace::new(2, None, EvictionPolicy::NoEviction);
        ks.create_and_lock(Bytes::from("a"), Value::String(Bytes::from("1"))).unwrap();
        assert!(ks.delete(b"a").unwrap());
        assert!(!ks.delete(b"a").unwrap());
    }

    #[test]
    fn expired_key_is_lazily_treated_as_absent() {
        let ks = Keyspace::new(2, None, EvictionPolicy::NoEviction);
        {
            let mut guard = ks.create_and_lock(Bytes::from("a"), Value::String(Bytes::from("1"))).unwrap();
            guard.expire_at = Some(Instant::now() - Duration::from_secs(1));
        }
        assert!(!ks.exists(b"a"));
        assert!(matches!(ks.lock(b"a", &CancelToken::new()), Err(KvError::NotFound)));
    }

    #[test]
    fn noeviction_rejects_writes_past_ceiling() {
        let ks = Keyspace::new(1, Some(4), EvictionPolicy::NoEviction);
        ks.create_and_lock(Bytes::from("a"), Value::String(Bytes::from("1"))).unwrap();
        let err = ks.create_and_lock(Bytes::from("bbbbb"), Value::String(Bytes::from("1"))).unwrap_err();
        assert!(matches!(err, KvError::OutOfMemory));
    }

    #[test]
    fn allkeys_random_evicts_to_make_room() {
        let ks = Keyspace::new(1, Some(6), EvictionPolicy::AllKeysRandom);
        ks.create_and_lock(Bytes::from("a"), Value::String(Bytes::from("1"))).unwrap();
        ks.create_and_lock(Bytes::from("b"), Value::String(Bytes::from("1"))).unwrap();
        assert!(ks.used_bytes() <= 6);
    }

    #[test]
    fn sweep_expired_removes_stale_keys() {
        let ks = Keyspace::new(2, None, EvictionPolicy::NoEviction);
        {
            let mut guard = ks.create_and_lock(Bytes::from("a"), Value::String(Bytes::from("1"))).unwrap();
            guard.expire_at = Some(Instant::now() - Duration::from_secs(1));
        }
        let removed = ks.sweep_expired(2);
        assert_eq!(removed, 1);
        assert!(!ks.exists(b"a"));
    }

    #[test]
    fn lock_unblocks_on_cancel_without_mutating() {
        let ks = Arc::new(Keyspace::new(2, None, EvictionPolicy::NoEviction));
        ks.create_and_lock(Bytes::from("a"), Value::String(Bytes::from("1"))).unwrap();
        let held = ks.lock(b"a", &CancelToken::new()).unwrap();

        let cancel = CancelToken::new();
        let waiter_cancel = cancel.clone();
        let waiter_ks = ks.clone();
        let waiter = std::thread::spawn(move || waiter_ks.lock(b"a", &waiter_cancel));

        std::thread::sleep(CANCEL_POLL_INTERVAL * 3);
        cancel.cancel();
        assert!(matches!(waiter.join().unwrap(), Err(KvError::Cancelled)));
        drop(held);
    }

    #[test]
    fn lock_many_acquires_in_sorted_order_and_dedups() {
        let ks = Keyspace::new(2, None, EvictionPolicy::NoEviction);
        ks.create_and_lock(Bytes::from("z"), Value::String(Bytes::from("1"))).unwrap();
        ks.create_and_lock(Bytes::from("a"), Value::String(Bytes::from("1"))).unwrap();

        let guards = ks.lock_many(&[b"z", b"a", b"z"], &CancelToken::new()).unwrap();
        assert_eq!(guards.len(), 2);
        assert_eq!(guards[0].0, b"a");
        assert_eq!(guards[1].0, b"z");
    }

    #[test]
    fn lock_many_reports_missing_key() {
        let ks = Keyspace::new(2, None, EvictionPolicy::NoEviction);
        ks.create_and_lock(Bytes::from("a"), Value::String(Bytes::from("1"))).unwrap();
        let err = ks.lock_many(&[b"a", b"missing"], &CancelToken::new()).unwrap_err();
        assert!(matches!(err, KvError::NotFound));
    }
}
