//! # AOF + Preamble
//!
//! The on-disk durability artifact is a pair of files: a preamble holding a
//! full JSON snapshot of every non-expired key, and an append log of
//! RESP-encoded write commands applied since that preamble was written.
//! Restore reads the preamble, installs every entry, then replays the
//! append log through whatever dispatch closure the caller supplies.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use bytes::BytesMut;
use kv_common::resp::{encode_command, RespParser};
use kv_engine::Keyspace;

use crate::codec::{encode_key, PersistedEntry, PersistedValue};
use crate::error::{PersistError, PersistResult};

/// How aggressively the append log is flushed to disk after each write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// `fsync` after every command.
    Always,
    /// `fsync` once per background tick (see `run_fsync_tick`).
    Everysec,
    /// Leave flushing to the OS.
    No,
}

/// Directory layout: `<data_dir>/aof/preamble.bin` and
/// `<data_dir>/aof/log.aof`.
pub struct AofPaths {
    pub preamble: PathBuf,
    pub log: PathBuf,
}

impl AofPaths {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let dir = data_dir.as_ref().join("aof");
        AofPaths { preamble: dir.join("preamble.bin"), log: dir.join("log.aof") }
    }

    fn ensure_dir(&self) -> PersistResult<()> {
        if let Some(parent) = self.log.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

/// Appends RESP-encoded commands to `log.aof` under the configured
/// durability mode. One writer per server process, shared behind the
/// dispatcher's own serialization of sync commands.
pub struct AofWriter {
    paths: AofPaths,
    mode: DurabilityMode,
    file: Mutex<BufWriter<File>>,
    dirty_since_flush: std::sync::atomic::AtomicBool,
}

impl AofWriter {
    pub fn open(data_dir: impl AsRef<Path>, mode: DurabilityMode) -> PersistResult<Self> {
        let paths = AofPaths::new(data_dir);
        paths.ensure_dir()?;
        let file = OpenOptions::new().create(true).append(true).open(&paths.log)?;
        Ok(AofWriter {
            paths,
            mode,
            file: Mutex::new(BufWriter::new(file)),
            dirty_since_flush: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn log_path(&self) -> &Path {
        &self.paths.log
    }

    /// Appends one already-successful command. Called by the dispatcher
    /// after a sync command returns `OK`, never before.
    pub fn append(&self, argv: &[Vec<u8>]) -> PersistResult<()> {
        let refs: Vec<&[u8]> = argv.iter().map(|a| a.as_slice()).collect();
        let mut buf = Vec::new();
        encode_command(&refs, &mut buf);

        let mut file = self.file.lock().expect("aof writer mutex poisoned");
        file.write_all(&buf)?;
        match self.mode {
            DurabilityMode::Always => {
                file.flush()?;
                file.get_ref().sync_data()?;
            }
            DurabilityMode::Everysec => {
                self.dirty_since_flush.store(true, std::sync::atomic::Ordering::Relaxed);
            }
            DurabilityMode::No => {}
        }
        Ok(())
    }

    /// Flushes and fsyncs if there has been a write since the last flush.
    /// Driven by a `tokio::time::interval` background task for
    /// `Everysec` mode.
    pub fn flush_tick(&self) -> PersistResult<()> {
        if self.dirty_since_flush.swap(false, std::sync::atomic::Ordering::Relaxed) {
            let mut file = self.file.lock().expect("aof writer mutex poisoned");
            file.flush()?;
            file.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Truncates the append log to empty, used right after a rewrite has
    /// written a fresh preamble covering everything in it.
    pub fn truncate(&self) -> PersistResult<()> {
        let mut file = self.file.lock().expect("aof writer mutex poisoned");
        file.flush()?;
        let raw = OpenOptions::new().write(true).truncate(true).open(&self.paths.log)?;
        *file = BufWriter::new(raw);
        Ok(())
    }
}

/// Writes the preamble: every non-expired key in `keyspace`, JSON-encoded.
/// Shares the snapshot machinery with `kv_persist::snapshot`.
pub fn write_preamble(keyspace: &Keyspace, paths: &AofPaths) -> PersistResult<()> {
    paths.ensure_dir()?;
    let entries: Vec<PersistedEntry> = keyspace
        .snapshot_entries()
        .into_iter()
        .map(|e| PersistedEntry {
            key: encode_key(&e.key),
            value: PersistedValue::from_value(&e.value),
            expire_at: e.expire_at_unix_ms,
        })
        .collect();
    let bytes = serde_json::to_vec(&entries)?;
    std::fs::write(&paths.preamble, bytes)?;
    Ok(())
}

/// Rewrites the AOF: writes a fresh preamble from the current keyspace
/// state, then truncates the append log. Triggered by `REWRITEAOF` or by
/// the configured size threshold.
pub fn rewrite(keyspace: &Keyspace, writer: &AofWriter) -> PersistResult<()> {
    write_preamble(keyspace, &writer.paths)?;
    writer.truncate()
}

/// Installs the preamble into `keyspace`, skipping anything already
/// expired. Returns the number of keys installed.
pub fn load_preamble(keyspace: &Keyspace, paths: &AofPaths) -> PersistResult<usize> {
    if !paths.preamble.exists() {
        return Ok(0);
    }
    let bytes = std::fs::read(&paths.preamble)?;
    if bytes.is_empty() {
        return Ok(0);
    }
    let entries: Vec<PersistedEntry> = serde_json::from_slice(&bytes)?;
    let mut installed = 0;
    for entry in entries {
        let Ok(key) = entry.key_bytes() else { continue };
        let Ok(value) = entry.value.clone().into_value() else { continue };
        keyspace.restore_entry(key, value, entry.expire_at);
        installed += 1;
    }
    Ok(installed)
}

/// Replays every command in the append log through `apply`, in file order.
/// A corrupted or partial tail frame stops replay at the last fully
/// readable command rather than erroring out. Returns the number of
/// commands replayed.
pub fn replay_log(
    paths: &AofPaths,
    mut apply: impl FnMut(Vec<Vec<u8>>) -> PersistResult<()>,
) -> PersistResult<usize> {
    if !paths.log.exists() {
        return Ok(0);
    }
    let mut file = File::open(&paths.log)?;
    let mut raw = Vec::new();
    file.read_to_end(&mut raw)?;

    let mut buf = BytesMut::from(&raw[..]);
    let mut parser = RespParser::new();
    let mut count = 0;
    loop {
        match parser.parse(&mut buf) {
            Ok(Some(argv)) => {
                apply(argv)?;
                count += 1;
            }
            Ok(None) => break,
            Err(_) => break,
        }
    }
    Ok(count)
}

/// Full restore sequence: preamble then append log, each skipping
/// non-fatal corruption. Used once at startup before the listener binds.
pub fn restore(
    keyspace: &Keyspace,
    paths: &AofPaths,
    apply: impl FnMut(Vec<Vec<u8>>) -> PersistResult<()>,
) -> PersistResult<(usize, usize)> {
    let preamble_count = load_preamble(keyspace, paths)?;
    let replayed = replay_log(paths, apply)?;
    Ok((preamble_count, replayed))
}

impl From<base64::DecodeError> for PersistError {
    fn from(_: base64::DecodeError) -> Self {
        PersistError::Protocol
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use kv_common::CancelToken;
    use kv_engine::{EvictionPolicy, Value};
    use std::sync::Arc;

    fn tmp_dir(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("kv-persist-{label}-{}", std::process::id()))
    }

    #[test]
    fn preamble_round_trips_a_simple_key() {
        let dir = tmp_dir("preamble");
        std::fs::create_dir_all(&dir).unwrap();
        let paths = AofPaths::new(&dir);

        let ks = Keyspace::new(2, None, EvictionPolicy::NoEviction);
        ks.create_and_lock(Bytes::from("a"), Value::String(Bytes::from("1"))).unwrap();
        write_preamble(&ks, &paths).unwrap();

        let restored = Keyspace::new(2, None, EvictionPolicy::NoEviction);
        let count = load_preamble(&restored, &paths).unwrap();
        assert_eq!(count, 1);
        let guard = restored.r_lock(b"a", &CancelToken::new()).unwrap();
        assert_eq!(guard.value.as_string().unwrap(), &Bytes::from("1"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn append_then_replay_reapplies_commands() {
        let dir = tmp_dir("replay");
        std::fs::create_dir_all(&dir).unwrap();
        let paths = AofPaths::new(&dir);

        {
            let writer = AofWriter::open(&dir, DurabilityMode::Always).unwrap();
            writer.append(&[b"SET".to_vec(), b"a".to_vec(), b"1".to_vec()]).unwrap();
            writer.append(&[b"SET".to_vec(), b"b".to_vec(), b"2".to_vec()]).unwrap();
        }

        let applied = Arc::new(std::sync::Mutex::new(Vec::new()));
        let applied_clone = applied.clone();
        let replayed = replay_log(&paths, move |argv| {
            applied_clone.lock().unwrap().push(argv);
            Ok(())
        })
        .unwrap();

        assert_eq!(replayed, 2);
        assert_eq!(applied.lock().unwrap().len(), 2);
        assert_eq!(applied.lock().unwrap()[0][0], b"SET".to_vec());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn replay_stops_at_corrupted_tail_without_erroring() {
        let dir = tmp_dir("corrupt");
        std::fs::create_dir_all(&dir).unwrap();
        let paths = AofPaths::new(&dir);
        {
            let writer = AofWriter::open(&dir, DurabilityMode::Always).unwrap();
            writer.append(&[b"SET".to_vec(), b"a".to_vec(), b"1".to_vec()]).unwrap();
        }
        // Append a truncated, unterminated frame onto the end.
        {
            let mut file = OpenOptions::new().append(true).open(&paths.log).unwrap();
            file.write_all(b"*2\r\n$3\r\nSET\r\n$3\r\nbo").unwrap();
        }

        let mut count = 0;
        let replayed = replay_log(&paths, |_argv| {
            count += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(replayed, 1);
        assert_eq!(count, 1);

        std::fs::remove_dir_all(&dir).ok();
    }
}
