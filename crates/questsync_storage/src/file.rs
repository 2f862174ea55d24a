//! File-backed key-value store.
//!
//! The file is an append-only log of records. Each record is a 4-byte
//! big-endian length followed by a canonical CBOR map `{"k": key, "v": value}`.
//! A null value is a tombstone. Opening the file replays the log into memory;
//! the latest record for a key wins.

use crate::error::{StorageError, StorageResult};
use crate::store::KeyValueStore;
use parking_lot::Mutex;
use questsync_codec::{from_cbor, to_canonical_cbor, Value};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const HEADER_LEN: usize = 4;

/// Largest record accepted when replaying.
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Logs shorter than this are never compacted.
const COMPACT_MIN_RECORDS: usize = 64;

/// A persistent key-value store backed by a single log file.
///
/// # Durability
///
/// Every `put` and `remove` appends one record and calls `sync_data` before
/// returning. A record torn by a crash mid-append is discarded (and
/// truncated away) on the next open; everything before it survives.
///
/// # Example
///
/// ```no_run
/// use questsync_storage::{FileStore, KeyValueStore};
/// use questsync_codec::Value;
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("markers.log")).unwrap();
/// store.put("last_uid", Value::from("u1")).unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    state: Mutex<LogState>,
}

#[derive(Debug)]
struct LogState {
    file: File,
    entries: BTreeMap<String, Value>,
    records: usize,
}

impl FileStore {
    /// Opens or creates a store at the given path and replays its log.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or a complete record in
    /// it cannot be decoded.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let replay = replay(&bytes)?;
        if replay.valid_len < bytes.len() {
            warn!(
                path = %path.display(),
                discarded = bytes.len() - replay.valid_len,
                "discarding torn record at end of marker log"
            );
            file.set_len(replay.valid_len as u64)?;
            file.sync_all()?;
        }

        let store = Self {
            path: path.to_path_buf(),
            state: Mutex::new(LogState {
                file,
                entries: replay.entries,
                records: replay.records,
            }),
        };

        if store.needs_compaction() {
            store.compact()?;
        }

        Ok(store)
    }

    /// Opens or creates a store, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot
    /// be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records currently in the log, live or dead.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.state.lock().records
    }

    /// Rewrites the log with one record per live key.
    ///
    /// The new log is written beside the old one and renamed over it, so a
    /// crash leaves either the old or the new file intact.
    ///
    /// # Errors
    ///
    /// Returns an error if the replacement file cannot be written.
    pub fn compact(&self) -> StorageResult<()> {
        let mut state = self.state.lock();
        let tmp_path = self.path.with_extension("compact");

        {
            let mut tmp = File::create(&tmp_path)?;
            for (key, value) in &state.entries {
                tmp.write_all(&encode_record(key, value)?)?;
            }
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        state.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        let before = state.records;
        state.records = state.entries.len();
        debug!(before, after = state.records, "compacted marker log");
        Ok(())
    }

    fn needs_compaction(&self) -> bool {
        let state = self.state.lock();
        state.records >= COMPACT_MIN_RECORDS && state.records > state.entries.len() * 2
    }

    fn append(&self, key: &str, value: Option<Value>) -> StorageResult<()> {
        let record = encode_record(key, value.as_ref().unwrap_or(&Value::Null))?;
        {
            let mut state = self.state.lock();
            state.file.seek(SeekFrom::End(0))?;
            state.file.write_all(&record)?;
            state.file.sync_data()?;
            state.records += 1;
            match value {
                Some(value) => state.entries.insert(key.to_string(), value),
                None => state.entries.remove(key),
            };
        }

        if self.needs_compaction() {
            self.compact()?;
        }
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.state.lock().entries.get(key).cloned())
    }

    /// Storing `Value::Null` removes the key.
    fn put(&self, key: &str, value: Value) -> StorageResult<()> {
        if value.is_null() {
            return self.remove(key);
        }
        self.append(key, Some(value))
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        if !self.state.lock().entries.contains_key(key) {
            return Ok(());
        }
        self.append(key, None)
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.state.lock().entries.keys().cloned().collect())
    }
}

struct Replay {
    entries: BTreeMap<String, Value>,
    records: usize,
    valid_len: usize,
}

fn replay(bytes: &[u8]) -> StorageResult<Replay> {
    let mut entries = BTreeMap::new();
    let mut records = 0;
    let mut pos = 0;

    while bytes.len() - pos >= HEADER_LEN {
        let len = u32::from_be_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
            as usize;
        if len > MAX_RECORD_LEN {
            return Err(StorageError::Corrupted(format!(
                "record at offset {pos} claims {len} bytes"
            )));
        }
        let start = pos + HEADER_LEN;
        if bytes.len() - start < len {
            break;
        }

        let (key, value) = decode_record(&bytes[start..start + len])
            .map_err(|e| StorageError::Corrupted(format!("record at offset {pos}: {e}")))?;
        if value.is_null() {
            entries.remove(&key);
        } else {
            entries.insert(key, value);
        }

        records += 1;
        pos = start + len;
    }

    Ok(Replay {
        entries,
        records,
        valid_len: pos,
    })
}

fn encode_record(key: &str, value: &Value) -> StorageResult<Vec<u8>> {
    let body = to_canonical_cbor(&Value::map([
        ("k", Value::from(key)),
        ("v", value.clone()),
    ]))?;
    let len = u32::try_from(body.len())
        .map_err(|_| StorageError::Corrupted(format!("record for `{key}` is too large")))?;

    let mut record = Vec::with_capacity(HEADER_LEN + body.len());
    record.extend_from_slice(&len.to_be_bytes());
    record.extend_from_slice(&body);
    Ok(record)
}

fn decode_record(bytes: &[u8]) -> StorageResult<(String, Value)> {
    let Value::Map(mut fields) = from_cbor(bytes)? else {
        return Err(StorageError::Corrupted("record is not a map".into()));
    };
    let key = match fields.remove("k") {
        Some(Value::Text(key)) => key,
        _ => return Err(StorageError::Corrupted("record has no text key".into())),
    };
    let value = fields.remove("v").unwrap_or(Value::Null);
    Ok((key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("markers.log");

        let store = FileStore::open(&path).unwrap();
        assert!(store.keys().unwrap().is_empty());
        assert!(path.exists());
        assert_eq!(store.path(), path);
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("markers.log");

        {
            let store = FileStore::open(&path).unwrap();
            store.put("last_uid", Value::from("u1")).unwrap();
            store.put("reset_epoch:u1", Value::Integer(2)).unwrap();
            store.put("reset_epoch:u1", Value::Integer(3)).unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("last_uid").unwrap(), Some(Value::from("u1")));
        assert_eq!(store.get("reset_epoch:u1").unwrap(), Some(Value::Integer(3)));
        assert_eq!(store.record_count(), 3);
    }

    #[test]
    fn remove_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("markers.log");

        {
            let store = FileStore::open(&path).unwrap();
            store.put("last_uid", Value::from("u1")).unwrap();
            store.remove("last_uid").unwrap();
            store.remove("never_set").unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("last_uid").unwrap(), None);
        assert_eq!(store.record_count(), 2);
    }

    #[test]
    fn null_put_is_remove() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(&dir.path().join("m.log")).unwrap();
        store.put("a", Value::Integer(1)).unwrap();
        store.put("a", Value::Null).unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn torn_tail_is_discarded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("markers.log");

        {
            let store = FileStore::open(&path).unwrap();
            store.put("last_uid", Value::from("u1")).unwrap();
        }
        let intact_len = fs::metadata(&path).unwrap().len();

        // Simulate a crash halfway through the second record.
        let partial = encode_record("reset_epoch:u1", &Value::Integer(7)).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&partial[..partial.len() / 2]).unwrap();
        drop(file);

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("last_uid").unwrap(), Some(Value::from("u1")));
        assert_eq!(store.get("reset_epoch:u1").unwrap(), None);
        assert_eq!(fs::metadata(&path).unwrap().len(), intact_len);

        // The log is usable after recovery.
        store.put("reset_epoch:u1", Value::Integer(1)).unwrap();
        drop(store);
        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("reset_epoch:u1").unwrap(), Some(Value::Integer(1)));
    }

    #[test]
    fn garbage_record_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("markers.log");
        let mut bytes = 3u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0xff, 0xff, 0xff]);
        fs::write(&path, bytes).unwrap();

        assert!(matches!(
            FileStore::open(&path),
            Err(StorageError::Corrupted(_))
        ));
    }

    #[test]
    fn compaction_keeps_live_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("markers.log");

        let store = FileStore::open(&path).unwrap();
        for epoch in 0..200 {
            store.put("reset_epoch:u1", Value::Integer(epoch)).unwrap();
        }
        store.put("last_uid", Value::from("u1")).unwrap();
        assert!(store.record_count() < COMPACT_MIN_RECORDS);
        drop(store);

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("reset_epoch:u1").unwrap(), Some(Value::Integer(199)));
        assert_eq!(store.get("last_uid").unwrap(), Some(Value::from("u1")));
        assert!(!dir.path().join("markers.compact").exists());
    }

    #[test]
    fn create_with_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("markers.log");

        FileStore::open_with_create_dirs(&path).unwrap();
        assert!(path.exists());
    }
}
