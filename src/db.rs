use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::batch::NON_TXN_SEQ_NO;
use crate::config::Config;
use crate::data::file::{DataFile, DATA_FILE_SUFFIX, MERGE_FIN_FILE_NAME, SEQ_NO_FILE_NAME};
use crate::data::record::{
    decode_key_with_seq, encode_key_with_seq, LogRecord, Position, RecordType,
};
use crate::error::{Error, Result};
use crate::fio::IoType;
use crate::flock::DirLock;
use crate::index::{self, IndexType, Indexer};
use crate::util;

pub(crate) const LOCK_FILE: &str = "flock";
const SEQ_NO_KEY: &[u8] = b"seq.no";

/// A Bitcask-model storage engine scoped to one directory: an append-only
/// record log across numbered data files, plus an index from key to the
/// position of the key's latest record.
///
/// All methods take `&self`; the engine serializes writers through an
/// internal reader-writer lock and the index guards itself.
pub struct Db {
    pub(crate) config: Config,
    pub(crate) index: Box<dyn Indexer>,
    pub(crate) state: RwLock<DbState>,
    pub(crate) seq_no: AtomicU64,
    file_lock: Mutex<Option<DirLock>>,
}

/// Mutable engine state behind the engine lock.
pub(crate) struct DbState {
    /// The data file currently accepting appends.
    pub(crate) active_file: Option<DataFile>,
    /// Frozen read-only data files by id.
    pub(crate) older_files: HashMap<u32, Arc<DataFile>>,
    /// Sorted data file ids found at startup.
    pub(crate) file_ids: Vec<u32>,
    /// Bytes appended since the last fsync, for `bytes_per_sync`.
    pub(crate) bytes_write: u64,
    /// Total size of records no longer referenced by the index.
    pub(crate) reclaim_size: u64,
    pub(crate) is_merging: bool,
    /// Whether a `seq-no` file was found at open.
    pub(crate) seq_no_file_exists: bool,
    /// Whether the directory held no data files at open.
    pub(crate) is_initial: bool,
    pub(crate) closed: bool,
}

impl Default for DbState {
    fn default() -> Self {
        Self {
            active_file: None,
            older_files: HashMap::new(),
            file_ids: Vec::new(),
            bytes_write: 0,
            reclaim_size: 0,
            is_merging: false,
            seq_no_file_exists: false,
            is_initial: false,
            // Flipped once open() finishes, so a half-open engine dropped on
            // an error path does not run the close sequence.
            closed: true,
        }
    }
}

/// Engine statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Number of keys in the index.
    pub key_count: usize,
    /// Number of data files, active included.
    pub data_file_count: usize,
    /// Total size of records on disk no longer referenced by the index.
    pub reclaimable_size: u64,
    /// Bytes the data directory occupies on disk.
    pub disk_size: u64,
}

/// Record of one batch mutation staged during replay until its terminator
/// shows up.
struct TxnRecord {
    key: Vec<u8>,
    pos: Position,
    rec_type: RecordType,
}

impl Db {
    /// Opens the engine over `config.dir_path`: takes the directory lock,
    /// adopts a completed merge if one is pending, opens the data files and
    /// rebuilds the index.
    pub fn open(config: Config) -> Result<Db> {
        config.validate()?;
        let dir_path = config.dir_path.clone();
        if !dir_path.is_dir() {
            fs::create_dir_all(&dir_path)?;
        }

        let lock = DirLock::acquire(dir_path.join(LOCK_FILE)).map_err(|err| {
            if err.kind() == io::ErrorKind::WouldBlock {
                Error::DatabaseInUse
            } else {
                Error::Io(err)
            }
        })?;

        let index = index::new_indexer(config.index_type, &dir_path, config.sync_writes)?;
        let db = Db {
            config,
            index,
            state: RwLock::new(DbState::default()),
            seq_no: AtomicU64::new(0),
            file_lock: Mutex::new(Some(lock)),
        };

        let adopted_merge = db.load_merge_files()?;

        let mut state = db.state.write();
        db.load_data_files(&mut state)?;
        state.is_initial = state.file_ids.is_empty();

        let mut max_seq = NON_TXN_SEQ_NO;
        if db.config.index_type == IndexType::BPlusTree {
            if adopted_merge {
                // A freshly adopted merge rewrote record positions. The hint
                // file re-seeds the merged bindings, and replaying the files
                // beyond the boundary restores the ones written since the
                // merge started. Replayed operations were already applied to
                // the persistent index once, so deletes go through leniently.
                db.load_index_from_hint_file()?;
                max_seq = db.load_index(&mut state, false)?;
            } else if let Some(active) = state.active_file.as_mut() {
                // The persistent index is current; no replay, only the
                // append offset needs restoring.
                let size = active.size()?;
                active.set_write_off(size);
            }
        } else {
            db.load_index_from_hint_file()?;
            max_seq = db.load_index(&mut state, true)?;
        }

        if db.config.mmap_at_startup {
            db.reset_io_type(&mut state)?;
        }

        let persisted = db.load_seq_no()?;
        state.seq_no_file_exists = persisted.is_some();
        // The persisted counter is only a hint; replay wins if it saw more.
        db.seq_no
            .store(max_seq.max(persisted.unwrap_or(0)), Ordering::SeqCst);

        state.closed = false;
        tracing::info!(
            dir = %db.config.dir_path.display(),
            data_files = state.file_ids.len(),
            keys = db.index.len(),
            "opened database"
        );
        drop(state);

        Ok(db)
    }

    /// Stores `value` under `key`, overwriting any previous value.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }

        let record = LogRecord {
            key: encode_key_with_seq(key, NON_TXN_SEQ_NO),
            value: value.to_vec(),
            rec_type: RecordType::Normal,
        };

        let mut state = self.state.write();
        let pos = self.append_log_record(&mut state, &record)?;
        if let Some(old) = self.index.put(key, pos)? {
            state.reclaim_size += old.size as u64;
        }
        Ok(())
    }

    /// Returns the latest value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }

        let state = self.state.read();
        let pos = self.index.get(key)?.ok_or(Error::KeyNotFound)?;
        self.get_value_by_position(&state, pos)
    }

    /// Removes `key`. Deleting an absent key is a no-op.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        if self.index.get(key)?.is_none() {
            return Ok(());
        }

        let record = LogRecord {
            key: encode_key_with_seq(key, NON_TXN_SEQ_NO),
            value: Vec::new(),
            rec_type: RecordType::Deleted,
        };

        let mut state = self.state.write();
        let pos = self.append_log_record(&mut state, &record)?;
        // Both the tombstone and the record it shadows are reclaimable.
        state.reclaim_size += pos.size as u64;
        match self.index.delete(key)? {
            Some(old) => state.reclaim_size += old.size as u64,
            None => return Err(Error::IndexUpdateFailed),
        }
        Ok(())
    }

    /// All keys, in index order.
    pub fn list_keys(&self) -> Result<Vec<Vec<u8>>> {
        let mut it = self.index.iterator(false)?;
        let mut keys = Vec::with_capacity(self.index.len());
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        Ok(keys)
    }

    /// Visits every key/value in index order until `f` returns false.
    pub fn fold<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], Vec<u8>) -> bool,
    {
        let state = self.state.write();
        let mut it = self.index.iterator(false)?;
        while it.valid() {
            let value = self.get_value_by_position(&state, it.value())?;
            if !f(it.key(), value) {
                break;
            }
            it.next();
        }
        Ok(())
    }

    /// Fsyncs the active data file.
    pub fn sync(&self) -> Result<()> {
        let state = self.state.write();
        if let Some(active) = &state.active_file {
            active.sync()?;
        }
        Ok(())
    }

    /// Engine statistics.
    pub fn stat(&self) -> Result<Stat> {
        let state = self.state.read();
        let mut data_file_count = state.older_files.len();
        if state.active_file.is_some() {
            data_file_count += 1;
        }
        let disk_size = util::dir_size(&self.config.dir_path)?;
        Ok(Stat {
            key_count: self.index.len(),
            data_file_count,
            reclaimable_size: state.reclaim_size,
            disk_size,
        })
    }

    /// Copies the data directory into `dir`, leaving the lock file behind.
    pub fn backup(&self, dir: impl AsRef<Path>) -> Result<()> {
        let _state = self.state.write();
        util::copy_dir(&self.config.dir_path, dir.as_ref(), &[LOCK_FILE])?;
        Ok(())
    }

    /// Persists the sequence counter, closes all files and releases the
    /// directory lock. Runs at most once; `Drop` calls it as a fallback.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.closed {
            return Ok(());
        }

        if state.active_file.is_some() {
            let mut seq_no_file = DataFile::open_seq_no_file(&self.config.dir_path)?;
            let record = LogRecord {
                key: SEQ_NO_KEY.to_vec(),
                value: self.seq_no.load(Ordering::SeqCst).to_string().into_bytes(),
                rec_type: RecordType::Normal,
            };
            let (encoded, _) = record.encode();
            seq_no_file.write(&encoded)?;
            seq_no_file.sync()?;
        }

        if let Some(active) = &state.active_file {
            active.sync()?;
        }
        state.active_file = None;
        state.older_files.clear();
        state.closed = true;

        self.index.close()?;

        if let Some(lock) = self.file_lock.lock().take() {
            lock.release()?;
        }
        tracing::info!(dir = %self.config.dir_path.display(), "closed database");
        Ok(())
    }

    /// Resolves a position to its record's value. Fails with `KeyNotFound`
    /// when the record is a tombstone.
    pub(crate) fn get_value_by_position(&self, state: &DbState, pos: Position) -> Result<Vec<u8>> {
        let read = match &state.active_file {
            Some(active) if active.file_id() == pos.file_id => active.read_record(pos.offset)?,
            _ => state
                .older_files
                .get(&pos.file_id)
                .ok_or(Error::DataFileNotFound)?
                .read_record(pos.offset)?,
        };
        let Some((record, _)) = read else {
            return Err(Error::DataFileCorrupted(format!(
                "no record at indexed position {}:{}",
                pos.file_id, pos.offset
            )));
        };
        if record.rec_type == RecordType::Deleted {
            return Err(Error::KeyNotFound);
        }
        Ok(record.value)
    }

    /// Appends one encoded record to the active file, rotating first if the
    /// append would overflow `data_file_size`. Caller holds the write lock.
    pub(crate) fn append_log_record(
        &self,
        state: &mut DbState,
        record: &LogRecord,
    ) -> Result<Position> {
        if state.active_file.is_none() {
            self.open_active_file(state, 0)?;
        }

        let (encoded, size) = record.encode();
        if let Some(active) = &state.active_file {
            if active.write_off() + size > self.config.data_file_size {
                self.rotate_active_file(state)?;
            }
        }

        let active = state
            .active_file
            .as_mut()
            .expect("active file is open after rotation");
        let offset = active.write_off();
        active.write(&encoded)?;

        state.bytes_write += size;
        let need_sync = self.config.sync_writes
            || (self.config.bytes_per_sync > 0 && state.bytes_write >= self.config.bytes_per_sync);
        if need_sync {
            active.sync()?;
            state.bytes_write = 0;
        }

        Ok(Position {
            file_id: active.file_id(),
            offset,
            size: size as u32,
        })
    }

    /// Fsyncs and freezes the active file, then opens the next-numbered one.
    /// Returns the new active file id.
    pub(crate) fn rotate_active_file(&self, state: &mut DbState) -> Result<u32> {
        let Some(old) = state.active_file.take() else {
            self.open_active_file(state, 0)?;
            return Ok(0);
        };
        old.sync()?;
        let next_id = old.file_id() + 1;
        tracing::debug!(frozen = old.file_id(), active = next_id, "rotating data file");
        state.older_files.insert(old.file_id(), Arc::new(old));
        self.open_active_file(state, next_id)?;
        Ok(next_id)
    }

    fn open_active_file(&self, state: &mut DbState, file_id: u32) -> Result<()> {
        let file = DataFile::open(&self.config.dir_path, file_id, IoType::Standard)?;
        state.active_file = Some(file);
        Ok(())
    }

    /// Enumerates `*.data` files, sorts them by id and opens them; the
    /// largest id becomes the active file.
    fn load_data_files(&self, state: &mut DbState) -> Result<()> {
        let io_type = if self.config.mmap_at_startup {
            IoType::Mmap
        } else {
            IoType::Standard
        };

        let mut file_ids = Vec::new();
        for entry in fs::read_dir(&self.config.dir_path)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(DATA_FILE_SUFFIX) else {
                continue;
            };
            let file_id: u32 = stem
                .parse()
                .map_err(|_| Error::DataFileCorrupted(format!("unparseable file name {name}")))?;
            file_ids.push(file_id);
        }
        file_ids.sort_unstable();

        for (i, &file_id) in file_ids.iter().enumerate() {
            let file = DataFile::open(&self.config.dir_path, file_id, io_type)?;
            if i == file_ids.len() - 1 {
                state.active_file = Some(file);
            } else {
                state.older_files.insert(file_id, Arc::new(file));
            }
        }
        state.file_ids = file_ids;
        Ok(())
    }

    /// Replays data files at or after the merge boundary into the index.
    /// Batch records are staged per sequence and applied only once their
    /// terminator shows up; orphaned sequences are dropped. Returns the
    /// largest sequence number seen. With `strict` set, a tombstone for an
    /// unbound key aborts the replay as an index inconsistency.
    fn load_index(&self, state: &mut DbState, strict: bool) -> Result<u64> {
        if state.file_ids.is_empty() {
            return Ok(NON_TXN_SEQ_NO);
        }

        let mut boundary = None;
        if self.config.dir_path.join(MERGE_FIN_FILE_NAME).is_file() {
            boundary = Some(self.non_merge_file_id(&self.config.dir_path)?);
        }

        let active_id = state.active_file.as_ref().map(DataFile::file_id);
        let mut txn_records: HashMap<u64, Vec<TxnRecord>> = HashMap::new();
        let mut max_seq = NON_TXN_SEQ_NO;

        for &file_id in &state.file_ids.clone() {
            if boundary.is_some_and(|b| file_id < b) {
                // Everything below the boundary was merged; the hint file
                // already seeded those bindings.
                continue;
            }

            if Some(file_id) == active_id {
                let Some(mut active) = state.active_file.take() else {
                    return Err(Error::DataFileNotFound);
                };
                let end =
                    self.replay_file(state, &active, &mut txn_records, &mut max_seq, strict)?;
                active.set_write_off(end);
                state.active_file = Some(active);
            } else {
                let Some(file) = state.older_files.get(&file_id).cloned() else {
                    return Err(Error::DataFileNotFound);
                };
                self.replay_file(state, &file, &mut txn_records, &mut max_seq, strict)?;
            }
        }

        if !txn_records.is_empty() {
            tracing::debug!(
                sequences = txn_records.len(),
                "dropped batch records with no terminator"
            );
        }
        Ok(max_seq)
    }

    fn replay_file(
        &self,
        state: &mut DbState,
        file: &DataFile,
        txn_records: &mut HashMap<u64, Vec<TxnRecord>>,
        max_seq: &mut u64,
        strict: bool,
    ) -> Result<u64> {
        let file_id = file.file_id();
        let mut offset = 0;
        while let Some((record, size)) = file.read_record(offset)? {
            let pos = Position {
                file_id,
                offset,
                size: size as u32,
            };
            let (key, seq_no) = decode_key_with_seq(&record.key)?;
            if seq_no > *max_seq {
                *max_seq = seq_no;
            }

            if seq_no == NON_TXN_SEQ_NO {
                self.update_index(state, &key, pos, record.rec_type, strict)?;
            } else {
                match record.rec_type {
                    RecordType::TxnFinished => {
                        if let Some(staged) = txn_records.remove(&seq_no) {
                            for txn in staged {
                                self.update_index(state, &txn.key, txn.pos, txn.rec_type, strict)?;
                            }
                        }
                    }
                    rec_type => txn_records.entry(seq_no).or_default().push(TxnRecord {
                        key,
                        pos,
                        rec_type,
                    }),
                }
            }

            offset += size;
        }
        Ok(offset)
    }

    fn update_index(
        &self,
        state: &mut DbState,
        key: &[u8],
        pos: Position,
        rec_type: RecordType,
        strict: bool,
    ) -> Result<()> {
        match rec_type {
            RecordType::Normal => {
                if let Some(old) = self.index.put(key, pos)? {
                    state.reclaim_size += old.size as u64;
                }
            }
            RecordType::Deleted => {
                state.reclaim_size += pos.size as u64;
                match self.index.delete(key)? {
                    Some(old) => state.reclaim_size += old.size as u64,
                    None if strict => return Err(Error::IndexUpdateFailed),
                    None => {}
                }
            }
            RecordType::TxnFinished => {}
        }
        Ok(())
    }

    /// Reads and deletes the persisted sequence counter, if present.
    fn load_seq_no(&self) -> Result<Option<u64>> {
        let path = self.config.dir_path.join(SEQ_NO_FILE_NAME);
        if !path.is_file() {
            return Ok(None);
        }

        let file = DataFile::open_seq_no_file(&self.config.dir_path)?;
        let Some((record, _)) = file.read_record(0)? else {
            return Ok(None);
        };
        let seq_no = std::str::from_utf8(&record.value)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::DataFileCorrupted("invalid seq-no record".to_string()))?;
        drop(file);
        fs::remove_file(&path)?;
        Ok(Some(seq_no))
    }

    /// Reverts every data file from mmap back to standard file IO once
    /// recovery is done.
    fn reset_io_type(&self, state: &mut DbState) -> Result<()> {
        if let Some(active) = state.active_file.as_mut() {
            active.reset_io(&self.config.dir_path, IoType::Standard)?;
        }
        let ids: Vec<u32> = state.older_files.keys().copied().collect();
        for file_id in ids {
            let file = DataFile::open(&self.config.dir_path, file_id, IoType::Standard)?;
            state.older_files.insert(file_id, Arc::new(file));
        }
        Ok(())
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::error!(error = %err, "failed to close database");
        }
    }
}
