use std::collections::HashMap;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;

use crate::config::BatchConfig;
use crate::data::record::{encode_key_with_seq, LogRecord, Position, RecordType};
use crate::db::Db;
use crate::error::{Error, Result};
use crate::index::IndexType;

/// Sequence number carried by records written outside any batch.
pub(crate) const NON_TXN_SEQ_NO: u64 = 0;

/// User-visible key of the batch terminator record.
pub(crate) const TXN_FIN_KEY: &[u8] = b"txn-fin";

/// A set of writes applied atomically.
///
/// Puts and deletes are staged in memory; nothing touches disk before
/// `commit`. A committed batch shares one freshly allocated sequence number
/// across all of its records and becomes durable with the terminator record:
/// recovery discards any batch whose terminator never made it to disk.
/// Dropping the batch without committing discards the staged writes.
pub struct WriteBatch<'a> {
    db: &'a Db,
    pending: Mutex<HashMap<Vec<u8>, LogRecord>>,
    config: BatchConfig,
}

impl Db {
    /// Creates an empty write batch over this engine.
    pub fn new_batch(&self, config: BatchConfig) -> Result<WriteBatch<'_>> {
        if self.config.index_type == IndexType::BPlusTree {
            // Without replay the engine only knows the current sequence from
            // the seq-no file; a crash lost it, so batches would reuse
            // sequence numbers.
            let state = self.state.read();
            if !state.seq_no_file_exists && !state.is_initial {
                return Err(Error::BatchNotAvailable);
            }
        }
        Ok(WriteBatch {
            db: self,
            pending: Mutex::new(HashMap::new()),
            config,
        })
    }
}

impl WriteBatch<'_> {
    /// Stages a put, replacing any staged write for the same key.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        self.pending.lock().insert(
            key.to_vec(),
            LogRecord {
                key: key.to_vec(),
                value: value.to_vec(),
                rec_type: RecordType::Normal,
            },
        );
        Ok(())
    }

    /// Stages a delete. For a key the engine does not hold, this only drops
    /// any staged put for it.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let mut pending = self.pending.lock();
        if self.db.index.get(key)?.is_none() {
            pending.remove(key);
            return Ok(());
        }
        pending.insert(
            key.to_vec(),
            LogRecord {
                key: key.to_vec(),
                value: Vec::new(),
                rec_type: RecordType::Deleted,
            },
        );
        Ok(())
    }

    /// Number of staged writes.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Appends every staged record under one new sequence number, writes the
    /// terminator, then applies the effects to the index. The staging map is
    /// cleared on success.
    pub fn commit(&self) -> Result<()> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return Ok(());
        }
        if pending.len() > self.config.max_batch_size {
            return Err(Error::ExceedMaxBatchSize);
        }

        // Serialize against every other writer; the sequence allocation and
        // the record appends form one atomic block.
        let mut state = self.db.state.write();
        let seq_no = self.db.seq_no.fetch_add(1, Ordering::SeqCst) + 1;

        let mut positions: HashMap<&[u8], Position> = HashMap::with_capacity(pending.len());
        for (key, record) in pending.iter() {
            let pos = self.db.append_log_record(
                &mut state,
                &LogRecord {
                    key: encode_key_with_seq(key, seq_no),
                    value: record.value.clone(),
                    rec_type: record.rec_type,
                },
            )?;
            positions.insert(key.as_slice(), pos);
        }

        let terminator = LogRecord {
            key: encode_key_with_seq(TXN_FIN_KEY, seq_no),
            value: Vec::new(),
            rec_type: RecordType::TxnFinished,
        };
        self.db.append_log_record(&mut state, &terminator)?;

        if self.config.sync_writes {
            if let Some(active) = &state.active_file {
                active.sync()?;
            }
        }

        // Only now do the staged effects become visible.
        for (key, record) in pending.iter() {
            let Some(pos) = positions.get(key.as_slice()).copied() else {
                return Err(Error::IndexUpdateFailed);
            };
            match record.rec_type {
                RecordType::Normal => {
                    if let Some(old) = self.db.index.put(key, pos)? {
                        state.reclaim_size += old.size as u64;
                    }
                }
                RecordType::Deleted => {
                    state.reclaim_size += pos.size as u64;
                    if let Some(old) = self.db.index.delete(key)? {
                        state.reclaim_size += old.size as u64;
                    }
                }
                RecordType::TxnFinished => {}
            }
        }

        pending.clear();
        Ok(())
    }
}
