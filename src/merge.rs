use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::batch::NON_TXN_SEQ_NO;
use crate::config::Config;
use crate::data::file::{
    DataFile, DATA_FILE_SUFFIX, HINT_FILE_NAME, MERGE_FIN_FILE_NAME,
};
use crate::data::record::{
    decode_key_with_seq, encode_key_with_seq, LogRecord, Position, RecordType,
};
use crate::db::Db;
use crate::error::{Error, Result};
use crate::index::IndexType;

const MERGE_DIR_SUFFIX: &str = "-merge";
const MERGE_FIN_KEY: &[u8] = b"merge-fin";

/// The scratch directory a merge writes into: a sibling of the data
/// directory with `-merge` appended to its name.
fn merge_path(dir_path: &Path) -> PathBuf {
    let mut name = dir_path.file_name().unwrap_or_default().to_os_string();
    name.push(MERGE_DIR_SUFFIX);
    match dir_path.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

impl Db {
    /// Compacts the frozen files: every record still referenced by the index
    /// is rewritten into a scratch engine next to the data directory, along
    /// with a hint file mapping each live key to its new position. The
    /// merged output replaces the old files at the next open.
    ///
    /// Writes keep flowing while the merge runs; only the initial rotation
    /// holds the engine lock.
    pub fn merge(&self) -> Result<()> {
        let (boundary_file_id, merge_files) = {
            let mut state = self.state.write();
            if state.active_file.is_none() {
                return Ok(());
            }
            if state.is_merging {
                return Err(Error::MergeInProgress);
            }
            state.is_merging = true;

            // Freeze the tail of the log. Everything below the new active
            // file takes part in the merge.
            let boundary_file_id = match self.rotate_active_file(&mut state) {
                Ok(id) => id,
                Err(err) => {
                    state.is_merging = false;
                    return Err(err);
                }
            };

            let mut files: Vec<Arc<DataFile>> = state.older_files.values().cloned().collect();
            files.sort_unstable_by_key(|file| file.file_id());
            (boundary_file_id, files)
        };

        tracing::info!(
            boundary = boundary_file_id,
            files = merge_files.len(),
            "merge started"
        );
        let result = self.rewrite_live_records(boundary_file_id, &merge_files);
        self.state.write().is_merging = false;

        match &result {
            Ok(()) => tracing::info!(boundary = boundary_file_id, "merge finished"),
            Err(err) => tracing::error!(error = %err, "merge failed"),
        }
        result
    }

    fn rewrite_live_records(
        &self,
        boundary_file_id: u32,
        merge_files: &[Arc<DataFile>],
    ) -> Result<()> {
        let merge_dir = merge_path(&self.config.dir_path);
        if merge_dir.exists() {
            fs::remove_dir_all(&merge_dir)?;
        }
        fs::create_dir_all(&merge_dir)?;

        // A private engine writes the surviving records. Durability comes
        // from the explicit syncs below, and its in-memory index is thrown
        // away, so the cheapest settings do.
        let merge_db = Db::open(merge_engine_config(&self.config, &merge_dir))?;
        let mut hint_file = DataFile::open_hint_file(&merge_dir)?;

        for file in merge_files {
            let mut offset = 0;
            while let Some((record, size)) = file.read_record(offset)? {
                let (key, _) = decode_key_with_seq(&record.key)?;

                // A record is live iff the index still points at this exact
                // spot. Tombstones and overwritten versions never match.
                let live = self
                    .index
                    .get(&key)?
                    .is_some_and(|pos| pos.file_id == file.file_id() && pos.offset == offset);
                if live {
                    let rewritten = LogRecord {
                        key: encode_key_with_seq(&key, NON_TXN_SEQ_NO),
                        value: record.value,
                        rec_type: record.rec_type,
                    };
                    let new_pos = {
                        let mut merge_state = merge_db.state.write();
                        merge_db.append_log_record(&mut merge_state, &rewritten)?
                    };
                    hint_file.write_hint_record(&key, new_pos)?;
                }

                offset += size;
            }
        }

        hint_file.sync()?;
        merge_db.sync()?;

        // The marker makes the merge adoptable: without it the next open
        // ignores the scratch directory entirely.
        let mut fin_file = DataFile::open_merge_fin_file(&merge_dir)?;
        let fin_record = LogRecord {
            key: MERGE_FIN_KEY.to_vec(),
            value: boundary_file_id.to_string().into_bytes(),
            rec_type: RecordType::Normal,
        };
        let (encoded, _) = fin_record.encode();
        fin_file.write(&encoded)?;
        fin_file.sync()?;

        Ok(())
    }

    /// Adopts a completed merge during open: drops the pre-merge files and
    /// moves the merged data files, the hint file and the boundary marker
    /// into the data directory. The scratch directory is removed either way.
    /// Returns whether output was adopted.
    pub(crate) fn load_merge_files(&self) -> Result<bool> {
        let merge_dir = merge_path(&self.config.dir_path);
        if !merge_dir.is_dir() {
            return Ok(false);
        }

        let adopted = self.adopt_merge_output(&merge_dir);
        let removed = fs::remove_dir_all(&merge_dir);
        let adopted = adopted?;
        removed?;
        if adopted {
            tracing::info!(dir = %self.config.dir_path.display(), "adopted merged data files");
        }
        Ok(adopted)
    }

    fn adopt_merge_output(&self, merge_dir: &Path) -> Result<bool> {
        let mut merge_finished = false;
        let mut data_file_names = Vec::new();
        for entry in fs::read_dir(merge_dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if name == MERGE_FIN_FILE_NAME {
                merge_finished = true;
            }
            if name.ends_with(DATA_FILE_SUFFIX) {
                data_file_names.push(name);
            }
        }
        if !merge_finished {
            // An interrupted merge; its scratch output is dead weight.
            return Ok(false);
        }

        let boundary_file_id = self.non_merge_file_id(merge_dir)?;

        // The merged output supersedes every pre-merge file.
        for file_id in 0..boundary_file_id {
            let path = DataFile::data_file_path(&self.config.dir_path, file_id);
            if path.is_file() {
                fs::remove_file(path)?;
            }
        }

        for name in data_file_names {
            fs::rename(merge_dir.join(&name), self.config.dir_path.join(&name))?;
        }
        for name in [HINT_FILE_NAME, MERGE_FIN_FILE_NAME] {
            let source = merge_dir.join(name);
            if source.is_file() {
                fs::rename(source, self.config.dir_path.join(name))?;
            }
        }

        Ok(true)
    }

    /// Reads the id of the first file that did not take part in the last
    /// completed merge from the `merge-fin` marker in `dir`.
    pub(crate) fn non_merge_file_id(&self, dir: &Path) -> Result<u32> {
        let fin_file = DataFile::open_merge_fin_file(dir)?;
        let Some((record, _)) = fin_file.read_record(0)? else {
            return Err(Error::DataFileCorrupted(
                "empty merge-fin marker".to_string(),
            ));
        };
        std::str::from_utf8(&record.value)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::DataFileCorrupted("invalid merge-fin marker".to_string()))
    }

    /// Seeds the index from the hint file left by the last merge, saving a
    /// full replay of the merged files.
    pub(crate) fn load_index_from_hint_file(&self) -> Result<()> {
        let path = self.config.dir_path.join(HINT_FILE_NAME);
        if !path.is_file() {
            return Ok(());
        }

        let hint_file = DataFile::open_hint_file(&self.config.dir_path)?;
        let mut offset = 0;
        while let Some((record, size)) = hint_file.read_record(offset)? {
            let pos = Position::decode(&record.value)?;
            self.index.put(&record.key, pos)?;
            offset += size;
        }
        Ok(())
    }
}

/// Settings for the scratch engine inside the merge directory.
fn merge_engine_config(config: &Config, merge_dir: &Path) -> Config {
    let mut merge_config = config.clone();
    merge_config.dir_path = merge_dir.to_path_buf();
    merge_config.sync_writes = false;
    merge_config.index_type = IndexType::BTree;
    merge_config
}
