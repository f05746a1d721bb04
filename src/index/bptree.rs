use std::path::Path;

use crate::data::record::Position;
use crate::error::Result;

use super::{IndexIterator, Indexer, SnapshotIterator};

/// Directory under the data directory holding the persistent index.
pub const BPTREE_INDEX_DIR: &str = "bptree-index";

/// Disk-resident index backed by an embedded ordered store. Bindings survive
/// restarts, so startup recovery skips the data-file replay entirely.
pub struct BPlusTreeIndex {
    db: sled::Db,
    sync_writes: bool,
}

impl BPlusTreeIndex {
    /// Opens (or creates) the persistent index under `dir_path`.
    pub fn open(dir_path: &Path, sync_writes: bool) -> Result<Self> {
        let db = sled::Config::default()
            .path(dir_path.join(BPTREE_INDEX_DIR))
            .open()?;
        Ok(Self { db, sync_writes })
    }

    fn maybe_flush(&self) -> Result<()> {
        if self.sync_writes {
            self.db.flush()?;
        }
        Ok(())
    }

    fn decode(value: sled::IVec) -> Result<Position> {
        Position::decode(&value)
    }
}

impl Indexer for BPlusTreeIndex {
    fn put(&self, key: &[u8], pos: Position) -> Result<Option<Position>> {
        let old = self.db.insert(key, pos.encode())?;
        self.maybe_flush()?;
        old.map(Self::decode).transpose()
    }

    fn get(&self, key: &[u8]) -> Result<Option<Position>> {
        self.db.get(key)?.map(Self::decode).transpose()
    }

    fn delete(&self, key: &[u8]) -> Result<Option<Position>> {
        let old = self.db.remove(key)?;
        self.maybe_flush()?;
        old.map(Self::decode).transpose()
    }

    fn len(&self) -> usize {
        self.db.len()
    }

    fn iterator(&self, reverse: bool) -> Result<Box<dyn IndexIterator>> {
        let mut items = Vec::with_capacity(self.db.len());
        for entry in self.db.iter() {
            let (key, value) = entry?;
            items.push((key.to_vec(), Self::decode(value)?));
        }
        Ok(Box::new(SnapshotIterator::new(items, reverse)))
    }

    fn close(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pos(offset: u64) -> Position {
        Position {
            file_id: 2,
            offset,
            size: 48,
        }
    }

    #[test]
    fn test_put_get_delete() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let index = BPlusTreeIndex::open(dir.path(), false).unwrap();

        assert_eq!(index.put(b"k", pos(0)).unwrap(), None);
        assert_eq!(index.put(b"k", pos(48)).unwrap(), Some(pos(0)));
        assert_eq!(index.get(b"k").unwrap(), Some(pos(48)));
        assert_eq!(index.len(), 1);

        assert_eq!(index.delete(b"k").unwrap(), Some(pos(48)));
        assert_eq!(index.get(b"k").unwrap(), None);
        assert_eq!(index.delete(b"k").unwrap(), None);
    }

    #[test]
    fn test_bindings_survive_reopen() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        {
            let index = BPlusTreeIndex::open(dir.path(), true).unwrap();
            index.put(b"persisted", pos(96)).unwrap();
            index.close().unwrap();
        }
        let index = BPlusTreeIndex::open(dir.path(), true).unwrap();
        assert_eq!(index.get(b"persisted").unwrap(), Some(pos(96)));
    }

    #[test]
    fn test_iterator_order_and_seek() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let index = BPlusTreeIndex::open(dir.path(), false).unwrap();
        index.put(b"c", pos(2)).unwrap();
        index.put(b"a", pos(0)).unwrap();
        index.put(b"b", pos(1)).unwrap();

        let mut it = index.iterator(false).unwrap();
        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

        let mut it = index.iterator(true).unwrap();
        it.seek(b"b");
        assert_eq!(it.key(), b"b");
        it.next();
        assert_eq!(it.key(), b"a");
    }
}
