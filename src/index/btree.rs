use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::data::record::Position;
use crate::error::Result;

use super::{IndexIterator, Indexer, SnapshotIterator};

/// Default index: an ordered balanced tree behind a reader-writer lock.
pub struct BTreeIndex {
    tree: RwLock<BTreeMap<Vec<u8>, Position>>,
}

impl BTreeIndex {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for BTreeIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Indexer for BTreeIndex {
    fn put(&self, key: &[u8], pos: Position) -> Result<Option<Position>> {
        Ok(self.tree.write().insert(key.to_vec(), pos))
    }

    fn get(&self, key: &[u8]) -> Result<Option<Position>> {
        Ok(self.tree.read().get(key).copied())
    }

    fn delete(&self, key: &[u8]) -> Result<Option<Position>> {
        Ok(self.tree.write().remove(key))
    }

    fn len(&self) -> usize {
        self.tree.read().len()
    }

    fn iterator(&self, reverse: bool) -> Result<Box<dyn IndexIterator>> {
        let items: Vec<_> = self
            .tree
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        Ok(Box::new(SnapshotIterator::new(items, reverse)))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(file_id: u32, offset: u64) -> Position {
        Position {
            file_id,
            offset,
            size: 24,
        }
    }

    #[test]
    fn test_put_returns_previous_binding() {
        let index = BTreeIndex::new();
        assert_eq!(index.put(b"k", pos(0, 0)).unwrap(), None);
        assert_eq!(index.put(b"k", pos(0, 24)).unwrap(), Some(pos(0, 0)));
        assert_eq!(index.get(b"k").unwrap(), Some(pos(0, 24)));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_get_missing() {
        let index = BTreeIndex::new();
        assert_eq!(index.get(b"missing").unwrap(), None);
    }

    #[test]
    fn test_delete() {
        let index = BTreeIndex::new();
        index.put(b"k", pos(1, 100)).unwrap();

        assert_eq!(index.delete(b"k").unwrap(), Some(pos(1, 100)));
        assert_eq!(index.get(b"k").unwrap(), None);
        assert_eq!(index.delete(b"k").unwrap(), None);
        assert!(index.is_empty());
    }

    #[test]
    fn test_iterator_is_ordered_snapshot() {
        let index = BTreeIndex::new();
        index.put(b"banana", pos(0, 1)).unwrap();
        index.put(b"apple", pos(0, 0)).unwrap();
        index.put(b"cherry", pos(0, 2)).unwrap();

        let mut it = index.iterator(false).unwrap();
        assert_eq!(it.key(), b"apple");

        // Mutations after construction stay invisible to the snapshot.
        index.put(b"apricot", pos(0, 3)).unwrap();

        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(keys, vec![b"apple".to_vec(), b"banana".to_vec(), b"cherry".to_vec()]);
    }

    #[test]
    fn test_reverse_iterator() {
        let index = BTreeIndex::new();
        index.put(b"a", pos(0, 0)).unwrap();
        index.put(b"b", pos(0, 1)).unwrap();

        let mut it = index.iterator(true).unwrap();
        assert_eq!(it.key(), b"b");
        it.next();
        assert_eq!(it.key(), b"a");
        it.next();
        assert!(!it.valid());
    }
}
