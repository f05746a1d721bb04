use parking_lot::RwLock;
use radix_trie::{Trie, TrieCommon};

use crate::data::record::Position;
use crate::error::Result;

use super::{IndexIterator, Indexer, SnapshotIterator};

/// Radix-tree index. Keys sharing long prefixes store the shared bytes once,
/// which an ordered tree cannot do.
pub struct RadixIndex {
    tree: RwLock<Trie<Vec<u8>, Position>>,
}

impl RadixIndex {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(Trie::new()),
        }
    }
}

impl Default for RadixIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Indexer for RadixIndex {
    fn put(&self, key: &[u8], pos: Position) -> Result<Option<Position>> {
        Ok(self.tree.write().insert(key.to_vec(), pos))
    }

    fn get(&self, key: &[u8]) -> Result<Option<Position>> {
        Ok(self.tree.read().get(&key.to_vec()).copied())
    }

    fn delete(&self, key: &[u8]) -> Result<Option<Position>> {
        Ok(self.tree.write().remove(&key.to_vec()))
    }

    fn len(&self) -> usize {
        self.tree.read().len()
    }

    fn iterator(&self, reverse: bool) -> Result<Box<dyn IndexIterator>> {
        // Trie traversal yields byte keys in lexicographic order.
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

    fn pos(offset: u64) -> Position {
        Position {
            file_id: 0,
            offset,
            size: 32,
        }
    }

    #[test]
    fn test_put_get_delete() {
        let index = RadixIndex::new();
        assert_eq!(index.put(b"user:1", pos(0)).unwrap(), None);
        assert_eq!(index.put(b"user:1", pos(32)).unwrap(), Some(pos(0)));
        assert_eq!(index.get(b"user:1").unwrap(), Some(pos(32)));

        assert_eq!(index.delete(b"user:1").unwrap(), Some(pos(32)));
        assert_eq!(index.get(b"user:1").unwrap(), None);
        assert_eq!(index.delete(b"user:1").unwrap(), None);
    }

    #[test]
    fn test_shared_prefix_keys_stay_distinct() {
        let index = RadixIndex::new();
        index.put(b"app:config:host", pos(0)).unwrap();
        index.put(b"app:config:port", pos(32)).unwrap();
        index.put(b"app:config", pos(64)).unwrap();

        assert_eq!(index.len(), 3);
        assert_eq!(index.get(b"app:config:host").unwrap(), Some(pos(0)));
        assert_eq!(index.get(b"app:config:port").unwrap(), Some(pos(32)));
        assert_eq!(index.get(b"app:config").unwrap(), Some(pos(64)));
        assert_eq!(index.get(b"app:conf").unwrap(), None);
    }

    #[test]
    fn test_iterator_order() {
        let index = RadixIndex::new();
        index.put(b"user:2", pos(1)).unwrap();
        index.put(b"other", pos(2)).unwrap();
        index.put(b"user:1", pos(0)).unwrap();

        let mut it = index.iterator(false).unwrap();
        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(keys, vec![b"other".to_vec(), b"user:1".to_vec(), b"user:2".to_vec()]);

        let mut it = index.iterator(true).unwrap();
        assert_eq!(it.key(), b"user:2");
        it.seek(b"u");
        assert_eq!(it.key(), b"other");
    }
}
