use crate::config::IteratorConfig;
use crate::db::Db;
use crate::error::Result;
use crate::index::IndexIterator;

/// Ordered iterator over the engine, with an optional key-prefix filter.
///
/// Positions come from a snapshot of the index taken at construction;
/// concurrent mutations are not observed. Values are resolved lazily from
/// disk on each `value` call.
pub struct DbIterator<'a> {
    db: &'a Db,
    index_iter: Box<dyn IndexIterator>,
    config: IteratorConfig,
}

impl Db {
    /// Opens an iterator positioned at the first matching key.
    pub fn iterator(&self, config: IteratorConfig) -> Result<DbIterator<'_>> {
        let index_iter = self.index.iterator(config.reverse)?;
        let mut iter = DbIterator {
            db: self,
            index_iter,
            config,
        };
        iter.skip_to_next();
        Ok(iter)
    }
}

impl DbIterator<'_> {
    /// Back to the first matching key.
    pub fn rewind(&mut self) {
        self.index_iter.rewind();
        self.skip_to_next();
    }

    /// Moves to the first matching key >= `key` (forward) or <= `key`
    /// (reverse).
    pub fn seek(&mut self, key: &[u8]) {
        self.index_iter.seek(key);
        self.skip_to_next();
    }

    /// Advances to the next matching key.
    pub fn next(&mut self) {
        self.index_iter.next();
        self.skip_to_next();
    }

    /// Whether the iterator currently points at a key.
    pub fn valid(&self) -> bool {
        self.index_iter.valid()
    }

    /// Key at the current entry. Panics if the iterator is exhausted.
    pub fn key(&self) -> &[u8] {
        self.index_iter.key()
    }

    /// Value at the current entry, read from its data file.
    pub fn value(&self) -> Result<Vec<u8>> {
        let pos = self.index_iter.value();
        let state = self.db.state.read();
        self.db.get_value_by_position(&state, pos)
    }

    /// Advances until the current key carries the configured prefix, or the
    /// iterator is exhausted.
    fn skip_to_next(&mut self) {
        let prefix = &self.config.prefix;
        if prefix.is_empty() {
            return;
        }
        while self.index_iter.valid() {
            if self.index_iter.key().starts_with(prefix) {
                break;
            }
            self.index_iter.next();
        }
    }
}
