//! emberdb is an embeddable key-value storage engine built on the Bitcask
//! model: an append-only log of records on disk, paired with an in-memory
//! index from key to the exact on-disk location of that key's latest value.
//!
//! It supports point reads and writes, deletes, ordered (and prefix-
//! filtered) iteration, atomic multi-key write batches, and background
//! compaction that reclaims the space of stale records.
//!
//! ```no_run
//! use emberdb::{Config, Db};
//!
//! let db = Db::open(Config::new("/tmp/emberdb")).unwrap();
//! db.put(b"hello", b"world").unwrap();
//! assert_eq!(db.get(b"hello").unwrap(), b"world");
//! db.close().unwrap();
//! ```

pub mod batch;
pub mod config;
pub mod data;
pub mod db;
pub mod error;
pub mod fio;
pub mod flock;
pub mod index;
pub mod iterator;
pub mod merge;
pub mod util;

pub use batch::WriteBatch;
pub use config::{BatchConfig, Config, IteratorConfig};
pub use db::{Db, Stat};
pub use error::{Error, Result};
pub use index::IndexType;
pub use iterator::DbIterator;
