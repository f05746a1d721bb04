use std::fmt::Display;
use std::io;

/// emberdb errors.
#[derive(Debug)]
pub enum Error {
    /// A zero-length key was supplied.
    KeyIsEmpty,
    /// The key is not in the index, or its most recent record is a tombstone.
    KeyNotFound,
    /// The index references a data file id that is not part of the loaded set.
    DataFileNotFound,
    /// A data file could not be interpreted, typically an unparseable file
    /// name or an unknown record type.
    DataFileCorrupted(String),
    /// A record failed checksum verification on read.
    InvalidCrc,
    /// The index reported no prior binding where one was required.
    IndexUpdateFailed,
    /// A batch commit was attempted with more staged writes than the
    /// configured ceiling.
    ExceedMaxBatchSize,
    /// A merge is already running on this engine.
    MergeInProgress,
    /// The directory lock is held by another engine instance.
    DatabaseInUse,
    /// Write batches require the current sequence number, which this engine
    /// could not establish from the directory.
    BatchNotAvailable,
    /// Invalid engine configuration.
    InvalidConfig(String),
    /// The disk-resident index failed.
    Index(String),
    /// An IO error.
    Io(io::Error),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::KeyIsEmpty => write!(f, "key is empty"),
            Error::KeyNotFound => write!(f, "key not found in database"),
            Error::DataFileNotFound => write!(f, "data file not found in database"),
            Error::DataFileCorrupted(msg) => write!(f, "data file corrupted: {msg}"),
            Error::InvalidCrc => write!(f, "invalid crc value, log record may be corrupted"),
            Error::IndexUpdateFailed => write!(f, "failed to update index"),
            Error::ExceedMaxBatchSize => write!(f, "exceed the max batch size"),
            Error::MergeInProgress => write!(f, "merge is in progress, try again later"),
            Error::DatabaseInUse => write!(f, "the database directory is used by another process"),
            Error::BatchNotAvailable => {
                write!(f, "sequence number not available, cannot use write batch")
            }
            Error::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Error::Index(msg) => write!(f, "index error: {msg}"),
            Error::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

/// An emberdb Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        Error::Index(err.to_string())
    }
}
