use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::fio::{self, IoManager, IoType};

use super::record::{
    decode_header, record_crc, LogRecord, Position, RecordType, CRC_SIZE, MAX_HEADER_SIZE,
};

pub const DATA_FILE_SUFFIX: &str = ".data";
pub const HINT_FILE_NAME: &str = "hint-index";
pub const MERGE_FIN_FILE_NAME: &str = "merge-fin";
pub const SEQ_NO_FILE_NAME: &str = "seq-no";

/// A numbered append-only data file: an IO manager plus the offset the next
/// append lands at.
pub struct DataFile {
    file_id: u32,
    write_off: u64,
    io: Box<dyn IoManager>,
}

impl DataFile {
    /// Opens the data file with the given id inside `dir`.
    pub fn open(dir: &Path, file_id: u32, io_type: IoType) -> Result<Self> {
        Self::open_path(&Self::data_file_path(dir, file_id), file_id, io_type)
    }

    /// Opens the hint file, which stores key-to-position records emitted by
    /// a merge.
    pub fn open_hint_file(dir: &Path) -> Result<Self> {
        Self::open_path(&dir.join(HINT_FILE_NAME), 0, IoType::Standard)
    }

    /// Opens the marker file recording the first file id outside a completed
    /// merge.
    pub fn open_merge_fin_file(dir: &Path) -> Result<Self> {
        Self::open_path(&dir.join(MERGE_FIN_FILE_NAME), 0, IoType::Standard)
    }

    /// Opens the file persisting the last-used sequence number across a
    /// clean shutdown.
    pub fn open_seq_no_file(dir: &Path) -> Result<Self> {
        Self::open_path(&dir.join(SEQ_NO_FILE_NAME), 0, IoType::Standard)
    }

    fn open_path(path: &Path, file_id: u32, io_type: IoType) -> Result<Self> {
        let io = fio::open(path, io_type)?;
        Ok(Self {
            file_id,
            write_off: 0,
            io,
        })
    }

    /// Full path of the data file with the given id: nine zero-padded
    /// decimal digits plus the `.data` suffix.
    pub fn data_file_path(dir: &Path, file_id: u32) -> PathBuf {
        dir.join(format!("{file_id:09}{DATA_FILE_SUFFIX}"))
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    pub fn write_off(&self) -> u64 {
        self.write_off
    }

    pub fn set_write_off(&mut self, offset: u64) {
        self.write_off = offset;
    }

    /// Reads the full record at `offset`, returning it together with its
    /// encoded size. `Ok(None)` means a clean end of file: a zero header, or
    /// a tail truncated mid-record by a crash.
    pub fn read_record(&self, offset: u64) -> Result<Option<(LogRecord, u64)>> {
        let file_size = self.io.size()?;
        if offset >= file_size {
            return Ok(None);
        }

        // Clamp the header probe to the end of the file.
        let header_len = (MAX_HEADER_SIZE as u64).min(file_size - offset) as usize;
        let mut header_buf = vec![0u8; header_len];
        let n = self.io.read(&mut header_buf, offset)?;
        header_buf.truncate(n);

        let Some((header, header_size)) = decode_header(&header_buf) else {
            return Ok(None);
        };

        let key_size = header.key_size as usize;
        let value_size = header.value_size as usize;

        let mut key = Vec::new();
        let mut value = Vec::new();
        if key_size + value_size > 0 {
            let mut kv = vec![0u8; key_size + value_size];
            let n = self.io.read(&mut kv, offset + header_size as u64)?;
            if n < kv.len() {
                // Crash mid-write left a partial record at the tail.
                return Ok(None);
            }
            value = kv.split_off(key_size);
            key = kv;
        }

        let crc = record_crc(&header_buf[CRC_SIZE..header_size], &key, &value);
        if crc != header.crc {
            return Err(Error::InvalidCrc);
        }

        let record = LogRecord {
            key,
            value,
            rec_type: RecordType::from_u8(header.rec_type)?,
        };
        let total = header_size as u64 + key_size as u64 + value_size as u64;
        Ok(Some((record, total)))
    }

    /// Appends raw encoded bytes and advances the write offset.
    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        let n = self.io.write(buf)?;
        self.write_off += n as u64;
        Ok(())
    }

    /// Appends a hint record: the user key bound to its encoded position.
    pub fn write_hint_record(&mut self, key: &[u8], pos: Position) -> Result<()> {
        let record = LogRecord {
            key: key.to_vec(),
            value: pos.encode(),
            rec_type: RecordType::Normal,
        };
        let (buf, _) = record.encode();
        self.write(&buf)
    }

    pub fn sync(&self) -> Result<()> {
        self.io.sync()
    }

    pub fn size(&self) -> Result<u64> {
        self.io.size()
    }

    /// Swaps the underlying IO manager, used to fall back from mmap to
    /// standard IO once startup recovery is done.
    pub fn reset_io(&mut self, dir: &Path, io_type: IoType) -> Result<()> {
        self.io = fio::open(&Self::data_file_path(dir, self.file_id), io_type)?;
        Ok(())
    }
}
