//! Log record codec.
//!
//! Every mutation is persisted as one record in an append-only data file:
//!
//! ```text
//! [crc32: u32 LE][type: u8][key_size: varint][value_size: varint][key][value]
//! ```
//!
//! The sizes are zigzag-encoded signed varints, so the header is between 7
//! and 15 bytes. The checksum is the CRC-32/IEEE of everything after the
//! checksum field. A header that decodes to all zeroes marks the end of the
//! file during recovery.

use byteorder::{ByteOrder, LittleEndian};
use crc::{Crc, CRC_32_ISO_HDLC};

use crate::error::{Error, Result};

use super::varint::{decode_uvarint, decode_varint, encode_uvarint, encode_varint, MAX_VARINT_LEN32};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Width of the checksum field.
pub const CRC_SIZE: usize = 4;

/// Largest possible header: crc + type + two 5-byte size varints.
pub const MAX_HEADER_SIZE: usize = CRC_SIZE + 1 + 2 * MAX_VARINT_LEN32;

/// Kind of a persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    /// A live key/value pair.
    Normal = 0,
    /// A tombstone; the key is gone.
    Deleted = 1,
    /// Terminator proving all records of its sequence were written.
    TxnFinished = 2,
}

impl RecordType {
    pub fn from_u8(b: u8) -> Result<Self> {
        match b {
            0 => Ok(RecordType::Normal),
            1 => Ok(RecordType::Deleted),
            2 => Ok(RecordType::TxnFinished),
            other => Err(Error::DataFileCorrupted(format!(
                "unknown record type {other}"
            ))),
        }
    }
}

/// A single log record as written to a data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub rec_type: RecordType,
}

impl LogRecord {
    /// Encodes the record, returning the bytes and their length. The
    /// checksum is back-patched over everything after the crc field.
    pub fn encode(&self) -> (Vec<u8>, u64) {
        let mut buf = Vec::with_capacity(MAX_HEADER_SIZE + self.key.len() + self.value.len());
        buf.extend_from_slice(&[0u8; CRC_SIZE]);
        buf.push(self.rec_type as u8);
        encode_varint(&mut buf, self.key.len() as i64);
        encode_varint(&mut buf, self.value.len() as i64);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let crc = CRC32.checksum(&buf[CRC_SIZE..]);
        LittleEndian::write_u32(&mut buf[..CRC_SIZE], crc);

        let size = buf.len() as u64;
        (buf, size)
    }
}

/// Decoded record header. The type byte stays raw until the checksum has
/// been verified.
#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    pub crc: u32,
    pub rec_type: u8,
    pub key_size: u32,
    pub value_size: u32,
}

/// Decodes a record header from the front of `buf`. Returns the header and
/// its encoded length, or `None` for a buffer too short to hold one or for
/// the all-zero header that marks end of file.
pub fn decode_header(buf: &[u8]) -> Option<(RecordHeader, usize)> {
    if buf.len() <= CRC_SIZE {
        return None;
    }
    let crc = LittleEndian::read_u32(&buf[..CRC_SIZE]);
    let rec_type = buf[CRC_SIZE];

    let mut idx = CRC_SIZE + 1;
    let (key_size, n) = decode_varint(&buf[idx..])?;
    idx += n;
    let (value_size, n) = decode_varint(&buf[idx..])?;
    idx += n;

    if crc == 0 && key_size == 0 && value_size == 0 {
        return None;
    }

    Some((
        RecordHeader {
            crc,
            rec_type,
            key_size: key_size as u32,
            value_size: value_size as u32,
        },
        idx,
    ))
}

/// CRC-32/IEEE over the header bytes after the checksum field, then the key,
/// then the value.
pub fn record_crc(header_tail: &[u8], key: &[u8], value: &[u8]) -> u32 {
    let mut digest = CRC32.digest();
    digest.update(header_tail);
    digest.update(key);
    digest.update(value);
    digest.finalize()
}

/// Location of a record on disk. `size` is the full encoded record length,
/// kept for reclaim accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub file_id: u32,
    pub offset: u64,
    pub size: u32,
}

impl Position {
    /// Binary encoding used for hint-file values and the disk-resident index.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(3 * MAX_VARINT_LEN32);
        encode_varint(&mut buf, self.file_id as i64);
        encode_varint(&mut buf, self.offset as i64);
        encode_varint(&mut buf, self.size as i64);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let corrupt = || Error::DataFileCorrupted("truncated record position".to_string());
        let (file_id, n) = decode_varint(buf).ok_or_else(corrupt)?;
        let (offset, m) = decode_varint(&buf[n..]).ok_or_else(corrupt)?;
        let (size, _) = decode_varint(&buf[n + m..]).ok_or_else(corrupt)?;
        Ok(Position {
            file_id: file_id as u32,
            offset: offset as u64,
            size: size as u32,
        })
    }
}

/// Prefixes `key` with the unsigned-varint sequence number it was written
/// under. Sequence 0 marks a record outside any batch.
pub fn encode_key_with_seq(key: &[u8], seq_no: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_VARINT_LEN32 + key.len());
    encode_uvarint(&mut buf, seq_no);
    buf.extend_from_slice(key);
    buf
}

/// Splits a stored key into the user key and its sequence number.
pub fn decode_key_with_seq(buf: &[u8]) -> Result<(Vec<u8>, u64)> {
    let (seq_no, n) = decode_uvarint(buf)
        .ok_or_else(|| Error::DataFileCorrupted("truncated key sequence prefix".to_string()))?;
    Ok((buf[n..].to_vec(), seq_no))
}
