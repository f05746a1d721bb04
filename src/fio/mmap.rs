use std::fs::File;
use std::io;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{Error, Result};

use super::IoManager;

/// Read-only memory-mapped file IO. Built for startup recovery, where the
/// whole file is scanned sequentially; the engine reverts every file to
/// standard IO once recovery finishes.
pub struct MmapIo {
    // A zero-length file cannot be mapped, so an empty file carries no map.
    map: Option<Mmap>,
}

impl MmapIo {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::options().create(true).read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        let map = if len == 0 {
            None
        } else {
            Some(unsafe { Mmap::map(&file)? })
        };
        Ok(Self { map })
    }

    fn unsupported(op: &str) -> Error {
        Error::Io(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("{op} is not supported on a read-only mmap"),
        ))
    }
}

impl IoManager for MmapIo {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let Some(map) = &self.map else {
            return Ok(0);
        };
        let len = map.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let end = (offset + buf.len() as u64).min(len);
        let n = (end - offset) as usize;
        buf[..n].copy_from_slice(&map[offset as usize..end as usize]);
        Ok(n)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize> {
        Err(Self::unsupported("write"))
    }

    fn sync(&self) -> Result<()> {
        Err(Self::unsupported("sync"))
    }

    fn size(&self) -> Result<u64> {
        Ok(self.map.as_ref().map_or(0, |m| m.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fio::StandardIo;
    use tempfile::TempDir;

    #[test]
    fn test_read_through_map() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("000000000.data");
        {
            let mut io = StandardIo::open(&path).unwrap();
            io.write(b"mapped bytes").unwrap();
            io.sync().unwrap();
        }

        let io = MmapIo::open(&path).unwrap();
        assert_eq!(io.size().unwrap(), 12);

        let mut buf = [0u8; 6];
        assert_eq!(io.read(&mut buf, 0).unwrap(), 6);
        assert_eq!(&buf, b"mapped");

        // Clamped at end of file.
        let mut buf = [0u8; 16];
        assert_eq!(io.read(&mut buf, 7).unwrap(), 5);
        assert_eq!(&buf[..5], b"bytes");

        assert_eq!(io.read(&mut buf, 12).unwrap(), 0);
    }

    #[test]
    fn test_empty_file() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let io = MmapIo::open(&dir.path().join("000000000.data")).unwrap();
        assert_eq!(io.size().unwrap(), 0);

        let mut buf = [0u8; 4];
        assert_eq!(io.read(&mut buf, 0).unwrap(), 0);
    }

    #[test]
    fn test_writes_rejected() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut io = MmapIo::open(&dir.path().join("000000000.data")).unwrap();
        assert!(io.write(b"nope").is_err());
        assert!(io.sync().is_err());
    }
}
