use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::error::Result;

use super::IoManager;

/// Standard buffered file IO: positional reads plus append-only writes
/// against a read+write+create handle with permission 0644.
pub struct StandardIo {
    file: File,
}

impl StandardIo {
    pub fn open(path: &Path) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.create(true).read(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o644);
        }
        let file = options.open(path)?;
        Ok(Self { file })
    }

    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        use std::os::unix::fs::FileExt;
        self.file.read_at(buf, offset)
    }

    #[cfg(windows)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        use std::os::windows::fs::FileExt;
        self.file.seek_read(buf, offset)
    }
}

impl IoManager for StandardIo {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        // Positional reads may return short; keep filling until EOF.
        let mut total = 0;
        while total < buf.len() {
            let n = self.read_at(&mut buf[total..], offset + total as u64)?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        use std::io::Write;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}
