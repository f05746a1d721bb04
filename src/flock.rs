use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Advisory exclusive lock on a file, used to keep a data directory owned by
/// at most one engine instance across processes.
///
/// The lock file contains the process id for debugging. The OS releases the
/// lock when the file handle is closed, so dropping the guard is enough.
pub struct DirLock {
    _file: File,
    path: PathBuf,
}

impl DirLock {
    /// Creates the lock file if needed and acquires the lock without
    /// blocking. Fails with `WouldBlock` if another process holds it.
    pub fn acquire<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        Self::try_lock(&file)?;

        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { _file: file, path })
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> io::Result<()> {
        use std::os::unix::io::AsRawFd;

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    // Other platforms fall back to the create-only guarantee; the engine
    // still refuses to double-open within a process.
    #[cfg(not(unix))]
    fn try_lock(_file: &File) -> io::Result<()> {
        Ok(())
    }

    /// Releases the lock. The lock file itself is left in place so a
    /// concurrent open never races a removal.
    pub fn release(self) -> io::Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;

            let rc = unsafe { libc::flock(self._file.as_raw_fd(), libc::LOCK_UN) };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_and_release() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let lock_path = dir.path().join("flock");

        let lock = DirLock::acquire(&lock_path).expect("Failed to acquire lock");
        assert!(lock_path.exists());

        let content = std::fs::read_to_string(&lock_path).expect("Failed to read lock file");
        assert!(content.contains(&std::process::id().to_string()));

        lock.release().expect("Failed to release lock");

        // Re-acquirable after release; the lock file sticks around.
        let _lock = DirLock::acquire(&lock_path).expect("Failed to re-acquire lock");
        assert!(lock_path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_release_on_drop() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let lock_path = dir.path().join("flock");

        {
            let _lock = DirLock::acquire(&lock_path).expect("Failed to acquire lock");
            assert!(lock_path.exists());
        }

        let _lock = DirLock::acquire(&lock_path).expect("Should re-acquire after drop");
    }

    #[test]
    fn test_lock_path() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let lock_path = dir.path().join("flock");

        let lock = DirLock::acquire(&lock_path).expect("Failed to acquire lock");
        assert_eq!(lock.path(), lock_path.as_path());
    }
}
