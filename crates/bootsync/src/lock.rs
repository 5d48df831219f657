//! Advisory lock around group file updates.
//!
//! Several short-lived processes, one per card being brought up, may update
//! the group file at once. Each load-mutate-save cycle holds a [`GroupLock`];
//! the lock is released when the guard drops, on every exit path.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{BootError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Exclusive hold on the lock file.
#[derive(Debug)]
pub struct GroupLock {
    file: File,
    path: PathBuf,
}

impl GroupLock {
    /// Take the lock, retrying until `timeout` has passed.
    pub fn acquire(path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| BootError::io(parent, e))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| BootError::io(&path, e))?;

        let started = Instant::now();
        loop {
            // SAFETY: the descriptor belongs to `file`, which outlives the call.
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if rc == 0 {
                break;
            }

            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EWOULDBLOCK) | Some(libc::EINTR) => {}
                _ => return Err(BootError::io(&path, err)),
            }

            if started.elapsed() >= timeout {
                return Err(BootError::LockTimeout {
                    path,
                    waited_secs: timeout.as_secs(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        }

        let mut lock = Self { file, path };
        lock.write_owner()?;
        debug!(path = %lock.path.display(), "group lock acquired");
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_owner(&mut self) -> Result<()> {
        let pid = format!("{:>10}\n", std::process::id());
        self.file
            .set_len(0)
            .and_then(|_| self.file.seek(SeekFrom::Start(0)))
            .and_then(|_| self.file.write_all(pid.as_bytes()))
            .map_err(|e| BootError::io(&self.path, e))
    }
}

impl Drop for GroupLock {
    fn drop(&mut self) {
        // SAFETY: the descriptor is still open; closing it would release too.
        let rc = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        if rc < 0 {
            warn!(
                path = %self.path.display(),
                error = %std::io::Error::last_os_error(),
                "failed to release group lock"
            );
        } else {
            debug!(path = %self.path.display(), "group lock released");
        }
    }
}
