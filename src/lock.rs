//! Single-run lock.
//!
//! Two provisioning runs on the same host would race on package installs
//! and service units. The binary takes an exclusive, non-blocking `flock`
//! on the lock file before probing; the lock is dropped with the process.

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("cannot open lock file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("another provisioning run holds {}", path.display())]
    Held { path: PathBuf },

    #[error("cannot lock {}: {errno}", path.display())]
    Lock { path: PathBuf, errno: Errno },
}

/// Held for as long as the value lives.
pub struct RunLock {
    path: PathBuf,
    _file: Flock<File>,
}

impl RunLock {
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| LockError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|source| LockError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        let mut locked = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(locked) => locked,
            Err((_, Errno::EWOULDBLOCK)) => {
                return Err(LockError::Held {
                    path: path.to_path_buf(),
                });
            }
            Err((_, errno)) => {
                return Err(LockError::Lock {
                    path: path.to_path_buf(),
                    errno,
                });
            }
        };

        // Owner PID for whoever finds the lock held; best effort
        if locked.set_len(0).is_ok() {
            let _ = writeln!(locked, "{}", std::process::id());
        }
        tracing::debug!(path = %path.display(), "run lock acquired");

        Ok(Self {
            path: path.to_path_buf(),
            _file: locked,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
