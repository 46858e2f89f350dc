//! Single-instance interlock via a PID file.
//!
//! On Linux, liveness of a previously recorded PID is checked by
//! `stat`-ing `/proc/{pid}` rather than sending a signal: it requires no
//! special permission and cannot itself perturb the other process.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// A held PID file, removed on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

/// Why [`PidFile::acquire`] refused to start.
#[derive(Debug, thiserror::Error)]
pub enum PidFileError {
    /// Another apilod process is already running.
    #[error("apilod is already running (pid {pid}, pid file {path})")]
    AlreadyRunning {
        /// The PID recorded in the existing file.
        pid: u32,
        /// The PID file's path.
        path: String,
    },
    /// The PID file could not be read or written.
    #[error("pid file {path} error: {source}")]
    Io {
        /// The PID file's path.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
}

impl PidFile {
    /// Acquire the interlock at `path`, writing the current process's PID.
    ///
    /// If a PID file already exists, its PID is checked for liveness via
    /// `/proc/{pid}`. A stale file (the recorded process is gone) is
    /// silently replaced; a live one fails with
    /// [`PidFileError::AlreadyRunning`].
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, PidFileError> {
        let path = path.as_ref().to_path_buf();

        if let Some(existing_pid) = read_pid(&path).map_err(|source| PidFileError::Io {
            path: path.display().to_string(),
            source,
        })? {
            if is_process_alive(existing_pid) {
                return Err(PidFileError::AlreadyRunning {
                    pid: existing_pid,
                    path: path.display().to_string(),
                });
            }
            tracing::warn!(pid = existing_pid, path = %path.display(), "removing stale pid file");
        }

        fs::write(&path, std::process::id().to_string()).map_err(|source| PidFileError::Io {
            path: path.display().to_string(),
            source,
        })?;

        Ok(Self { path })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove pid file");
            }
        }
    }
}

fn read_pid(path: &Path) -> io::Result<Option<u32>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents.trim().parse().ok()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(target_os = "linux")]
fn is_process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn is_process_alive(pid: u32) -> bool {
    // No /proc on non-Linux targets; assume alive and let the operator
    // clear a stale file by hand rather than risk a false negative.
    let _ = pid;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_writes_current_pid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("apilod.pid");
        let guard = PidFile::acquire(&path).unwrap();
        let recorded: u32 = fs::read_to_string(&path).unwrap().trim().parse().unwrap();
        assert_eq!(recorded, std::process::id());
        drop(guard);
        assert!(!path.exists());
    }

    #[test]
    fn acquire_replaces_stale_pid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("apilod.pid");
        // A PID essentially guaranteed not to be alive in the test sandbox.
        fs::write(&path, "999999999").unwrap();
        let guard = PidFile::acquire(&path).unwrap();
        drop(guard);
    }

    #[test]
    fn acquire_rejects_live_pid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("apilod.pid");
        fs::write(&path, std::process::id().to_string()).unwrap();
        let err = PidFile::acquire(&path).unwrap_err();
        assert!(matches!(err, PidFileError::AlreadyRunning { .. }));
        fs::remove_file(&path).unwrap();
    }
}
