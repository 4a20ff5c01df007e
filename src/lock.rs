use std::fs::OpenOptions;
use std::time::{Duration, Instant};

use log::debug;
use nix::fcntl::{Flock, FlockArg};

use crate::errors::CurtinError;

pub const LOCKFILE: &str = "/run/curtin-storage.lock";

const RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Host-wide mutual exclusion for the storage engine.
///
/// Two engines mutating the block subsystem concurrently would read
/// each other's half-built state; the flock is advisory but both
/// parties are this binary. Held until drop.
#[derive(Debug)]
pub struct HostLock {
    _flock: Flock<std::fs::File>,
}

impl HostLock {
    /// Block until the lock is acquired or `timeout` has elapsed.
    pub fn acquire(timeout: Duration) -> Result<Self, CurtinError> {
        Self::acquire_path(LOCKFILE, timeout)
    }

    pub fn acquire_path(path: &str, timeout: Duration) -> Result<Self, CurtinError> {
        let deadline = Instant::now() + timeout;

        loop {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(path)
                .map_err(|err| CurtinError::BadEnvironment(format!(
                    "cannot open lockfile {path}: {err}"
                )))?;

            match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(flock) => {
                    debug!("acquired host lock at {path}");
                    return Ok(Self { _flock: flock });
                }
                Err((_, errno)) => {
                    if Instant::now() >= deadline {
                        return Err(CurtinError::BadEnvironment(format!(
                            "host lock {path} contended past {timeout:?}: {errno}"
                        )));
                    }
                    std::thread::sleep(RETRY_INTERVAL);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_contend() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("engine.lock").display().to_string();

        let held = HostLock::acquire_path(&path, Duration::from_secs(1))
            .expect("first acquire succeeds");

        // second acquire times out while the first is held
        HostLock::acquire_path(&path, Duration::from_millis(100))
            .expect_err("contended lock must time out");

        drop(held);

        HostLock::acquire_path(&path, Duration::from_secs(1))
            .expect("lock is free again after drop");
    }
}
