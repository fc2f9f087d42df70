//! Durable storage of the platform state
//!
//! The state lives in a single JSON document inside the state directory.
//! Opening the store takes an exclusive `flock` on a sibling lock file that is
//! held until the store is dropped, so concurrent invocations serialize on it.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std_ext::cap_std::{self, fs::Dir};
use cap_std_ext::dirext::CapStdExtDirExt;
use color_eyre::{eyre::Context as _, Result};
use rustix::fs::FlockOperation;
use tracing::{debug, info};

use crate::registry::PlatformState;

/// Name of the state document within the state directory.
pub const STATE_FILE: &str = "dvm.json";

/// Name of the lock file within the state directory.
pub const LOCK_FILE: &str = "dvm.lock";

/// Something that can durably record the platform state.
pub trait StateStore: std::fmt::Debug {
    /// Write the complete state, replacing what was stored before.
    fn commit(&self, state: &PlatformState) -> crate::Result<()>;
}

/// State store backed by `dvm.json` in a directory.
#[derive(Debug)]
pub struct FileStateStore {
    dir: Dir,
    path: Utf8PathBuf,
    _lock: cap_std::fs::File,
}

impl FileStateStore {
    /// Open (creating if needed) the state directory and take the lock.
    ///
    /// Returns the store along with the previously committed state, if any.
    pub fn open(state_dir: &Utf8Path) -> Result<(Self, Option<PlatformState>)> {
        std::fs::create_dir_all(state_dir)
            .with_context(|| format!("Failed to create state directory {state_dir}"))?;
        let dir = Dir::open_ambient_dir(state_dir, cap_std::ambient_authority())
            .with_context(|| format!("Failed to open state directory {state_dir}"))?;

        let lock = dir
            .create(LOCK_FILE)
            .with_context(|| format!("Failed to open {LOCK_FILE} in {state_dir}"))?;
        match rustix::fs::flock(&lock, FlockOperation::NonBlockingLockExclusive) {
            Ok(()) => {}
            Err(rustix::io::Errno::WOULDBLOCK) => {
                info!("Waiting for another dvm process to release {state_dir}");
                rustix::fs::flock(&lock, FlockOperation::LockExclusive)
                    .with_context(|| format!("Failed to lock {state_dir}"))?;
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to lock {state_dir}")),
        }

        let path = state_dir.join(STATE_FILE);
        let state = read_state(state_dir)?;
        Ok((
            Self {
                dir,
                path,
                _lock: lock,
            },
            state,
        ))
    }
}

/// Read the committed state without taking the lock.
///
/// Returns `None` if nothing was committed yet; the directory is never
/// created. Commits replace the file atomically, so a reader sees either the
/// old or the new state.
pub fn read_state(state_dir: &Utf8Path) -> Result<Option<PlatformState>> {
    let path = state_dir.join(STATE_FILE);
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No state at {path}");
            return Ok(None);
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to read {path}")),
    };
    let state: PlatformState =
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {path}"))?;
    debug!("Loaded {} domains from {path}", state.domains.len());
    Ok(Some(state))
}

impl StateStore for FileStateStore {
    fn commit(&self, state: &PlatformState) -> crate::Result<()> {
        let persistence = |source| crate::Error::Persistence {
            path: self.path.clone(),
            source,
        };
        let mut buf = serde_json::to_vec_pretty(state).map_err(|e| persistence(e.into()))?;
        buf.push(b'\n');
        self.dir
            .atomic_write(STATE_FILE, &buf)
            .map_err(persistence)?;
        debug!("Committed state to {}", self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PlatformState;

    #[test]
    fn test_commit_then_reopen() -> Result<()> {
        let td = tempfile::tempdir()?;
        let state_dir = Utf8Path::from_path(td.path()).unwrap().join("state");

        let (store, existing) = FileStateStore::open(&state_dir)?;
        assert!(existing.is_none());
        let state = PlatformState::initial(&state_dir);
        store.commit(&state)?;
        drop(store);

        let (_store, reloaded) = FileStateStore::open(&state_dir)?;
        similar_asserts::assert_eq!(reloaded.unwrap(), state);
        assert!(state_dir.join(LOCK_FILE).exists());
        Ok(())
    }

    #[test]
    fn test_read_state_does_not_create() -> Result<()> {
        let td = tempfile::tempdir()?;
        let state_dir = Utf8Path::from_path(td.path()).unwrap().join("state");
        assert!(read_state(&state_dir)?.is_none());
        assert!(!state_dir.exists());

        let (store, _) = FileStateStore::open(&state_dir)?;
        let state = PlatformState::initial(&state_dir);
        store.commit(&state)?;
        // Readers do not wait for the writer's lock
        similar_asserts::assert_eq!(read_state(&state_dir)?.unwrap(), state);
        Ok(())
    }

    #[test]
    fn test_corrupt_state_is_reported() -> Result<()> {
        let td = tempfile::tempdir()?;
        let state_dir = Utf8Path::from_path(td.path()).unwrap();
        std::fs::write(state_dir.join(STATE_FILE), "{not json")?;
        let err = FileStateStore::open(state_dir).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse"));
        Ok(())
    }
}
