//! Block pool: volumes are pre-provisioned devices
//!
//! An administrator creates `<dir_path>/<domain>-<volume>` (usually a
//! symlink to a block device) ahead of time. Creating a volume only reserves
//! it by checking that the node is there; nothing is ever deleted and the
//! backing device cannot be swapped for an image file.

use std::os::unix::fs::FileTypeExt;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use super::Pool;
use crate::error::{Error, IoResultExt, Result};
use crate::registry::VolumeRecord;

/// A pool of pre-provisioned block devices.
#[derive(Debug, Clone)]
pub struct BlockPool {
    name: String,
    dir_path: Utf8PathBuf,
}

impl BlockPool {
    /// Create a pool whose device nodes live in `dir_path`.
    pub fn new(name: &str, dir_path: &Utf8Path) -> Self {
        Self {
            name: name.to_owned(),
            dir_path: dir_path.to_owned(),
        }
    }
}

impl Pool for BlockPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn driver(&self) -> &'static str {
        "block"
    }

    fn volume_id(&self, domain: &str, volume: &str) -> String {
        format!("{domain}-{volume}")
    }

    fn path(&self, volume: &VolumeRecord) -> Utf8PathBuf {
        self.dir_path.join(&volume.vid)
    }

    fn create(&self, volume: &VolumeRecord) -> Result<()> {
        let path = self.path(volume);
        let meta = std::fs::metadata(&path)
            .provisioning_context(|| format!("reserving device {path}"))?;
        let ft = meta.file_type();
        // Regular files are accepted for loop-backed setups
        if !(ft.is_block_device() || ft.is_file()) {
            return Err(Error::provisioning(
                format!("reserving device {path}"),
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "neither a block device nor a regular file",
                ),
            ));
        }
        debug!("Reserved {path} for volume {}", volume.name);
        Ok(())
    }

    fn remove(&self, volume: &VolumeRecord) -> Result<()> {
        debug!("Releasing {}", self.path(volume));
        Ok(())
    }
}
