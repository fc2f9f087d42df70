//! File pool: volumes are sparse image files
//!
//! Layout is `<dir_path>/<domain>/<volume>.img`. Images are created with
//! `set_len` and never preallocated.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std_ext::cap_std::{self, fs::Dir, fs::OpenOptions};
use cap_std_ext::dirext::CapStdExtDirExt;
use tracing::debug;

use super::{Pool, ReplaceMode};
use crate::error::{IoResultExt, Result};
use crate::registry::VolumeRecord;

/// A pool of sparse image files below a directory.
#[derive(Debug, Clone)]
pub struct FilePool {
    name: String,
    dir_path: Utf8PathBuf,
}

impl FilePool {
    /// Create a pool rooted at `dir_path`.
    pub fn new(name: &str, dir_path: &Utf8Path) -> Self {
        Self {
            name: name.to_owned(),
            dir_path: dir_path.to_owned(),
        }
    }

    fn open_dir(&self) -> Result<Dir> {
        std::fs::create_dir_all(&self.dir_path)
            .provisioning_context(|| format!("creating pool directory {}", self.dir_path))?;
        Dir::open_ambient_dir(&self.dir_path, cap_std::ambient_authority())
            .provisioning_context(|| format!("opening pool directory {}", self.dir_path))
    }
}

impl Pool for FilePool {
    fn name(&self) -> &str {
        &self.name
    }

    fn driver(&self) -> &'static str {
        "file"
    }

    fn volume_id(&self, domain: &str, volume: &str) -> String {
        format!("{domain}/{volume}.img")
    }

    fn path(&self, volume: &VolumeRecord) -> Utf8PathBuf {
        self.dir_path.join(&volume.vid)
    }

    fn create(&self, volume: &VolumeRecord) -> Result<()> {
        let dir = self.open_dir()?;
        let path = self.path(volume);
        if let Some(parent) = Utf8Path::new(&volume.vid).parent() {
            if !parent.as_str().is_empty() {
                dir.create_dir_all(parent)
                    .provisioning_context(|| format!("creating directory for {path}"))?;
            }
        }
        let f = dir
            .open_with(&volume.vid, OpenOptions::new().write(true).create_new(true))
            .provisioning_context(|| format!("creating volume {path}"))?;
        f.set_len(volume.size)
            .provisioning_context(|| format!("sizing volume {path}"))?;
        debug!("Created {} byte image {path}", volume.size);
        Ok(())
    }

    fn remove(&self, volume: &VolumeRecord) -> Result<()> {
        let dir = self.open_dir()?;
        let path = self.path(volume);
        if dir
            .remove_file_optional(&volume.vid)
            .provisioning_context(|| format!("removing volume {path}"))?
        {
            debug!("Removed {path}");
        }
        // Drop the per-domain directory once its last image is gone
        if let Some(parent) = Utf8Path::new(&volume.vid).parent() {
            if !parent.as_str().is_empty() {
                let _ = dir.remove_dir(parent);
            }
        }
        Ok(())
    }

    fn replace_backing_file(
        &self,
        volume: &VolumeRecord,
        source: &Utf8Path,
        mode: ReplaceMode,
    ) -> Result<()> {
        let dir = self.open_dir()?;
        let path = self.path(volume);
        debug!("Replacing {path} with {source} ({mode})");
        // Not atomic: a crash between these two steps leaves no image at `path`
        dir.remove_file(&volume.vid)
            .provisioning_context(|| format!("removing {path}"))?;
        match mode {
            ReplaceMode::Move => {
                std::fs::rename(source, &path)
                    .provisioning_context(|| format!("moving {source} to {path}"))?;
            }
            ReplaceMode::Copy => {
                let mut src = std::fs::File::open(source)
                    .provisioning_context(|| format!("opening {source}"))?;
                let mut dst = dir
                    .open_with(&volume.vid, OpenOptions::new().write(true).create_new(true))
                    .provisioning_context(|| format!("creating {path}"))?
                    .into_std();
                super::sparse::copy_sparse(&mut src, &mut dst)
                    .provisioning_context(|| format!("copying {source} to {path}"))?;
            }
        }
        Ok(())
    }
}
