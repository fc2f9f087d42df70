//! Storage pools holding domain volumes
//!
//! A pool driver knows how to materialize and discard volumes. Replacing a
//! volume's backing file with a user-supplied image is an optional
//! capability; drivers that cannot do it report
//! [`Error::UnsupportedByPool`](crate::Error::UnsupportedByPool).

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::{Error, Result};
use crate::registry::{PoolConfig, VolumeRecord};

pub mod block;
pub mod file;
pub mod sparse;

/// How a user-supplied image takes the place of a volume's backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ReplaceMode {
    /// Rename the image into place; the source path disappears.
    Move,
    /// Copy the image, preserving holes; the source is left untouched.
    Copy,
}

/// A storage backend for volumes.
pub trait Pool: std::fmt::Debug {
    /// Pool name.
    fn name(&self) -> &str;

    /// Driver name, e.g. `file`.
    fn driver(&self) -> &'static str;

    /// Identifier of `volume` of `domain` within this pool.
    fn volume_id(&self, domain: &str, volume: &str) -> String;

    /// Host path backing a volume.
    fn path(&self, volume: &VolumeRecord) -> Utf8PathBuf;

    /// Materialize a volume.
    fn create(&self, volume: &VolumeRecord) -> Result<()>;

    /// Discard a volume created by [`Pool::create`].
    fn remove(&self, volume: &VolumeRecord) -> Result<()>;

    /// Drop the volume's current backing file and put `source` in its place.
    fn replace_backing_file(
        &self,
        volume: &VolumeRecord,
        source: &Utf8Path,
        mode: ReplaceMode,
    ) -> Result<()> {
        tracing::debug!(
            "Refusing to {mode} {source} into {} of pool {}",
            volume.vid,
            self.name()
        );
        Err(Error::UnsupportedByPool {
            pool: self.name().to_owned(),
            driver: self.driver(),
            operation: "replacing a volume's backing file",
        })
    }
}

/// Instantiate the driver for a configured pool.
pub fn open_pool(name: &str, config: &PoolConfig) -> Box<dyn Pool> {
    match config {
        PoolConfig::File { dir_path } => Box::new(file::FilePool::new(name, dir_path)),
        PoolConfig::Block { dir_path } => Box::new(block::BlockPool::new(name, dir_path)),
    }
}
