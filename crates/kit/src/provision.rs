//! Materializing a new domain's volumes
//!
//! Volumes are created in the domain's pools, then the root volume's backing
//! file is optionally replaced with a user-supplied image. If anything fails,
//! the volumes created so far are removed again before the error is returned.

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Error, IoResultExt, Result};
use crate::registry::{DomainRecord, Registry, VolumeRecord};
use crate::storage::ReplaceMode;

/// Name of the volume holding the domain's operating system.
pub const ROOT_VOLUME: &str = "root";

/// How the root volume is seeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootImageRequest {
    /// Copy this image into place; the source is left untouched.
    CopyFrom(Utf8PathBuf),
    /// Move this image into place; the source path disappears.
    MoveFrom(Utf8PathBuf),
    /// Skip storage provisioning entirely.
    NoRoot,
}

impl RootImageRequest {
    /// Build a request from the command line flags.
    ///
    /// At most one of the three may be given.
    pub fn from_flags(
        copy_from: Option<&Utf8Path>,
        move_from: Option<&Utf8Path>,
        no_root: bool,
    ) -> Result<Option<Self>> {
        match (copy_from, move_from, no_root) {
            (None, None, false) => Ok(None),
            (Some(p), None, false) => Ok(Some(Self::CopyFrom(p.to_owned()))),
            (None, Some(p), false) => Ok(Some(Self::MoveFrom(p.to_owned()))),
            (None, None, true) => Ok(Some(Self::NoRoot)),
            _ => Err(Error::InvalidArgument(
                "only one of --root-copy-from, --root-move-from and --no-root may be given"
                    .to_owned(),
            )),
        }
    }

    /// The source image and how to use it, if any.
    pub fn source(&self) -> Option<(&Utf8Path, ReplaceMode)> {
        match self {
            Self::CopyFrom(p) => Some((p, ReplaceMode::Copy)),
            Self::MoveFrom(p) => Some((p, ReplaceMode::Move)),
            Self::NoRoot => None,
        }
    }

    /// Check that the source image is a regular file.
    pub fn check_source(&self) -> Result<()> {
        let Some((path, _)) = self.source() else {
            return Ok(());
        };
        let meta = std::fs::metadata(path)
            .provisioning_context(|| format!("root image {path}"))?;
        if !meta.is_file() {
            return Err(Error::InvalidArgument(format!(
                "root image {path} is not a regular file"
            )));
        }
        Ok(())
    }
}

/// Creates a domain's volumes on disk.
#[derive(Debug)]
pub struct StorageProvisioner<'r> {
    registry: &'r Registry,
}

impl<'r> StorageProvisioner<'r> {
    /// Bind a provisioner to the registry that knows the pools.
    pub fn new(registry: &'r Registry) -> Self {
        Self { registry }
    }

    /// Provision `domain`'s volumes according to `request`.
    pub fn provision(
        &self,
        domain: &DomainRecord,
        request: Option<&RootImageRequest>,
    ) -> Result<()> {
        if request == Some(&RootImageRequest::NoRoot) {
            info!("Skipping storage for {} (--no-root)", domain.name);
            return Ok(());
        }

        let mut created = Vec::new();
        let r = self.create_on_disk(domain, request, &mut created);
        if r.is_err() {
            self.cleanup(&created);
        }
        r
    }

    fn create_on_disk<'d>(
        &self,
        domain: &'d DomainRecord,
        request: Option<&RootImageRequest>,
        created: &mut Vec<&'d VolumeRecord>,
    ) -> Result<()> {
        for volume in domain.volumes.values() {
            let pool = self.registry.pool(&volume.pool)?;
            pool.create(volume)?;
            created.push(volume);
        }

        if let Some((source, mode)) = request.and_then(|r| r.source()) {
            let root = domain.volumes.get(ROOT_VOLUME).ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "domain class {} has no {ROOT_VOLUME} volume",
                    domain.class
                ))
            })?;
            let pool = self.registry.pool(&root.pool)?;
            info!("Replacing {} with {source} ({mode})", pool.path(root));
            pool.replace_backing_file(root, source, mode)?;
        }
        debug!("Provisioned {} volumes for {}", created.len(), domain.name);
        Ok(())
    }

    fn cleanup(&self, created: &[&VolumeRecord]) {
        for volume in created.iter().rev() {
            let r = self
                .registry
                .pool(&volume.pool)
                .and_then(|pool| pool.remove(volume));
            if let Err(e) = r {
                warn!("Failed to clean up volume {}: {e}", volume.vid);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::properties::resolve;
    use crate::registry::tests::test_registry;
    use crate::registry::PoolConfig;

    fn registry_in(td: &tempfile::TempDir) -> Registry {
        let dir = Utf8Path::from_path(td.path()).unwrap();
        test_registry(dir).0
    }

    fn register(registry: &mut Registry, class: &str, pools: &[String]) -> DomainRecord {
        let bag = resolve(&[("name", "work"), ("label", "red")], pools).unwrap();
        registry.add_new_domain(class, &bag).unwrap()
    }

    fn root_path(registry: &Registry, domain: &DomainRecord) -> Utf8PathBuf {
        let root = &domain.volumes[ROOT_VOLUME];
        registry.pool(&root.pool).unwrap().path(root)
    }

    #[test]
    fn test_from_flags() {
        let p = Utf8Path::new("/tmp/img.raw");
        assert_eq!(RootImageRequest::from_flags(None, None, false).unwrap(), None);
        assert_eq!(
            RootImageRequest::from_flags(Some(p), None, false).unwrap(),
            Some(RootImageRequest::CopyFrom(p.into()))
        );
        assert_eq!(
            RootImageRequest::from_flags(None, Some(p), false).unwrap(),
            Some(RootImageRequest::MoveFrom(p.into()))
        );
        assert_eq!(
            RootImageRequest::from_flags(None, None, true).unwrap(),
            Some(RootImageRequest::NoRoot)
        );
        for (c, m, n) in [
            (Some(p), Some(p), false),
            (Some(p), None, true),
            (None, Some(p), true),
        ] {
            let err = RootImageRequest::from_flags(c, m, n).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Configuration);
        }
    }

    #[test]
    fn test_check_source() -> color_eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let dir = Utf8Path::from_path(td.path()).unwrap();
        let err = RootImageRequest::CopyFrom(dir.join("nope"))
            .check_source()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Provisioning);
        let err = RootImageRequest::MoveFrom(dir.to_owned())
            .check_source()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        RootImageRequest::NoRoot.check_source()?;
        Ok(())
    }

    #[test]
    fn test_provision_default() -> color_eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let mut registry = registry_in(&td);
        let domain = register(&mut registry, "AppVM", &[]);
        StorageProvisioner::new(&registry).provision(&domain, None)?;
        for volume in domain.volumes.values() {
            let path = registry.pool(&volume.pool)?.path(volume);
            assert_eq!(std::fs::metadata(&path)?.len(), volume.size, "{path}");
        }
        Ok(())
    }

    #[test]
    fn test_no_root_touches_nothing() -> color_eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let mut registry = registry_in(&td);
        let domain = register(&mut registry, "AppVM", &[]);
        StorageProvisioner::new(&registry).provision(&domain, Some(&RootImageRequest::NoRoot))?;
        assert!(!root_path(&registry, &domain).exists());
        Ok(())
    }

    #[test]
    fn test_move_root() -> color_eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let mut registry = registry_in(&td);
        let domain = register(&mut registry, "StandaloneVM", &[]);
        let source = Utf8Path::from_path(td.path()).unwrap().join("img.raw");
        std::fs::write(&source, b"my root")?;

        let request = RootImageRequest::MoveFrom(source.clone());
        StorageProvisioner::new(&registry).provision(&domain, Some(&request))?;
        assert!(!source.exists());
        assert_eq!(std::fs::read(root_path(&registry, &domain))?, b"my root");
        Ok(())
    }

    #[test]
    fn test_failed_copy_cleans_up() -> color_eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let mut registry = registry_in(&td);
        let domain = register(&mut registry, "StandaloneVM", &[]);
        let source = Utf8Path::from_path(td.path()).unwrap().join("vanished.raw");

        let request = RootImageRequest::CopyFrom(source);
        let err = StorageProvisioner::new(&registry)
            .provision(&domain, Some(&request))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Provisioning);
        assert!(err.to_string().contains("vanished.raw"));
        for volume in domain.volumes.values() {
            assert!(!registry.pool(&volume.pool)?.path(volume).exists());
        }
        Ok(())
    }

    #[test]
    fn test_unsupported_pool_for_root() -> color_eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let dir = Utf8Path::from_path(td.path()).unwrap().to_owned();
        let (mut registry, _) = test_registry(&dir);
        let mut state = registry.state().clone();
        state.pools.insert(
            "devices".into(),
            PoolConfig::Block {
                dir_path: dir.join("dev"),
            },
        );
        registry = Registry::new(state, Box::new(crate::registry::tests::MemoryStore::default()));
        let domain = register(&mut registry, "StandaloneVM", &["devices:root".into()]);
        std::fs::create_dir(dir.join("dev"))?;
        std::fs::write(dir.join("dev/work-root"), b"")?;
        let source = dir.join("img.raw");
        std::fs::write(&source, b"data")?;

        let request = RootImageRequest::MoveFrom(source.clone());
        let err = StorageProvisioner::new(&registry)
            .provision(&domain, Some(&request))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
        assert!(source.exists());
        // File-backed volumes were rolled back
        let private = &domain.volumes["private"];
        assert!(!registry.pool(&private.pool)?.path(private).exists());
        Ok(())
    }
}
