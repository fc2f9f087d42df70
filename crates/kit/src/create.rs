//! `dvm create` - create a new domain
//!
//! Creation runs as a fixed sequence of stages:
//!
//! `Start → PropertiesResolved → Validated → DomainRegistered →
//! StorageProvisioned → Committed`
//!
//! A failure at any point stops the sequence and reports the stage it was
//! leaving. The domain only reaches the state file in the last step.

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::factory::DomainFactory;
use crate::properties::{self, parse_key_value};
use crate::provision::{RootImageRequest, StorageProvisioner};
use crate::registry::{DomainRecord, Registry};

/// Create a new domain
#[derive(Debug, Parser)]
pub struct CreateOpts {
    /// Class of the new domain (default: from configuration, normally AppVM)
    #[clap(long = "class", short = 'C', value_name = "CLASS")]
    pub class: Option<String>,

    /// Set a domain property, like "memory", "vcpus" or "internal"
    #[clap(
        long = "property",
        visible_alias = "prop",
        short = 'p',
        value_name = "KEY=VALUE",
        value_parser = parse_key_value
    )]
    pub properties: Vec<(String, String)>,

    /// Use a specific pool for a volume
    #[clap(long = "pool", short = 'P', value_name = "POOL_NAME:VOLUME_NAME")]
    pub pools: Vec<String>,

    /// TemplateVM to base the domain on
    #[clap(long, short = 't')]
    pub template: Option<String>,

    /// Label for the new domain (e.g. red, yellow, green, ...)
    #[clap(long, short = 'l')]
    pub label: Option<String>,

    /// Use the provided root image instead of the default one (file will be COPIED)
    #[clap(
        long,
        short = 'r',
        value_name = "FILENAME",
        conflicts_with = "root_move_from"
    )]
    pub root_copy_from: Option<Utf8PathBuf>,

    /// Use the provided root image instead of the default one (file will be MOVED)
    #[clap(long, short = 'R', value_name = "FILENAME")]
    pub root_move_from: Option<Utf8PathBuf>,

    /// Do not create any volumes
    #[clap(long, hide = true)]
    pub no_root: bool,

    /// Allow running as root
    #[clap(long)]
    pub force_root: bool,

    /// Name of the domain to create
    #[clap(value_name = "VMNAME")]
    pub name: Option<String>,
}

impl CreateOpts {
    /// Turn parsed options into a request.
    ///
    /// Generic `--property` pairs come first so the dedicated flags win.
    pub fn to_request(&self, default_class: &str) -> CreateRequest {
        let mut properties = self.properties.clone();
        let dedicated = [
            ("template", &self.template),
            ("label", &self.label),
            ("name", &self.name),
        ];
        for (key, value) in dedicated {
            if let Some(value) = value {
                properties.push((key.to_owned(), value.clone()));
            }
        }
        CreateRequest {
            class: self
                .class
                .clone()
                .unwrap_or_else(|| default_class.to_owned()),
            properties,
            pools: self.pools.clone(),
            root_copy_from: self.root_copy_from.clone(),
            root_move_from: self.root_move_from.clone(),
            no_root: self.no_root,
        }
    }
}

/// Everything needed to create one domain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateRequest {
    /// Domain class name
    pub class: String,
    /// Property pairs in application order
    pub properties: Vec<(String, String)>,
    /// `pool_name:volume_name` tokens
    pub pools: Vec<String>,
    /// Seed the root volume by copying this image
    pub root_copy_from: Option<Utf8PathBuf>,
    /// Seed the root volume by moving this image
    pub root_move_from: Option<Utf8PathBuf>,
    /// Skip storage provisioning
    pub no_root: bool,
}

/// Progress of a creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum CreateStage {
    /// Nothing done yet
    Start,
    /// The property bag is built
    PropertiesResolved,
    /// Root image options are consistent
    Validated,
    /// The domain is registered in memory
    DomainRegistered,
    /// Volumes exist on disk
    StorageProvisioned,
    /// The state is durable
    Committed,
}

impl CreateStage {
    /// Human description of the step that leaves this stage.
    pub fn next_step(&self) -> &'static str {
        match self {
            CreateStage::Start => "resolving properties",
            CreateStage::PropertiesResolved => "validating options",
            CreateStage::Validated => "registering domain",
            CreateStage::DomainRegistered => "provisioning storage",
            CreateStage::StorageProvisioned => "committing state",
            CreateStage::Committed => "finishing",
        }
    }
}

/// A creation that stopped before committing.
#[derive(Debug, thiserror::Error)]
#[error("{} failed: {error}", .stage.next_step())]
pub struct CreateFailure {
    /// Last stage reached
    pub stage: CreateStage,
    /// What went wrong
    pub error: Error,
}

/// Drives a [`CreateRequest`] through the creation stages.
#[derive(Debug)]
pub struct CreationOrchestrator<'r> {
    registry: &'r mut Registry,
    stage: CreateStage,
}

impl<'r> CreationOrchestrator<'r> {
    /// Bind an orchestrator to a registry.
    pub fn new(registry: &'r mut Registry) -> Self {
        Self {
            registry,
            stage: CreateStage::Start,
        }
    }

    /// The stage reached so far.
    pub fn stage(&self) -> CreateStage {
        self.stage
    }

    fn advance<T>(&mut self, next: CreateStage, r: crate::Result<T>) -> Result<T, CreateFailure> {
        match r {
            Ok(v) => {
                debug!("{} -> {next}", self.stage);
                self.stage = next;
                Ok(v)
            }
            Err(error) => Err(CreateFailure {
                stage: self.stage,
                error,
            }),
        }
    }

    /// Create the requested domain and commit it.
    pub fn run(&mut self, request: &CreateRequest) -> Result<DomainRecord, CreateFailure> {
        let bag = properties::resolve(&request.properties, &request.pools);
        let bag = self.advance(CreateStage::PropertiesResolved, bag)?;

        let root = validate(request);
        let root = self.advance(CreateStage::Validated, root)?;

        let domain = DomainFactory::new(self.registry).create(&request.class, &bag);
        let domain = self.advance(CreateStage::DomainRegistered, domain)?;

        let provisioned = StorageProvisioner::new(self.registry).provision(&domain, root.as_ref());
        if provisioned.is_err() {
            debug!("Withdrawing registration of {}", domain.name);
            self.registry.remove_domain(&domain.name);
        }
        self.advance(CreateStage::StorageProvisioned, provisioned)?;

        let committed = self.registry.commit();
        if committed.is_err() && root != Some(RootImageRequest::NoRoot) {
            warn!(
                "Volumes of {} were left on disk but the domain is not recorded",
                domain.name
            );
        }
        self.advance(CreateStage::Committed, committed)?;

        info!("Created domain {} ({})", domain.name, domain.class);
        Ok(domain)
    }
}

fn validate(request: &CreateRequest) -> crate::Result<Option<RootImageRequest>> {
    let root = RootImageRequest::from_flags(
        request.root_copy_from.as_deref(),
        request.root_move_from.as_deref(),
        request.no_root,
    )?;
    if let Some(root) = &root {
        root.check_source()?;
    }
    Ok(root)
}

impl CreateOpts {
    /// Refuse to run as root unless `--force-root` was given.
    pub fn check_user(&self, is_root: bool) -> color_eyre::Result<()> {
        if is_root && !self.force_root {
            color_eyre::eyre::bail!("refusing to run as root; use --force-root to override");
        }
        Ok(())
    }
}

/// Execute the create command against the state in `state_dir`.
pub fn run(opts: CreateOpts, state_dir: &Utf8Path, default_class: &str) -> color_eyre::Result<()> {
    run_as(opts, state_dir, default_class, rustix::process::getuid().is_root())
}

fn run_as(
    opts: CreateOpts,
    state_dir: &Utf8Path,
    default_class: &str,
    is_root: bool,
) -> color_eyre::Result<()> {
    // Before opening the registry, which creates the state directory
    opts.check_user(is_root)?;
    let mut registry = Registry::open(state_dir)?;
    let request = opts.to_request(default_class);
    CreationOrchestrator::new(&mut registry).run(&request)?;
    Ok(())
}
