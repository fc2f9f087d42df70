//! The platform registry: labels, storage pools and domains
//!
//! The registry is the in-memory view of the platform state. It validates and
//! registers new domains and hands the whole state to its [`StateStore`] on
//! [`Registry::commit`].

use std::collections::BTreeMap;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::class::{ClassCatalog, DomainClass};
use crate::error::{Error, Result};
use crate::properties::PropertyBag;
use crate::storage::{self, Pool};
use crate::store::{FileStateStore, StateStore};

/// Name of the pool created in a fresh state directory.
pub const DEFAULT_POOL: &str = "default";

/// Longest accepted domain name.
const MAX_NAME_LEN: usize = 31;

static DOMAIN_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_.-]*$").expect("valid domain name pattern"));

/// Properties recorded as dedicated fields rather than in the property map.
const RECORD_FIELDS: &[&str] = &["name", "label", "template", "volume_config"];

/// A named classification assigned to domains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    /// Numeric identifier
    pub index: u32,
    /// Label name, e.g. `red`
    pub name: String,
    /// Display color as `0xRRGGBB`
    pub color: String,
}

/// Configuration of one storage pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "driver", rename_all = "lowercase")]
pub enum PoolConfig {
    /// Sparse image files below a directory
    File {
        /// Directory holding the images
        dir_path: Utf8PathBuf,
    },
    /// Pre-provisioned block devices below a directory
    Block {
        /// Directory holding the device nodes
        dir_path: Utf8PathBuf,
    },
}

/// A volume owned by a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRecord {
    /// Volume name, e.g. `root`
    pub name: String,
    /// Pool the volume lives in
    pub pool: String,
    /// Pool-specific volume identifier
    pub vid: String,
    /// Size in bytes
    pub size: u64,
    /// Whether the domain writes to it persistently
    pub rw: bool,
    /// Whether the volume is a snapshot of the template's volume
    #[serde(default)]
    pub from_template: bool,
}

/// A registered domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRecord {
    /// Domain name
    pub name: String,
    /// Domain class name
    pub class: String,
    /// Unique identifier
    pub uuid: Uuid,
    /// Label name
    pub label: String,
    /// Template domain, for classes that have one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Remaining scalar properties
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Volumes keyed by name
    pub volumes: BTreeMap<String, VolumeRecord>,
    /// Registration time
    pub created: DateTime<Utc>,
}

/// Everything the platform persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformState {
    /// Known labels
    pub labels: Vec<Label>,
    /// Storage pools keyed by name
    pub pools: BTreeMap<String, PoolConfig>,
    /// Pool used for volumes without an explicit assignment
    pub default_pool: String,
    /// Template used by AppVMs that do not name one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_template: Option<String>,
    /// Registered domains keyed by name
    #[serde(default)]
    pub domains: BTreeMap<String, DomainRecord>,
}

impl PlatformState {
    /// State for a freshly initialized state directory.
    pub fn initial(state_dir: &Utf8Path) -> Self {
        let labels = [
            ("red", "0xcc0000"),
            ("orange", "0xf57900"),
            ("yellow", "0xedd400"),
            ("green", "0x73d216"),
            ("gray", "0x555753"),
            ("blue", "0x3465a4"),
            ("purple", "0x75507b"),
            ("black", "0x000000"),
        ]
        .into_iter()
        .zip(1..)
        .map(|((name, color), index)| Label {
            index,
            name: name.to_owned(),
            color: color.to_owned(),
        })
        .collect();
        let pools = BTreeMap::from([(
            DEFAULT_POOL.to_owned(),
            PoolConfig::File {
                dir_path: state_dir.join("pools").join(DEFAULT_POOL),
            },
        )]);
        Self {
            labels,
            pools,
            default_pool: DEFAULT_POOL.to_owned(),
            default_template: None,
            domains: BTreeMap::new(),
        }
    }

    /// Read the committed state for inspection, without locking or creating
    /// anything. A state directory with nothing committed yields the
    /// initial state.
    pub fn load_readonly(state_dir: &Utf8Path) -> color_eyre::Result<Self> {
        Ok(crate::store::read_state(state_dir)?.unwrap_or_else(|| Self::initial(state_dir)))
    }
}

/// In-memory registry bound to a state store.
#[derive(Debug)]
pub struct Registry {
    state: PlatformState,
    catalog: ClassCatalog,
    store: Box<dyn StateStore>,
}

impl Registry {
    /// Create a registry over existing state.
    pub fn new(state: PlatformState, store: Box<dyn StateStore>) -> Self {
        Self {
            state,
            catalog: ClassCatalog::builtin(),
            store,
        }
    }

    /// Open the registry stored in `state_dir`, initializing it if empty.
    pub fn open(state_dir: &Utf8Path) -> color_eyre::Result<Self> {
        let (store, state) = FileStateStore::open(state_dir)?;
        let state = state.unwrap_or_else(|| {
            info!("Initializing new platform state in {state_dir}");
            PlatformState::initial(state_dir)
        });
        Ok(Self::new(state, Box::new(store)))
    }

    /// The current state.
    pub fn state(&self) -> &PlatformState {
        &self.state
    }

    /// The class catalog.
    pub fn catalog(&self) -> &ClassCatalog {
        &self.catalog
    }

    /// All labels.
    pub fn labels(&self) -> &[Label] {
        &self.state.labels
    }

    /// Look up a label by name.
    pub fn get_label(&self, name: &str) -> Option<&Label> {
        self.state.labels.iter().find(|l| l.name == name)
    }

    /// Look up a domain class by name.
    pub fn get_vm_class(&self, name: &str) -> Option<&DomainClass> {
        self.catalog.get(name)
    }

    /// Look up a registered domain.
    pub fn domain(&self, name: &str) -> Option<&DomainRecord> {
        self.state.domains.get(name)
    }

    /// Open a storage pool by name.
    pub fn pool(&self, name: &str) -> Result<Box<dyn Pool>> {
        let config = self.state.pools.get(name).ok_or_else(|| Error::NoSuchPool {
            name: name.to_owned(),
            available: self.state.pools.keys().cloned().collect(),
        })?;
        Ok(storage::open_pool(name, config))
    }

    /// Validate `properties` against `class` and register a new domain.
    ///
    /// Nothing is registered unless every check passes.
    pub fn add_new_domain(&mut self, class: &str, properties: &PropertyBag) -> Result<DomainRecord> {
        let class = self
            .catalog
            .get(class)
            .ok_or_else(|| Error::NoSuchClass {
                name: class.to_owned(),
                available: self.catalog.names(),
            })?;

        let name = properties
            .get("name")
            .ok_or(Error::MissingMandatory("VMNAME is mandatory"))?;
        validate_name(name)?;
        if self.state.domains.contains_key(name) {
            return Err(Error::DomainExists(name.to_owned()));
        }

        for key in properties.keys() {
            if !class.supports_property(key) {
                return Err(Error::UnsupportedProperty {
                    class: class.name.to_owned(),
                    property: key.to_owned(),
                });
            }
        }
        for (key, value) in properties.scalars() {
            validate_value(key, value)?;
        }

        let label = properties
            .get("label")
            .ok_or(Error::MissingMandatory("--label option is mandatory"))?;
        if self.get_label(label).is_none() {
            return Err(Error::NoSuchLabel {
                name: label.to_owned(),
                available: self.labels().iter().map(|l| l.name.clone()).collect(),
            });
        }

        let template = if class.supports_property("template") {
            match properties
                .get("template")
                .or(self.state.default_template.as_deref())
            {
                Some(t) => Some(self.template_domain(t)?),
                None => None,
            }
        } else {
            None
        };

        if let Some(volume_config) = properties.volume_config() {
            for (volume, assignment) in volume_config {
                if class.volume(volume).is_none() {
                    return Err(Error::InvalidProperty {
                        property: "volume_config".to_owned(),
                        value: format!("{}:{}", assignment.pool, volume),
                        reason: format!("domain class {} has no volume {volume:?}", class.name),
                    });
                }
            }
        }

        let mut volumes = BTreeMap::new();
        for layout in class.volumes {
            let pool_name = properties
                .volume_config()
                .and_then(|v| v.get(layout.name))
                .map(|a| a.pool.as_str())
                .unwrap_or(self.state.default_pool.as_str());
            let pool = self.pool(pool_name)?;
            let size = template
                .filter(|_| layout.from_template)
                .and_then(|t| t.volumes.get(layout.name))
                .map(|v| v.size)
                .unwrap_or(layout.size);
            let record = VolumeRecord {
                name: layout.name.to_owned(),
                pool: pool_name.to_owned(),
                vid: pool.volume_id(name, layout.name),
                size,
                rw: layout.rw,
                from_template: layout.from_template && template.is_some(),
            };
            volumes.insert(layout.name.to_owned(), record);
        }

        let record = DomainRecord {
            name: name.to_owned(),
            class: class.name.to_owned(),
            uuid: Uuid::new_v4(),
            label: label.to_owned(),
            template: template.map(|t| t.name.clone()),
            properties: properties
                .scalars()
                .filter(|(k, _)| !RECORD_FIELDS.contains(k))
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
            volumes,
            created: Utc::now(),
        };
        debug!("Registering domain {} of class {}", record.name, record.class);
        self.state
            .domains
            .insert(record.name.clone(), record.clone());
        Ok(record)
    }

    fn template_domain(&self, name: &str) -> Result<&DomainRecord> {
        let template = self
            .state
            .domains
            .get(name)
            .ok_or_else(|| Error::NoSuchDomain(name.to_owned()))?;
        let is_template = self
            .catalog
            .get(&template.class)
            .is_some_and(|c| c.is_template);
        if !is_template {
            return Err(Error::InvalidProperty {
                property: "template".to_owned(),
                value: name.to_owned(),
                reason: format!("domain is a {}, not a template", template.class),
            });
        }
        Ok(template)
    }

    /// Withdraw a registration that has not been committed yet.
    pub fn remove_domain(&mut self, name: &str) -> Option<DomainRecord> {
        self.state.domains.remove(name)
    }

    /// Durably write the current state.
    pub fn commit(&self) -> Result<()> {
        self.store.commit(&self.state)
    }
}

fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidProperty {
        property: "name".to_owned(),
        value: name.to_owned(),
        reason: reason.to_owned(),
    };
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("longer than 31 characters"));
    }
    if !DOMAIN_NAME.is_match(name) {
        return Err(invalid(
            "must start with a letter and contain only letters, digits, '_', '.' and '-'",
        ));
    }
    if matches!(name, "none" | "default") {
        return Err(invalid("reserved name"));
    }
    Ok(())
}

fn validate_value(property: &str, value: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidProperty {
        property: property.to_owned(),
        value: value.to_owned(),
        reason: reason.to_owned(),
    };
    match property {
        "memory" | "maxmem" | "vcpus" | "qrexec_timeout" => match value.parse::<u32>() {
            Ok(n) if n > 0 => Ok(()),
            _ => Err(invalid("expected a positive integer")),
        },
        "internal" | "include_in_backups" | "autostart" => {
            match value.to_ascii_lowercase().as_str() {
                "true" | "false" | "1" | "0" | "yes" | "no" | "on" | "off" => Ok(()),
                _ => Err(invalid("expected a boolean")),
            }
        }
        "virt_mode" => match value {
            "hvm" | "pvh" | "pv" => Ok(()),
            _ => Err(invalid("expected one of hvm, pvh, pv")),
        },
        _ => Ok(()),
    }
}
