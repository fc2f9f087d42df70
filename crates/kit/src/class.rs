//! Domain class catalog
//!
//! Classes are described by static descriptors registered at startup. A
//! descriptor names the properties a class accepts and the volumes every
//! domain of that class owns.

use std::collections::BTreeMap;

use serde::Serialize;

/// 1 GiB
const GIB: u64 = 1024 * 1024 * 1024;

/// Name of the class used when none is requested.
pub const DEFAULT_CLASS: &str = "AppVM";

/// Properties every class accepts.
const COMMON_PROPERTIES: &[&str] = &[
    "name",
    "label",
    "memory",
    "maxmem",
    "vcpus",
    "netvm",
    "kernel",
    "kernelopts",
    "virt_mode",
    "internal",
    "include_in_backups",
    "autostart",
    "qrexec_timeout",
    "default_user",
    "volume_config",
];

/// Layout of one volume owned by a domain of a given class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VolumeLayout {
    /// Volume name, e.g. `root`
    pub name: &'static str,
    /// Default size in bytes
    pub size: u64,
    /// Whether the domain writes to it persistently
    pub rw: bool,
    /// Whether the volume is a snapshot of the template's volume of the same name
    pub from_template: bool,
}

const ROOT: VolumeLayout = VolumeLayout {
    name: "root",
    size: 10 * GIB,
    rw: true,
    from_template: false,
};
const PRIVATE: VolumeLayout = VolumeLayout {
    name: "private",
    size: 2 * GIB,
    rw: true,
    from_template: false,
};
const VOLATILE: VolumeLayout = VolumeLayout {
    name: "volatile",
    size: 10 * GIB,
    rw: true,
    from_template: false,
};

const APPVM_VOLUMES: &[VolumeLayout] = &[
    VolumeLayout {
        rw: false,
        from_template: true,
        ..ROOT
    },
    PRIVATE,
    VOLATILE,
];
const OWN_ROOT_VOLUMES: &[VolumeLayout] = &[ROOT, PRIVATE, VOLATILE];

/// Descriptor for a domain class.
#[derive(Debug, Clone, Serialize)]
pub struct DomainClass {
    /// Class name as used on the command line
    pub name: &'static str,
    /// One-line description
    pub description: &'static str,
    /// Properties beyond [`COMMON_PROPERTIES`]
    #[serde(skip)]
    extra_properties: &'static [&'static str],
    /// Volumes created for every domain of this class
    pub volumes: &'static [VolumeLayout],
    /// Whether domains of this class can serve as a template
    pub is_template: bool,
}

impl DomainClass {
    /// Check whether the class accepts a property.
    pub fn supports_property(&self, property: &str) -> bool {
        COMMON_PROPERTIES.contains(&property) || self.extra_properties.contains(&property)
    }

    /// All properties the class accepts, in a stable order.
    pub fn property_list(&self) -> impl Iterator<Item = &'static str> + '_ {
        COMMON_PROPERTIES
            .iter()
            .chain(self.extra_properties.iter())
            .copied()
    }

    /// Look up the layout of a volume by name.
    pub fn volume(&self, name: &str) -> Option<&VolumeLayout> {
        self.volumes.iter().find(|v| v.name == name)
    }
}

/// Catalog of all known domain classes, keyed by name.
#[derive(Debug, Clone)]
pub struct ClassCatalog {
    classes: BTreeMap<&'static str, DomainClass>,
}

impl Default for ClassCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ClassCatalog {
    /// The classes shipped with dvm.
    pub fn builtin() -> Self {
        let classes = [
            DomainClass {
                name: "AppVM",
                description: "Application VM whose root is a snapshot of its template",
                extra_properties: &["template"],
                volumes: APPVM_VOLUMES,
                is_template: false,
            },
            DomainClass {
                name: "TemplateVM",
                description: "Template providing the root filesystem for AppVMs",
                extra_properties: &[],
                volumes: OWN_ROOT_VOLUMES,
                is_template: true,
            },
            DomainClass {
                name: "StandaloneVM",
                description: "Self-contained VM with its own root filesystem",
                extra_properties: &[],
                volumes: OWN_ROOT_VOLUMES,
                is_template: false,
            },
        ];
        Self {
            classes: classes.into_iter().map(|c| (c.name, c)).collect(),
        }
    }

    /// Look up a class by exact name.
    pub fn get(&self, name: &str) -> Option<&DomainClass> {
        self.classes.get(name)
    }

    /// Iterate over all classes in name order.
    pub fn iter(&self) -> impl Iterator<Item = &DomainClass> {
        self.classes.values()
    }

    /// Names of all classes in name order.
    pub fn names(&self) -> Vec<String> {
        self.classes.keys().map(|k| k.to_string()).collect()
    }
}
