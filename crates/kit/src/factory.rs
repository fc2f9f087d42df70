//! Resolving class and label, then registering the domain

use tracing::debug;

use crate::error::{Error, Result};
use crate::properties::PropertyBag;
use crate::registry::{DomainRecord, Registry};

/// Creates domain records in a registry.
#[derive(Debug)]
pub struct DomainFactory<'r> {
    registry: &'r mut Registry,
}

impl<'r> DomainFactory<'r> {
    /// Bind a factory to a registry.
    pub fn new(registry: &'r mut Registry) -> Self {
        Self { registry }
    }

    /// Validate the label, class and template request, then register a new
    /// domain of `class` with `properties`.
    ///
    /// Errors raised by the registry while instantiating are returned as-is.
    pub fn create(&mut self, class: &str, properties: &PropertyBag) -> Result<DomainRecord> {
        let label = properties
            .get("label")
            .ok_or(Error::MissingMandatory("--label option is mandatory"))?;
        if self.registry.get_label(label).is_none() {
            return Err(Error::NoSuchLabel {
                name: label.to_owned(),
                available: self
                    .registry
                    .labels()
                    .iter()
                    .map(|l| l.name.clone())
                    .collect(),
            });
        }

        let cls = self
            .registry
            .get_vm_class(class)
            .ok_or_else(|| Error::NoSuchClass {
                name: class.to_owned(),
                available: self.registry.catalog().names(),
            })?;

        if properties.contains("template") && !cls.supports_property("template") {
            return Err(Error::UnsupportedProperty {
                class: cls.name.to_owned(),
                property: "template".to_owned(),
            });
        }

        debug!("Instantiating {class} with label {label}");
        self.registry.add_new_domain(class, properties)
    }
}
