//! Domain creation for a compartmentalized virtualization platform.
//!
//! A domain is created by resolving its properties, registering it against a
//! class from the [`class::ClassCatalog`], provisioning its volumes in storage
//! pools and finally committing the platform state. [`create`] drives those
//! steps; the other modules implement them.

pub mod class;
pub mod config;
pub mod create;
pub mod error;
pub mod factory;
pub mod list;
pub mod properties;
pub mod provision;
pub mod registry;
pub mod storage;
pub mod store;

pub use error::{Error, ErrorKind, Result};
