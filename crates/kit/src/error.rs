//! Error types for domain creation.
//!
//! Every failure the creation workflow can report falls into one of the
//! [`ErrorKind`] classes. Errors carry enough context to be printed as a
//! single line for the user.

use camino::Utf8PathBuf;
use thiserror::Error;

/// Result type alias for dvm operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ErrorKind {
    /// Malformed or missing user input; no side effects were performed.
    Configuration,
    /// An unknown label, class, domain or pool was requested.
    NotFound,
    /// The resolved class or storage backend cannot do what was asked.
    UnsupportedOperation,
    /// Disk I/O failed while materializing volumes.
    Provisioning,
    /// The platform state could not be written.
    Persistence,
}

/// Main error type for dvm.
#[derive(Error, Debug)]
pub enum Error {
    /// A `--pool` argument without exactly one `:`.
    #[error("Pool argument must be of form: -P pool_name:volume_name (got {token:?})")]
    MalformedPool {
        /// The offending token
        token: String,
    },

    /// A `--property` argument without `=`.
    #[error("Property argument must be of form: -p key=value (got {token:?})")]
    MalformedProperty {
        /// The offending token
        token: String,
    },

    /// A mandatory property was not supplied.
    #[error("{0}")]
    MissingMandatory(&'static str),

    /// Other invalid user input.
    #[error("{0}")]
    InvalidArgument(String),

    /// A property value that does not parse for its property.
    #[error("invalid value {value:?} for property {property:?}: {reason}")]
    InvalidProperty {
        /// Property name
        property: String,
        /// Rejected value
        value: String,
        /// What is wrong with it
        reason: String,
    },

    /// A domain with the requested name is already registered.
    #[error("domain {0:?} already exists")]
    DomainExists(String),

    /// Unknown label.
    #[error("no such label: {name:?}; available: {}", quoted(.available))]
    NoSuchLabel {
        /// Requested label
        name: String,
        /// All valid label names
        available: Vec<String>,
    },

    /// Unknown domain class.
    #[error("no such domain class: {name:?}; available: {}", quoted(.available))]
    NoSuchClass {
        /// Requested class
        name: String,
        /// All valid class names
        available: Vec<String>,
    },

    /// Unknown domain, e.g. a missing template.
    #[error("no such domain: {0:?}")]
    NoSuchDomain(String),

    /// Unknown storage pool.
    #[error("no such pool: {name:?}; available: {}", quoted(.available))]
    NoSuchPool {
        /// Requested pool
        name: String,
        /// All valid pool names
        available: Vec<String>,
    },

    /// The domain class does not support a property.
    #[error("domain class {class} does not support property {property:?}")]
    UnsupportedProperty {
        /// Class name
        class: String,
        /// Property name
        property: String,
    },

    /// The storage backend lacks a capability.
    #[error("pool {pool:?} ({driver} driver) does not support {operation}")]
    UnsupportedByPool {
        /// Pool name
        pool: String,
        /// Driver name
        driver: &'static str,
        /// Requested operation
        operation: &'static str,
    },

    /// OS-level I/O failure during provisioning.
    #[error("{context}: {source}")]
    Provisioning {
        /// What was being done
        context: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// The state store could not be written.
    #[error("failed to commit state to {path}: {source}")]
    Persistence {
        /// State file path
        path: Utf8PathBuf,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },
}

fn quoted(names: &[String]) -> String {
    use itertools::Itertools;
    names.iter().map(|n| format!("{n:?}")).join(", ")
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MalformedPool { .. }
            | Error::MalformedProperty { .. }
            | Error::MissingMandatory(_)
            | Error::InvalidArgument(_)
            | Error::InvalidProperty { .. }
            | Error::DomainExists(_) => ErrorKind::Configuration,
            Error::NoSuchLabel { .. }
            | Error::NoSuchClass { .. }
            | Error::NoSuchDomain(_)
            | Error::NoSuchPool { .. } => ErrorKind::NotFound,
            Error::UnsupportedProperty { .. } | Error::UnsupportedByPool { .. } => {
                ErrorKind::UnsupportedOperation
            }
            Error::Provisioning { .. } => ErrorKind::Provisioning,
            Error::Persistence { .. } => ErrorKind::Persistence,
        }
    }

    /// Wrap an I/O error as a provisioning failure.
    pub fn provisioning(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Provisioning {
            context: context.into(),
            source,
        }
    }
}

/// Attach provisioning context to I/O results.
pub(crate) trait IoResultExt<T> {
    fn provisioning_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn provisioning_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Error::provisioning(f(), e))
    }
}
