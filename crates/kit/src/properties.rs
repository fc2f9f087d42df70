//! Turning command line values into a property bag
//!
//! Parsing produces an ordered list of `(key, value)` pairs and a list of
//! `pool:volume` tokens; [`resolve`] folds them into a [`PropertyBag`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Key under which per-volume pool assignments are stored.
pub const VOLUME_CONFIG: &str = "volume_config";

/// Pool assignment for a single volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeAssignment {
    /// Storage pool name
    pub pool: String,
    /// Volume name
    pub name: String,
}

/// Volume name to pool assignment.
pub type VolumeConfig = BTreeMap<String, VolumeAssignment>;

/// A single property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    /// Plain scalar value
    Str(String),
    /// Per-volume pool assignments
    Volumes(VolumeConfig),
}

/// Resolved properties for a new domain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyBag(BTreeMap<String, PropertyValue>);

impl PropertyBag {
    /// Set a scalar property; the last writer wins.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), PropertyValue::Str(value.into()));
    }

    /// Get a scalar property.
    pub fn get(&self, key: &str) -> Option<&str> {
        match self.0.get(key)? {
            PropertyValue::Str(s) => Some(s.as_str()),
            PropertyValue::Volumes(_) => None,
        }
    }

    /// Check whether a property is present.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Per-volume pool assignments, if any were given.
    pub fn volume_config(&self) -> Option<&VolumeConfig> {
        match self.0.get(VOLUME_CONFIG)? {
            PropertyValue::Volumes(v) => Some(v),
            PropertyValue::Str(_) => None,
        }
    }

    /// Iterate over scalar properties in key order.
    pub fn scalars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().filter_map(|(k, v)| match v {
            PropertyValue::Str(s) => Some((k.as_str(), s.as_str())),
            PropertyValue::Volumes(_) => None,
        })
    }

    /// Iterate over all property names in key order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Parse a `key=value` argument.
pub fn parse_key_value(token: &str) -> Result<(String, String)> {
    let (key, value) = token
        .split_once('=')
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| Error::MalformedProperty {
            token: token.to_owned(),
        })?;
    Ok((key.to_owned(), value.to_owned()))
}

/// Parse a `pool_name:volume_name` argument.
pub fn parse_pool_token(token: &str) -> Result<VolumeAssignment> {
    let malformed = || Error::MalformedPool {
        token: token.to_owned(),
    };
    let mut parts = token.split(':');
    let (Some(pool), Some(name), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(malformed());
    };
    if pool.is_empty() || name.is_empty() {
        return Err(malformed());
    }
    Ok(VolumeAssignment {
        pool: pool.to_owned(),
        name: name.to_owned(),
    })
}

/// Build a property bag from scalar pairs and pool tokens.
///
/// Pairs are applied in order so later values override earlier ones. Fails
/// if a pool token is malformed, if `volume_config` is set as a scalar, or if
/// `label` or `name` is missing afterwards.
pub fn resolve<K, V>(pairs: &[(K, V)], pools: &[String]) -> Result<PropertyBag>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut bag = PropertyBag::default();
    for (key, value) in pairs {
        let key = key.as_ref();
        if key == VOLUME_CONFIG {
            return Err(Error::InvalidArgument(format!(
                "{VOLUME_CONFIG} cannot be set directly; use --pool pool_name:volume_name"
            )));
        }
        bag.set(key, value.as_ref());
    }

    if !pools.is_empty() {
        let mut volumes = VolumeConfig::new();
        for token in pools {
            let assignment = parse_pool_token(token)?;
            volumes.insert(assignment.name.clone(), assignment);
        }
        bag.0
            .insert(VOLUME_CONFIG.to_owned(), PropertyValue::Volumes(volumes));
    }

    if !bag.contains("label") {
        return Err(Error::MissingMandatory("--label option is mandatory"));
    }
    if !bag.contains("name") {
        return Err(Error::MissingMandatory("VMNAME is mandatory"));
    }
    tracing::debug!("Resolved properties: {:?}", bag.keys().collect::<Vec<_>>());
    Ok(bag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn base() -> Vec<(&'static str, &'static str)> {
        vec![("name", "work"), ("label", "red")]
    }

    #[test]
    fn test_pool_tokens() {
        let pools = vec!["fast:private".to_string(), "slow:volatile".to_string()];
        let bag = resolve(&base(), &pools).unwrap();
        let volumes = bag.volume_config().unwrap();
        assert_eq!(volumes.len(), 2);
        assert_eq!(
            volumes["private"],
            VolumeAssignment {
                pool: "fast".into(),
                name: "private".into()
            }
        );
        assert_eq!(volumes["volatile"].pool, "slow");
        // The structured value is not visible as a scalar
        assert_eq!(bag.get(VOLUME_CONFIG), None);
    }

    #[test]
    fn test_repeated_volume_last_wins() {
        let pools = vec!["a:root".to_string(), "b:root".to_string()];
        let bag = resolve(&base(), &pools).unwrap();
        assert_eq!(bag.volume_config().unwrap()["root"].pool, "b");
    }

    #[test]
    fn test_malformed_pool_tokens() {
        for token in ["fast", "a:b:c", ":private", "fast:", ""] {
            let err = resolve(&base(), &[token.to_string()]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Configuration, "{token}");
            assert!(err.to_string().contains("pool_name:volume_name"));
            assert!(err.to_string().contains(&format!("{token:?}")));
        }
    }

    #[test]
    fn test_no_pools_means_no_volume_config() {
        let bag = resolve(&base(), &[]).unwrap();
        assert!(bag.volume_config().is_none());
        assert!(!bag.contains(VOLUME_CONFIG));
    }

    #[test]
    fn test_missing_label() {
        let err = resolve(&[("name", "work")], &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.to_string(), "--label option is mandatory");
    }

    #[test]
    fn test_missing_name() {
        let err = resolve(&[("label", "red")], &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.to_string(), "VMNAME is mandatory");
    }

    #[test]
    fn test_last_writer_wins() {
        let pairs = [
            ("memory", "400"),
            ("name", "work"),
            ("label", "red"),
            ("memory", "800"),
        ];
        let bag = resolve(&pairs, &[]).unwrap();
        assert_eq!(bag.get("memory"), Some("800"));
        similar_asserts::assert_eq!(
            bag.scalars().collect::<Vec<_>>(),
            vec![("label", "red"), ("memory", "800"), ("name", "work")]
        );
    }

    #[test]
    fn test_volume_config_not_scalar() {
        let pairs = [("name", "work"), ("label", "red"), (VOLUME_CONFIG, "x")];
        let err = resolve(&pairs, &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("memory=400").unwrap(),
            ("memory".to_string(), "400".to_string())
        );
        assert_eq!(
            parse_key_value("kernelopts=a=b").unwrap(),
            ("kernelopts".to_string(), "a=b".to_string())
        );
        assert_eq!(
            parse_key_value("netvm=").unwrap(),
            ("netvm".to_string(), String::new())
        );
        assert!(parse_key_value("memory").is_err());
        assert!(parse_key_value("=400").is_err());
    }
}
