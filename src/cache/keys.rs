//! Versioned cache store naming.
//!
//! Every store name has the shape `{prefix}-{class}-{version}`. Changing the
//! version token is the only way to invalidate a whole class at once.

use std::fmt;

use crate::domain::types::StoreClass;

/// The four store names that make up one application version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionSet {
    prefix: String,
    version: String,
}

impl VersionSet {
    pub fn new(prefix: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            version: version.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Version set that owns `name` as its `class` store, if the name carries
    /// `prefix`.
    pub fn owning(prefix: &str, class: StoreClass, name: &str) -> Option<Self> {
        let version = name
            .strip_prefix(prefix)?
            .strip_prefix('-')?
            .strip_prefix(class.as_str())?
            .strip_prefix('-')?;
        (!version.is_empty()).then(|| Self::new(prefix, version))
    }

    pub fn name(&self, class: StoreClass) -> String {
        format!("{}-{}-{}", self.prefix, class.as_str(), self.version)
    }

    pub fn names(&self) -> Vec<String> {
        StoreClass::ALL.iter().map(|class| self.name(*class)).collect()
    }

    /// Whether `name` belongs to this version set.
    pub fn contains(&self, name: &str) -> bool {
        StoreClass::ALL
            .iter()
            .any(|class| self.name(*class) == name)
    }
}

impl fmt::Display for VersionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.prefix, self.version)
    }
}
