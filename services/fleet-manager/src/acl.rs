//! Owner deny list.

use std::path::Path;

use crate::catalogue::{read_yaml, CatalogueError};

/// Owners whose instances are deprovisioned on every pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessControlList {
    pub enable_deny_list: bool,
    pub deny_list: Vec<String>,
}

impl AccessControlList {
    pub fn new(enable_deny_list: bool, deny_list: Vec<String>) -> Self {
        Self {
            enable_deny_list,
            deny_list,
        }
    }

    /// Load the deny list file, a YAML list of usernames.
    ///
    /// The file is not read when enforcement is disabled.
    pub fn load(enable_deny_list: bool, path: Option<&Path>) -> Result<Self, CatalogueError> {
        let deny_list = match path {
            Some(path) if enable_deny_list => read_yaml::<Option<Vec<String>>>(path)?
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        Ok(Self::new(enable_deny_list, deny_list))
    }

    /// Owners to deprovision, or `None` when enforcement is off or the list
    /// is empty.
    pub fn denied_owners(&self) -> Option<&[String]> {
        (self.enable_deny_list && !self.deny_list.is_empty()).then_some(self.deny_list.as_slice())
    }
}
