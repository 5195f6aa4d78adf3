//! Common identifier and reference types used throughout cmsync.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of a managed handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HandleId(String);

impl HandleId {
    /// Create a new HandleId from a string.
    ///
    /// # Preconditions
    /// - `id` must be non-empty and not only whitespace
    ///
    /// # Errors
    /// - Returns error if id is blank
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(crate::Error::InvalidInput(
                "HandleId cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for HandleId {
    type Error = crate::Error;

    fn try_from(id: String) -> crate::Result<Self> {
        Self::new(id)
    }
}

impl From<HandleId> for String {
    fn from(id: HandleId) -> Self {
        id.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for HandleId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Reference to one schema module (name plus revision).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleReference {
    pub module_name: String,
    #[serde(default)]
    pub revision: String,
}

impl ModuleReference {
    pub fn new(module_name: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            revision: revision.into(),
        }
    }
}

impl fmt::Display for ModuleReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.revision.is_empty() {
            write!(f, "{}", self.module_name)
        } else {
            write!(f, "{}@{}", self.module_name, self.revision)
        }
    }
}
