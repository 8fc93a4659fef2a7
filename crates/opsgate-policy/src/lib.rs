//! Role to permission policy document store.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to read document {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed document {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Read-only mapping from role name to the permissions granted to that role.
///
/// Loaded once at startup from a JSON document of the shape
/// `{"admin": ["read_file", ...], ...}`. Permission names outside the
/// operation catalog are legal and simply grant nothing.
#[derive(Clone, Debug, Default)]
pub struct PolicyStore {
    roles: HashMap<String, HashSet<String>>,
}

impl PolicyStore {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| DocumentError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let roles: HashMap<String, Vec<String>> =
            serde_json::from_str(&raw).map_err(|source| DocumentError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self::from_map(roles))
    }

    pub fn from_map(roles: HashMap<String, Vec<String>>) -> Self {
        Self {
            roles: roles
                .into_iter()
                .map(|(role, permissions)| (role, permissions.into_iter().collect()))
                .collect(),
        }
    }

    /// Permissions granted to `role`. An absent role is a valid,
    /// permission-less state, not an error.
    pub fn permissions(&self, role: &str) -> HashSet<String> {
        self.roles.get(role).cloned().unwrap_or_default()
    }
}
