//! Credential store and session issuance.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

pub use opsgate_policy::DocumentError;
use opsgate_policy::PolicyStore;

/// Uniform rejection for both an unknown username and a wrong password, so
/// the return shape carries no user-enumeration signal.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("invalid username or password")]
pub struct AuthFailure;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct CredentialRecord {
    pub password: String,
    pub role: String,
}

/// Authenticated, authorized context for one login. Owned by the caller
/// that authenticated; never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    pub role: String,
    pub permissions: HashSet<String>,
}

impl Session {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

#[derive(Debug)]
pub struct Authenticator {
    users: HashMap<String, CredentialRecord>,
    policy: PolicyStore,
}

impl Authenticator {
    /// Reads a JSON credential document of the shape
    /// `{"alice": {"password": "...", "role": "admin"}, ...}`.
    pub fn load(path: impl AsRef<Path>, policy: PolicyStore) -> Result<Self, DocumentError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| DocumentError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let users: HashMap<String, CredentialRecord> =
            serde_json::from_str(&raw).map_err(|source| DocumentError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self::from_parts(users, policy))
    }

    pub fn from_parts(users: HashMap<String, CredentialRecord>, policy: PolicyStore) -> Self {
        Self { users, policy }
    }

    /// Exact-equality credential check. On a match the role's permissions
    /// are resolved through the policy store at that moment; a role missing
    /// from the policy document yields an empty permission set rather than
    /// an error. No audit logging happens here; the caller records login
    /// outcomes.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Session, AuthFailure> {
        let record = self.users.get(username).ok_or(AuthFailure)?;
        if record.password != password {
            return Err(AuthFailure);
        }
        Ok(Session {
            username: username.to_string(),
            role: record.role.clone(),
            permissions: self.policy.permissions(&record.role),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use opsgate_policy::PolicyStore;

    use super::{AuthFailure, Authenticator, CredentialRecord, DocumentError};

    fn sample_policy() -> PolicyStore {
        let mut roles = HashMap::new();
        roles.insert(
            "admin".to_string(),
            vec!["read_file".to_string(), "spawn_process".to_string()],
        );
        PolicyStore::from_map(roles)
    }

    fn sample_authenticator() -> Authenticator {
        let mut users = HashMap::new();
        users.insert(
            "alice".to_string(),
            CredentialRecord {
                password: "s3cret".to_string(),
                role: "admin".to_string(),
            },
        );
        users.insert(
            "mallory".to_string(),
            CredentialRecord {
                password: "hunter2".to_string(),
                role: "no-such-role".to_string(),
            },
        );
        Authenticator::from_parts(users, sample_policy())
    }

    #[test]
    fn valid_credentials_yield_session_with_role_permissions() {
        let auth = sample_authenticator();
        let session = auth.authenticate("alice", "s3cret").expect("session");

        assert_eq!(session.username, "alice");
        assert_eq!(session.role, "admin");
        assert_eq!(session.permissions, sample_policy().permissions("admin"));
        assert!(session.has_permission("read_file"));
        assert!(!session.has_permission("ping_host"));
    }

    #[test]
    fn unknown_user_and_wrong_password_are_indistinguishable() {
        let auth = sample_authenticator();
        let unknown = auth.authenticate("bob", "whatever").expect_err("rejected");
        let mismatch = auth.authenticate("alice", "wrong").expect_err("rejected");
        assert_eq!(unknown, mismatch);
        assert_eq!(unknown, AuthFailure);
    }

    #[test]
    fn unknown_role_resolves_to_empty_permissions() {
        let auth = sample_authenticator();
        let session = auth.authenticate("mallory", "hunter2").expect("session");
        assert!(session.permissions.is_empty());
    }

    #[test]
    fn load_reads_credential_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("users.json");
        fs::write(
            &path,
            r#"{"carol": {"password": "pw", "role": "admin"}}"#,
        )
        .expect("write users fixture");

        let auth = Authenticator::load(&path, sample_policy()).expect("load users");
        let session = auth.authenticate("carol", "pw").expect("session");
        assert!(session.has_permission("spawn_process"));
    }

    #[test]
    fn load_malformed_document_is_parse_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("users.json");
        fs::write(&path, "[]").expect("write fixture");

        let err = Authenticator::load(&path, sample_policy()).expect_err("expected parse error");
        assert!(matches!(err, DocumentError::Parse { .. }));
    }
}
