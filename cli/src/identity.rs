use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use fleetlog_core::sync::IdentityProvider;
use tracing::warn;

/// Signed-in user id kept in a single file in the data directory.
pub struct FileIdentity {
    path: PathBuf,
}

impl FileIdentity {
    pub fn new(path: &Path) -> Self {
        FileIdentity {
            path: path.to_path_buf(),
        }
    }

    pub fn read(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let id = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read identity file: {}", self.path.display()))?;
        let id = id.trim();
        Ok((!id.is_empty()).then(|| id.to_string()))
    }

    /// Store `user_id`, or a fresh UUID when none is given. Returns the stored id.
    pub fn login(&self, user_id: Option<&str>) -> Result<String> {
        let id = match user_id.map(str::trim) {
            Some("") => bail!("User id must not be empty"),
            Some(id) if id.contains('/') || id.chars().any(char::is_whitespace) => {
                bail!("User id must not contain '/' or whitespace")
            }
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        std::fs::write(&self.path, &id)
            .with_context(|| format!("Failed to write identity file: {}", self.path.display()))?;
        Ok(id)
    }

    /// Returns whether someone was signed in.
    pub fn logout(&self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&self.path).context("Failed to remove identity file")?;
        Ok(true)
    }
}

impl IdentityProvider for FileIdentity {
    fn current_user_id(&self) -> Option<String> {
        match self.read() {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "could not read identity");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_logout_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let identity = FileIdentity::new(&dir.path().join("identity"));
        assert!(identity.current_user_id().is_none());

        let id = identity.login(Some("alice")).unwrap();
        assert_eq!(id, "alice");
        assert_eq!(identity.current_user_id().as_deref(), Some("alice"));

        assert!(identity.logout().unwrap());
        assert!(identity.current_user_id().is_none());
        assert!(!identity.logout().unwrap());
    }

    #[test]
    fn test_login_generates_uuid() {
        let dir = tempfile::tempdir().unwrap();
        let identity = FileIdentity::new(&dir.path().join("identity"));
        let id = identity.login(None).unwrap();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_login_rejects_bad_ids() {
        let dir = tempfile::tempdir().unwrap();
        let identity = FileIdentity::new(&dir.path().join("identity"));
        assert!(identity.login(Some("  ")).is_err());
        assert!(identity.login(Some("a/b")).is_err());
        assert!(identity.current_user_id().is_none());
    }
}
