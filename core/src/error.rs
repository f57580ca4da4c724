use thiserror::Error;

/// Failures surfaced by replica synchronization and startup.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sign in required before syncing")]
    AuthRequired,

    #[error("remote store unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("no remote backup exists for this account")]
    NoRemoteBackup,

    #[error("remote store is not configured: {0}")]
    ConfigurationMissing(String),

    #[error("schema migration failed: {0}")]
    MigrationFailed(String),

    #[error("remote document changed concurrently (expected {expected:?}, found {actual:?})")]
    RemoteConflict {
        expected: Option<i64>,
        actual: Option<i64>,
    },

    #[error("local store error: {0}")]
    LocalStore(String),
}

impl SyncError {
    /// Whether retrying the same operation later may succeed without user action.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RemoteUnavailable(_) | Self::RemoteConflict { .. })
    }

    pub(crate) fn local(err: &anyhow::Error) -> Self {
        Self::LocalStore(format!("{err:#}"))
    }
}
