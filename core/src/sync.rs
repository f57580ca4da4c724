//! Upload, download, and bidirectional sync between the local and remote replicas.
//!
//! Within `sync_now` both reads complete before any write, the local restore happens
//! only after the merge has been computed, and the remote write is always last. A
//! caller dropping the future before the local restore leaves both replicas untouched.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::db::now_millis;
use crate::error::SyncError;
use crate::merge::MergeStrategy;
use crate::models::Snapshot;
use crate::remote::WritePrecondition;

#[async_trait]
pub trait LocalSnapshotStore: Send + Sync {
    async fn read_snapshot(&self) -> Result<Snapshot, SyncError>;
    /// Atomically replace the whole local dataset.
    async fn restore_snapshot(&self, snapshot: &Snapshot) -> Result<(), SyncError>;
}

#[async_trait]
pub trait RemoteReplicaStore: Send + Sync {
    /// Fails with `ConfigurationMissing` when the backend has not been set up.
    fn ensure_configured(&self) -> Result<(), SyncError> {
        Ok(())
    }

    async fn read(&self, user_id: &str) -> Result<Option<Snapshot>, SyncError>;

    async fn write(
        &self,
        user_id: &str,
        snapshot: &Snapshot,
        precondition: WritePrecondition,
    ) -> Result<(), SyncError>;
}

pub trait IdentityProvider: Send + Sync {
    fn current_user_id(&self) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    FirstBackupCreated,
    AlreadySynchronized,
    MergedBoth,
    LocalUpdated,
    RemoteUpdated,
    Uploaded,
    Downloaded,
}

impl SyncOutcome {
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::FirstBackupCreated => "First backup created",
            Self::AlreadySynchronized => "Already synchronized",
            Self::MergedBoth => "Conflict resolved by merge",
            Self::LocalUpdated => "Local data updated from remote",
            Self::RemoteUpdated => "Remote updated from local data",
            Self::Uploaded => "Backup uploaded",
            Self::Downloaded => "Local data restored from backup",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub message: &'static str,
    pub local_written: bool,
    pub remote_written: bool,
    pub updated_at_millis: i64,
}

impl SyncReport {
    fn new(outcome: SyncOutcome, local_written: bool, remote_written: bool, at: i64) -> Self {
        SyncReport {
            outcome,
            message: outcome.message(),
            local_written,
            remote_written,
            updated_at_millis: at,
        }
    }
}

pub struct SyncEngine {
    local: Arc<dyn LocalSnapshotStore>,
    remote: Arc<dyn RemoteReplicaStore>,
    identity: Arc<dyn IdentityProvider>,
    strategy: MergeStrategy,
}

impl SyncEngine {
    pub fn new(
        local: Arc<dyn LocalSnapshotStore>,
        remote: Arc<dyn RemoteReplicaStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        SyncEngine {
            local,
            remote,
            identity,
            strategy: MergeStrategy::default(),
        }
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Checked before any I/O.
    fn user_id(&self) -> Result<String, SyncError> {
        self.remote.ensure_configured()?;
        self.identity
            .current_user_id()
            .filter(|id| !id.trim().is_empty())
            .ok_or(SyncError::AuthRequired)
    }

    /// Overwrite the remote replica with the local one.
    pub async fn upload(&self) -> Result<SyncReport, SyncError> {
        let user_id = self.user_id()?;
        let local = self.local.read_snapshot().await?;
        self.remote
            .write(&user_id, &local, WritePrecondition::Any)
            .await?;
        info!(user = %user_id, records = local.record_count(), "uploaded local snapshot");
        Ok(SyncReport::new(
            SyncOutcome::Uploaded,
            false,
            true,
            local.updated_at_millis,
        ))
    }

    /// Replace the local replica with the remote one. No merge.
    pub async fn download(&self) -> Result<SyncReport, SyncError> {
        let user_id = self.user_id()?;
        let remote = self
            .remote
            .read(&user_id)
            .await?
            .ok_or(SyncError::NoRemoteBackup)?;
        self.local.restore_snapshot(&remote).await?;
        info!(
            user = %user_id,
            records = remote.record_count(),
            "restored local snapshot from remote"
        );
        Ok(SyncReport::new(
            SyncOutcome::Downloaded,
            true,
            false,
            remote.updated_at_millis,
        ))
    }

    pub async fn sync_now(&self) -> Result<SyncReport, SyncError> {
        let user_id = self.user_id()?;
        let local = self.local.read_snapshot().await?;
        let remote = self.remote.read(&user_id).await?;

        let Some(remote) = remote else {
            self.remote
                .write(&user_id, &local, WritePrecondition::Absent)
                .await?;
            info!(user = %user_id, "first backup created");
            return Ok(SyncReport::new(
                SyncOutcome::FirstBackupCreated,
                false,
                true,
                local.updated_at_millis,
            ));
        };

        let Some(merged) = self.strategy.apply(&local, &remote, now_millis()) else {
            debug!(user = %user_id, strategy = ?self.strategy, "replica markers equal");
            return Ok(SyncReport::new(
                SyncOutcome::AlreadySynchronized,
                false,
                false,
                local.updated_at_millis,
            ));
        };
        let local_changed = !merged.equivalent(&local);
        let remote_changed = !merged.equivalent(&remote);
        debug!(
            user = %user_id,
            strategy = ?self.strategy,
            local_changed,
            remote_changed,
            "merge computed"
        );

        if local_changed {
            self.local.restore_snapshot(&merged).await?;
        }
        if remote_changed {
            self.remote
                .write(
                    &user_id,
                    &merged,
                    WritePrecondition::UpdatedAt(remote.updated_at_millis),
                )
                .await?;
        }

        let outcome = match (local_changed, remote_changed) {
            (false, false) => SyncOutcome::AlreadySynchronized,
            (true, true) => SyncOutcome::MergedBoth,
            (true, false) => SyncOutcome::LocalUpdated,
            (false, true) => SyncOutcome::RemoteUpdated,
        };
        info!(user = %user_id, outcome = ?outcome, "sync complete");
        Ok(SyncReport::new(
            outcome,
            local_changed,
            remote_changed,
            merged.updated_at_millis,
        ))
    }
}
