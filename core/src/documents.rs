//! Per-user replica documents, as hosted by the replica server.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::remote::{RemoteDocument, WritePrecondition};

#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub updated_at_millis: i64,
    /// Serialized `RemoteDocument` JSON.
    pub body: String,
    pub stored_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    PreconditionFailed { current: Option<i64> },
}

pub struct DocumentStore {
    conn: Connection,
}

impl DocumentStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open document store: {}", path.display()))?;
        let store = DocumentStore { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = DocumentStore { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS replica_documents (
                    user_id TEXT PRIMARY KEY,
                    updated_at_millis INTEGER NOT NULL,
                    body TEXT NOT NULL,
                    stored_at TEXT NOT NULL
                );

                PRAGMA user_version = 1;",
            )?;
        }
        Ok(())
    }

    pub fn get(&self, user_id: &str) -> Result<Option<StoredDocument>> {
        Ok(self
            .conn
            .query_row(
                "SELECT updated_at_millis, body, stored_at FROM replica_documents WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(StoredDocument {
                        updated_at_millis: row.get(0)?,
                        body: row.get(1)?,
                        stored_at: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }

    /// Store the document if the precondition holds against the current one.
    pub fn put(
        &self,
        user_id: &str,
        document: &RemoteDocument,
        precondition: WritePrecondition,
    ) -> Result<PutOutcome> {
        let body = serde_json::to_string(document)?;
        let tx = self.conn.unchecked_transaction()?;
        let current: Option<i64> = tx
            .query_row(
                "SELECT updated_at_millis FROM replica_documents WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        if !precondition.holds(current) {
            return Ok(PutOutcome::PreconditionFailed { current });
        }
        tx.execute(
            "INSERT INTO replica_documents (user_id, updated_at_millis, body, stored_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                updated_at_millis = excluded.updated_at_millis,
                body = excluded.body,
                stored_at = excluded.stored_at",
            params![
                user_id,
                document.updated_at_millis,
                body,
                Utc::now().to_rfc3339()
            ],
        )?;
        tx.commit()?;
        Ok(PutOutcome::Stored)
    }

    pub fn count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM replica_documents", [], |row| row.get(0))?)
    }
}
