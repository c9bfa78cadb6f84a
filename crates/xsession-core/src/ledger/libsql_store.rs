//! libSQL-backed ledger store

use std::path::Path;

use async_trait::async_trait;
use libsql::{params, Builder, Connection, Database};
use tokio::sync::Mutex;

use super::migrations;
use super::store::LedgerStore;
use crate::error::Result;
use crate::models::{EditSession, FileId, XSessionId};

/// Durable ledger rows in a local libSQL database
pub struct LibSqlLedgerStore {
    _db: Database,
    conn: Mutex<Connection>,
}

impl LibSqlLedgerStore {
    /// Open the ledger database at `path`, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let path_str = path.as_ref().to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        Self::from_database(db).await
    }

    /// Open an in-memory ledger database (useful for testing)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::from_database(db).await
    }

    async fn from_database(db: Database) -> Result<Self> {
        let conn = db.connect()?;
        conn.execute("PRAGMA journal_mode = WAL;", ()).await.ok();
        conn.execute("PRAGMA synchronous = NORMAL;", ()).await.ok();
        migrations::run(&conn).await?;
        Ok(Self {
            _db: db,
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl LedgerStore for LibSqlLedgerStore {
    async fn load_all(&self) -> Result<Vec<EditSession>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query("SELECT payload FROM edit_sessions ORDER BY file_id", ())
            .await?;

        let mut sessions = Vec::new();
        while let Some(row) = rows.next().await? {
            let payload: String = row.get(0)?;
            sessions.push(serde_json::from_str(&payload)?);
        }
        Ok(sessions)
    }

    async fn load(&self, file_id: &FileId) -> Result<Option<EditSession>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT payload FROM edit_sessions WHERE file_id = ?1",
                params![file_id.as_str().to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => {
                let payload: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&payload)?))
            }
            None => Ok(None),
        }
    }

    async fn upsert(&self, session: &EditSession) -> Result<()> {
        let payload = serde_json::to_string(session)?;
        let holder = session
            .holder_x_session_id()
            .map(|id| id.as_str().to_string())
            .unwrap_or_default();
        let applicant = session
            .applicant_x_session_id()
            .map(|id| id.as_str().to_string())
            .unwrap_or_default();

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO edit_sessions (
                file_id, state, holder_x_session_id, applicant_x_session_id, last_activity_at, payload
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(file_id) DO UPDATE SET
                state = excluded.state,
                holder_x_session_id = excluded.holder_x_session_id,
                applicant_x_session_id = excluded.applicant_x_session_id,
                last_activity_at = excluded.last_activity_at,
                payload = excluded.payload",
            params![
                session.file_id.as_str().to_string(),
                session.state.as_str().to_string(),
                holder,
                applicant,
                session.last_activity_at,
                payload
            ],
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, file_id: &FileId) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM edit_sessions WHERE file_id = ?1",
            params![file_id.as_str().to_string()],
        )
        .await?;
        Ok(())
    }

    async fn record_eviction(
        &self,
        file_id: &FileId,
        x_session_id: &XSessionId,
        expires_at: i64,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO evictions (file_id, x_session_id, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(file_id, x_session_id) DO UPDATE SET expires_at = excluded.expires_at",
            params![
                file_id.as_str().to_string(),
                x_session_id.as_str().to_string(),
                expires_at
            ],
        )
        .await?;
        Ok(())
    }

    async fn is_evicted(
        &self,
        file_id: &FileId,
        x_session_id: &XSessionId,
        now: i64,
    ) -> Result<bool> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT EXISTS(
                    SELECT 1 FROM evictions
                    WHERE file_id = ?1 AND x_session_id = ?2 AND expires_at > ?3
                )",
                params![
                    file_id.as_str().to_string(),
                    x_session_id.as_str().to_string(),
                    now
                ],
            )
            .await?;
        Ok(rows
            .next()
            .await?
            .map(|row| row.get::<i32>(0))
            .transpose()?
            .is_some_and(|found| found != 0))
    }

    async fn clear_eviction(&self, file_id: &FileId, x_session_id: &XSessionId) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM evictions WHERE file_id = ?1 AND x_session_id = ?2",
            params![
                file_id.as_str().to_string(),
                x_session_id.as_str().to_string()
            ],
        )
        .await?;
        Ok(())
    }

    async fn prune_evictions(&self, now: i64) -> Result<u64> {
        let conn = self.conn.lock().await;
        let pruned = conn
            .execute("DELETE FROM evictions WHERE expires_at <= ?1", params![now])
            .await?;
        Ok(pruned)
    }
}
