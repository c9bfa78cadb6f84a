//! Ledger schema migrations

use crate::error::Result;
use libsql::{params, Connection};

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Version 1: one row per file. The full session is kept as JSON in
/// `payload`; the other columns exist for operator queries.
const V1_EDIT_SESSIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS edit_sessions (
        file_id TEXT PRIMARY KEY,
        state TEXT NOT NULL,
        holder_x_session_id TEXT NOT NULL DEFAULT '',
        applicant_x_session_id TEXT NOT NULL DEFAULT '',
        last_activity_at INTEGER NOT NULL,
        payload TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_edit_sessions_activity ON edit_sessions(last_activity_at)",
];

/// Version 2: tokens whose lease was revoked, kept until `expires_at`
const V2_EVICTIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS evictions (
        file_id TEXT NOT NULL,
        x_session_id TEXT NOT NULL,
        expires_at INTEGER NOT NULL,
        PRIMARY KEY (file_id, x_session_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_evictions_expires ON evictions(expires_at)",
];

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
        (),
    )
    .await?;

    let version = schema_version(conn).await?;
    if version >= CURRENT_VERSION {
        return Ok(());
    }
    tracing::info!(from = version, to = CURRENT_VERSION, "Migrating ledger schema");

    if version < 1 {
        apply(conn, 1, V1_EDIT_SESSIONS).await?;
    }
    if version < 2 {
        apply(conn, 2, V2_EVICTIONS).await?;
    }
    Ok(())
}

async fn schema_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;
    match rows.next().await? {
        Some(row) => Ok(row.get(0)?),
        None => Ok(0),
    }
}

/// Apply `statements` and record `version` in one transaction
async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    let applied = async {
        for statement in statements.iter().copied() {
            conn.execute(statement, ()).await?;
        }
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            params![version],
        )
        .await?;
        conn.execute("COMMIT", ()).await?;
        Ok::<(), libsql::Error>(())
    }
    .await;

    if let Err(error) = applied {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(error.into());
    }
    tracing::debug!(version, "Applied ledger migration");
    Ok(())
}
