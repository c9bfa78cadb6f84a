//! Ledger persistence backends

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{EditSession, FileId, XSessionId};

/// Durable home of the session rows
///
/// The ledger writes here before changing its in-memory row, so a failing
/// backend leaves the lease exactly as it was.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Load every stored session
    async fn load_all(&self) -> Result<Vec<EditSession>>;

    /// Load the row for one file
    async fn load(&self, file_id: &FileId) -> Result<Option<EditSession>>;

    /// Insert or replace the row for `session.file_id`
    async fn upsert(&self, session: &EditSession) -> Result<()>;

    /// Remove the row for a file; missing rows are not an error
    async fn delete(&self, file_id: &FileId) -> Result<()>;

    /// Remember that `x_session_id` lost its lease on `file_id`, until
    /// `expires_at` (Unix ms)
    async fn record_eviction(
        &self,
        file_id: &FileId,
        x_session_id: &XSessionId,
        expires_at: i64,
    ) -> Result<()>;

    /// Whether a live eviction record exists for the token at `now`
    async fn is_evicted(
        &self,
        file_id: &FileId,
        x_session_id: &XSessionId,
        now: i64,
    ) -> Result<bool>;

    async fn clear_eviction(&self, file_id: &FileId, x_session_id: &XSessionId) -> Result<()>;

    /// Drop eviction records that lapsed at or before `now`
    async fn prune_evictions(&self, now: i64) -> Result<u64>;
}

/// Process-local backend
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    rows: Mutex<HashMap<FileId, EditSession>>,
    evictions: Mutex<HashMap<(FileId, XSessionId), i64>>,
}

impl MemoryLedgerStore {
    pub fn len(&self) -> usize {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn load_all(&self) -> Result<Vec<EditSession>> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(rows.values().cloned().collect())
    }

    async fn load(&self, file_id: &FileId) -> Result<Option<EditSession>> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(rows.get(file_id).cloned())
    }

    async fn upsert(&self, session: &EditSession) -> Result<()> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.file_id.clone(), session.clone());
        Ok(())
    }

    async fn delete(&self, file_id: &FileId) -> Result<()> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(file_id);
        Ok(())
    }

    async fn record_eviction(
        &self,
        file_id: &FileId,
        x_session_id: &XSessionId,
        expires_at: i64,
    ) -> Result<()> {
        self.evictions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((file_id.clone(), x_session_id.clone()), expires_at);
        Ok(())
    }

    async fn is_evicted(
        &self,
        file_id: &FileId,
        x_session_id: &XSessionId,
        now: i64,
    ) -> Result<bool> {
        let evictions = self.evictions.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(evictions
            .get(&(file_id.clone(), x_session_id.clone()))
            .is_some_and(|expires_at| *expires_at > now))
    }

    async fn clear_eviction(&self, file_id: &FileId, x_session_id: &XSessionId) -> Result<()> {
        self.evictions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(file_id.clone(), x_session_id.clone()));
        Ok(())
    }

    async fn prune_evictions(&self, now: i64) -> Result<u64> {
        let mut evictions = self.evictions.lock().unwrap_or_else(PoisonError::into_inner);
        let before = evictions.len();
        evictions.retain(|_, expires_at| *expires_at > now);
        Ok(u64::try_from(before - evictions.len()).unwrap_or(u64::MAX))
    }
}
