//! Session ledger: the keyed table of edit leases
//!
//! Every file gets its own async mutex slot. All reads and writes of a row
//! happen through a [`LedgerEntry`] holding that slot, so operations on one
//! file are serialized in arrival order while different files run in
//! parallel. Slots are created on first touch and retired once the row is
//! gone and nobody else is waiting on them.
//!
//! The backing store is authoritative. Entering a row re-reads it, so
//! changes made through another handle on the same store (an operator
//! command against a running service) are picked up by the next operation.

mod expiry;
mod libsql_store;
mod migrations;
mod store;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::Result;
use crate::models::{EditSession, FileId, XSessionId};

pub use expiry::Expiry;
pub use libsql_store::LibSqlLedgerStore;
pub use store::{LedgerStore, MemoryLedgerStore};

type Slot = Arc<Mutex<Option<EditSession>>>;

pub struct SessionLedger {
    slots: StdMutex<HashMap<FileId, Slot>>,
    store: Arc<dyn LedgerStore>,
}

impl SessionLedger {
    /// Ledger without durable backing
    pub fn in_memory() -> Self {
        Self::empty(Arc::new(MemoryLedgerStore::default()))
    }

    /// Ledger over `store`, starting from the rows it already holds
    pub async fn open(store: Arc<dyn LedgerStore>) -> Result<Self> {
        let sessions = store.load_all().await?;
        let ledger = Self::empty(store);
        {
            let mut slots = ledger.lock_slots();
            for session in sessions {
                slots.insert(
                    session.file_id.clone(),
                    Arc::new(Mutex::new(Some(session))),
                );
            }
            tracing::debug!(rows = slots.len(), "Loaded session ledger");
        }
        Ok(ledger)
    }

    fn empty(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            slots: StdMutex::new(HashMap::new()),
            store,
        }
    }

    /// Enter the critical section for `file_id` and load its current row
    pub async fn entry(&self, file_id: &FileId) -> Result<LedgerEntry<'_>> {
        let slot = {
            let mut slots = self.lock_slots();
            slots.entry(file_id.clone()).or_default().clone()
        };
        let guard = slot.lock_owned().await;
        let mut entry = LedgerEntry {
            ledger: self,
            file_id: file_id.clone(),
            guard: Some(guard),
        };
        entry.reload().await?;
        Ok(entry)
    }

    /// Copy of the current row for `file_id`
    pub async fn snapshot(&self, file_id: &FileId) -> Result<Option<EditSession>> {
        Ok(self.entry(file_id).await?.session().cloned())
    }

    /// Files with a live slot, in no particular order
    pub fn file_ids(&self) -> Vec<FileId> {
        self.lock_slots().keys().cloned().collect()
    }

    /// Every stored row, ordered by file id
    pub async fn sessions(&self) -> Result<Vec<EditSession>> {
        let mut sessions = self.store.load_all().await?;
        sessions.sort_by(|a, b| a.file_id.cmp(&b.file_id));
        Ok(sessions)
    }

    /// Forget eviction records that lapsed at or before `now`
    pub async fn prune_evictions(&self, now: i64) -> Result<u64> {
        self.store.prune_evictions(now).await
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<FileId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the slot for `file_id` if it is empty and unshared
    fn retire(&self, file_id: &FileId) {
        let mut slots = self.lock_slots();
        let idle = slots.get(file_id).is_some_and(|slot| {
            // Clones are only handed out under the map lock, so a count of one
            // means no task holds or waits on this slot.
            Arc::strong_count(slot) == 1 && slot.try_lock().is_ok_and(|row| row.is_none())
        });
        if idle {
            slots.remove(file_id);
        }
    }
}

/// Exclusive access to one file's row
pub struct LedgerEntry<'a> {
    ledger: &'a SessionLedger,
    file_id: FileId,
    guard: Option<OwnedMutexGuard<Option<EditSession>>>,
}

impl LedgerEntry<'_> {
    pub const fn file_id(&self) -> &FileId {
        &self.file_id
    }

    pub fn session(&self) -> Option<&EditSession> {
        self.guard.as_ref().and_then(|row| row.as_ref())
    }

    async fn reload(&mut self) -> Result<()> {
        let stored = self.ledger.store.load(&self.file_id).await?;
        if let Some(row) = self.guard.as_mut() {
            if **row != stored {
                tracing::debug!(file_id = %self.file_id, "Ledger row changed in the backing store");
                **row = stored;
            }
        }
        Ok(())
    }

    /// Persist `session` and make it the current row
    pub async fn put(&mut self, session: EditSession) -> Result<()> {
        self.ledger.store.upsert(&session).await?;
        if let Some(row) = self.guard.as_mut() {
            **row = Some(session);
        }
        Ok(())
    }

    /// Delete the row; a no-op when there is none
    pub async fn delete(&mut self) -> Result<()> {
        if self.session().is_none() {
            return Ok(());
        }
        self.ledger.store.delete(&self.file_id).await?;
        if let Some(row) = self.guard.as_mut() {
            **row = None;
        }
        Ok(())
    }

    /// Mark `x_session_id` as having lost its lease on this file
    pub async fn record_eviction(&self, x_session_id: &XSessionId, expires_at: i64) -> Result<()> {
        self.ledger
            .store
            .record_eviction(&self.file_id, x_session_id, expires_at)
            .await
    }

    pub async fn is_evicted(&self, x_session_id: &XSessionId, now: i64) -> Result<bool> {
        self.ledger
            .store
            .is_evicted(&self.file_id, x_session_id, now)
            .await
    }

    /// Drop the eviction mark of a token that was granted the lease again
    pub async fn clear_eviction(&self, x_session_id: &XSessionId) -> Result<()> {
        self.ledger
            .store
            .clear_eviction(&self.file_id, x_session_id)
            .await
    }
}

impl Drop for LedgerEntry<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.ledger.retire(&self.file_id);
    }
}
