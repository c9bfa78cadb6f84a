//! TTL handling for one ledger row
//!
//! Shared by the periodic sweep and by the operations that decide on a
//! lease (request, get, save admission), so an idle holder loses the lease
//! as soon as the TTL elapses rather than at the next sweep tick.

use std::time::Duration;

use super::LedgerEntry;
use crate::clock::duration_ms;
use crate::error::Result;
use crate::models::EditSession;

/// What applying the TTL did to a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Kept,
    /// Holder evicted; a fresh applicant keeps the row reserved
    Reserved,
    Deleted,
}

impl LedgerEntry<'_> {
    /// Evict a holder idle for longer than `ttl` and drop stale reservations
    ///
    /// The evicted token is recorded for another `ttl`, so a late save
    /// carrying it is recognised as expired whatever pointer it declares.
    pub async fn expire_idle(&mut self, now: i64, ttl: Duration) -> Result<Expiry> {
        let ttl = duration_ms(ttl);
        let Some(mut session) = self.session().cloned() else {
            return Ok(Expiry::Kept);
        };

        let holder_idle = now.saturating_sub(session.last_activity_at) > ttl;
        let applicant_fresh = session
            .applicant
            .as_ref()
            .is_some_and(|applicant| now.saturating_sub(applicant.last_seen_at) <= ttl);

        match (session.holder_x_session_id().cloned(), holder_idle) {
            (Some(_), false) => Ok(Expiry::Kept),
            (None, _) if applicant_fresh => Ok(Expiry::Kept),
            (Some(evicted), true) => {
                if !applicant_fresh {
                    session.applicant = None;
                }
                self.record_eviction(&evicted, now.saturating_add(ttl))
                    .await?;
                let reserved = session.vacate();
                if reserved {
                    self.put(session).await?;
                } else {
                    self.delete().await?;
                }
                tracing::info!(
                    file_id = %self.file_id(),
                    x_session_id = %evicted,
                    reserved,
                    "Edit session expired"
                );
                Ok(if reserved {
                    Expiry::Reserved
                } else {
                    Expiry::Deleted
                })
            }
            (None, _) => {
                self.delete().await?;
                tracing::info!(file_id = %self.file_id(), "Stale reservation expired");
                Ok(Expiry::Deleted)
            }
        }
    }

    /// Apply the TTL, then hand a reserved lease to its applicant
    ///
    /// Returns the row as it stands afterwards.
    pub async fn settle(&mut self, now: i64, ttl: Duration) -> Result<Option<EditSession>> {
        self.expire_idle(now, ttl).await?;
        let Some(mut session) = self.session().cloned() else {
            return Ok(None);
        };

        if session.promote_reservation(now) {
            self.put(session.clone()).await?;
            if let Some(holder) = session.holder_x_session_id() {
                self.clear_eviction(holder).await?;
                tracing::info!(
                    file_id = %self.file_id(),
                    x_session_id = %holder,
                    "Promoted queued applicant"
                );
            }
        }
        Ok(Some(session))
    }
}
