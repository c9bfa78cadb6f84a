//! Lease arbitration: request, deny, handover, release and expiry
//!
//! Each operation runs inside the ledger's critical section for its file
//! and writes the resulting row back in one step, so a failed transition
//! never leaves a half-applied lease behind.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::{duration_ms, Clock};
use crate::error::{LeaseError, Result};
use crate::ledger::{Expiry, SessionLedger};
use crate::models::{
    ChangeId, Device, EditSession, FileId, Participant, SessionState, UserProfile, XSessionId,
};

/// A client asking for the right to edit a file
#[derive(Debug, Clone)]
pub struct LeaseRequest {
    pub file_id: FileId,
    pub user_id: String,
    pub device: Device,
    pub profile: UserProfile,
    /// Minted when the client does not bring one
    pub x_session_id: Option<XSessionId>,
    pub storage_type: Option<String>,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Granted,
    Queued,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOutcome {
    pub status: RequestStatus,
    /// The caller's token, minted if it brought none
    pub x_session_id: XSessionId,
    pub holder_x_session_id: XSessionId,
}

/// How the holder hands the lease to the queued applicant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandoverMode {
    /// Roles swap; the previous holder leaves the lease
    Invert,
    /// The previous holder keeps read access
    Downgrade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionRole {
    Holder,
    Applicant,
    Reader,
}

/// One participant of a file's lease, as reported by `get`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub x_session_id: XSessionId,
    pub user_id: String,
    pub device: Device,
    pub profile: UserProfile,
    pub role: SessionRole,
    pub state: SessionState,
    pub base_change_id: ChangeId,
    pub last_activity_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Rows deleted
    pub expired: Vec<FileId>,
    /// Holders evicted while an applicant keeps the row reserved
    pub reserved: Vec<FileId>,
    /// Rows the backend refused to change; retried on the next sweep
    pub failed: Vec<FileId>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.reserved.is_empty() && self.failed.is_empty()
    }
}

pub struct LeaseArbitrator {
    ledger: Arc<SessionLedger>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl LeaseArbitrator {
    pub fn new(ledger: Arc<SessionLedger>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { ledger, clock, ttl }
    }

    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Ask for the lease. Granted when free or already held by the caller,
    /// otherwise the caller becomes the applicant.
    pub async fn request(&self, request: LeaseRequest) -> Result<RequestOutcome> {
        let now = self.clock.now_ms();
        let x_session_id = request
            .x_session_id
            .clone()
            .unwrap_or_else(XSessionId::generate);
        let participant = Participant {
            x_session_id: x_session_id.clone(),
            user_id: request.user_id,
            device: request.device,
            profile: request.profile,
            last_seen_at: now,
        };

        let mut entry = self.ledger.entry(&request.file_id).await?;
        let Some(mut session) = entry.settle(now, self.ttl).await? else {
            let mut session = EditSession::granted(request.file_id.clone(), participant, now);
            session.storage_type = request.storage_type;
            session.external_id = request.external_id;
            entry.put(session).await?;
            entry.clear_eviction(&x_session_id).await?;
            tracing::info!(
                file_id = %request.file_id,
                x_session_id = %x_session_id,
                "Granted edit session"
            );
            return Ok(granted(x_session_id));
        };

        if session.is_held_by(&x_session_id) {
            session.last_activity_at = now;
            entry.put(session).await?;
            return Ok(granted(x_session_id));
        }

        let Some(holder_x_session_id) = session.holder_x_session_id().cloned() else {
            // A row with neither holder nor applicant is dead weight; take it.
            session.grant_to(participant, now);
            entry.put(session).await?;
            entry.clear_eviction(&x_session_id).await?;
            return Ok(granted(x_session_id));
        };

        session.applicant = Some(participant);
        entry.put(session).await?;
        tracing::info!(
            file_id = %request.file_id,
            x_session_id = %x_session_id,
            holder = %holder_x_session_id,
            "Queued edit session request"
        );
        Ok(RequestOutcome {
            status: RequestStatus::Queued,
            x_session_id,
            holder_x_session_id,
        })
    }

    /// Holder turns down the queued applicant
    pub async fn deny(
        &self,
        file_id: &FileId,
        holder: &XSessionId,
        applicant: &XSessionId,
    ) -> Result<()> {
        let now = self.clock.now_ms();
        let mut entry = self.ledger.entry(file_id).await?;
        let mut session = entry
            .session()
            .cloned()
            .ok_or_else(|| session_not_found(file_id))?;

        if !session.is_held_by(holder) {
            return Err(not_holder(file_id, holder));
        }
        if session.applicant_x_session_id() != Some(applicant) {
            return Err(session_not_found(file_id));
        }

        session.applicant = None;
        session.last_activity_at = now;
        entry.put(session).await?;
        tracing::info!(file_id = %file_id, applicant = %applicant, "Denied edit session request");
        Ok(())
    }

    /// Holder hands the lease to the queued applicant
    pub async fn update(
        &self,
        file_id: &FileId,
        x_session_id: &XSessionId,
        mode: HandoverMode,
        expected_state: Option<SessionState>,
    ) -> Result<()> {
        let now = self.clock.now_ms();
        let mut entry = self.ledger.entry(file_id).await?;
        let mut session = entry
            .session()
            .cloned()
            .ok_or_else(|| session_not_found(file_id))?;

        if let Some(expected) = expected_state {
            if expected != session.state {
                return Err(LeaseError::StateMismatch {
                    file_id: file_id.clone(),
                    expected,
                    actual: session.state,
                }
                .into());
            }
        }
        if !session.is_held_by(x_session_id) {
            return Err(not_holder(file_id, x_session_id));
        }
        let Some(applicant) = session.applicant.take() else {
            return Err(LeaseError::NoApplicant {
                file_id: file_id.clone(),
            }
            .into());
        };

        // The outgoing holder may no longer save as the editor, even once
        // the file falls free again.
        entry
            .record_eviction(x_session_id, now.saturating_add(duration_ms(self.ttl)))
            .await?;
        let previous = session.holder.take();
        session
            .readers
            .retain(|reader| reader.x_session_id != applicant.x_session_id);
        if let (HandoverMode::Downgrade, Some(previous)) = (mode, previous) {
            session.readers.push(previous);
        }
        let new_holder = applicant.x_session_id.clone();
        session.grant_to(applicant, now);
        entry.put(session).await?;
        entry.clear_eviction(&new_holder).await?;

        tracing::info!(
            file_id = %file_id,
            from = %x_session_id,
            to = %new_holder,
            mode = ?mode,
            "Handed over edit session"
        );
        Ok(())
    }

    /// Release the lease, withdraw an application or drop read access
    pub async fn remove(&self, file_id: &FileId, x_session_id: &XSessionId) -> Result<()> {
        let mut entry = self.ledger.entry(file_id).await?;
        let Some(mut session) = entry.session().cloned() else {
            return Ok(());
        };

        if session.is_held_by(x_session_id) {
            if session.vacate() {
                entry.put(session).await?;
            } else {
                entry.delete().await?;
            }
            tracing::info!(file_id = %file_id, x_session_id = %x_session_id, "Released edit session");
            return Ok(());
        }

        if session.applicant_x_session_id() == Some(x_session_id) {
            session.applicant = None;
            if session.holder.is_none() {
                entry.delete().await?;
            } else {
                entry.put(session).await?;
            }
            return Ok(());
        }

        let readers = session.readers.len();
        session
            .readers
            .retain(|reader| &reader.x_session_id != x_session_id);
        if session.readers.len() != readers {
            entry.put(session).await?;
            return Ok(());
        }

        Err(not_holder(file_id, x_session_id))
    }

    /// Participants of a file's lease
    ///
    /// Expires an idle holder and promotes a reserved applicant first.
    pub async fn get(&self, file_id: &FileId) -> Result<Vec<SessionView>> {
        let now = self.clock.now_ms();
        let mut entry = self.ledger.entry(file_id).await?;
        Ok(entry
            .settle(now, self.ttl)
            .await?
            .as_ref()
            .map(views)
            .unwrap_or_default())
    }

    /// Operator eviction of the current holder
    pub async fn force_release(&self, file_id: &FileId) -> Result<Option<XSessionId>> {
        let now = self.clock.now_ms();
        let mut entry = self.ledger.entry(file_id).await?;
        let Some(mut session) = entry.session().cloned() else {
            return Ok(None);
        };
        let Some(evicted) = session.holder_x_session_id().cloned() else {
            return Ok(None);
        };

        entry
            .record_eviction(&evicted, now.saturating_add(duration_ms(self.ttl)))
            .await?;
        if session.vacate() {
            entry.put(session).await?;
        } else {
            entry.delete().await?;
        }
        tracing::warn!(file_id = %file_id, x_session_id = %evicted, "Edit session force-released");
        Ok(Some(evicted))
    }

    /// Expire leases idle for longer than the TTL
    ///
    /// A holder is evicted once its last activity is older than the TTL.
    /// The row survives as a reservation while its applicant asked within
    /// the TTL; stale reservations are deleted.
    pub async fn sweep(&self) -> SweepReport {
        let now = self.clock.now_ms();
        let mut report = SweepReport::default();

        for file_id in self.ledger.file_ids() {
            match self.expire(&file_id, now).await {
                Ok(Expiry::Kept) => {}
                Ok(Expiry::Reserved) => report.reserved.push(file_id),
                Ok(Expiry::Deleted) => report.expired.push(file_id),
                Err(error) => {
                    tracing::warn!(file_id = %file_id, error = %error, "Sweep could not expire session");
                    report.failed.push(file_id);
                }
            }
        }

        match self.ledger.prune_evictions(now).await {
            Ok(0) => {}
            Ok(pruned) => tracing::debug!(pruned, "Pruned eviction records"),
            Err(error) => tracing::warn!(error = %error, "Could not prune eviction records"),
        }

        if !report.is_empty() {
            tracing::debug!(
                expired = report.expired.len(),
                reserved = report.reserved.len(),
                failed = report.failed.len(),
                "Sweep finished"
            );
        }
        report
    }

    async fn expire(&self, file_id: &FileId, now: i64) -> Result<Expiry> {
        let mut entry = self.ledger.entry(file_id).await?;
        entry.expire_idle(now, self.ttl).await
    }

    /// Every row in the ledger, ordered by file id
    pub async fn sessions(&self) -> Result<Vec<EditSession>> {
        self.ledger.sessions().await
    }
}

fn granted(x_session_id: XSessionId) -> RequestOutcome {
    RequestOutcome {
        status: RequestStatus::Granted,
        holder_x_session_id: x_session_id.clone(),
        x_session_id,
    }
}

fn views(session: &EditSession) -> Vec<SessionView> {
    let view = |participant: &Participant, role: SessionRole| SessionView {
        x_session_id: participant.x_session_id.clone(),
        user_id: participant.user_id.clone(),
        device: participant.device,
        profile: participant.profile.clone(),
        role,
        state: session.state,
        base_change_id: session.base_change_id,
        last_activity_at: session.last_activity_at,
    };

    session
        .holder
        .iter()
        .map(|holder| view(holder, SessionRole::Holder))
        .chain(
            session
                .applicant
                .iter()
                .map(|applicant| view(applicant, SessionRole::Applicant)),
        )
        .chain(
            session
                .readers
                .iter()
                .map(|reader| view(reader, SessionRole::Reader)),
        )
        .collect()
}

fn not_holder(file_id: &FileId, x_session_id: &XSessionId) -> crate::Error {
    LeaseError::NotHolder {
        file_id: file_id.clone(),
        x_session_id: x_session_id.clone(),
    }
    .into()
}

fn session_not_found(file_id: &FileId) -> crate::Error {
    LeaseError::SessionNotFound {
        file_id: file_id.clone(),
    }
    .into()
}
