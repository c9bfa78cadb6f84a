//! Upload coordination
//!
//! A save runs in three phases. Admission checks the lease and classifies
//! the save under the file's lock. The bytes are then written to the
//! version store with the lock released. Completion re-checks the lease
//! under the lock, labels the stored version and advances the pointer.
//! Payloads are never rejected for staleness; they are stored and flagged.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::activity::{ActivityAction, ActivityEvent, ActivityLog};
use crate::clock::Clock;
use crate::conflict::{ConflictPolicy, LeaseView, PolicySelector};
use crate::error::{LeaseError, Result};
use crate::ledger::SessionLedger;
use crate::models::{
    content_digest, ChangeId, ConflictReport, Device, EditSession, FileChangeInfo, FileId, LeaseId,
    Participant, ReasonCode, SaveReceipt, UserProfile, VersionId, XSessionId,
};
use crate::version_store::VersionStore;

#[derive(Debug, Clone)]
pub struct SaveRequest {
    pub file_id: FileId,
    pub x_session_id: XSessionId,
    /// Gateway session, carried for logging only
    pub session_id: Option<String>,
    pub user_id: String,
    pub device: Device,
    /// Pointer the client edited on top of
    pub base_change_id: ChangeId,
    pub file_changes_info: Vec<FileChangeInfo>,
    pub bytes: Bytes,
    /// `false` keeps TOUCH clients on the legacy workflow
    pub new_session_workflow: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaveStatus {
    Saved,
    Conflicted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub status: SaveStatus,
    pub version_id: VersionId,
    /// Pointer of the stored version
    pub base_change_id: ChangeId,
    pub report: ConflictReport,
    /// A retry answered from the previous receipt without writing
    pub replayed: bool,
}

impl SaveOutcome {
    fn from_receipt(receipt: &SaveReceipt, replayed: bool) -> Self {
        let report = ConflictReport::new(receipt.reason, Some(receipt.version_id));
        Self {
            status: if report.is_conflicted {
                SaveStatus::Conflicted
            } else {
                SaveStatus::Saved
            },
            version_id: receipt.version_id,
            base_change_id: receipt.base_change_id,
            report,
            replayed,
        }
    }
}

/// What admission decided for a save
#[derive(Debug, Clone, Copy)]
struct Admission {
    /// Lease the save counts against, `None` when it runs without one
    lease_id: Option<LeaseId>,
    reason: ReasonCode,
    /// Admission created the session row
    created: bool,
}

enum Admitted {
    Write(Admission),
    Replay(SaveOutcome),
}

pub struct UploadCoordinator {
    ledger: Arc<SessionLedger>,
    versions: Arc<dyn VersionStore>,
    policies: PolicySelector,
    clock: Arc<dyn Clock>,
    /// Idle time after which the holder's lease is treated as expired
    ttl: Duration,
    activity: ActivityLog,
}

impl UploadCoordinator {
    pub fn new(
        ledger: Arc<SessionLedger>,
        versions: Arc<dyn VersionStore>,
        policies: PolicySelector,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            ledger,
            versions,
            policies,
            clock,
            ttl,
            activity: ActivityLog::disabled(),
        }
    }

    #[must_use]
    pub fn with_activity(mut self, activity: ActivityLog) -> Self {
        self.activity = activity;
        self
    }

    pub async fn save(&self, request: SaveRequest) -> Result<SaveOutcome> {
        let policy = self
            .policies
            .select(request.device, request.new_session_workflow);
        let digest = content_digest(&request.bytes);

        let admission = match self.admit(&request, &digest, policy.as_ref()).await? {
            Admitted::Write(admission) => admission,
            Admitted::Replay(outcome) => {
                tracing::debug!(
                    file_id = %request.file_id,
                    x_session_id = %request.x_session_id,
                    version_id = %outcome.version_id,
                    "Replayed save"
                );
                return Ok(outcome);
            }
        };

        let record = match self
            .versions
            .put(&request.file_id, request.bytes.clone(), request.base_change_id)
            .await
        {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(
                    file_id = %request.file_id,
                    x_session_id = %request.x_session_id,
                    error = %error,
                    "Version store rejected save"
                );
                self.roll_back(&request.file_id, admission).await;
                return Err(error);
            }
        };

        let receipt = SaveReceipt {
            declared_base: request.base_change_id,
            digest,
            version_id: record.version_id,
            base_change_id: record.base_change_id,
            reason: admission.reason,
        };
        let receipt = self
            .complete(&request, admission, receipt, policy.as_ref())
            .await?;

        let outcome = SaveOutcome::from_receipt(&receipt, false);
        tracing::info!(
            file_id = %request.file_id,
            x_session_id = %request.x_session_id,
            session_id = request.session_id.as_deref().unwrap_or_default(),
            version_id = %outcome.version_id,
            base_change_id = %outcome.base_change_id,
            reason = %receipt.reason,
            policy = policy.name(),
            "Saved version"
        );

        self.activity.emit(ActivityEvent {
            file_id: request.file_id,
            user_id: request.user_id,
            x_session_id: request.x_session_id,
            version_id: outcome.version_id,
            action: ActivityAction::Upload,
            changes: request.file_changes_info.len(),
            at: self.clock.now_ms(),
        });

        Ok(outcome)
    }

    /// Phase one: lease check, classification and the pending-save mark
    async fn admit(
        &self,
        request: &SaveRequest,
        digest: &str,
        policy: &dyn ConflictPolicy,
    ) -> Result<Admitted> {
        let now = self.clock.now_ms();
        let mut entry = self.ledger.entry(&request.file_id).await?;
        let session = entry.settle(now, self.ttl).await?;

        let view = match &session {
            Some(held) if held.is_held_by(&request.x_session_id) => LeaseView::Held {
                concurrent_save: held.pending_saves > 0,
            },
            Some(held) if held.holder.is_some() => {
                return Err(LeaseError::NotHolder {
                    file_id: request.file_id.clone(),
                    x_session_id: request.x_session_id.clone(),
                }
                .into());
            }
            _ => {
                if entry.is_evicted(&request.x_session_id, now).await? {
                    LeaseView::Evicted
                } else {
                    LeaseView::Lapsed
                }
            }
        };

        if let (LeaseView::Held { .. }, Some(receipt)) =
            (view, session.as_ref().and_then(|held| held.last_save.as_ref()))
        {
            if receipt.declared_base == request.base_change_id && receipt.digest == digest {
                return Ok(Admitted::Replay(SaveOutcome::from_receipt(receipt, true)));
            }
        }

        let current = self
            .versions
            .latest(&request.file_id)
            .await?
            .map_or(ChangeId::ZERO, |latest| latest.base_change_id);
        let reason = policy.classify(view, request.base_change_id, current);

        let admission = match (view, session) {
            (LeaseView::Held { .. }, Some(mut held)) => {
                held.pending_saves += 1;
                held.sync_state();
                held.last_activity_at = now;
                let lease_id = held.lease_id;
                entry.put(held).await?;
                Admission {
                    lease_id: Some(lease_id),
                    reason,
                    created: false,
                }
            }
            _ if policy.claims_lapsed_lease(reason) => {
                let mut claimed = EditSession::granted(
                    request.file_id.clone(),
                    Participant {
                        x_session_id: request.x_session_id.clone(),
                        user_id: request.user_id.clone(),
                        device: request.device,
                        profile: UserProfile::default(),
                        last_seen_at: now,
                    },
                    now,
                );
                claimed.pending_saves = 1;
                claimed.sync_state();
                let lease_id = claimed.lease_id;
                entry.put(claimed).await?;
                if view == LeaseView::Evicted {
                    entry.clear_eviction(&request.x_session_id).await?;
                }
                tracing::info!(
                    file_id = %request.file_id,
                    x_session_id = %request.x_session_id,
                    "Save opened edit session"
                );
                Admission {
                    lease_id: Some(lease_id),
                    reason,
                    created: true,
                }
            }
            _ => Admission {
                lease_id: None,
                reason,
                created: false,
            },
        };

        if reason.is_conflict() {
            tracing::info!(
                file_id = %request.file_id,
                x_session_id = %request.x_session_id,
                declared = %request.base_change_id,
                current = %current,
                reason = %reason,
                "Save admitted as conflicted"
            );
        }
        Ok(Admitted::Write(admission))
    }

    /// Phase three: re-check the lease, label the version, advance the pointer
    async fn complete(
        &self,
        request: &SaveRequest,
        admission: Admission,
        mut receipt: SaveReceipt,
        policy: &dyn ConflictPolicy,
    ) -> Result<SaveReceipt> {
        let now = self.clock.now_ms();
        let mut entry = self.ledger.entry(&request.file_id).await?;

        let lease_after = match (entry.session(), admission.lease_id) {
            (Some(session), Some(lease_id))
                if session.lease_id == lease_id && session.is_held_by(&request.x_session_id) =>
            {
                Some(LeaseView::Held {
                    concurrent_save: false,
                })
            }
            (Some(session), Some(_)) if session.holder.is_some() => Some(LeaseView::TakenOver),
            (_, Some(_)) => Some(LeaseView::Lapsed),
            (_, None) => None,
        };

        if let Some(lease) = lease_after {
            receipt.reason = policy.after_write(admission.reason, lease);
            if !matches!(lease, LeaseView::Held { .. }) {
                tracing::warn!(
                    file_id = %request.file_id,
                    x_session_id = %request.x_session_id,
                    reason = %receipt.reason,
                    "Edit session lost while saving"
                );
            }
        }

        let report = ConflictReport::new(receipt.reason, Some(receipt.version_id));
        if report.is_conflicted {
            if let Err(error) = self
                .versions
                .annotate(&request.file_id, receipt.version_id, &report)
                .await
            {
                if matches!(lease_after, Some(LeaseView::Held { .. })) {
                    if let Some(mut session) = entry.session().cloned() {
                        release_pending(&mut session);
                        if let Err(rollback) = entry.put(session).await {
                            tracing::warn!(file_id = %request.file_id, error = %rollback, "Save rollback failed");
                        }
                    }
                }
                return Err(error);
            }
        }

        if let (Some(LeaseView::Held { .. }), Some(mut session)) =
            (lease_after, entry.session().cloned())
        {
            session.observe_change(receipt.base_change_id);
            release_pending(&mut session);
            session.last_save = Some(receipt.clone());
            session.last_activity_at = now;
            entry.put(session).await?;
        }

        Ok(receipt)
    }

    /// Undo the pending-save mark of a save whose write failed
    async fn roll_back(&self, file_id: &FileId, admission: Admission) {
        let Some(lease_id) = admission.lease_id else {
            return;
        };
        let mut entry = match self.ledger.entry(file_id).await {
            Ok(entry) => entry,
            Err(error) => {
                tracing::warn!(file_id = %file_id, error = %error, "Save rollback failed");
                return;
            }
        };
        let Some(mut session) = entry.session().cloned() else {
            return;
        };
        if session.lease_id != lease_id {
            return;
        }

        release_pending(&mut session);
        let abandoned = admission.created
            && session.pending_saves == 0
            && session.last_save.is_none()
            && session.applicant.is_none()
            && session.readers.is_empty();
        let result = if abandoned {
            entry.delete().await
        } else {
            entry.put(session).await
        };
        if let Err(error) = result {
            tracing::warn!(file_id = %file_id, error = %error, "Save rollback failed");
        }
    }
}

fn release_pending(session: &mut EditSession) {
    session.pending_saves = session.pending_saves.saturating_sub(1);
    session.sync_state();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{channel, MemoryActivitySink};
    use crate::arbitrator::{HandoverMode, LeaseArbitrator, LeaseRequest};
    use crate::clock::ManualClock;
    use crate::config::SessionConfig;
    use crate::error::Error;
    use crate::models::{LatestVersion, SessionState, VersionRecord};
    use crate::version_store::InMemoryVersionStore;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::watch;

    const TTL: Duration = Duration::from_secs(600);

    struct Harness {
        clock: Arc<ManualClock>,
        ledger: Arc<SessionLedger>,
        store: Arc<InMemoryVersionStore>,
        arbitrator: LeaseArbitrator,
        coordinator: Arc<UploadCoordinator>,
    }

    fn harness_with(versions: Option<Arc<dyn VersionStore>>) -> Harness {
        let clock = Arc::new(ManualClock::starting_at(1_000));
        let ledger = Arc::new(SessionLedger::in_memory());
        let store = Arc::new(InMemoryVersionStore::new(clock.clone()));
        let versions = versions.unwrap_or_else(|| store.clone() as Arc<dyn VersionStore>);
        let coordinator = UploadCoordinator::new(
            ledger.clone(),
            versions,
            PolicySelector::from_config(&SessionConfig::default()),
            clock.clone(),
            TTL,
        );
        Harness {
            arbitrator: LeaseArbitrator::new(ledger.clone(), clock.clone(), TTL),
            clock,
            ledger,
            store,
            coordinator: Arc::new(coordinator),
        }
    }

    fn harness() -> Harness {
        harness_with(None)
    }

    fn file() -> FileId {
        FileId::new("doc").unwrap()
    }

    fn token(value: &str) -> XSessionId {
        XSessionId::new(value).unwrap()
    }

    fn save(x_session_id: &str, base: u64, body: &'static [u8]) -> SaveRequest {
        SaveRequest {
            file_id: file(),
            x_session_id: token(x_session_id),
            session_id: None,
            user_id: format!("user-{x_session_id}"),
            device: Device::Browser,
            base_change_id: ChangeId::new(base),
            file_changes_info: vec![FileChangeInfo {
                change_type: "EDIT".to_string(),
                target: None,
            }],
            bytes: Bytes::from_static(body),
            new_session_workflow: true,
        }
    }

    async fn grant(harness: &Harness, x_session_id: &str) {
        harness
            .arbitrator
            .request(LeaseRequest {
                file_id: file(),
                user_id: format!("user-{x_session_id}"),
                device: Device::Browser,
                profile: UserProfile::default(),
                x_session_id: Some(token(x_session_id)),
                storage_type: None,
                external_id: None,
            })
            .await
            .unwrap();
    }

    async fn wait_for_pending(ledger: &SessionLedger, pending: u32) {
        loop {
            if ledger
                .snapshot(&file())
                .await
                .unwrap()
                .is_some_and(|session| session.pending_saves == pending)
            {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    /// Holds every write until the gate opens
    struct GatedStore {
        inner: Arc<InMemoryVersionStore>,
        gate: watch::Receiver<bool>,
    }

    #[async_trait]
    impl VersionStore for GatedStore {
        async fn latest(&self, file_id: &FileId) -> Result<Option<LatestVersion>> {
            self.inner.latest(file_id).await
        }

        async fn put(
            &self,
            file_id: &FileId,
            bytes: Bytes,
            declared_base: ChangeId,
        ) -> Result<VersionRecord> {
            let mut gate = self.gate.clone();
            let opened = gate.wait_for(|open| *open).await.is_ok();
            if !opened {
                return Err(Error::VersionStore("gate dropped".to_string()));
            }
            self.inner.put(file_id, bytes, declared_base).await
        }

        async fn annotate(
            &self,
            file_id: &FileId,
            version_id: VersionId,
            report: &ConflictReport,
        ) -> Result<()> {
            self.inner.annotate(file_id, version_id, report).await
        }

        async fn promote(&self, file_id: &FileId, version_id: VersionId) -> Result<LatestVersion> {
            self.inner.promote(file_id, version_id).await
        }
    }

    /// Fails writes while `down` is set
    struct FlakyStore {
        inner: InMemoryVersionStore,
        down: AtomicBool,
    }

    #[async_trait]
    impl VersionStore for FlakyStore {
        async fn latest(&self, file_id: &FileId) -> Result<Option<LatestVersion>> {
            self.inner.latest(file_id).await
        }

        async fn put(
            &self,
            file_id: &FileId,
            bytes: Bytes,
            declared_base: ChangeId,
        ) -> Result<VersionRecord> {
            if self.down.load(Ordering::SeqCst) {
                return Err(Error::VersionStore("unavailable".to_string()));
            }
            self.inner.put(file_id, bytes, declared_base).await
        }

        async fn annotate(
            &self,
            file_id: &FileId,
            version_id: VersionId,
            report: &ConflictReport,
        ) -> Result<()> {
            self.inner.annotate(file_id, version_id, report).await
        }

        async fn promote(&self, file_id: &FileId, version_id: VersionId) -> Result<LatestVersion> {
            self.inner.promote(file_id, version_id).await
        }
    }

    #[tokio::test]
    async fn holder_save_is_clean_and_advances_pointer() {
        let harness = harness();
        grant(&harness, "s1").await;

        let first = harness.coordinator.save(save("s1", 0, b"v1")).await.unwrap();
        assert_eq!(first.status, SaveStatus::Saved);
        assert_eq!(first.base_change_id, ChangeId::new(1));
        assert!(!first.report.is_conflicted);

        let second = harness.coordinator.save(save("s1", 1, b"v2")).await.unwrap();
        assert_eq!(second.base_change_id, ChangeId::new(2));

        let session = harness.ledger.snapshot(&file()).await.unwrap().unwrap();
        assert_eq!(session.base_change_id, ChangeId::new(2));
        assert_eq!(session.state, SessionState::Active);
        assert_eq!(session.pending_saves, 0);
    }

    #[tokio::test]
    async fn first_clean_save_opens_a_session() {
        let harness = harness();
        let outcome = harness.coordinator.save(save("s1", 0, b"v1")).await.unwrap();
        assert_eq!(outcome.status, SaveStatus::Saved);

        let session = harness.ledger.snapshot(&file()).await.unwrap().unwrap();
        assert_eq!(session.holder_x_session_id(), Some(&token("s1")));
        assert_eq!(session.state, SessionState::Active);
        assert_eq!(session.base_change_id, ChangeId::new(1));
    }

    #[tokio::test]
    async fn stale_save_is_stored_and_flagged() {
        let harness = harness();
        grant(&harness, "s1").await;
        harness.coordinator.save(save("s1", 0, b"v1")).await.unwrap();

        let stale = harness.coordinator.save(save("s1", 0, b"v1-edited")).await.unwrap();
        assert_eq!(stale.status, SaveStatus::Conflicted);
        assert_eq!(stale.report.reason_code, ReasonCode::SaveAlreadyPending);
        assert_eq!(stale.report.new_version_id, Some(stale.version_id));

        let versions = harness.store.versions(&file()).await;
        assert_eq!(versions.len(), 2);
        assert!(versions[1].is_conflicted);
        assert_eq!(
            versions[1].conflicting_file_reason,
            Some(ReasonCode::SaveAlreadyPending)
        );
    }

    #[tokio::test]
    async fn save_by_non_holder_is_rejected_without_writing() {
        let harness = harness();
        grant(&harness, "s1").await;

        let err = harness
            .coordinator
            .save(save("s2", 0, b"intruder"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NotHolder");
        assert!(harness.store.versions(&file()).await.is_empty());
    }

    #[tokio::test]
    async fn stale_save_without_session_is_expired_and_claims_nothing() {
        let harness = harness();
        grant(&harness, "s1").await;
        harness.coordinator.save(save("s1", 0, b"v1")).await.unwrap();
        harness.arbitrator.remove(&file(), &token("s1")).await.unwrap();

        let outcome = harness.coordinator.save(save("s1", 0, b"late")).await.unwrap();
        assert_eq!(outcome.report.reason_code, ReasonCode::SessionExpired);
        assert_eq!(
            outcome.report.reason_code.code(),
            Some("FileSessionHasExpired")
        );
        assert!(harness.ledger.snapshot(&file()).await.unwrap().is_none());
        assert_eq!(harness.store.versions(&file()).await.len(), 2);
    }

    #[tokio::test]
    async fn legacy_touch_save_reclaims_lapsed_lease_silently() {
        let harness = harness();
        grant(&harness, "s1").await;
        harness.coordinator.save(save("s1", 0, b"v1")).await.unwrap();
        harness.arbitrator.remove(&file(), &token("s1")).await.unwrap();

        let mut request = save("s1", 0, b"late");
        request.device = Device::Touch;
        request.new_session_workflow = false;
        let outcome = harness.coordinator.save(request).await.unwrap();

        assert_eq!(outcome.status, SaveStatus::Saved);
        let session = harness.ledger.snapshot(&file()).await.unwrap().unwrap();
        assert_eq!(session.holder_x_session_id(), Some(&token("s1")));
        assert_eq!(session.base_change_id, ChangeId::new(2));
    }

    #[tokio::test]
    async fn swept_holder_cannot_reclaim_with_current_pointer() {
        let harness = harness();
        grant(&harness, "s1").await;
        harness.coordinator.save(save("s1", 0, b"v1")).await.unwrap();

        harness.clock.advance(TTL + Duration::from_secs(1));
        assert_eq!(harness.arbitrator.sweep().await.expired, vec![file()]);

        let late = harness.coordinator.save(save("s1", 1, b"late")).await.unwrap();
        assert_eq!(late.status, SaveStatus::Conflicted);
        assert_eq!(late.report.reason_code, ReasonCode::SessionExpired);
        assert!(harness.ledger.snapshot(&file()).await.unwrap().is_none());
        assert_eq!(harness.store.versions(&file()).await.len(), 2);
    }

    #[tokio::test]
    async fn idle_holder_save_is_expired_before_any_sweep() {
        let harness = harness();
        grant(&harness, "s1").await;
        harness.coordinator.save(save("s1", 0, b"v1")).await.unwrap();

        harness.clock.advance(TTL + Duration::from_secs(30));
        let late = harness.coordinator.save(save("s1", 1, b"late")).await.unwrap();
        assert_eq!(late.report.reason_code, ReasonCode::SessionExpired);
        assert!(harness.ledger.snapshot(&file()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn force_released_holder_save_is_expired() {
        let harness = harness();
        grant(&harness, "s1").await;
        harness.coordinator.save(save("s1", 0, b"v1")).await.unwrap();
        harness.arbitrator.force_release(&file()).await.unwrap();

        let late = harness.coordinator.save(save("s1", 1, b"late")).await.unwrap();
        assert_eq!(late.report.reason_code, ReasonCode::SessionExpired);
        assert!(harness.ledger.snapshot(&file()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn handed_over_holder_stays_expired_after_file_falls_free() {
        let harness = harness();
        grant(&harness, "s1").await;
        harness.coordinator.save(save("s1", 0, b"v1")).await.unwrap();
        grant(&harness, "s2").await;
        harness
            .arbitrator
            .update(&file(), &token("s1"), HandoverMode::Invert, None)
            .await
            .unwrap();
        harness.arbitrator.remove(&file(), &token("s2")).await.unwrap();

        let late = harness.coordinator.save(save("s1", 1, b"late")).await.unwrap();
        assert_eq!(late.report.reason_code, ReasonCode::SessionExpired);
        assert!(harness.ledger.snapshot(&file()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn regranted_token_saves_cleanly_again() {
        let harness = harness();
        grant(&harness, "s1").await;
        harness.coordinator.save(save("s1", 0, b"v1")).await.unwrap();
        harness.clock.advance(TTL + Duration::from_secs(1));
        harness.arbitrator.sweep().await;

        grant(&harness, "s1").await;
        let outcome = harness.coordinator.save(save("s1", 1, b"v2")).await.unwrap();
        assert_eq!(outcome.status, SaveStatus::Saved);
        assert_eq!(outcome.base_change_id, ChangeId::new(2));
    }

    #[tokio::test]
    async fn retried_save_replays_previous_receipt() {
        let harness = harness();
        grant(&harness, "s1").await;

        let first = harness.coordinator.save(save("s1", 0, b"v1")).await.unwrap();
        let retry = harness.coordinator.save(save("s1", 0, b"v1")).await.unwrap();

        assert!(retry.replayed);
        assert_eq!(retry.version_id, first.version_id);
        assert_eq!(retry.status, SaveStatus::Saved);
        assert_eq!(harness.store.versions(&file()).await.len(), 1);
    }

    #[tokio::test]
    async fn store_failure_rolls_admission_back() {
        let flaky = Arc::new(FlakyStore {
            inner: InMemoryVersionStore::default(),
            down: AtomicBool::new(true),
        });
        let harness = harness_with(Some(flaky.clone()));
        grant(&harness, "s1").await;

        let err = harness
            .coordinator
            .save(save("s1", 0, b"v1"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        let session = harness.ledger.snapshot(&file()).await.unwrap().unwrap();
        assert_eq!(session.state, SessionState::Active);
        assert_eq!(session.pending_saves, 0);
        assert_eq!(session.base_change_id, ChangeId::ZERO);

        flaky.down.store(false, Ordering::SeqCst);
        let outcome = harness.coordinator.save(save("s1", 0, b"v1")).await.unwrap();
        assert_eq!(outcome.status, SaveStatus::Saved);
    }

    #[tokio::test]
    async fn failed_first_save_leaves_no_session() {
        let flaky = Arc::new(FlakyStore {
            inner: InMemoryVersionStore::default(),
            down: AtomicBool::new(true),
        });
        let harness = harness_with(Some(flaky));

        assert!(harness.coordinator.save(save("s1", 0, b"v1")).await.is_err());
        assert!(harness.ledger.snapshot(&file()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn racing_saves_of_one_session_flag_the_second() {
        let (open, gate) = watch::channel(false);
        let inner = Arc::new(InMemoryVersionStore::default());
        let harness = harness_with(Some(Arc::new(GatedStore {
            inner: inner.clone(),
            gate,
        })));
        grant(&harness, "s1").await;

        let coordinator = harness.coordinator.clone();
        let first = tokio::spawn(async move { coordinator.save(save("s1", 0, b"a")).await });
        wait_for_pending(&harness.ledger, 1).await;
        assert_eq!(
            harness.ledger.snapshot(&file()).await.unwrap().unwrap().state,
            SessionState::SavePending
        );

        let coordinator = harness.coordinator.clone();
        let second = tokio::spawn(async move { coordinator.save(save("s1", 0, b"b")).await });
        wait_for_pending(&harness.ledger, 2).await;

        open.send(true).unwrap();
        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();

        assert_eq!(first.report.reason_code, ReasonCode::None);
        assert_eq!(second.report.reason_code, ReasonCode::SaveAlreadyPending);
        let session = harness.ledger.snapshot(&file()).await.unwrap().unwrap();
        assert_eq!(session.state, SessionState::Active);
        assert_eq!(session.base_change_id, ChangeId::new(2));
        assert_eq!(inner.versions(&file()).await.len(), 2);
    }

    #[tokio::test]
    async fn lease_lost_during_write_is_expired() {
        let (open, gate) = watch::channel(false);
        let harness = harness_with(Some(Arc::new(GatedStore {
            inner: Arc::new(InMemoryVersionStore::default()),
            gate,
        })));
        grant(&harness, "s1").await;

        let coordinator = harness.coordinator.clone();
        let pending = tokio::spawn(async move { coordinator.save(save("s1", 0, b"a")).await });
        wait_for_pending(&harness.ledger, 1).await;

        harness.arbitrator.force_release(&file()).await.unwrap();
        grant(&harness, "s2").await;
        open.send(true).unwrap();

        let outcome = pending.await.unwrap().unwrap();
        assert_eq!(outcome.report.reason_code, ReasonCode::SessionExpired);

        let session = harness.ledger.snapshot(&file()).await.unwrap().unwrap();
        assert_eq!(session.holder_x_session_id(), Some(&token("s2")));
        assert_eq!(session.pending_saves, 0);
        assert_eq!(session.base_change_id, ChangeId::ZERO);
    }

    #[tokio::test]
    async fn committed_save_emits_activity_event() {
        let clock = Arc::new(ManualClock::starting_at(5_000));
        let ledger = Arc::new(SessionLedger::in_memory());
        let sink = Arc::new(MemoryActivitySink::default());
        let (log, worker) = channel(4, sink.clone());
        let coordinator = UploadCoordinator::new(
            ledger,
            Arc::new(InMemoryVersionStore::new(clock.clone())),
            PolicySelector::from_config(&SessionConfig::default()),
            clock,
            TTL,
        )
        .with_activity(log);

        let outcome = coordinator.save(save("s1", 0, b"v1")).await.unwrap();
        drop(coordinator);
        worker.run(watch::channel(false).1).await;

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].version_id, outcome.version_id);
        assert_eq!(events[0].action, ActivityAction::Upload);
        assert_eq!(events[0].changes, 1);
        assert_eq!(events[0].at, 5_000);
    }
}
