//! End-to-end lease protocol scenarios against the public API

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use pretty_assertions::assert_eq;
use xsession_core::arbitrator::{HandoverMode, LeaseRequest, RequestStatus, SessionRole};
use xsession_core::clock::ManualClock;
use xsession_core::config::SessionConfig;
use xsession_core::conflict::PolicySelector;
use xsession_core::ledger::SessionLedger;
use xsession_core::models::UserProfile;
use xsession_core::upload::{SaveRequest, SaveStatus, UploadCoordinator};
use xsession_core::version_store::InMemoryVersionStore;
use xsession_core::{ChangeId, Device, FileId, LeaseArbitrator, ReasonCode, XSessionId};

const TTL: Duration = Duration::from_secs(1800);

struct World {
    clock: Arc<ManualClock>,
    store: Arc<InMemoryVersionStore>,
    arbitrator: Arc<LeaseArbitrator>,
    uploads: Arc<UploadCoordinator>,
}

fn world() -> World {
    let clock = Arc::new(ManualClock::starting_at(1_700_000_000_000));
    let ledger = Arc::new(SessionLedger::in_memory());
    let store = Arc::new(InMemoryVersionStore::new(clock.clone()));
    let arbitrator = Arc::new(LeaseArbitrator::new(ledger.clone(), clock.clone(), TTL));
    let uploads = Arc::new(UploadCoordinator::new(
        ledger,
        store.clone(),
        PolicySelector::from_config(&SessionConfig::default()),
        clock.clone(),
        TTL,
    ));
    World {
        clock,
        store,
        arbitrator,
        uploads,
    }
}

fn file() -> FileId {
    FileId::new("F").unwrap()
}

fn token(value: &str) -> XSessionId {
    XSessionId::new(value).unwrap()
}

fn lease(user: &str, x_session_id: &str) -> LeaseRequest {
    LeaseRequest {
        file_id: file(),
        user_id: user.to_string(),
        device: Device::Browser,
        profile: UserProfile::default(),
        x_session_id: Some(token(x_session_id)),
        storage_type: Some("S3".to_string()),
        external_id: None,
    }
}

fn save(user: &str, x_session_id: &str, base: u64, body: &str) -> SaveRequest {
    SaveRequest {
        file_id: file(),
        x_session_id: token(x_session_id),
        session_id: None,
        user_id: user.to_string(),
        device: Device::Browser,
        base_change_id: ChangeId::new(base),
        file_changes_info: Vec::new(),
        bytes: Bytes::from(body.to_string()),
        new_session_workflow: true,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_grant_exactly_one_holder() {
    let world = world();

    let mut tasks = Vec::new();
    for index in 0..64 {
        let arbitrator = world.arbitrator.clone();
        tasks.push(tokio::spawn(async move {
            arbitrator
                .request(lease(&format!("user-{index}"), &format!("s{index}")))
                .await
        }));
    }

    let mut granted = Vec::new();
    for task in tasks {
        let outcome = task.await.unwrap().unwrap();
        if outcome.status == RequestStatus::Granted {
            granted.push(outcome.x_session_id);
        }
    }

    assert_eq!(granted.len(), 1);
    let views = world.arbitrator.get(&file()).await.unwrap();
    let holders: Vec<_> = views
        .iter()
        .filter(|view| view.role == SessionRole::Holder)
        .collect();
    assert_eq!(holders.len(), 1);
    assert_eq!(holders[0].x_session_id, granted[0]);
}

#[tokio::test]
async fn base_change_id_never_decreases() {
    let world = world();
    world.arbitrator.request(lease("alice", "s1")).await.unwrap();

    let mut observed = ChangeId::ZERO;
    // Mix of fresh and stale declared bases
    for (round, declared) in [0, 1, 1, 0, 4, 2, 6, 6].into_iter().enumerate() {
        let outcome = world
            .uploads
            .save(save("alice", "s1", declared, &format!("body-{round}")))
            .await
            .unwrap();
        assert!(outcome.base_change_id > observed);
        observed = outcome.base_change_id;

        let session = world.arbitrator.sessions().await.unwrap().remove(0);
        assert_eq!(session.base_change_id, observed);
    }
}

#[tokio::test]
async fn stale_save_keeps_the_version_and_flags_it() {
    let world = world();
    world.arbitrator.request(lease("alice", "s1")).await.unwrap();
    world.uploads.save(save("alice", "s1", 0, "one")).await.unwrap();
    world.uploads.save(save("alice", "s1", 1, "two")).await.unwrap();

    let stale = world.uploads.save(save("alice", "s1", 1, "three")).await.unwrap();
    assert_eq!(stale.status, SaveStatus::Conflicted);
    assert!(stale.report.is_conflicted);

    let versions = world.store.versions(&file()).await;
    let stored = versions
        .iter()
        .find(|record| record.version_id == stale.version_id)
        .unwrap();
    assert!(stored.is_conflicted);
}

#[tokio::test]
async fn request_by_holder_is_idempotent() {
    let world = world();
    let first = world.arbitrator.request(lease("alice", "s1")).await.unwrap();
    let before = world.arbitrator.sessions().await.unwrap();

    let second = world.arbitrator.request(lease("alice", "s1")).await.unwrap();
    let after = world.arbitrator.sessions().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(before, after);
}

#[tokio::test]
async fn expired_session_reports_session_expired_and_frees_the_file() {
    let world = world();
    world.arbitrator.request(lease("alice", "s1")).await.unwrap();
    world.uploads.save(save("alice", "s1", 0, "one")).await.unwrap();

    world.clock.advance(TTL + Duration::from_secs(1));
    let report = world.arbitrator.sweep().await;
    assert_eq!(report.expired, vec![file()]);

    // The client declares the pointer it last saw; nobody else wrote since.
    let late = world.uploads.save(save("alice", "s1", 1, "late")).await.unwrap();
    assert_eq!(late.report.reason_code, ReasonCode::SessionExpired);
    assert_eq!(late.status, SaveStatus::Conflicted);
    assert!(world.arbitrator.sessions().await.unwrap().is_empty());

    let fresh = world.arbitrator.request(lease("bob", "s2")).await.unwrap();
    assert_eq!(fresh.status, RequestStatus::Granted);
}

#[tokio::test]
async fn idle_holder_expires_without_a_sweep() {
    let world = world();
    world.arbitrator.request(lease("alice", "s1")).await.unwrap();
    world.uploads.save(save("alice", "s1", 0, "one")).await.unwrap();

    world.clock.advance(TTL + Duration::from_secs(30));
    let bob = world.arbitrator.request(lease("bob", "s2")).await.unwrap();
    assert_eq!(bob.status, RequestStatus::Granted);

    let err = world
        .uploads
        .save(save("alice", "s1", 1, "late"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NotHolder");
}

#[tokio::test]
async fn legacy_touch_client_reclaims_a_swept_lease() {
    let world = world();
    world.arbitrator.request(lease("alice", "s1")).await.unwrap();
    world.uploads.save(save("alice", "s1", 0, "one")).await.unwrap();

    world.clock.advance(TTL + Duration::from_secs(1));
    assert_eq!(world.arbitrator.sweep().await.expired, vec![file()]);

    let mut late = save("alice", "s1", 1, "late");
    late.device = Device::Touch;
    late.new_session_workflow = false;
    let outcome = world.uploads.save(late).await.unwrap();
    assert_eq!(outcome.status, SaveStatus::Saved);
    assert_eq!(outcome.report.reason_code, ReasonCode::None);

    let session = world.arbitrator.sessions().await.unwrap().remove(0);
    assert_eq!(session.holder_x_session_id(), Some(&token("s1")));
    assert_eq!(session.base_change_id, ChangeId::new(2));
}

#[tokio::test]
async fn handover_locks_out_the_previous_holder() {
    let world = world();
    world.arbitrator.request(lease("alice", "s1")).await.unwrap();
    let queued = world.arbitrator.request(lease("bob", "s2")).await.unwrap();
    assert_eq!(queued.status, RequestStatus::Queued);

    world
        .arbitrator
        .update(&file(), &token("s1"), HandoverMode::Invert, None)
        .await
        .unwrap();

    let views = world.arbitrator.get(&file()).await.unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].x_session_id, token("s2"));

    let err = world
        .uploads
        .save(save("alice", "s1", 0, "too late"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NotHolder");
    assert!(world.store.versions(&file()).await.is_empty());
}

#[tokio::test]
async fn request_deny_release_promote_scenario() {
    let world = world();

    let a = world.arbitrator.request(lease("A", "S1")).await.unwrap();
    assert_eq!(a.status, RequestStatus::Granted);

    let saved = world.uploads.save(save("A", "S1", 0, "draft")).await.unwrap();
    assert_eq!(saved.status, SaveStatus::Saved);
    assert_eq!(
        world.arbitrator.sessions().await.unwrap()[0].base_change_id,
        ChangeId::new(1)
    );

    let b = world.arbitrator.request(lease("B", "S2")).await.unwrap();
    assert_eq!(b.status, RequestStatus::Queued);
    assert_eq!(b.holder_x_session_id, token("S1"));

    world
        .arbitrator
        .deny(&file(), &token("S1"), &token("S2"))
        .await
        .unwrap();
    assert!(world.arbitrator.sessions().await.unwrap()[0].applicant.is_none());

    let b = world.arbitrator.request(lease("B", "S2")).await.unwrap();
    assert_eq!(b.status, RequestStatus::Queued);

    world.arbitrator.remove(&file(), &token("S1")).await.unwrap();

    let views = world.arbitrator.get(&file()).await.unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].x_session_id, token("S2"));
    assert_eq!(views[0].user_id, "B");
    assert_eq!(views[0].role, SessionRole::Holder);
}
