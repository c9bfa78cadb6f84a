//! XSession service
//!
//! Wires the ledger, arbitrator and upload coordinator together and
//! exposes the gateway operations over the payloads in [`crate::contract`].

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::activity::{self, ActivitySink, TracingActivitySink};
use crate::arbitrator::{LeaseArbitrator, SweepReport};
use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::conflict::PolicySelector;
use crate::contract::{
    DenyPayload, GetPayload, GetResponse, OkResponse, RemovePayload, RequestPayload,
    RequestResponse, SavePayload, SaveResponse, UpdatePayload,
};
use crate::error::Result;
use crate::ledger::{LedgerStore, LibSqlLedgerStore, MemoryLedgerStore, SessionLedger};
use crate::sweeper::Sweeper;
use crate::upload::UploadCoordinator;
use crate::version_store::VersionStore;

pub struct XSessionService {
    arbitrator: Arc<LeaseArbitrator>,
    uploads: UploadCoordinator,
}

impl XSessionService {
    pub fn builder(config: SessionConfig, versions: Arc<dyn VersionStore>) -> ServiceBuilder {
        ServiceBuilder {
            config,
            versions,
            ledger_store: None,
            clock: Arc::new(SystemClock),
            activity_sink: Arc::new(TracingActivitySink),
        }
    }

    pub fn arbitrator(&self) -> &Arc<LeaseArbitrator> {
        &self.arbitrator
    }

    pub async fn request(&self, payload: RequestPayload) -> Result<RequestResponse> {
        let outcome = self.arbitrator.request(payload.into()).await?;
        Ok(outcome.into())
    }

    pub async fn deny(&self, payload: DenyPayload) -> Result<OkResponse> {
        self.arbitrator
            .deny(
                &payload.file_id,
                &payload.holder_x_session_id,
                &payload.request_x_session_id,
            )
            .await?;
        Ok(OkResponse::OK)
    }

    pub async fn update(&self, payload: UpdatePayload) -> Result<OkResponse> {
        self.arbitrator
            .update(
                &payload.file_id,
                &payload.x_session_id,
                payload.mode,
                payload.session_state,
            )
            .await?;
        Ok(OkResponse::OK)
    }

    pub async fn save(&self, payload: SavePayload) -> Result<SaveResponse> {
        let outcome = self.uploads.save(payload.into()).await?;
        Ok(outcome.into())
    }

    pub async fn remove(&self, payload: RemovePayload) -> Result<OkResponse> {
        self.arbitrator
            .remove(&payload.file_id, &payload.x_session_id)
            .await?;
        Ok(OkResponse::OK)
    }

    pub async fn get(&self, payload: GetPayload) -> Result<GetResponse> {
        let sessions = self.arbitrator.get(&payload.file_id).await?;
        Ok(GetResponse { sessions })
    }

    /// Run one expiry pass now
    pub async fn sweep(&self) -> SweepReport {
        self.arbitrator.sweep().await
    }
}

pub struct ServiceBuilder {
    config: SessionConfig,
    versions: Arc<dyn VersionStore>,
    ledger_store: Option<Arc<dyn LedgerStore>>,
    clock: Arc<dyn Clock>,
    activity_sink: Arc<dyn ActivitySink>,
}

impl ServiceBuilder {
    /// Use `store` instead of the one `ledger_path` would select
    #[must_use]
    pub fn ledger_store(mut self, store: Arc<dyn LedgerStore>) -> Self {
        self.ledger_store = Some(store);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn activity_sink(mut self, sink: Arc<dyn ActivitySink>) -> Self {
        self.activity_sink = sink;
        self
    }

    /// Open the ledger and start the sweeper and activity worker
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(self) -> Result<(XSessionService, BackgroundTasks)> {
        let store: Arc<dyn LedgerStore> = match (self.ledger_store, &self.config.ledger_path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(LibSqlLedgerStore::open(path).await?),
            (None, None) => Arc::new(MemoryLedgerStore::default()),
        };
        let ledger = Arc::new(SessionLedger::open(store).await?);

        let arbitrator = Arc::new(LeaseArbitrator::new(
            ledger.clone(),
            self.clock.clone(),
            self.config.session_ttl,
        ));
        let (activity, worker) =
            activity::channel(self.config.activity_queue_capacity, self.activity_sink);
        let uploads = UploadCoordinator::new(
            ledger,
            self.versions,
            PolicySelector::from_config(&self.config),
            self.clock,
            self.config.session_ttl,
        )
        .with_activity(activity);

        let (shutdown, signal) = watch::channel(false);
        let handles = vec![
            worker.spawn(signal.clone()),
            Sweeper::new(arbitrator.clone(), self.config.sweep_interval).spawn(signal),
        ];

        tracing::info!(config = ?self.config, "XSession service started");
        Ok((
            XSessionService {
                arbitrator,
                uploads,
            },
            BackgroundTasks { shutdown, handles },
        ))
    }
}

/// Handles of the sweeper and activity worker
pub struct BackgroundTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Signal both tasks and wait for them to finish
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        for handle in self.handles {
            if let Err(error) = handle.await {
                tracing::warn!(error = %error, "Background task ended abnormally");
            }
        }
    }
}
