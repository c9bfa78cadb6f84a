//! Activity log
//!
//! Saves emit an upload event after they commit. Events travel over a
//! bounded channel to a worker that hands them to an [`ActivitySink`]; a
//! full queue or a failing sink costs the event, never the save.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::models::{FileId, VersionId, XSessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityAction {
    Upload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub file_id: FileId,
    pub user_id: String,
    pub x_session_id: XSessionId,
    pub version_id: VersionId,
    pub action: ActivityAction,
    /// Number of change entries the client reported with the save
    pub changes: usize,
    /// Unix ms
    pub at: i64,
}

/// Destination for activity events
#[async_trait]
pub trait ActivitySink: Send + Sync {
    async fn record(&self, event: &ActivityEvent) -> Result<()>;
}

/// Writes events to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingActivitySink;

#[async_trait]
impl ActivitySink for TracingActivitySink {
    async fn record(&self, event: &ActivityEvent) -> Result<()> {
        tracing::info!(
            file_id = %event.file_id,
            user_id = %event.user_id,
            x_session_id = %event.x_session_id,
            version_id = %event.version_id,
            action = ?event.action,
            changes = event.changes,
            "Activity"
        );
        Ok(())
    }
}

/// Keeps events in memory
#[derive(Debug, Default)]
pub struct MemoryActivitySink {
    events: Mutex<Vec<ActivityEvent>>,
}

impl MemoryActivitySink {
    pub fn events(&self) -> Vec<ActivityEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ActivitySink for MemoryActivitySink {
    async fn record(&self, event: &ActivityEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}

/// Sending half handed to the upload coordinator
#[derive(Debug, Clone)]
pub struct ActivityLog {
    sender: Option<mpsc::Sender<ActivityEvent>>,
}

impl ActivityLog {
    /// A log that drops every event
    pub const fn disabled() -> Self {
        Self { sender: None }
    }

    /// Queue `event` without waiting
    pub fn emit(&self, event: ActivityEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        if let Err(error) = sender.try_send(event) {
            let (reason, event) = match error {
                mpsc::error::TrySendError::Full(event) => ("queue full", event),
                mpsc::error::TrySendError::Closed(event) => ("worker stopped", event),
            };
            tracing::warn!(
                file_id = %event.file_id,
                version_id = %event.version_id,
                reason,
                "Dropped activity event"
            );
        }
    }
}

/// Bounded queue between the log and its worker
pub fn channel(capacity: usize, sink: Arc<dyn ActivitySink>) -> (ActivityLog, ActivityWorker) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        ActivityLog {
            sender: Some(sender),
        },
        ActivityWorker { receiver, sink },
    )
}

/// Drains the queue into the sink
pub struct ActivityWorker {
    receiver: mpsc::Receiver<ActivityEvent>,
    sink: Arc<dyn ActivitySink>,
}

impl ActivityWorker {
    /// Run until every sender is gone or `shutdown` flips to `true`.
    /// Events already queued at shutdown are still delivered.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                event = self.receiver.recv() => match event {
                    Some(event) => self.deliver(&event).await,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.receiver.close();
        while let Some(event) = self.receiver.recv().await {
            self.deliver(&event).await;
        }
        tracing::debug!("Activity worker stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn deliver(&self, event: &ActivityEvent) {
        if let Err(error) = self.sink.record(event).await {
            tracing::warn!(
                file_id = %event.file_id,
                version_id = %event.version_id,
                error = %error,
                "Activity sink failed"
            );
        }
    }
}
