//! Version store collaborator
//!
//! File bytes live outside this crate. The core only needs the current
//! pointer, an append, a stamp for conflict labels and `promote`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::models::{
    content_digest, ChangeId, ConflictReport, FileId, LatestVersion, VersionId, VersionRecord,
};

#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Version currently served as latest, `None` for a file never saved
    async fn latest(&self, file_id: &FileId) -> Result<Option<LatestVersion>>;

    /// Append a new version on top of the chain
    ///
    /// `declared_base` is the pointer the writer claims to have edited; the
    /// store records it but never rejects on it.
    async fn put(
        &self,
        file_id: &FileId,
        bytes: Bytes,
        declared_base: ChangeId,
    ) -> Result<VersionRecord>;

    /// Label a stored version with the outcome of conflict detection
    async fn annotate(
        &self,
        file_id: &FileId,
        version_id: VersionId,
        report: &ConflictReport,
    ) -> Result<()>;

    /// Make an existing version the latest again. Advances the pointer.
    async fn promote(&self, file_id: &FileId, version_id: VersionId) -> Result<LatestVersion>;
}

#[derive(Debug, Default)]
struct FileChain {
    versions: Vec<(VersionRecord, Bytes)>,
    head: ChangeId,
    latest: Option<VersionId>,
}

/// Append-only in-process store, for embedding and tests
pub struct InMemoryVersionStore {
    files: Mutex<HashMap<FileId, FileChain>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryVersionStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryVersionStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Every version of a file, oldest first
    pub async fn versions(&self, file_id: &FileId) -> Vec<VersionRecord> {
        let files = self.files.lock().await;
        files.get(file_id).map_or_else(Vec::new, |chain| {
            chain
                .versions
                .iter()
                .map(|(record, _)| record.clone())
                .collect()
        })
    }

    pub async fn bytes(&self, file_id: &FileId, version_id: VersionId) -> Option<Bytes> {
        let files = self.files.lock().await;
        files.get(file_id).and_then(|chain| {
            chain
                .versions
                .iter()
                .find(|(record, _)| record.version_id == version_id)
                .map(|(_, bytes)| bytes.clone())
        })
    }
}

#[async_trait]
impl VersionStore for InMemoryVersionStore {
    async fn latest(&self, file_id: &FileId) -> Result<Option<LatestVersion>> {
        let files = self.files.lock().await;
        Ok(files.get(file_id).and_then(|chain| {
            chain.latest.map(|version_id| LatestVersion {
                version_id,
                base_change_id: chain.head,
            })
        }))
    }

    async fn put(
        &self,
        file_id: &FileId,
        bytes: Bytes,
        declared_base: ChangeId,
    ) -> Result<VersionRecord> {
        let mut files = self.files.lock().await;
        let chain = files.entry(file_id.clone()).or_default();
        let record = VersionRecord {
            file_id: file_id.clone(),
            version_id: VersionId::new(),
            base_change_id: chain.head.next(),
            is_conflicted: false,
            conflicting_file_reason: None,
            digest: content_digest(&bytes),
            created_at: self.clock.now_ms(),
        };
        chain.head = record.base_change_id;
        chain.latest = Some(record.version_id);
        chain.versions.push((record.clone(), bytes));
        tracing::trace!(
            file_id = %file_id,
            version_id = %record.version_id,
            declared_base = %declared_base,
            change_id = %record.base_change_id,
            "Stored version"
        );
        Ok(record)
    }

    async fn annotate(
        &self,
        file_id: &FileId,
        version_id: VersionId,
        report: &ConflictReport,
    ) -> Result<()> {
        let mut files = self.files.lock().await;
        let record = files
            .get_mut(file_id)
            .and_then(|chain| {
                chain
                    .versions
                    .iter_mut()
                    .find(|(record, _)| record.version_id == version_id)
            })
            .map(|(record, _)| record)
            .ok_or_else(|| Error::VersionStore(format!("unknown version {version_id}")))?;
        record.is_conflicted = report.is_conflicted;
        record.conflicting_file_reason = report
            .is_conflicted
            .then_some(report.reason_code);
        Ok(())
    }

    async fn promote(&self, file_id: &FileId, version_id: VersionId) -> Result<LatestVersion> {
        let mut files = self.files.lock().await;
        let chain = files
            .get_mut(file_id)
            .ok_or_else(|| Error::VersionStore(format!("unknown file {file_id}")))?;
        if !chain
            .versions
            .iter()
            .any(|(record, _)| record.version_id == version_id)
        {
            return Err(Error::VersionStore(format!("unknown version {version_id}")));
        }
        chain.head = chain.head.next();
        chain.latest = Some(version_id);
        Ok(LatestVersion {
            version_id,
            base_change_id: chain.head,
        })
    }
}
