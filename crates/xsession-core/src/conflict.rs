//! Conflict detection and the save-labelling policies
//!
//! The detector never blocks a payload. It only decides how the version a
//! save produces is labelled; reconciliation is left to the client.

use std::sync::Arc;

use crate::config::{ConflictPrecedence, SessionConfig};
use crate::models::{ChangeId, Device, ReasonCode};

/// The caller's standing on the lease at the moment of detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseView {
    /// No session for the file
    Lapsed,
    /// No session for the file, and the caller's own lease was revoked by
    /// expiry, handover or an operator
    Evicted,
    /// The file is leased to another editing instance
    TakenOver,
    /// The caller holds the lease
    Held {
        /// Another save of this lease is between admission and completion
        concurrent_save: bool,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictDetector {
    precedence: ConflictPrecedence,
}

impl ConflictDetector {
    pub const fn new(precedence: ConflictPrecedence) -> Self {
        Self { precedence }
    }

    /// Classify a save against the store's current pointer
    pub const fn detect(self, lease: LeaseView, declared: ChangeId, current: ChangeId) -> ReasonCode {
        if matches!(lease, LeaseView::Evicted) {
            return ReasonCode::SessionExpired;
        }
        let concurrent_save = matches!(
            lease,
            LeaseView::Held {
                concurrent_save: true
            }
        );
        if declared.get() == current.get() && !concurrent_save {
            return ReasonCode::None;
        }
        match lease {
            LeaseView::Lapsed | LeaseView::Evicted | LeaseView::TakenOver => {
                ReasonCode::SessionExpired
            }
            // Either a racing save, or a pointer overtaken by the holder's own
            // earlier commit (a retry carrying different content).
            LeaseView::Held { .. } => ReasonCode::SaveAlreadyPending,
        }
    }

    /// Re-label a save whose lease changed while its bytes were in flight
    pub const fn after_write(self, earlier: ReasonCode, lease: LeaseView) -> ReasonCode {
        if let LeaseView::Held { .. } = lease {
            return earlier;
        }
        match (earlier, self.precedence) {
            (ReasonCode::SaveAlreadyPending, ConflictPrecedence::PendingFirst) => {
                ReasonCode::SaveAlreadyPending
            }
            _ => ReasonCode::SessionExpired,
        }
    }
}

/// Save workflow selected per request at the upload boundary
pub trait ConflictPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Label a save when it is admitted
    fn classify(&self, lease: LeaseView, declared: ChangeId, current: ChangeId) -> ReasonCode;

    /// Label a save whose lease was lost during the write
    fn after_write(&self, earlier: ReasonCode, lease: LeaseView) -> ReasonCode;

    /// Whether a save with no lease behind it takes the lease for the caller
    fn claims_lapsed_lease(&self, reason: ReasonCode) -> bool;
}

/// Conflict-aware workflow: stale or lease-less saves are flagged
#[derive(Debug, Clone, Copy, Default)]
pub struct OptimisticPolicy {
    detector: ConflictDetector,
}

impl OptimisticPolicy {
    pub const fn new(detector: ConflictDetector) -> Self {
        Self { detector }
    }
}

impl ConflictPolicy for OptimisticPolicy {
    fn name(&self) -> &'static str {
        "optimistic"
    }

    fn classify(&self, lease: LeaseView, declared: ChangeId, current: ChangeId) -> ReasonCode {
        self.detector.detect(lease, declared, current)
    }

    fn after_write(&self, earlier: ReasonCode, lease: LeaseView) -> ReasonCode {
        self.detector.after_write(earlier, lease)
    }

    fn claims_lapsed_lease(&self, reason: ReasonCode) -> bool {
        // Only a clean first save opens a lease ("editRequired" false path).
        !reason.is_conflict()
    }
}

/// Pre-conflict workflow kept for TOUCH clients: every save is clean and a
/// lapsed lease is silently taken back
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyPolicy;

impl ConflictPolicy for LegacyPolicy {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn classify(&self, _lease: LeaseView, _declared: ChangeId, _current: ChangeId) -> ReasonCode {
        ReasonCode::None
    }

    fn after_write(&self, _earlier: ReasonCode, _lease: LeaseView) -> ReasonCode {
        ReasonCode::None
    }

    fn claims_lapsed_lease(&self, _reason: ReasonCode) -> bool {
        true
    }
}

/// Picks the workflow for a save
#[derive(Clone)]
pub struct PolicySelector {
    optimistic: Arc<dyn ConflictPolicy>,
    legacy: Arc<dyn ConflictPolicy>,
    legacy_touch_workflow: bool,
}

impl PolicySelector {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            optimistic: Arc::new(OptimisticPolicy::new(ConflictDetector::new(
                config.conflict_precedence,
            ))),
            legacy: Arc::new(LegacyPolicy),
            legacy_touch_workflow: config.legacy_touch_workflow,
        }
    }

    /// TOUCH clients that have not opted into the new session workflow keep
    /// the legacy behaviour while it is enabled
    pub fn select(&self, device: Device, new_session_workflow: bool) -> Arc<dyn ConflictPolicy> {
        if self.legacy_touch_workflow && device == Device::Touch && !new_session_workflow {
            self.legacy.clone()
        } else {
            self.optimistic.clone()
        }
    }
}
