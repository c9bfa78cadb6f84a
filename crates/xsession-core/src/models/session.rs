//! Edit session model

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{ChangeId, FileId, LeaseId, ReasonCode, VersionId, XSessionId};

/// Client device class of an editing instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Device {
    Browser,
    Touch,
    Commander,
    Desktop,
    Mobile,
}

impl Device {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Browser => "BROWSER",
            Self::Touch => "TOUCH",
            Self::Commander => "COMMANDER",
            Self::Desktop => "DESKTOP",
            Self::Mobile => "MOBILE",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lease state of a file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    #[default]
    None,
    Active,
    SavePending,
}

impl SessionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Active => "ACTIVE",
            Self::SavePending => "SAVE_PENDING",
        }
    }

    /// Whether the state carries a holder
    pub const fn is_held(self) -> bool {
        matches!(self, Self::Active | Self::SavePending)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display details the gateway forwards with a lease request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
}

/// One editing instance taking part in a file's lease
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub x_session_id: XSessionId,
    pub user_id: String,
    pub device: Device,
    #[serde(default)]
    pub profile: UserProfile,
    /// Last time this participant asked for the lease (Unix ms)
    pub last_seen_at: i64,
}

/// Outcome of the last completed save, kept for idempotent retries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveReceipt {
    pub declared_base: ChangeId,
    pub digest: String,
    pub version_id: VersionId,
    pub base_change_id: ChangeId,
    pub reason: ReasonCode,
}

/// One lease slot per file
///
/// `holder` is `None` only while a released lease is reserved for a queued
/// applicant; such a row is in state [`SessionState::None`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditSession {
    pub file_id: FileId,
    #[serde(default)]
    pub storage_type: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    pub lease_id: LeaseId,
    pub holder: Option<Participant>,
    pub state: SessionState,
    pub applicant: Option<Participant>,
    /// Previous holders demoted to read-only by a downgrade handover
    #[serde(default)]
    pub readers: Vec<Participant>,
    pub base_change_id: ChangeId,
    /// Last holder activity (Unix ms)
    pub last_activity_at: i64,
    #[serde(default)]
    pub pending_saves: u32,
    #[serde(default)]
    pub last_save: Option<SaveReceipt>,
}

impl EditSession {
    /// Create a freshly granted session
    pub fn granted(file_id: FileId, holder: Participant, now: i64) -> Self {
        Self {
            file_id,
            storage_type: None,
            external_id: None,
            lease_id: LeaseId::new(),
            holder: Some(holder),
            state: SessionState::Active,
            applicant: None,
            readers: Vec::new(),
            base_change_id: ChangeId::ZERO,
            last_activity_at: now,
            pending_saves: 0,
            last_save: None,
        }
    }

    /// The holder's token, if the lease is held
    pub fn holder_x_session_id(&self) -> Option<&XSessionId> {
        self.holder.as_ref().map(|holder| &holder.x_session_id)
    }

    pub fn applicant_x_session_id(&self) -> Option<&XSessionId> {
        self.applicant
            .as_ref()
            .map(|applicant| &applicant.x_session_id)
    }

    pub fn is_held_by(&self, x_session_id: &XSessionId) -> bool {
        self.holder_x_session_id() == Some(x_session_id)
    }

    pub fn is_reserved(&self) -> bool {
        self.holder.is_none() && self.applicant.is_some()
    }

    /// Hand the lease to `participant` as a new grant
    pub fn grant_to(&mut self, participant: Participant, now: i64) {
        self.lease_id = LeaseId::new();
        self.holder = Some(participant);
        self.pending_saves = 0;
        self.last_save = None;
        self.last_activity_at = now;
        self.sync_state();
    }

    /// Promote a reserved applicant to holder
    ///
    /// Returns `true` when a promotion happened.
    pub fn promote_reservation(&mut self, now: i64) -> bool {
        if !self.is_reserved() {
            return false;
        }
        if let Some(applicant) = self.applicant.take() {
            self.readers
                .retain(|reader| reader.x_session_id != applicant.x_session_id);
            self.grant_to(applicant, now);
            return true;
        }
        false
    }

    /// Drop the holder. The row survives as a reservation if someone is queued.
    ///
    /// Returns `false` when nothing is left and the row should be deleted.
    pub fn vacate(&mut self) -> bool {
        self.holder = None;
        self.pending_saves = 0;
        self.last_save = None;
        self.readers.clear();
        self.sync_state();
        self.applicant.is_some()
    }

    /// Derive `state` from holder and pending save count
    pub fn sync_state(&mut self) {
        self.state = match (&self.holder, self.pending_saves) {
            (None, _) => SessionState::None,
            (Some(_), 0) => SessionState::Active,
            (Some(_), _) => SessionState::SavePending,
        };
    }

    /// Advance the observed pointer; never moves backwards
    pub fn observe_change(&mut self, change_id: ChangeId) {
        self.base_change_id = self.base_change_id.max(change_id);
    }
}
