//! Conflict report model

use serde::{Deserialize, Serialize};
use std::fmt;

use super::VersionId;

/// Why a persisted save was flagged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    #[default]
    None,
    /// The lease lapsed or was taken over before the save landed
    SessionExpired,
    /// Another save of the same session was in flight, or the holder's
    /// pointer was already overtaken by its own earlier commit
    SaveAlreadyPending,
}

impl ReasonCode {
    pub const fn is_conflict(self) -> bool {
        !matches!(self, Self::None)
    }

    /// Stable identifier surfaced as `conflictingFileReason`
    pub const fn code(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::SessionExpired => Some("FileSessionHasExpired"),
            Self::SaveAlreadyPending => Some("FL19"),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::SaveAlreadyPending => "SAVE_ALREADY_PENDING",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transient result of a save attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    pub is_conflicted: bool,
    pub reason_code: ReasonCode,
    pub new_version_id: Option<VersionId>,
}

impl ConflictReport {
    pub const fn new(reason_code: ReasonCode, new_version_id: Option<VersionId>) -> Self {
        Self {
            is_conflicted: reason_code.is_conflict(),
            reason_code,
            new_version_id,
        }
    }
}
