//! Data models for XSession

mod conflict;
mod ids;
mod session;
mod version;

pub use conflict::{ConflictReport, ReasonCode};
pub use ids::{ChangeId, FileId, LeaseId, VersionId, XSessionId};
pub use session::{
    Device, EditSession, Participant, SaveReceipt, SessionState, UserProfile,
};
pub use version::{content_digest, FileChangeInfo, LatestVersion, VersionRecord};
