//! Gateway payloads and replies
//!
//! Field names are camelCase on the wire. Identifiers are validated while
//! deserializing, so a payload that parses is well-formed.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::arbitrator::{HandoverMode, LeaseRequest, RequestOutcome, RequestStatus, SessionView};
use crate::models::{
    ChangeId, Device, FileChangeInfo, FileId, SessionState, UserProfile, VersionId, XSessionId,
};
use crate::upload::{SaveOutcome, SaveRequest, SaveStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    pub file_id: FileId,
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
    pub device: Device,
    #[serde(default)]
    pub x_session_id: Option<XSessionId>,
    #[serde(default)]
    pub storage_type: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
}

impl From<RequestPayload> for LeaseRequest {
    fn from(payload: RequestPayload) -> Self {
        Self {
            file_id: payload.file_id,
            user_id: payload.user_id,
            device: payload.device,
            profile: UserProfile {
                email: payload.email,
                name: payload.name,
                surname: payload.surname,
            },
            x_session_id: payload.x_session_id,
            storage_type: payload.storage_type,
            external_id: payload.external_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    pub state: RequestStatus,
    pub holder_x_session_id: XSessionId,
    pub x_session_id: XSessionId,
}

impl From<RequestOutcome> for RequestResponse {
    fn from(outcome: RequestOutcome) -> Self {
        Self {
            state: outcome.status,
            holder_x_session_id: outcome.holder_x_session_id,
            x_session_id: outcome.x_session_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DenyPayload {
    pub file_id: FileId,
    pub holder_x_session_id: XSessionId,
    pub request_x_session_id: XSessionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePayload {
    pub file_id: FileId,
    pub x_session_id: XSessionId,
    pub mode: HandoverMode,
    #[serde(default)]
    pub session_state: Option<SessionState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavePayload {
    pub file_id: FileId,
    pub x_session_id: XSessionId,
    #[serde(default)]
    pub session_id: Option<String>,
    pub user_id: String,
    pub device: Device,
    pub base_change_id: ChangeId,
    #[serde(default)]
    pub file_changes_info: Vec<FileChangeInfo>,
    pub bytes: Bytes,
    #[serde(default)]
    pub new_session_workflow: bool,
}

impl From<SavePayload> for SaveRequest {
    fn from(payload: SavePayload) -> Self {
        Self {
            file_id: payload.file_id,
            x_session_id: payload.x_session_id,
            session_id: payload.session_id,
            user_id: payload.user_id,
            device: payload.device,
            base_change_id: payload.base_change_id,
            file_changes_info: payload.file_changes_info,
            bytes: payload.bytes,
            new_session_workflow: payload.new_session_workflow,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveResponse {
    pub status: SaveStatus,
    pub version_id: VersionId,
    pub base_change_id: ChangeId,
    pub is_conflicted: bool,
    pub conflicting_file_reason: Option<String>,
}

impl From<SaveOutcome> for SaveResponse {
    fn from(outcome: SaveOutcome) -> Self {
        Self {
            status: outcome.status,
            version_id: outcome.version_id,
            base_change_id: outcome.base_change_id,
            is_conflicted: outcome.report.is_conflicted,
            conflicting_file_reason: outcome.report.reason_code.code().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovePayload {
    pub file_id: FileId,
    pub x_session_id: XSessionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPayload {
    pub file_id: FileId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetResponse {
    pub sessions: Vec<SessionView>,
}

/// Acknowledgement for operations without a payload of their own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    pub const OK: Self = Self { ok: true };
}
