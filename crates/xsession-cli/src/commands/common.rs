use std::sync::Arc;

use serde::Serialize;
use xsession_core::clock::SystemClock;
use xsession_core::ledger::{LibSqlLedgerStore, SessionLedger};
use xsession_core::{EditSession, LeaseArbitrator, SessionConfig};

use crate::error::CliError;

pub async fn open_arbitrator(config: &SessionConfig) -> Result<LeaseArbitrator, CliError> {
    let path = config.require_ledger_path()?;
    tracing::debug!(path = %path.display(), "Opening ledger");
    let store = LibSqlLedgerStore::open(path).await?;
    let ledger = SessionLedger::open(Arc::new(store)).await?;
    Ok(LeaseArbitrator::new(
        Arc::new(ledger),
        Arc::new(SystemClock),
        config.session_ttl,
    ))
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionListItem {
    pub file_id: String,
    pub state: String,
    pub holder: Option<String>,
    pub holder_user_id: Option<String>,
    pub device: Option<String>,
    pub applicant: Option<String>,
    pub readers: usize,
    pub base_change_id: u64,
    pub pending_saves: u32,
    pub last_activity_at: i64,
}

pub fn session_to_list_item(session: &EditSession) -> SessionListItem {
    SessionListItem {
        file_id: session.file_id.to_string(),
        state: session.state.to_string(),
        holder: session.holder_x_session_id().map(ToString::to_string),
        holder_user_id: session.holder.as_ref().map(|holder| holder.user_id.clone()),
        device: session
            .holder
            .as_ref()
            .map(|holder| holder.device.to_string()),
        applicant: session.applicant_x_session_id().map(ToString::to_string),
        readers: session.readers.len(),
        base_change_id: session.base_change_id.get(),
        pending_saves: session.pending_saves,
        last_activity_at: session.last_activity_at,
    }
}

pub fn format_session_lines(sessions: &[EditSession], now_ms: i64) -> Vec<String> {
    sessions
        .iter()
        .map(|session| {
            let holder = session.holder.as_ref().map_or_else(
                || "(reserved)".to_string(),
                |holder| format!("{} {} {}", holder.x_session_id, holder.user_id, holder.device),
            );
            let mut line = format!(
                "{}  {}  {}  base={}  {}",
                session.file_id,
                session.state,
                holder,
                session.base_change_id,
                format_relative_time(session.last_activity_at, now_ms)
            );
            if let Some(applicant) = session.applicant_x_session_id() {
                line.push_str(&format!("  applicant={applicant}"));
            }
            line
        })
        .collect()
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}
