use xsession_core::LeaseArbitrator;

use crate::commands::common::{format_session_lines, session_to_list_item, SessionListItem};
use crate::error::CliError;

pub async fn run_sessions(arbitrator: &LeaseArbitrator, as_json: bool) -> Result<(), CliError> {
    let sessions = arbitrator.sessions().await?;

    if as_json {
        let json_items = sessions
            .iter()
            .map(session_to_list_item)
            .collect::<Vec<SessionListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if sessions.is_empty() {
        println!("No edit sessions");
    } else {
        let now = chrono::Utc::now().timestamp_millis();
        for line in format_session_lines(&sessions, now) {
            println!("{line}");
        }
    }

    Ok(())
}
