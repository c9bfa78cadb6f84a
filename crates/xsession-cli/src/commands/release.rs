use xsession_core::{FileId, LeaseArbitrator};

use crate::error::CliError;

pub async fn run_release(arbitrator: &LeaseArbitrator, file_id: &str) -> Result<(), CliError> {
    let file_id = FileId::new(file_id)?;
    match arbitrator.force_release(&file_id).await? {
        Some(evicted) => {
            println!("Released {file_id} (evicted {evicted})");
            Ok(())
        }
        None => Err(CliError::NothingToRelease(file_id.to_string())),
    }
}
