use std::sync::Arc;

use tokio::sync::watch;
use xsession_core::arbitrator::SweepReport;
use xsession_core::sweeper::Sweeper;
use xsession_core::{LeaseArbitrator, SessionConfig};

use crate::error::CliError;

pub async fn run_sweep(
    arbitrator: LeaseArbitrator,
    config: &SessionConfig,
    watch_mode: bool,
) -> Result<(), CliError> {
    if !watch_mode {
        let report = arbitrator.sweep().await;
        for line in format_sweep_report(&report) {
            println!("{line}");
        }
        return Ok(());
    }

    let (shutdown, signal) = watch::channel(false);
    let handle = Sweeper::new(Arc::new(arbitrator), config.sweep_interval).spawn(signal);
    println!(
        "Sweeping every {}s (ttl {}s), Ctrl-C to stop",
        config.sweep_interval.as_secs(),
        config.session_ttl.as_secs()
    );

    tokio::signal::ctrl_c().await?;
    shutdown.send_replace(true);
    if let Err(error) = handle.await {
        tracing::warn!(error = %error, "Sweeper ended abnormally");
    }
    Ok(())
}

pub fn format_sweep_report(report: &SweepReport) -> Vec<String> {
    if report.is_empty() {
        return vec!["Nothing to expire".to_string()];
    }
    report
        .expired
        .iter()
        .map(|file_id| format!("expired   {file_id}"))
        .chain(
            report
                .reserved
                .iter()
                .map(|file_id| format!("reserved  {file_id}")),
        )
        .chain(
            report
                .failed
                .iter()
                .map(|file_id| format!("failed    {file_id}")),
        )
        .collect()
}
