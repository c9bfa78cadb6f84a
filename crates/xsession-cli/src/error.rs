use std::io;

use thiserror::Error;
use xsession_core::config::ConfigError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] xsession_core::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Invalid log directive: {0}")]
    LogDirective(#[from] tracing_subscriber::filter::ParseError),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No edit session holder for {0}")]
    NothingToRelease(String),
}
