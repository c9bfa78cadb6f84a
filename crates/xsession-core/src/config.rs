//! Runtime configuration for the arbitration core.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Which label wins when a save is both stale-leased and racing another save
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPrecedence {
    #[default]
    ExpiredFirst,
    PendingFirst,
}

impl ConflictPrecedence {
    pub const fn label(self) -> &'static str {
        match self {
            Self::ExpiredFirst => "expired-first",
            Self::PendingFirst => "pending-first",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "expired-first" => Some(Self::ExpiredFirst),
            "pending-first" => Some(Self::PendingFirst),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct SessionConfig {
    /// Idle time after which a lease is swept
    pub session_ttl: Duration,
    pub sweep_interval: Duration,
    pub conflict_precedence: ConflictPrecedence,
    /// Keep the non-conflict-aware save path for TOUCH clients that have not
    /// opted into the new session workflow
    pub legacy_touch_workflow: bool,
    pub activity_queue_capacity: usize,
    pub ledger_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(1_800),
            sweep_interval: Duration::from_secs(60),
            conflict_precedence: ConflictPrecedence::ExpiredFirst,
            legacy_touch_workflow: true,
            activity_queue_capacity: 1_024,
            ledger_path: None,
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SessionConfig")
            .field("session_ttl", &self.session_ttl)
            .field("sweep_interval", &self.sweep_interval)
            .field("conflict_precedence", &self.conflict_precedence.label())
            .field("legacy_touch_workflow", &self.legacy_touch_workflow)
            .field("activity_queue_capacity", &self.activity_queue_capacity)
            .field("ledger_path", &self.ledger_path)
            .finish()
    }
}

impl SessionConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let ttl_secs = value_or_default(&lookup, "XSESSION_TTL_SECS", "1800")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "XSESSION_TTL_SECS must be an integer in [30, 86400]".to_string(),
                )
            })?;
        if !(30..=86_400).contains(&ttl_secs) {
            return Err(ConfigError::Invalid(
                "XSESSION_TTL_SECS must be in [30, 86400]".to_string(),
            ));
        }

        let sweep_secs = value_or_default(&lookup, "XSESSION_SWEEP_INTERVAL_SECS", "60")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "XSESSION_SWEEP_INTERVAL_SECS must be an integer in [1, 3600]".to_string(),
                )
            })?;
        if !(1..=3_600).contains(&sweep_secs) {
            return Err(ConfigError::Invalid(
                "XSESSION_SWEEP_INTERVAL_SECS must be in [1, 3600]".to_string(),
            ));
        }
        if sweep_secs > ttl_secs {
            return Err(ConfigError::Invalid(
                "XSESSION_SWEEP_INTERVAL_SECS must not exceed XSESSION_TTL_SECS".to_string(),
            ));
        }

        let precedence_raw =
            value_or_default(&lookup, "XSESSION_CONFLICT_PRECEDENCE", "expired-first");
        let conflict_precedence = ConflictPrecedence::parse(&precedence_raw).ok_or_else(|| {
            ConfigError::Invalid(
                "XSESSION_CONFLICT_PRECEDENCE must be expired-first or pending-first".to_string(),
            )
        })?;

        let legacy_touch_workflow =
            parse_bool(&value_or_default(&lookup, "XSESSION_LEGACY_TOUCH_WORKFLOW", "true"))
                .ok_or_else(|| {
                    ConfigError::Invalid(
                        "XSESSION_LEGACY_TOUCH_WORKFLOW must be true or false".to_string(),
                    )
                })?;

        let activity_queue_capacity =
            value_or_default(&lookup, "XSESSION_ACTIVITY_QUEUE_CAPACITY", "1024")
                .parse::<usize>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "XSESSION_ACTIVITY_QUEUE_CAPACITY must be an integer in [1, 65536]"
                            .to_string(),
                    )
                })?;
        if !(1..=65_536).contains(&activity_queue_capacity) {
            return Err(ConfigError::Invalid(
                "XSESSION_ACTIVITY_QUEUE_CAPACITY must be in [1, 65536]".to_string(),
            ));
        }

        let ledger_path = optional_trimmed(&lookup, "XSESSION_LEDGER_PATH").map(PathBuf::from);

        Ok(Self {
            session_ttl: Duration::from_secs(ttl_secs),
            sweep_interval: Duration::from_secs(sweep_secs),
            conflict_precedence,
            legacy_touch_workflow,
            activity_queue_capacity,
            ledger_path,
        })
    }

    /// Ledger location, failing when none is configured
    pub fn require_ledger_path(&self) -> Result<&PathBuf, ConfigError> {
        self.ledger_path
            .as_ref()
            .ok_or(ConfigError::MissingVar("XSESSION_LEDGER_PATH"))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
