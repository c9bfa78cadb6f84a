//! xsession-core - Core library for XSession
//!
//! Arbitrates who may edit a file, detects stale saves and coordinates
//! uploads against an external version store. The HTTP gateway and the
//! operator CLI are thin shells around [`XSessionService`] and
//! [`LeaseArbitrator`].

pub mod activity;
pub mod arbitrator;
pub mod clock;
pub mod config;
pub mod conflict;
pub mod contract;
pub mod error;
pub mod ledger;
pub mod models;
pub mod service;
pub mod sweeper;
pub mod upload;
pub mod version_store;

pub use arbitrator::LeaseArbitrator;
pub use config::SessionConfig;
pub use error::{Error, LeaseError, Result};
pub use models::{
    ChangeId, ConflictReport, Device, EditSession, FileId, ReasonCode, SessionState, VersionId,
    XSessionId,
};
pub use service::XSessionService;
