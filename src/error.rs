//! Error types for the ALBA demo orchestrator.
//!
//! This module provides a unified error type [`OrchestratorError`] for all
//! orchestration steps, along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! - **Transient**: leader not yet elected, daemon not yet claimable. These
//!   are absorbed by the [`ReadinessPoller`](crate::poller::ReadinessPoller)
//!   and only surface once its budget is exhausted.
//! - **Fatal**: registration, namespace creation, claim exhaustion and
//!   readiness timeouts. Bringup stops at the failing stage.
//! - **Verification**: smoke check mismatches, reported with actual and
//!   expected counts.
//!
//! # Example
//!
//! ```rust
//! use alba_demo::error::{OrchestratorError, Result};
//!
//! fn check_port(port: u16) -> Result<u16> {
//!     if port == 0 {
//!         return Err(OrchestratorError::InvalidConfig {
//!             field: "port".into(),
//!             reason: "must be non-zero".into(),
//!         });
//!     }
//!     Ok(port)
//! }
//!
//! assert!(check_port(0).is_err());
//! ```

use std::io;
use thiserror::Error;

use crate::cluster::bringup::BringupStage;

/// Main error type for orchestration operations.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    // External command errors
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Command `{command}` exited with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("Unexpected output from `{command}`: {reason}")]
    UnexpectedOutput { command: String, reason: String },

    // Readiness errors
    #[error("Timed out waiting for {what} after {attempts} attempts")]
    ReadinessTimeout { what: String, attempts: u32 },

    #[error("No leader elected yet")]
    NoLeader,

    #[error("Claimed {claimed} of {expected} storage daemons after {attempts} attempts")]
    ClaimsNotConverged {
        claimed: usize,
        expected: usize,
        attempts: u32,
    },

    #[error("Bringup aborted at stage {stage}: {source}")]
    Bringup {
        stage: BringupStage,
        #[source]
        source: Box<OrchestratorError>,
    },

    // Verification errors
    #[error("Only {found} storage daemons listening, need {expected}")]
    MissingDaemons { found: usize, expected: usize },

    #[error("Proxy not listening on port {port}")]
    ProxyNotRunning { port: u16 },

    // TLS errors
    #[error("Certificate authority missing at {0}")]
    MissingAuthority(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // External errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::NoLeader
                | OrchestratorError::CommandFailed { .. }
                | OrchestratorError::UnexpectedOutput { .. }
        )
    }

    /// Wrap this error with the bringup stage it occurred in.
    pub fn at_stage(self, stage: BringupStage) -> Self {
        OrchestratorError::Bringup {
            stage,
            source: Box::new(self),
        }
    }

    /// The bringup stage this error aborted, if any.
    pub fn stage(&self) -> Option<BringupStage> {
        match self {
            OrchestratorError::Bringup { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The innermost error, unwrapping any stage context.
    pub fn root_cause(&self) -> &OrchestratorError {
        match self {
            OrchestratorError::Bringup { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(e: serde_json::Error) -> Self {
        OrchestratorError::Serialization(e.to_string())
    }
}

/// Result type alias for orchestration operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
