//! Error taxonomy.
//!
//! Transport failures are local facts ([`ConnectionError`],
//! [`ExecutionError`]); the service folds them into [`ServiceError`], which
//! is what a request layer maps to client responses. Vendor-text parsing
//! never fails and has no error type.

use std::time::Duration;

use thiserror::Error;

// ── Transport ───────────────────────────────────────────────────────

/// Opening the remote shell failed. No session exists afterwards.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to launch ssh client: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("connection timed out after {0:?}")]
    TimedOut(Duration),
    #[error("connection to {target} rejected: {reason}")]
    Rejected { target: String, reason: String },
}

/// A command against an open session failed. The session is torn down.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("command timed out after {0:?}")]
    TimedOut(Duration),
    #[error("session closed while the command was pending")]
    SessionClosed,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("failed to launch ssh client: {0}")]
    Spawn(#[source] std::io::Error),
}

// ── Service boundary ────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("ssh connection failed: {0}")]
    Connection(#[from] ConnectionError),
    #[error("session not found or expired")]
    SessionNotFound,
    #[error("command failed: {0}")]
    Execution(#[from] ExecutionError),
    #[error("{0}")]
    MalformedInput(String),
}

impl ServiceError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        ServiceError::MalformedInput(msg.into())
    }

    /// Stable machine-readable label.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Connection(_) => "connection_failed",
            ServiceError::SessionNotFound => "session_not_found",
            ServiceError::Execution(_) => "command_failed",
            ServiceError::MalformedInput(_) => "malformed_input",
        }
    }

    /// Text suitable for showing to the client that made the request.
    pub fn client_message(&self) -> String {
        self.to_string()
    }

    /// Whether the failure consumed the session (the client must reconnect).
    pub fn ends_session(&self) -> bool {
        matches!(
            self,
            ServiceError::SessionNotFound | ServiceError::Execution(_)
        )
    }
}

// ── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
