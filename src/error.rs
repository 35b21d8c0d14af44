//! Error types for each external boundary of the relay.
//!
//! Startup and configuration plumbing uses `anyhow`; these enums exist so the
//! poll loop can tell the failure classes apart and apply the right policy.

use std::path::PathBuf;

use thiserror::Error;

/// Failures of the Messages database adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database cannot be opened or queried. Fatal at startup.
    #[error("message store unavailable at {path}: {reason}")]
    Unavailable { path: PathBuf, reason: String },

    /// A single candidate query failed. The cycle sees zero candidates.
    #[error("message query failed: {0}")]
    Query(#[from] rusqlite::Error),
}

/// Failures talking to the agent service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Connection refused, timeout, TLS, ...
    #[error("agent service unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("agent service returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    /// The body was not the expected JSON shape.
    #[error("malformed agent response: {0}")]
    Malformed(String),

    /// The service answered but reported an error (or nothing at all).
    #[error("agent reported an error: {0}")]
    Reported(String),
}

/// Failures handing a reply to the automation host.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The automation binary could not be started.
    #[error("failed to launch automation host: {0}")]
    Spawn(#[from] std::io::Error),

    /// The script exited unsuccessfully.
    #[error("automation script failed ({code}): {stderr}")]
    Script { code: i32, stderr: String },

    /// The script ran but its output carries an error sentinel.
    #[error("delivery rejected: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_message_names_path() {
        let err = StoreError::Unavailable {
            path: PathBuf::from("/tmp/chat.db"),
            reason: "not found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "message store unavailable at /tmp/chat.db: not found"
        );
    }

    #[test]
    fn test_status_message_includes_code() {
        let err = ServiceError::Status {
            status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            body: "boom".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("500"));
        assert!(text.contains("boom"));
    }
}
