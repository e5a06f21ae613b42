//! Unified error types for the corral workspace.
//!
//! The variants mirror the failure classes a caller has to tell apart:
//! usage mistakes are rejected before any side effect, lookups fail with
//! `NotFound`, lifecycle violations with `InvalidState`, and anything that
//! breaks during `run` after side effects started is a `LaunchFailure`.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::ContainerStatus;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum CorralError {
    /// Missing or contradictory arguments.
    #[error("usage error: {message}")]
    Usage {
        /// What was wrong with the request.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// The operation is forbidden in the container's current lifecycle state.
    #[error("cannot {operation} container {name} while it is {status}")]
    InvalidState {
        /// Container name.
        name: String,
        /// Status observed when the operation was attempted.
        status: ContainerStatus,
        /// Operation that was refused.
        operation: &'static str,
    },

    /// `stop` was issued against a container that already stopped.
    #[error("container {name} is already stopped")]
    AlreadyStopped {
        /// Container name.
        name: String,
    },

    /// A container with this name already exists.
    #[error("container name already in use: {name}")]
    NameConflict {
        /// Conflicting name.
        name: String,
    },

    /// A step of the launch sequence failed after side effects began.
    #[error("launch failed during {stage}: {source}")]
    LaunchFailure {
        /// Launch step that failed.
        stage: &'static str,
        /// Underlying cause.
        #[source]
        source: Box<CorralError>,
    },

    /// Writing or closing the init handoff pipe failed.
    #[error("init handoff failed: {source}")]
    HandoffFailure {
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A process could not be signaled or awaited.
    #[error("signal to pid {pid} failed: {message}")]
    SignalFailure {
        /// Target process.
        pid: u32,
        /// Description of the failure.
        message: String,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A permission or privileged syscall error.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the denied operation.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl CorralError {
    /// Wraps an error as a launch failure of the given step.
    #[must_use]
    pub fn launch(stage: &'static str, source: Self) -> Self {
        Self::LaunchFailure {
            stage,
            source: Box::new(source),
        }
    }

    /// Shorthand for a usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Shorthand for a missing container.
    pub fn container_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "container",
            id: name.into(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CorralError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_failure_names_stage_and_cause() {
        let err = CorralError::launch(
            "network attach",
            CorralError::NotFound {
                kind: "network",
                id: "mynet".into(),
            },
        );
        assert_eq!(
            err.to_string(),
            "launch failed during network attach: network not found: mynet"
        );
    }

    #[test]
    fn invalid_state_mentions_operation() {
        let err = CorralError::InvalidState {
            name: "abc123".into(),
            status: ContainerStatus::Running,
            operation: "remove",
        };
        assert_eq!(
            err.to_string(),
            "cannot remove container abc123 while it is running"
        );
    }
}
