//! Error types for device sessions.
//!
//! Transport failures are categorized so the caller can tell a device that
//! never answered from one that answered with the wrong protocol, and both
//! from a step that simply ran out of time.

use std::time::Duration;
use thiserror::Error;

/// Categories of session errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// A step did not complete within its timeout
    Timeout,
    /// The device never produced a usable answer (closed, refused, unreachable)
    NoResponse,
    /// The device answered but does not speak the expected protocol
    CapabilityMismatch,
    /// The transport broke mid-session (write failed, pipe closed)
    Transport,
    /// The session is not connected
    NotConnected,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Timeout => "Device step timed out",
            Self::NoResponse => "No response from device",
            Self::CapabilityMismatch => "Device capability mismatch",
            Self::Transport => "Session transport failure",
            Self::NotConnected => "Session not connected",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Timeout => "Check device load or raise step_timeout_secs",
            Self::NoResponse => "Verify the device address, port and credentials",
            Self::CapabilityMismatch => "Check the vendor setting for this device",
            Self::Transport => "Reconnect and retry the whole operation",
            Self::NotConnected => "Connect the session before sending requests",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors that can occur on a device session.
#[derive(Debug, Error)]
pub enum Error {
    /// A step timed out
    #[error("{op} timed out after {after:?}")]
    Timeout {
        /// Operation that was waiting
        op: String,
        /// Configured timeout
        after: Duration,
    },

    /// The device did not answer
    #[error("no response from device: {message}")]
    NoResponse {
        /// What was observed instead of an answer
        message: String,
    },

    /// The device does not advertise a required capability
    #[error("capability mismatch: missing {missing}")]
    CapabilityMismatch {
        /// Capability that was required
        missing: String,
        /// Capabilities the device advertised
        advertised: Vec<String>,
    },

    /// Transport failure during an exchange
    #[error("transport error: {message}")]
    Transport {
        /// Description of the failure
        message: String,
    },

    /// An earlier request timed out and its reply may still be in flight
    #[error("{op} refused: an earlier reply is still outstanding, reconnect first")]
    Desynchronized {
        /// Operation that was refused
        op: String,
    },

    /// Session used before `connect`
    #[error("session is not connected")]
    NotConnected,

    /// Session command template is unusable
    #[error("invalid session command: {0}")]
    InvalidCommand(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Timeout { .. } => ErrorCategory::Timeout,
            Error::NoResponse { .. } => ErrorCategory::NoResponse,
            Error::CapabilityMismatch { .. } => ErrorCategory::CapabilityMismatch,
            Error::Transport { .. } | Error::Desynchronized { .. } | Error::Io(_) => {
                ErrorCategory::Transport
            }
            Error::NotConnected => ErrorCategory::NotConnected,
            Error::InvalidCommand(_) | Error::Other(_) => ErrorCategory::Other,
        }
    }

    /// Create an error from the diagnostic output of a session command that
    /// exited before the session was established.
    ///
    /// Analyzes the text to categorize the error appropriately.
    pub fn from_session_output(output: &str) -> Self {
        let lower = output.to_lowercase();

        if lower.contains("timed out") || lower.contains("timeout") {
            return Error::Timeout {
                op: "connect".to_string(),
                after: Duration::ZERO,
            };
        }

        if lower.contains("subsystem request failed")
            || lower.contains("unknown subsystem")
            || lower.contains("capabilit")
        {
            return Error::CapabilityMismatch {
                missing: "netconf subsystem".to_string(),
                advertised: Vec::new(),
            };
        }

        let message = if output.trim().is_empty() {
            "session closed before greeting".to_string()
        } else {
            output.trim().to_string()
        };
        Error::NoResponse { message }
    }
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_session_output_timeout() {
        let err = Error::from_session_output("ssh: connect to host 10.0.0.1 port 830: Connection timed out");
        assert_eq!(err.category(), ErrorCategory::Timeout);
    }

    #[test]
    fn test_timeout_display_keeps_subsecond_precision() {
        let err = Error::Timeout {
            op: "commit".to_string(),
            after: Duration::from_millis(500),
        };
        assert_eq!(err.to_string(), "commit timed out after 500ms");

        let err = Error::Timeout {
            op: "lock".to_string(),
            after: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "lock timed out after 30s");
    }

    #[test]
    fn test_from_session_output_refused() {
        let err = Error::from_session_output("ssh: connect to host 10.0.0.1 port 830: Connection refused");
        assert_eq!(err.category(), ErrorCategory::NoResponse);
    }

    #[test]
    fn test_from_session_output_subsystem() {
        let err = Error::from_session_output("subsystem request failed on channel 0");
        assert_eq!(err.category(), ErrorCategory::CapabilityMismatch);
    }

    #[test]
    fn test_from_session_output_empty() {
        let err = Error::from_session_output("  ");
        assert_eq!(err.category(), ErrorCategory::NoResponse);
        assert!(err.to_string().contains("before greeting"));
    }
}
