//! Error types for the configuration engine.
//!
//! The taxonomy is closed: every failure a caller can observe is one of the
//! variants below, and [`Error::outcome`] maps it onto the public result
//! codes of the driver operations.

use crate::coordinator::TxState;
use crate::model::ServiceType;
use crate::tree::TreeError;
use crate::vendor::Step;
use std::fmt;
use thiserror::Error;

/// Result code of a driver `update`/`delete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Change committed
    Ok,
    /// The device refused the candidate at validation; retry later
    ValidationFailed,
    /// Anything else; fix the input or the device
    Error,
}

impl Outcome {
    /// Result code of a driver call.
    pub fn of<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(err) => err.outcome(),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::ValidationFailed => write!(f, "validation failed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Sub-kind of a connection failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Connect did not finish in time
    Timeout,
    /// The device never answered
    NoResponse,
    /// The device answered with the wrong protocol
    CapabilityMismatch,
    /// Transport broke during the greeting
    Transport,
}

impl fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Timeout => "timeout",
            Self::NoResponse => "no response",
            Self::CapabilityMismatch => "capability mismatch",
            Self::Transport => "transport failure",
        };
        write!(f, "{text}")
    }
}

/// Failure to open a session to a device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot connect to {device} ({kind}): {message}")]
pub struct ConnectionError {
    /// Device name
    pub device: String,
    /// What went wrong
    pub kind: ConnectionErrorKind,
    /// Transport detail
    pub message: String,
}

impl ConnectionError {
    /// Classify a session error raised while connecting.
    pub fn from_session(device: &str, err: &devicekit::Error) -> Self {
        use devicekit::ErrorCategory;

        let kind = match err.category() {
            ErrorCategory::Timeout => ConnectionErrorKind::Timeout,
            ErrorCategory::CapabilityMismatch => ConnectionErrorKind::CapabilityMismatch,
            ErrorCategory::Transport => ConnectionErrorKind::Transport,
            ErrorCategory::NoResponse | ErrorCategory::NotConnected | ErrorCategory::Other => {
                ConnectionErrorKind::NoResponse
            }
        };
        Self {
            device: device.to_string(),
            kind,
            message: err.to_string(),
        }
    }
}

/// Compilation failures. No directives are produced when one occurs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// A required field is missing or cannot be matched against persisted state
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// A reference matches more than one persisted entity
    #[error("ambiguous reference: {0}")]
    AmbiguousReference(String),

    /// The service type does not support this operation or element
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
}

/// Recovery reconstruction failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconstructError {
    /// An interface name has no entry in the rename map
    #[error("interface {0} is not in the rename map")]
    UnmappedInterface(String),

    /// Persisted state lacks what the reconstruction needs
    #[error("insufficient persisted state: {0}")]
    InsufficientData(String),
}

/// Errors that can occur in the configuration engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Session could not be opened
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// No profile is configured under this name
    #[error("device {0} is not configured")]
    UnknownDevice(String),

    /// The driver does not handle this service type
    #[error("{device}: service type {service} is not supported by this driver")]
    ServiceTypeUnsupported {
        /// Device name
        device: String,
        /// Requested service type
        service: ServiceType,
    },

    /// The change could not be compiled
    #[error("compilation failed: {0}")]
    Compilation(#[from] CompileError),

    /// The device rejected an edit
    #[error("{device}: {service} edit rejected: {response}")]
    DirectiveRejected {
        /// Device name
        device: String,
        /// Service type of the rejected batch
        service: ServiceType,
        /// Raw device response
        response: String,
    },

    /// The device refused the candidate configuration at validation
    #[error("{device}: validation failed: {response}")]
    ValidationFailed {
        /// Device name
        device: String,
        /// Raw device response
        response: String,
    },

    /// A mandatory protocol step failed (discard, lock, commit, get-config)
    #[error("{device}: {step} failed: {response}")]
    StepFailed {
        /// Device name
        device: String,
        /// Failed step
        step: Step,
        /// Raw device response or transport error
        response: String,
    },

    /// Live configuration does not match persisted state
    #[error("{device}: live configuration differs at {path}")]
    ComparisonMismatch {
        /// Device name
        device: String,
        /// First mismatching path
        path: String,
    },

    /// Unlock or disconnect failed; logged, never propagated by the driver
    #[error("{device}: best-effort {step} failed: {message}")]
    BestEffortStepFailed {
        /// Device name
        device: String,
        /// Failed step
        step: Step,
        /// Failure detail
        message: String,
    },

    /// A protocol step was attempted from the wrong state
    #[error("invalid transition {from:?} -> {to:?}")]
    InvalidTransition {
        /// Current state
        from: TxState,
        /// Requested state
        to: TxState,
    },

    /// Recovery could not rebuild a change
    #[error("reconstruction failed: {0}")]
    Reconstruction(#[from] ReconstructError),

    /// The operation was cancelled between steps
    #[error("{device}: cancelled")]
    Cancelled {
        /// Device name
        device: String,
    },

    /// Config tree manipulation failed
    #[error("config tree error: {0}")]
    Tree(#[from] TreeError),

    /// Persisted state store failed
    #[error("state store error: {0}")]
    Store(#[from] statestore::Error),

    /// The device committed the change but the store did not record it.
    /// Persisted state now lags the device; run `recover` or `compare`.
    #[error("{device}: committed on the device but not persisted: {source}")]
    CommittedNotPersisted {
        /// Device name
        device: String,
        /// Store failure
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Public result code for this error.
    ///
    /// Only a failed validation keeps its own code: remediation differs
    /// (retry later rather than fix the input).
    pub fn outcome(&self) -> Outcome {
        match self {
            Error::ValidationFailed { .. } => Outcome::ValidationFailed,
            _ => Outcome::Error,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Store(statestore::Error::Payload(err))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
