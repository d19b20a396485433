//! Error types for voxtype-relay
//!
//! Uses thiserror for ergonomic error definitions with clear messages
//! that guide users toward fixing common issues.

use thiserror::Error;

/// How an error is handled by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Recovered locally, never surfaced as fatal
    Transient,
    /// Surfaced once to the user, then the relay degrades to retrying
    Configuration,
    /// The relay terminates with a diagnostic
    Fatal,
}

/// Top-level error type for the relay
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("Instance lock error: {0}")]
    Instance(#[from] InstanceError),

    #[error("Status bus error: {0}")]
    Bus(#[from] BusError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Classify this error for the caller's handling policy
    pub fn severity(&self) -> Severity {
        match self {
            RelayError::Config(_) => Severity::Fatal,
            RelayError::Supervisor(e) => e.severity(),
            RelayError::Instance(e) => e.severity(),
            RelayError::Bus(_) => Severity::Fatal,
            RelayError::Io(_) => Severity::Fatal,
        }
    }
}

/// Errors related to the status subprocess
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("A status subprocess is already running under this supervisor")]
    AlreadyRunning,

    #[error("The supervisor has been shut down")]
    ShutDown,

    #[error("Daemon binary '{0}' not found in PATH. Install voxtype or set daemon.binary in relay.toml")]
    BinaryNotFound(String),

    #[error("Failed to spawn '{program}': {message}")]
    Spawn { program: String, message: String },

    #[error("Status subprocess has no stdout")]
    NoStdout,

    #[error("Failed to start supervisor thread: {0}")]
    Thread(String),
}

impl SupervisorError {
    pub fn severity(&self) -> Severity {
        match self {
            SupervisorError::BinaryNotFound(_) | SupervisorError::Spawn { .. } => {
                Severity::Configuration
            }
            SupervisorError::NoStdout => Severity::Transient,
            SupervisorError::AlreadyRunning
            | SupervisorError::ShutDown
            | SupervisorError::Thread(_) => Severity::Fatal,
        }
    }
}

/// Errors related to the single-instance registration
#[derive(Error, Debug)]
pub enum InstanceError {
    #[error("Instance registration unavailable at {path}: {message}")]
    Unavailable { path: String, message: String },

    #[error("Could not register instance lock after {0} attempts (another instance is starting?)")]
    Contended(u32),

    #[error("No running voxtype-relay instance found")]
    NotRunning,

    #[error("Running instance rejected the request: {0}")]
    Rejected(String),

    #[error("Invalid instance request: '{0}'")]
    BadRequest(String),
}

impl InstanceError {
    pub fn severity(&self) -> Severity {
        match self {
            InstanceError::Unavailable { .. } => Severity::Fatal,
            InstanceError::Contended(_) => Severity::Configuration,
            InstanceError::NotRunning
            | InstanceError::Rejected(_)
            | InstanceError::BadRequest(_) => Severity::Transient,
        }
    }
}

/// Errors related to consumer channel allocation
#[derive(Error, Debug)]
pub enum BusError {
    #[error("Consumer '{0}' requested a zero-capacity channel")]
    ZeroCapacity(String),

    #[error("Consumer '{0}' is already registered")]
    DuplicateConsumer(String),
}

/// Result type alias using RelayError
pub type Result<T> = std::result::Result<T, RelayError>;
