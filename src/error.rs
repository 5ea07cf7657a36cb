/*!
 * Error types for Sensus
 */

use std::io;
use std::time::Duration;

use sensus_core_resilience::ResilienceError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SensusError>;

#[derive(Debug, Error)]
pub enum SensusError {
    /// Local data store could not be started
    #[error("Local data store failed to start: {0}")]
    LocalStoreStart(String),

    /// Remote data store could not be started
    #[error("Remote data store failed to start: {0}")]
    RemoteStoreStart(String),

    /// Protocol start found no enabled probe
    #[error("No probes were enabled.")]
    NoProbesEnabled,

    /// Every enabled probe failed to start
    #[error("No probes started.")]
    NoProbesStarted,

    /// A probe failed to start
    #[error("Failed to start probe \"{probe}\": {reason}")]
    ProbeStart { probe: String, reason: String },

    /// The probe cannot run on this platform (or the user declined it)
    #[error("Probe not supported on this device: {0}")]
    ProbeUnsupported(String),

    /// Reading a polling probe failed
    #[error("Failed to poll probe \"{probe}\": {reason}")]
    Poll { probe: String, reason: String },

    /// Reading a polling probe took longer than its bound
    #[error("Timed out after {timeout:?} polling probe \"{probe}\"")]
    PollTimeout { probe: String, timeout: Duration },

    /// A store or probe was used while not running
    #[error("{0} is not running")]
    NotRunning(String),

    /// Probe ingestion queue is full
    #[error("Ingestion queue full, dropped record from \"{0}\"")]
    IngestFull(String),

    /// Remote commit failed, data retained for retry
    #[error("Commit failed: {0}")]
    CommitFailed(String),

    /// Remote sink permanently rejected the batch
    #[error("Commit rejected: {0}")]
    CommitRejected(String),

    /// Operation was cancelled cooperatively
    #[error("Operation cancelled")]
    Cancelled,

    /// Anonymization could not be applied or configured
    #[error("Anonymization error: {0}")]
    Anonymization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl SensusError {
    /// Whether this failure means the probe can never run here
    pub fn is_unsupported(&self) -> bool {
        matches!(self, SensusError::ProbeUnsupported(_))
    }

    /// Check if this error is transient (temporary, worth retrying)
    pub fn is_transient(&self) -> bool {
        match self {
            SensusError::Io(io_err) => Self::is_io_transient(io_err),
            SensusError::CommitFailed(_) => true,
            SensusError::PollTimeout { .. } => true,
            SensusError::IngestFull(_) => true,

            // Not transient
            _ => false,
        }
    }

    /// Check if an I/O error is transient
    fn is_io_transient(io_err: &io::Error) -> bool {
        use io::ErrorKind::*;
        matches!(
            io_err.kind(),
            ConnectionRefused
                | ConnectionReset
                | ConnectionAborted
                | NotConnected
                | BrokenPipe
                | TimedOut
                | Interrupted
                | WouldBlock
        )
    }

    /// Get error category for logging and reporting
    pub fn category(&self) -> ErrorCategory {
        match self {
            SensusError::LocalStoreStart(_)
            | SensusError::RemoteStoreStart(_)
            | SensusError::NoProbesEnabled
            | SensusError::NoProbesStarted
            | SensusError::NotRunning(_) => ErrorCategory::Lifecycle,
            SensusError::ProbeStart { .. }
            | SensusError::ProbeUnsupported(_)
            | SensusError::Poll { .. }
            | SensusError::PollTimeout { .. } => ErrorCategory::Probe,
            SensusError::IngestFull(_) => ErrorCategory::Storage,
            SensusError::CommitFailed(_) | SensusError::CommitRejected(_) => {
                ErrorCategory::Network
            }
            SensusError::Cancelled => ErrorCategory::Cancelled,
            SensusError::Anonymization(_) => ErrorCategory::Privacy,
            SensusError::Config(_) => ErrorCategory::Configuration,
            SensusError::Io(_) => ErrorCategory::IoError,
            SensusError::Serialization(_) => ErrorCategory::Codec,
            SensusError::Other(_) => ErrorCategory::Unknown,
        }
    }
}

impl From<ResilienceError> for SensusError {
    fn from(err: ResilienceError) -> Self {
        match err {
            ResilienceError::Transient(msg) => SensusError::CommitFailed(msg),
            ResilienceError::Timeout(after) => {
                SensusError::CommitFailed(format!("timed out after {:?}", after))
            }
            ResilienceError::Permanent(msg) => SensusError::CommitRejected(msg),
            ResilienceError::Cancelled => SensusError::Cancelled,
            ResilienceError::BufferFull(name) => SensusError::IngestFull(name),
        }
    }
}

impl From<toml::de::Error> for SensusError {
    fn from(err: toml::de::Error) -> Self {
        SensusError::Config(format!("Invalid configuration: {}", err))
    }
}

impl From<toml::ser::Error> for SensusError {
    fn from(err: toml::ser::Error) -> Self {
        SensusError::Config(format!("Failed to serialize configuration: {}", err))
    }
}

/// Error categories for logging and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Lifecycle,
    Probe,
    Storage,
    Network,
    Cancelled,
    Privacy,
    Configuration,
    IoError,
    Codec,
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCategory::Lifecycle => "lifecycle",
            ErrorCategory::Probe => "probe",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Network => "network",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::Privacy => "privacy",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::IoError => "io",
            ErrorCategory::Codec => "codec",
            ErrorCategory::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_failure_messages() {
        assert_eq!(
            SensusError::NoProbesEnabled.to_string(),
            "No probes were enabled."
        );
        assert_eq!(SensusError::NoProbesStarted.to_string(), "No probes started.");
        assert!(SensusError::LocalStoreStart("disk".to_string())
            .to_string()
            .starts_with("Local data store failed to start"));
        assert!(SensusError::RemoteStoreStart("auth".to_string())
            .to_string()
            .starts_with("Remote data store failed to start"));
    }

    #[test]
    fn test_unsupported_classification() {
        assert!(SensusError::ProbeUnsupported("gps".to_string()).is_unsupported());
        assert!(!SensusError::ProbeStart {
            probe: "gps".to_string(),
            reason: "busy".to_string()
        }
        .is_unsupported());
    }

    #[test]
    fn test_transient_classification() {
        assert!(SensusError::CommitFailed("offline".to_string()).is_transient());
        assert!(!SensusError::CommitRejected("bad batch".to_string()).is_transient());
        assert!(SensusError::Io(io::Error::new(io::ErrorKind::TimedOut, "slow")).is_transient());
        assert!(!SensusError::Io(io::Error::new(io::ErrorKind::NotFound, "gone")).is_transient());
    }

    #[test]
    fn test_resilience_conversion() {
        let err: SensusError = ResilienceError::Cancelled.into();
        assert!(matches!(err, SensusError::Cancelled));

        let err: SensusError = ResilienceError::Transient("down".to_string()).into();
        assert!(matches!(err, SensusError::CommitFailed(_)));
        assert_eq!(err.category(), ErrorCategory::Network);

        let err: SensusError = ResilienceError::Permanent("nope".to_string()).into();
        assert!(matches!(err, SensusError::CommitRejected(_)));
    }
}
