/*!
 * Configuration types for Sensus
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use sensus_core_resilience::{OverflowAction, RetentionPolicy, RetryPolicy};

use crate::anonymization::Anonymizer;
use crate::datum::DatumKind;
use crate::error::{Result, SensusError};

/// Schema version written by this build
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Top-level agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensusConfig {
    /// Configuration schema version
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Diagnostic output
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Protocol identity and reporting behavior
    pub protocol: ProtocolSettings,

    /// Local buffer (required)
    #[serde(default)]
    pub local_store: Option<LocalStoreConfig>,

    /// Remote sink (required)
    #[serde(default)]
    pub remote_store: Option<RemoteStoreConfig>,

    /// Health monitor timing
    #[serde(default)]
    pub health: HealthConfig,

    /// Configured probes, in start order
    #[serde(default)]
    pub probes: Vec<ProbeConfig>,

    /// Per-field anonymizer overrides
    #[serde(default)]
    pub anonymization: Vec<AnonymizationOverride>,
}

impl Default for SensusConfig {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            logging: LoggingConfig::default(),
            protocol: ProtocolSettings::default(),
            local_store: Some(LocalStoreConfig::default()),
            remote_store: Some(RemoteStoreConfig::default()),
            health: HealthConfig::default(),
            probes: Vec::new(),
            anonymization: Vec::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,
}

/// Protocol identity and reporting behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolSettings {
    /// Stable identifier (generated when absent)
    #[serde(default)]
    pub id: Option<String>,

    /// Human-readable study name
    #[serde(default = "default_protocol_name")]
    pub name: String,

    /// Stage health reports on the remote store even when the local store
    /// does not upload
    #[serde(default)]
    pub force_reports_to_remote: bool,

    /// Window over which participation is scored
    #[serde(default = "default_participation_horizon_days")]
    pub participation_horizon_days: u32,

    /// Root directory for per-protocol storage (defaults to the platform
    /// data directory)
    #[serde(default)]
    pub storage_root: Option<PathBuf>,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            id: None,
            name: default_protocol_name(),
            force_reports_to_remote: false,
            participation_horizon_days: default_participation_horizon_days(),
            storage_root: None,
        }
    }
}

impl ProtocolSettings {
    pub fn participation_horizon(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.participation_horizon_days))
    }
}

/// Overflow behavior of the local buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop the oldest buffered records
    #[default]
    EvictOldest,

    /// Refuse incoming records
    DropNewest,
}

impl From<OverflowPolicy> for OverflowAction {
    fn from(policy: OverflowPolicy) -> Self {
        match policy {
            OverflowPolicy::EvictOldest => OverflowAction::EvictOldest,
            OverflowPolicy::DropNewest => OverflowAction::DropNewest,
        }
    }
}

/// Local data store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalStoreConfig {
    /// Maximum buffered probe records
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// What happens once `capacity` is reached
    #[serde(default)]
    pub overflow: OverflowPolicy,

    /// Buffer fill fraction that triggers an early commit
    #[serde(default = "default_pressure_ratio")]
    pub pressure_ratio: f64,

    /// Records handed to the remote store per commit
    #[serde(default = "default_commit_batch_size")]
    pub commit_batch_size: usize,

    /// Seconds between background commits
    #[serde(default = "default_commit_interval_secs")]
    pub commit_interval_secs: u64,

    /// Forward buffered records to the remote store
    #[serde(default = "default_true")]
    pub upload_to_remote: bool,

    /// Anonymize records before they enter the buffer
    #[serde(default)]
    pub anonymize_locally: bool,

    /// Local-only mode: delete records older than this many hours
    #[serde(default)]
    pub local_retention_hours: Option<u64>,

    /// Seconds without a successful commit before the store counts as stuck
    #[serde(default = "default_stuck_after_secs")]
    pub stuck_after_secs: u64,

    /// Depth of the probe ingestion queue
    #[serde(default = "default_ingest_queue_capacity")]
    pub ingest_queue_capacity: usize,

    /// Max staged reports and rewards; the oldest are evicted beyond it
    #[serde(default = "default_non_probe_capacity")]
    pub non_probe_capacity: usize,

    /// Storage directory (defaults to `<storage_root>/<protocol id>`)
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            overflow: OverflowPolicy::default(),
            pressure_ratio: default_pressure_ratio(),
            commit_batch_size: default_commit_batch_size(),
            commit_interval_secs: default_commit_interval_secs(),
            upload_to_remote: true,
            anonymize_locally: false,
            local_retention_hours: None,
            stuck_after_secs: default_stuck_after_secs(),
            ingest_queue_capacity: default_ingest_queue_capacity(),
            non_probe_capacity: default_non_probe_capacity(),
            storage_dir: None,
        }
    }
}

impl LocalStoreConfig {
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_records: self.capacity,
            overflow: self.overflow.into(),
            pressure_ratio: self.pressure_ratio,
        }
    }

    pub fn commit_interval(&self) -> Duration {
        Duration::from_secs(self.commit_interval_secs)
    }

    pub fn stuck_after(&self) -> chrono::Duration {
        i64::try_from(self.stuck_after_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

/// Remote data store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStoreConfig {
    /// Retries after the first failed send within one commit
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Delay before the first retry in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound for a retry delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Exponential backoff factor
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Seconds with staged data and no successful commit before the store
    /// counts as stuck
    #[serde(default = "default_stuck_after_secs")]
    pub stuck_after_secs: u64,

    /// Upper bound in seconds for one commit, retries included
    #[serde(default = "default_commit_timeout_secs")]
    pub commit_timeout_secs: u64,
}

impl Default for RemoteStoreConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            stuck_after_secs: default_stuck_after_secs(),
            commit_timeout_secs: default_commit_timeout_secs(),
        }
    }
}

impl RemoteStoreConfig {
    pub fn commit_timeout(&self) -> Duration {
        Duration::from_secs(self.commit_timeout_secs.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            backoff_multiplier: self.backoff_multiplier,
        }
    }

    pub fn stuck_after(&self) -> chrono::Duration {
        i64::try_from(self.stuck_after_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

/// Health monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Seconds between scheduled health tests
    #[serde(default = "default_test_interval_secs")]
    pub test_interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            test_interval_secs: default_test_interval_secs(),
        }
    }
}

impl HealthConfig {
    pub fn test_interval(&self) -> Duration {
        Duration::from_secs(self.test_interval_secs)
    }
}

/// One configured probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Abstract probe-type identifier, e.g. `sensus.location`
    #[serde(rename = "type")]
    pub probe_type: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Override of the polling interval for polling probes
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,

    /// Override of the per-poll timeout for polling probes
    #[serde(default)]
    pub poll_timeout_ms: Option<u64>,
}

impl ProbeConfig {
    pub fn new(probe_type: impl Into<String>) -> Self {
        Self {
            probe_type: probe_type.into(),
            enabled: true,
            poll_interval_ms: None,
            poll_timeout_ms: None,
        }
    }
}

/// Override of the anonymizer assigned to one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnonymizationOverride {
    pub datum: DatumKind,
    pub field: String,

    /// Omitted means the field is sent unchanged
    #[serde(default)]
    pub anonymizer: Option<Anonymizer>,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_schema_version() -> u32 {
    CURRENT_SCHEMA_VERSION
}

fn default_protocol_name() -> String {
    "New Protocol".to_string()
}

fn default_participation_horizon_days() -> u32 {
    1
}

fn default_capacity() -> usize {
    10_000
}

fn default_pressure_ratio() -> f64 {
    0.8
}

fn default_commit_batch_size() -> usize {
    1000
}

fn default_commit_interval_secs() -> u64 {
    60
}

fn default_stuck_after_secs() -> u64 {
    60 * 60 // 1 hour
}

fn default_ingest_queue_capacity() -> usize {
    1024
}

fn default_non_probe_capacity() -> usize {
    1_000
}

fn default_commit_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> usize {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_test_interval_secs() -> u64 {
    5 * 60
}

impl SensusConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: SensusConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Local store section, or the fatal configuration error for its absence
    pub fn local_store(&self) -> Result<&LocalStoreConfig> {
        self.local_store
            .as_ref()
            .ok_or_else(|| SensusError::Config("No local data store defined.".to_string()))
    }

    /// Remote store section, or the fatal configuration error for its absence
    pub fn remote_store(&self) -> Result<&RemoteStoreConfig> {
        self.remote_store
            .as_ref()
            .ok_or_else(|| SensusError::Config("No remote data store defined.".to_string()))
    }

    /// Validate the configuration before any protocol is built
    pub fn validate(&self) -> Result<()> {
        if self.schema_version != CURRENT_SCHEMA_VERSION {
            return Err(SensusError::Config(format!(
                "Unsupported schema version {} (expected {})",
                self.schema_version, CURRENT_SCHEMA_VERSION
            )));
        }

        if self.protocol.name.trim().is_empty() {
            return Err(SensusError::Config("Protocol name must not be empty".to_string()));
        }

        if self.protocol.participation_horizon_days == 0 {
            return Err(SensusError::Config(
                "participation_horizon_days must be at least 1".to_string(),
            ));
        }

        let local = self.local_store()?;
        if local.capacity == 0 {
            return Err(SensusError::Config("local_store.capacity must be > 0".to_string()));
        }
        if !(local.pressure_ratio > 0.0 && local.pressure_ratio <= 1.0) {
            return Err(SensusError::Config(format!(
                "local_store.pressure_ratio must be in (0, 1], got {}",
                local.pressure_ratio
            )));
        }
        if local.commit_batch_size == 0 {
            return Err(SensusError::Config(
                "local_store.commit_batch_size must be > 0".to_string(),
            ));
        }
        if local.commit_interval_secs == 0 {
            return Err(SensusError::Config(
                "local_store.commit_interval_secs must be > 0".to_string(),
            ));
        }
        if local.ingest_queue_capacity == 0 {
            return Err(SensusError::Config(
                "local_store.ingest_queue_capacity must be > 0".to_string(),
            ));
        }
        if local.non_probe_capacity == 0 {
            return Err(SensusError::Config(
                "local_store.non_probe_capacity must be > 0".to_string(),
            ));
        }

        let remote = self.remote_store()?;
        if remote.backoff_multiplier < 1.0 {
            return Err(SensusError::Config(format!(
                "remote_store.backoff_multiplier must be >= 1.0, got {}",
                remote.backoff_multiplier
            )));
        }
        if remote.commit_timeout_secs == 0 {
            return Err(SensusError::Config(
                "remote_store.commit_timeout_secs must be > 0".to_string(),
            ));
        }
        if remote.initial_backoff_ms > remote.max_backoff_ms {
            return Err(SensusError::Config(
                "remote_store.initial_backoff_ms must not exceed max_backoff_ms".to_string(),
            ));
        }

        if self.health.test_interval_secs == 0 {
            return Err(SensusError::Config(
                "health.test_interval_secs must be > 0".to_string(),
            ));
        }

        for probe in &self.probes {
            if probe.probe_type.trim().is_empty() {
                return Err(SensusError::Config("Probe type must not be empty".to_string()));
            }
            if probe.poll_interval_ms == Some(0) {
                return Err(SensusError::Config(format!(
                    "Probe {} has a zero poll interval",
                    probe.probe_type
                )));
            }
        }

        Ok(())
    }
}
