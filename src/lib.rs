/*!
 * Sensus - sensor-data collection agent
 *
 * Runs a configurable set of probes, buffers their records locally,
 * anonymizes sensitive fields and forwards them to a remote store, while
 * continuously testing its own health and restarting failed components:
 * - Protocol lifecycle with all-or-nothing start and fault-tolerant stop
 * - Listening, polling and active-passive probes behind async capability traits
 * - Bounded local buffer with eviction accounting and pressure-triggered commits
 * - Remote commit with retry, cancellation and per-record acknowledgement
 * - Field-level anonymization registry applied to copies, never originals
 * - Health monitor with self-healing and participation scoring
 */

pub mod anonymization;
pub mod config;
pub mod context;
pub mod datum;
pub mod error;
pub mod health;
pub mod logging;
pub mod probe;
pub mod protocol;
pub mod store;
pub mod testing;

// Re-export commonly used types
pub use anonymization::{AnonymizationRegistry, Anonymizer};
pub use config::SensusConfig;
pub use context::{Notifier, ServiceContext, TracingNotifier};
pub use datum::{Datum, DatumKind, DatumPayload};
pub use error::{Result, SensusError};
pub use health::{HealthMonitor, HealthReport, HealthTrigger};
pub use probe::{Probe, ProbeCatalog, ProbeState};
pub use protocol::{Protocol, ProtocolState, ProtocolStateChange};
pub use store::{ConsoleSink, LocalDataStore, RemoteDataStore, RemoteSink};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
