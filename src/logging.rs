/*!
 * Logging and tracing initialization
 *
 * The agent is long-running, so a configured log file is appended to rather
 * than truncated on every start. Without a log file, compact lines go to
 * stdout. Both the agent and its resilience crate log at the same level:
 *
 * ```text
 *   RUST_LOG set?  ──yes──► use it verbatim
 *        │no
 *        ▼
 *   sensus=<level>,sensus_core_resilience=<level>
 * ```
 */

use std::fs::{File, OpenOptions};
use std::path::Path;

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Result, SensusError};

/// Crates whose events pass the default filter
const LOG_TARGETS: &[&str] = &["sensus", "sensus_core_resilience"];

/// Install the global subscriber described by `config`
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directive(config)))
        .map_err(|e| SensusError::Config(format!("Failed to create log filter: {}", e)))?;

    let json_layer = match config.log_file.as_deref() {
        Some(path) => Some(
            fmt::layer()
                .with_writer(open_log_file(path)?)
                .with_ansi(false)
                .with_target(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .json(),
        ),
        None => None,
    };
    let stdout_layer = json_layer
        .is_none()
        .then(|| fmt::layer().with_target(true).compact());

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(json_layer)
        .try_init()
        .map_err(|e| SensusError::Config(format!("Failed to install logger: {}", e)))
}

fn effective_level(config: &LoggingConfig) -> Level {
    if config.verbose {
        Level::DEBUG
    } else {
        config.log_level.to_tracing_level()
    }
}

fn filter_directive(config: &LoggingConfig) -> String {
    let level = effective_level(config);
    LOG_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",")
}

fn open_log_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            SensusError::Config(format!("Failed to open log file {}: {}", path.display(), e))
        })
}
