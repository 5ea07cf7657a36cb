//! Service context shared by every protocol in the process
//!
//! Holds the collaborators the core talks to but does not own: the
//! notification/logging sink, the storage root, and the registry of
//! running protocols that feeds the application status line. It is created
//! once at process start and passed explicitly to each protocol.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use crate::config::LogLevel;

/// Fire-and-forget notification sink. Implementations must not block.
pub trait Notifier: Send + Sync {
    fn log(&self, message: &str, level: LogLevel, source: &str);

    /// Short transient message for the user
    fn flash(&self, message: &str);

    /// Persistent notification identified by `id`
    fn issue(&self, message: &str, id: &str);
}

/// Routes notifications through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn log(&self, message: &str, level: LogLevel, source: &str) {
        match level {
            LogLevel::Error => error!(source, "{}", message),
            LogLevel::Warn => warn!(source, "{}", message),
            LogLevel::Info => info!(source, "{}", message),
            LogLevel::Debug => debug!(source, "{}", message),
            LogLevel::Trace => trace!(source, "{}", message),
        }
    }

    fn flash(&self, message: &str) {
        info!(target: "sensus::flash", "{}", message);
    }

    fn issue(&self, message: &str, id: &str) {
        info!(target: "sensus::notification", id, "{}", message);
    }
}

/// Process-wide collaborators passed to each protocol
pub struct ServiceContext {
    notifier: Arc<dyn Notifier>,
    storage_root: PathBuf,
    running_protocols: Mutex<BTreeSet<String>>,
    status: watch::Sender<String>,
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("storage_root", &self.storage_root)
            .field("running_protocols", &self.running_protocol_ids())
            .finish()
    }
}

impl ServiceContext {
    pub fn new(notifier: Arc<dyn Notifier>, storage_root: impl Into<PathBuf>) -> Self {
        let (status, _) = watch::channel(status_text(0));
        Self {
            notifier,
            storage_root: storage_root.into(),
            running_protocols: Mutex::new(BTreeSet::new()),
            status,
        }
    }

    /// Tracing notifier, storage under the platform data directory
    pub fn with_defaults() -> Self {
        let root = dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("sensus");
        Self::new(Arc::new(TracingNotifier), root)
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    pub fn log(&self, message: &str, level: LogLevel, source: &str) {
        self.notifier.log(message, level, source);
    }

    pub fn flash(&self, message: &str) {
        self.notifier.flash(message);
    }

    pub fn issue(&self, message: &str, id: &str) {
        self.notifier.issue(message, id);
    }

    pub fn add_running_protocol(&self, id: &str) {
        self.running().insert(id.to_string());
    }

    pub fn remove_running_protocol(&self, id: &str) {
        self.running().remove(id);
    }

    pub fn running_protocol_ids(&self) -> Vec<String> {
        self.running().iter().cloned().collect()
    }

    pub fn running_protocol_count(&self) -> usize {
        self.running().len()
    }

    /// Recompute the status line and publish it to subscribers
    pub fn update_application_status(&self) -> String {
        let text = status_text(self.running_protocol_count());
        self.status.send_replace(text.clone());
        text
    }

    pub fn subscribe_status(&self) -> watch::Receiver<String> {
        self.status.subscribe()
    }

    fn running(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.running_protocols
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn status_text(running: usize) -> String {
    if running == 1 {
        "1 protocol is running".to_string()
    } else {
        format!("{} protocols are running", running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text() {
        assert_eq!(status_text(0), "0 protocols are running");
        assert_eq!(status_text(1), "1 protocol is running");
        assert_eq!(status_text(3), "3 protocols are running");
    }

    #[test]
    fn test_running_registry_and_status() {
        let ctx = ServiceContext::new(Arc::new(TracingNotifier), std::env::temp_dir());
        let status = ctx.subscribe_status();

        ctx.add_running_protocol("a");
        ctx.add_running_protocol("b");
        ctx.add_running_protocol("a");
        assert_eq!(ctx.running_protocol_count(), 2);

        assert_eq!(ctx.update_application_status(), "2 protocols are running");
        assert_eq!(*status.borrow(), "2 protocols are running");

        ctx.remove_running_protocol("a");
        ctx.update_application_status();
        assert_eq!(*status.borrow(), "1 protocol is running");
    }
}
