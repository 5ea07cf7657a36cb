/*!
 * Protocol orchestrator
 *
 * A protocol owns its probes, one local and one remote data store, and its
 * anonymization registry. Start, stop and health tests are serialized under
 * one lifecycle lock per protocol, so a protocol is either fully running
 * (both stores plus at least one probe) or stopped:
 *
 * ```text
 *   Stopped ──start──► Starting ──► Running ──stop──► Stopping ──► Stopped
 *                          │                                          ▲
 *                          └──► FailedToStart ──► Stopping ───────────┘
 * ```
 *
 * Stop order is probes, then the remote store, then the local store. Each
 * step is fault-tolerant: a failure is logged and the next step still runs.
 */

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::anonymization::AnonymizationRegistry;
use crate::config::{
    HealthConfig, LocalStoreConfig, LogLevel, ProtocolSettings, RemoteStoreConfig, SensusConfig,
};
use crate::context::ServiceContext;
use crate::datum::{Datum, DatumKind, DatumPayload, PROTOCOL_REPORT_SOURCE};
use crate::error::{Result, SensusError};
use crate::health::{HealthReport, HealthTrigger};
use crate::probe::{Probe, ProbeCatalog, ProbeSpec};
use crate::store::{LocalDataStore, RemoteDataStore, RemoteSink};

const STATE_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolState {
    Stopped,
    Starting,
    Running,
    Stopping,
    FailedToStart,
}

impl std::fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProtocolState::Stopped => "stopped",
            ProtocolState::Starting => "starting",
            ProtocolState::Running => "running",
            ProtocolState::Stopping => "stopping",
            ProtocolState::FailedToStart => "failed_to_start",
        };
        f.write_str(s)
    }
}

/// Broadcast on every lifecycle transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolStateChange {
    pub protocol_id: String,
    pub state: ProtocolState,
    pub at: DateTime<Utc>,
}

pub struct Protocol {
    id: String,
    name: String,
    settings: ProtocolSettings,
    health_interval: Duration,
    ctx: Arc<ServiceContext>,
    anonymization: Arc<AnonymizationRegistry>,
    local: Arc<LocalDataStore>,
    remote: Arc<RemoteDataStore>,
    probes: Vec<Arc<Probe>>,
    lifecycle: tokio::sync::Mutex<()>,
    state: Mutex<ProtocolState>,
    events: broadcast::Sender<ProtocolStateChange>,
    most_recent_report: Mutex<Option<Datum>>,
}

impl std::fmt::Debug for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Protocol")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("probes", &self.probes.len())
            .finish()
    }
}

impl Protocol {
    /// Build a protocol with no probes; add them with [`add_probe`](Self::add_probe)
    pub fn new(
        settings: ProtocolSettings,
        local_config: LocalStoreConfig,
        remote_config: RemoteStoreConfig,
        health: &HealthConfig,
        sink: Arc<dyn RemoteSink>,
        ctx: Arc<ServiceContext>,
    ) -> Self {
        let id = settings
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let name = settings.name.clone();

        let storage_dir: PathBuf = match &local_config.storage_dir {
            Some(dir) => dir.clone(),
            None => settings
                .storage_root
                .clone()
                .unwrap_or_else(|| ctx.storage_root().to_path_buf())
                .join(&id),
        };

        let anonymization = Arc::new(AnonymizationRegistry::new());
        anonymization.register_kind(DatumKind::ProtocolReport);
        anonymization.register_kind(DatumKind::ParticipationReward);

        let remote = Arc::new(RemoteDataStore::new(
            remote_config,
            sink,
            Arc::clone(&anonymization),
        ));
        let local = Arc::new(LocalDataStore::new(
            name.clone(),
            local_config,
            storage_dir,
            Arc::clone(&remote),
            Arc::clone(&anonymization),
        ));

        let (events, _) = broadcast::channel(STATE_EVENT_CAPACITY);

        Self {
            id,
            name,
            settings,
            health_interval: health.test_interval(),
            ctx,
            anonymization,
            local,
            remote,
            probes: Vec::new(),
            lifecycle: tokio::sync::Mutex::new(()),
            state: Mutex::new(ProtocolState::Stopped),
            events,
            most_recent_report: Mutex::new(None),
        }
    }

    /// Build a protocol from configuration, resolving probe types against `catalog`.
    ///
    /// Unknown probe types are skipped with a warning. Capabilities in the
    /// catalog that the configuration does not mention are added with their
    /// default enabled flag.
    pub fn from_config(
        config: &SensusConfig,
        catalog: &ProbeCatalog,
        sink: Arc<dyn RemoteSink>,
        ctx: Arc<ServiceContext>,
    ) -> Result<Self> {
        config.validate()?;

        let mut protocol = Self::new(
            config.protocol.clone(),
            config.local_store()?.clone(),
            config.remote_store()?.clone(),
            &config.health,
            sink,
            ctx,
        );

        let mut configured = HashSet::new();
        for probe_config in &config.probes {
            if !configured.insert(probe_config.probe_type.as_str()) {
                warn!(probe = %probe_config.probe_type, "Duplicate probe entry ignored");
                continue;
            }

            match catalog.resolve(probe_config) {
                Some(spec) => {
                    protocol.add_probe(spec);
                }
                None => warn!(
                    protocol = %protocol.name,
                    probe = %probe_config.probe_type,
                    "Probe type is not available here; ignored"
                ),
            }
        }

        for descriptor in catalog.descriptors() {
            if !configured.contains(descriptor.probe_type.as_str()) {
                info!(
                    protocol = %protocol.name,
                    probe = %descriptor.probe_type,
                    enabled = descriptor.default_enabled,
                    "Adding missing probe"
                );
                protocol.add_probe(descriptor.default_spec());
            }
        }

        for entry in &config.anonymization {
            protocol
                .anonymization
                .set_anonymizer(entry.datum, &entry.field, entry.anonymizer)?;
        }

        Ok(protocol)
    }

    /// Add a probe feeding this protocol's local store
    pub fn add_probe(&mut self, spec: ProbeSpec) -> Arc<Probe> {
        self.anonymization.register_kind(spec.datum_kind);
        let probe = Arc::new(Probe::new(spec, self.local.ingest_sender()));
        self.probes.push(Arc::clone(&probe));
        probe
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &ProtocolSettings {
        &self.settings
    }

    pub fn probes(&self) -> &[Arc<Probe>] {
        &self.probes
    }

    pub fn probe(&self, probe_type: &str) -> Option<&Arc<Probe>> {
        self.probes.iter().find(|p| p.probe_type() == probe_type)
    }

    pub fn local_store(&self) -> &Arc<LocalDataStore> {
        &self.local
    }

    pub fn remote_store(&self) -> &Arc<RemoteDataStore> {
        &self.remote
    }

    pub fn anonymization(&self) -> &Arc<AnonymizationRegistry> {
        &self.anonymization
    }

    pub fn health_interval(&self) -> Duration {
        self.health_interval
    }

    pub fn state(&self) -> ProtocolState {
        *lock(&self.state)
    }

    /// True from the moment a start begins until a stop begins
    pub fn is_running(&self) -> bool {
        matches!(self.state(), ProtocolState::Starting | ProtocolState::Running)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProtocolStateChange> {
        self.events.subscribe()
    }

    pub fn most_recent_report(&self) -> Option<Datum> {
        lock(&self.most_recent_report).clone()
    }

    fn set_state(&self, state: ProtocolState) {
        *lock(&self.state) = state;
        debug!(protocol = %self.name, %state, "Protocol state changed");
        // No subscribers is fine
        let _ = self.events.send(ProtocolStateChange {
            protocol_id: self.id.clone(),
            state,
            at: Utc::now(),
        });
    }

    /// Start stores and enabled probes. No-op when already running.
    ///
    /// On failure everything started so far is stopped again and the
    /// protocol ends up `Stopped`.
    pub async fn start(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        self.start_locked().await
    }

    /// Stop probes and stores. No-op when already stopped.
    pub async fn stop(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        if self.stop_locked().await {
            self.ctx.flash(&format!("Stopped \"{}\".", self.name));
        }
        Ok(())
    }

    /// App-lifecycle shutdown path
    pub async fn shutdown(&self) {
        info!(protocol = %self.name, "Shutting down protocol");
        let _guard = self.lifecycle.lock().await;
        self.stop_locked().await;
    }

    async fn start_locked(&self) -> Result<()> {
        if self.is_running() {
            debug!(protocol = %self.name, "Protocol already running");
            return Ok(());
        }

        self.set_state(ProtocolState::Starting);
        self.ctx.add_running_protocol(&self.id);
        self.ctx.update_application_status();
        info!(protocol = %self.name, probes = self.probes.len(), "🚀 Starting protocol");

        match self.start_components().await {
            Ok(started) => {
                self.set_state(ProtocolState::Running);
                self.ctx.flash(&format!("Started \"{}\".", self.name));
                info!(protocol = %self.name, probes = started, "✅ Protocol running");
                Ok(())
            }
            Err(e) => {
                let message = format!("Error starting protocol \"{}\": {}", self.name, e);
                error!(protocol = %self.name, error = %e, category = %e.category(), "Protocol failed to start");
                self.ctx.log(&message, LogLevel::Error, "Protocol");
                self.ctx.flash(&message);

                self.set_state(ProtocolState::FailedToStart);
                self.stop_locked().await;
                Err(e)
            }
        }
    }

    /// Returns the number of probes started
    async fn start_components(&self) -> Result<usize> {
        self.local
            .start()
            .await
            .map_err(|e| SensusError::LocalStoreStart(e.to_string()))?;

        self.remote
            .start()
            .await
            .map_err(|e| SensusError::RemoteStoreStart(e.to_string()))?;

        let mut enabled = 0;
        let mut started = 0;

        for probe in &self.probes {
            if !probe.is_enabled() {
                continue;
            }
            enabled += 1;

            match probe.start().await {
                Ok(()) => started += 1,
                Err(e) => {
                    if let Err(stop_err) = probe.stop().await {
                        warn!(probe = probe.probe_type(), error = %stop_err, "Failed to stop probe after failed start");
                    }

                    let message = format!("Failed to start probe \"{}\": {}", probe.display_name(), e);
                    warn!(protocol = %self.name, probe = probe.probe_type(), error = %e, "Probe failed to start");
                    self.ctx.log(&message, LogLevel::Warn, "Protocol");
                    self.ctx.flash(&message);

                    if e.is_unsupported() {
                        probe.set_enabled(false);
                        info!(probe = probe.probe_type(), "Disabled unsupported probe");
                        self.ctx.issue(
                            &format!(
                                "\"{}\" is not supported on this device and has been disabled.",
                                probe.display_name()
                            ),
                            probe.probe_type(),
                        );
                    }
                }
            }
        }

        if enabled == 0 {
            return Err(SensusError::NoProbesEnabled);
        }
        if started == 0 {
            return Err(SensusError::NoProbesStarted);
        }
        Ok(started)
    }

    /// Returns false when there was nothing to stop
    async fn stop_locked(&self) -> bool {
        if self.state() == ProtocolState::Stopped {
            debug!(protocol = %self.name, "Protocol already stopped");
            return false;
        }

        self.set_state(ProtocolState::Stopping);
        info!(protocol = %self.name, "🛑 Stopping protocol");

        for probe in &self.probes {
            if !probe.is_running() {
                continue;
            }
            if let Err(e) = probe.stop().await {
                warn!(protocol = %self.name, probe = probe.probe_type(), error = %e, "Failed to stop probe");
                self.ctx.log(
                    &format!("Failed to stop probe \"{}\": {}", probe.display_name(), e),
                    LogLevel::Warn,
                    "Protocol",
                );
            }
        }

        if let Err(e) = self.remote.stop().await {
            warn!(protocol = %self.name, error = %e, "Failed to stop remote data store");
            self.ctx.log(
                &format!("Failed to stop remote data store: {}", e),
                LogLevel::Warn,
                "Protocol",
            );
        }

        if let Err(e) = self.local.stop().await {
            warn!(protocol = %self.name, error = %e, "Failed to stop local data store");
            self.ctx.log(
                &format!("Failed to stop local data store: {}", e),
                LogLevel::Warn,
                "Protocol",
            );
        }

        self.set_state(ProtocolState::Stopped);
        self.ctx.remove_running_protocol(&self.id);
        self.ctx.update_application_status();
        info!(protocol = %self.name, "Protocol stopped");
        true
    }

    /// Test every component, restart what is unhealthy, and persist the report.
    ///
    /// A stopped protocol gets exactly one start attempt per call.
    pub async fn test_health(&self, trigger: HealthTrigger) -> Datum {
        let _guard = self.lifecycle.lock().await;
        let now = Utc::now();
        let mut report = HealthReport::new();

        info!(protocol = %self.name, ?trigger, "Running health test");

        if !self.is_running() {
            let mut line = format!("Restarting protocol \"{}\"...", self.name);
            match self.start_locked().await {
                Ok(()) => line.push_str("restarted protocol."),
                Err(e) => {
                    line.push_str("failed to restart protocol.");
                    report.add_error(format!("Error restarting protocol \"{}\": {}", self.name, e));
                }
            }
            report.add_error(line);
        }

        if self.is_running() {
            if self.local.test_health(&mut report).await {
                let outcome = match self.local.restart().await {
                    Ok(()) => "restarted local data store.".to_string(),
                    Err(e) => format!("failed to restart local data store: {}", e),
                };
                report.add_error(format!("Restarting local data store...{}", outcome));
            }

            if self.remote.test_health(&mut report).await {
                let outcome = match self.remote.restart().await {
                    Ok(()) => "restarted remote data store.".to_string(),
                    Err(e) => format!("failed to restart remote data store: {}", e),
                };
                report.add_error(format!("Restarting remote data store...{}", outcome));
            }

            self.flush(&mut report).await;

            let horizon = self.settings.participation_horizon();
            for probe in self.probes.iter().filter(|p| p.is_enabled()) {
                if probe.test_health(&mut report).await {
                    let outcome = match probe.restart().await {
                        Ok(()) => "restarted probe.".to_string(),
                        Err(e) => format!("failed to restart probe: {}", e),
                    };
                    report.add_error(format!(
                        "Restarting probe \"{}\"...{}",
                        probe.display_name(),
                        outcome
                    ));
                } else if trigger == HealthTrigger::Scheduled {
                    probe.record_health_success(now, horizon);
                }
            }

            report.add_misc(format!("Participation: {:.2}", self.participation_at(now)));
        }

        let datum = report.into_datum(now);
        self.local.add_non_probe_datum(datum.clone());
        if !self.local.uploads_to_remote() && self.settings.force_reports_to_remote {
            self.remote.add_non_probe_datum(datum.clone());
        }
        *lock(&self.most_recent_report) = Some(datum.clone());

        let status = self.ctx.update_application_status();
        debug!(protocol = %self.name, %status, "Health test finished");
        datum
    }

    /// One commit cycle per health test, bounded by the remote commit
    /// timeout; failures and timeouts become warnings
    async fn flush(&self, report: &mut HealthReport) {
        let cancel = CancellationToken::new();
        let limit = self.remote.commit_timeout();

        match tokio::time::timeout(limit, self.flush_once(&cancel)).await {
            Ok(Ok(Some(committed))) if committed > 0 => report.add_misc(format!(
                "Committed {} record(s) to the remote data store.",
                committed
            )),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => report.add_warning(format!(
                "Failed to commit to the remote data store: {}",
                e
            )),
            Err(_) => {
                cancel.cancel();
                warn!(protocol = %self.name, timeout_secs = limit.as_secs(), "Health-test commit timed out");
                report.add_warning(format!(
                    "Commit to the remote data store timed out after {} s.",
                    limit.as_secs()
                ));
            }
        }
    }

    /// Returns the number of committed local records, if the local store uploads
    async fn flush_once(&self, cancel: &CancellationToken) -> Result<Option<usize>> {
        if self.local.uploads_to_remote() {
            let summary = self.local.commit_to_remote(cancel).await?;
            Ok(Some(summary.committed))
        } else {
            if self.remote.has_non_probe_data() {
                self.remote.commit(Vec::new(), cancel).await?;
            }
            Ok(None)
        }
    }

    /// Mean participation of enabled probes; 1.0 with none enabled
    pub fn participation(&self) -> f32 {
        self.participation_at(Utc::now())
    }

    pub fn participation_at(&self, now: DateTime<Utc>) -> f32 {
        let horizon = self.settings.participation_horizon();
        let scores: Vec<f32> = self
            .probes
            .iter()
            .filter_map(|p| p.participation(horizon, self.health_interval, now))
            .collect();

        if scores.is_empty() {
            1.0
        } else {
            scores.iter().sum::<f32>() / scores.len() as f32
        }
    }

    /// Stage a participation reward for the next commit.
    ///
    /// Delivery is confirmed once the remote store reports no staged data.
    pub fn submit_participation_reward(&self) -> Datum {
        let datum = Datum::new(
            PROTOCOL_REPORT_SOURCE,
            DatumPayload::ParticipationReward {
                participation: self.participation(),
            },
        );
        self.remote.add_non_probe_datum(datum.clone());
        datum
    }

    /// Re-roll the random time anchor used by timeline anonymization
    pub fn reset_random_time_anchor(&self) -> DateTime<Utc> {
        self.anonymization.reset_time_anchor()
    }

    /// Forget everything that should not travel with a shared copy.
    ///
    /// Only allowed while stopped.
    pub async fn reset_for_sharing(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        if self.state() != ProtocolState::Stopped {
            return Err(SensusError::Other(format!(
                "Protocol \"{}\" must be stopped before it can be reset",
                self.name
            )));
        }

        for probe in &self.probes {
            probe.reset_for_sharing();
        }
        *lock(&self.most_recent_report) = None;
        self.anonymization.reset_time_anchor();
        self.local.clear_for_sharing();
        self.remote.clear_for_sharing();
        info!(protocol = %self.name, "Protocol reset for sharing");
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{PollSchedule, ProbeMode};
    use crate::testing::{MemoryNotifier, MemorySink, ScriptedListeningSource};

    fn protocol(dir: &tempfile::TempDir) -> (Protocol, Arc<MemoryNotifier>) {
        let notifier = Arc::new(MemoryNotifier::new());
        let ctx = Arc::new(ServiceContext::new(notifier.clone(), dir.path()));
        let protocol = Protocol::new(
            ProtocolSettings {
                name: "Unit".to_string(),
                ..Default::default()
            },
            LocalStoreConfig::default(),
            RemoteStoreConfig::default(),
            &HealthConfig::default(),
            Arc::new(MemorySink::new()),
            ctx,
        );
        (protocol, notifier)
    }

    fn listening(probe_type: &str, source: Arc<ScriptedListeningSource>, enabled: bool) -> ProbeSpec {
        ProbeSpec {
            probe_type: probe_type.to_string(),
            display_name: probe_type.to_string(),
            datum_kind: DatumKind::Light,
            enabled,
            mode: ProbeMode::Listening(source),
        }
    }

    #[tokio::test]
    async fn test_storage_dir_defaults_under_context_root() {
        let dir = tempfile::tempdir().unwrap();
        let (protocol, _) = protocol(&dir);
        assert_eq!(
            protocol.local_store().storage_dir(),
            dir.path().join(protocol.id())
        );
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let dir = tempfile::tempdir().unwrap();
        let (mut protocol, notifier) = protocol(&dir);
        protocol.add_probe(listening("a", Arc::new(ScriptedListeningSource::new()), true));

        protocol.start().await.unwrap();
        assert_eq!(protocol.state(), ProtocolState::Running);
        assert!(protocol.local_store().is_running());
        assert!(protocol.remote_store().is_running());
        assert!(notifier.flashes().iter().any(|m| m == "Started \"Unit\"."));

        protocol.stop().await.unwrap();
        assert_eq!(protocol.state(), ProtocolState::Stopped);
        assert!(!protocol.local_store().is_running());
        assert!(!protocol.remote_store().is_running());
    }

    #[tokio::test]
    async fn test_unsupported_probe_is_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let (mut protocol, notifier) = protocol(&dir);
        protocol.add_probe(listening("ok", Arc::new(ScriptedListeningSource::new()), true));
        let unsupported = protocol.add_probe(listening(
            "missing",
            Arc::new(ScriptedListeningSource::unsupported("no sensor")),
            true,
        ));

        protocol.start().await.unwrap();
        assert!(!unsupported.is_enabled());
        assert!(unsupported.originally_enabled());
        assert_eq!(
            notifier.issues(),
            vec![(
                "missing".to_string(),
                "\"missing\" is not supported on this device and has been disabled.".to_string()
            )]
        );
        protocol.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_probe_stays_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let (mut protocol, _) = protocol(&dir);
        protocol.add_probe(listening("ok", Arc::new(ScriptedListeningSource::new()), true));
        let flaky = protocol.add_probe(listening(
            "flaky",
            Arc::new(ScriptedListeningSource::failing("busy")),
            true,
        ));

        protocol.start().await.unwrap();
        assert!(flaky.is_enabled());
        assert!(!flaky.is_running());
        protocol.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_participation_mean_of_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let (mut protocol, _) = protocol(&dir);
        assert_eq!(protocol.participation(), 1.0);

        let probe = protocol.add_probe(listening("a", Arc::new(ScriptedListeningSource::new()), true));
        protocol.add_probe(listening("b", Arc::new(ScriptedListeningSource::new()), false));
        assert_eq!(protocol.participation(), 0.0);

        let now = Utc::now();
        let horizon = protocol.settings().participation_horizon();
        for i in 0..144 {
            probe.record_health_success(now - chrono::Duration::minutes(i * 5), horizon);
        }
        // 144 of 288 expected five-minute tests in one day
        assert_eq!(protocol.participation_at(now), 0.5);
    }

    #[tokio::test]
    async fn test_reset_for_sharing_requires_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let (mut protocol, _) = protocol(&dir);
        protocol.add_probe(listening("a", Arc::new(ScriptedListeningSource::new()), true));

        protocol.start().await.unwrap();
        assert!(protocol.reset_for_sharing().await.is_err());

        protocol.stop().await.unwrap();
        let anchor = protocol.anonymization().time_anchor();
        protocol.reset_for_sharing().await.unwrap();
        assert!(protocol.most_recent_report().is_none());
        assert_ne!(protocol.anonymization().time_anchor(), anchor);
    }

    #[tokio::test]
    async fn test_reward_staged_on_remote() {
        let dir = tempfile::tempdir().unwrap();
        let (protocol, _) = protocol(&dir);
        let reward = protocol.submit_participation_reward();

        assert_eq!(reward.kind(), DatumKind::ParticipationReward);
        assert!(protocol.remote_store().has_non_probe_data());
    }

    #[tokio::test]
    async fn test_polling_schedule_survives_add_probe() {
        let dir = tempfile::tempdir().unwrap();
        let (mut protocol, _) = protocol(&dir);
        let schedule = PollSchedule {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(1),
        };
        let probe = protocol.add_probe(ProbeSpec {
            probe_type: "poll".to_string(),
            display_name: "Poll".to_string(),
            datum_kind: DatumKind::Light,
            enabled: true,
            mode: ProbeMode::Polling {
                source: Arc::new(crate::testing::ScriptedPollingSource::new()),
                schedule,
            },
        });

        assert_eq!(probe.mode().schedule(), Some(schedule));
        assert!(protocol.anonymization().is_registered(DatumKind::Light));
    }
}
