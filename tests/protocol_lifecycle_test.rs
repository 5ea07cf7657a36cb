/*!
 * Integration tests for the protocol lifecycle
 *
 * Start is all-or-nothing, stop is idempotent and fault-tolerant, and every
 * transition is observable on the state broadcast.
 */

use std::sync::Arc;

use sensus::config::{
    AnonymizationOverride, HealthConfig, LocalStoreConfig, ProbeConfig, ProtocolSettings,
    RemoteStoreConfig, SensusConfig,
};
use sensus::context::ServiceContext;
use sensus::datum::DatumKind;
use sensus::probe::{ProbeCatalog, ProbeDescriptor, ProbeMode, ProbeSpec, ProbeState};
use sensus::protocol::{Protocol, ProtocolState, ProtocolStateChange};
use sensus::testing::{MemoryNotifier, MemorySink, ScriptedListeningSource};
use sensus::{Anonymizer, SensusError};
use tempfile::TempDir;
use tokio::sync::broadcast;

struct Harness {
    protocol: Protocol,
    notifier: Arc<MemoryNotifier>,
    ctx: Arc<ServiceContext>,
    sink: Arc<MemorySink>,
    _dir: TempDir,
}

fn harness_with(local: LocalStoreConfig) -> Harness {
    let dir = TempDir::new().unwrap();
    let notifier = Arc::new(MemoryNotifier::new());
    let ctx = Arc::new(ServiceContext::new(notifier.clone(), dir.path()));
    let sink = Arc::new(MemorySink::new());
    let protocol = Protocol::new(
        ProtocolSettings {
            name: "Lifecycle".to_string(),
            ..Default::default()
        },
        local,
        RemoteStoreConfig::default(),
        &HealthConfig::default(),
        sink.clone(),
        ctx.clone(),
    );
    Harness {
        protocol,
        notifier,
        ctx,
        sink,
        _dir: dir,
    }
}

fn harness() -> Harness {
    harness_with(LocalStoreConfig::default())
}

fn listening(name: &str, source: Arc<ScriptedListeningSource>, enabled: bool) -> ProbeSpec {
    ProbeSpec {
        probe_type: format!("test.{}", name),
        display_name: name.to_string(),
        datum_kind: DatumKind::Light,
        enabled,
        mode: ProbeMode::Listening(source),
    }
}

fn drain(rx: &mut broadcast::Receiver<ProtocolStateChange>) -> Vec<ProtocolState> {
    let mut states = Vec::new();
    while let Ok(change) = rx.try_recv() {
        states.push(change.state);
    }
    states
}

#[tokio::test]
async fn test_zero_enabled_probes_fails_start() {
    let mut h = harness();
    h.protocol
        .add_probe(listening("off", Arc::new(ScriptedListeningSource::new()), false));

    let err = h.protocol.start().await.unwrap_err();

    assert!(matches!(err, SensusError::NoProbesEnabled));
    assert_eq!(err.to_string(), "No probes were enabled.");
    assert!(!h.protocol.is_running());
    assert_eq!(h.protocol.state(), ProtocolState::Stopped);
    assert!(!h.protocol.local_store().is_running());
    assert!(!h.protocol.remote_store().is_running());
}

#[tokio::test]
async fn test_no_probes_at_all_fails_start() {
    let h = harness();
    assert!(matches!(
        h.protocol.start().await,
        Err(SensusError::NoProbesEnabled)
    ));
    assert!(!h.protocol.is_running());
}

#[tokio::test]
async fn test_all_probes_failing_fails_start() {
    let mut h = harness();
    let a = h
        .protocol
        .add_probe(listening("a", Arc::new(ScriptedListeningSource::failing("busy")), true));
    let b = h
        .protocol
        .add_probe(listening("b", Arc::new(ScriptedListeningSource::failing("busy")), true));

    let err = h.protocol.start().await.unwrap_err();

    assert!(matches!(err, SensusError::NoProbesStarted));
    assert!(!h.protocol.is_running());
    assert_eq!(a.state(), ProbeState::Stopped);
    assert_eq!(b.state(), ProbeState::Stopped);
    assert!(h
        .notifier
        .flashes()
        .iter()
        .any(|m| m.starts_with("Failed to start probe \"a\"")));
}

#[tokio::test]
async fn test_failed_start_emits_rollback_transitions() {
    let mut h = harness();
    h.protocol
        .add_probe(listening("a", Arc::new(ScriptedListeningSource::failing("busy")), true));
    let mut rx = h.protocol.subscribe();

    assert!(h.protocol.start().await.is_err());

    assert_eq!(
        drain(&mut rx),
        vec![
            ProtocolState::Starting,
            ProtocolState::FailedToStart,
            ProtocolState::Stopping,
            ProtocolState::Stopped,
        ]
    );
}

#[tokio::test]
async fn test_one_failing_probe_does_not_abort_start() {
    let mut h = harness();
    let good = h
        .protocol
        .add_probe(listening("good", Arc::new(ScriptedListeningSource::new()), true));
    let bad = h
        .protocol
        .add_probe(listening("bad", Arc::new(ScriptedListeningSource::failing("busy")), true));

    h.protocol.start().await.unwrap();

    assert_eq!(h.protocol.state(), ProtocolState::Running);
    assert!(good.is_running());
    assert_eq!(bad.state(), ProbeState::Stopped);
    h.protocol.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let mut h = harness();
    h.protocol
        .add_probe(listening("a", Arc::new(ScriptedListeningSource::new()), true));
    h.protocol.start().await.unwrap();
    let mut rx = h.protocol.subscribe();

    h.protocol.stop().await.unwrap();
    h.protocol.stop().await.unwrap();

    let states = drain(&mut rx);
    assert_eq!(
        states.iter().filter(|s| **s == ProtocolState::Stopped).count(),
        1
    );
    assert_eq!(states, vec![ProtocolState::Stopping, ProtocolState::Stopped]);
}

#[tokio::test]
async fn test_start_is_noop_when_running() {
    let mut h = harness();
    let source = Arc::new(ScriptedListeningSource::new());
    h.protocol.add_probe(listening("a", source.clone(), true));

    h.protocol.start().await.unwrap();
    let mut rx = h.protocol.subscribe();
    h.protocol.start().await.unwrap();

    assert!(drain(&mut rx).is_empty());
    assert_eq!(source.start_calls(), 1);
    h.protocol.stop().await.unwrap();
}

#[tokio::test]
async fn test_probe_history_never_double_starts() {
    let mut h = harness();
    let probe = h
        .protocol
        .add_probe(listening("a", Arc::new(ScriptedListeningSource::new()), true));

    for _ in 0..3 {
        h.protocol.start().await.unwrap();
        h.protocol.start().await.unwrap();
        h.protocol.stop().await.unwrap();
        h.protocol.stop().await.unwrap();
    }
    h.protocol.start().await.unwrap();

    let mut open: i32 = 0;
    for record in probe.start_stop_times() {
        open += if record.is_start { 1 } else { -1 };
        assert!((0..=1).contains(&open));
    }
    assert_eq!(open, 1);
    h.protocol.stop().await.unwrap();
}

#[tokio::test]
async fn test_local_store_failure_aborts_start() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("not-a-directory");
    std::fs::write(&blocker, b"x").unwrap();

    let mut h = harness_with(LocalStoreConfig {
        storage_dir: Some(blocker.join("store")),
        ..Default::default()
    });
    let source = Arc::new(ScriptedListeningSource::new());
    h.protocol.add_probe(listening("a", source.clone(), true));

    let err = h.protocol.start().await.unwrap_err();

    assert!(matches!(err, SensusError::LocalStoreStart(_)));
    assert!(err.to_string().starts_with("Local data store failed to start"));
    assert!(!h.protocol.remote_store().is_running());
    assert_eq!(source.start_calls(), 0);
    assert!(!h.protocol.is_running());
}

#[tokio::test]
async fn test_remote_store_failure_rolls_back_local() {
    let mut h = harness();
    h.sink.fail_open("unreachable");
    let source = Arc::new(ScriptedListeningSource::new());
    h.protocol.add_probe(listening("a", source.clone(), true));

    let err = h.protocol.start().await.unwrap_err();

    assert!(matches!(err, SensusError::RemoteStoreStart(_)));
    assert!(!h.protocol.local_store().is_running());
    assert_eq!(source.start_calls(), 0);
    assert!(h
        .notifier
        .flashes()
        .iter()
        .any(|m| m.contains("Remote data store failed to start")));
}

#[tokio::test]
async fn test_running_registry_and_status() {
    let mut h = harness();
    h.protocol
        .add_probe(listening("a", Arc::new(ScriptedListeningSource::new()), true));
    let status = h.ctx.subscribe_status();

    h.protocol.start().await.unwrap();
    assert_eq!(h.ctx.running_protocol_ids(), vec![h.protocol.id().to_string()]);
    assert_eq!(*status.borrow(), "1 protocol is running");

    h.protocol.stop().await.unwrap();
    assert_eq!(h.ctx.running_protocol_count(), 0);
    assert_eq!(*status.borrow(), "0 protocols are running");
}

#[tokio::test]
async fn test_shutdown_stops_probes() {
    let mut h = harness();
    let source = Arc::new(ScriptedListeningSource::new());
    let probe = h.protocol.add_probe(listening("a", source.clone(), true));
    h.protocol.start().await.unwrap();

    h.protocol.shutdown().await;

    assert_eq!(h.protocol.state(), ProtocolState::Stopped);
    assert!(!source.is_listening());
    assert!(!probe.start_stop_times().last().unwrap().is_start);
}

#[tokio::test]
async fn test_from_config_resolves_catalog() {
    let dir = TempDir::new().unwrap();
    let ctx = Arc::new(ServiceContext::new(Arc::new(MemoryNotifier::new()), dir.path()));

    let mut catalog = ProbeCatalog::new();
    catalog
        .register(ProbeDescriptor::new("test.light", "Light", DatumKind::Light, || {
            ProbeMode::Listening(Arc::new(ScriptedListeningSource::new()))
        }))
        .register(
            ProbeDescriptor::new("test.wlan", "WLAN", DatumKind::Wlan, || {
                ProbeMode::Listening(Arc::new(ScriptedListeningSource::new()))
            })
            .disabled_by_default(),
        )
        .register(ProbeDescriptor::new(
            "test.location",
            "Location",
            DatumKind::Location,
            || ProbeMode::Listening(Arc::new(ScriptedListeningSource::new())),
        ));

    let config = SensusConfig {
        probes: vec![
            ProbeConfig {
                enabled: false,
                ..ProbeConfig::new("test.light")
            },
            ProbeConfig::new("test.gyroscope"),
        ],
        anonymization: vec![AnonymizationOverride {
            datum: DatumKind::Location,
            field: "latitude".to_string(),
            anonymizer: Some(Anonymizer::RoundTenths),
        }],
        ..Default::default()
    };

    let protocol =
        Protocol::from_config(&config, &catalog, Arc::new(MemorySink::new()), ctx).unwrap();

    let types: Vec<_> = protocol.probes().iter().map(|p| p.probe_type()).collect();
    assert_eq!(types, vec!["test.light", "test.location", "test.wlan"]);
    assert!(!protocol.probe("test.light").unwrap().is_enabled());
    assert!(protocol.probe("test.location").unwrap().is_enabled());
    assert!(!protocol.probe("test.wlan").unwrap().is_enabled());
    assert_eq!(
        protocol
            .anonymization()
            .anonymizer_for(DatumKind::Location, "latitude"),
        Some(Anonymizer::RoundTenths)
    );
}

#[tokio::test]
async fn test_from_config_rejects_missing_store() {
    let dir = TempDir::new().unwrap();
    let ctx = Arc::new(ServiceContext::new(Arc::new(MemoryNotifier::new()), dir.path()));
    let config = SensusConfig {
        remote_store: None,
        ..Default::default()
    };

    let err = Protocol::from_config(
        &config,
        &ProbeCatalog::new(),
        Arc::new(MemorySink::new()),
        ctx,
    )
    .unwrap_err();
    assert!(matches!(err, SensusError::Config(_)));
}

#[tokio::test]
async fn test_from_config_rejects_disallowed_anonymizer() {
    let dir = TempDir::new().unwrap();
    let ctx = Arc::new(ServiceContext::new(Arc::new(MemoryNotifier::new()), dir.path()));
    let config = SensusConfig {
        anonymization: vec![AnonymizationOverride {
            datum: DatumKind::Light,
            field: "brightness".to_string(),
            anonymizer: Some(Anonymizer::StringHash),
        }],
        ..Default::default()
    };

    let err = Protocol::from_config(
        &config,
        &ProbeCatalog::new(),
        Arc::new(MemorySink::new()),
        ctx,
    )
    .unwrap_err();
    assert!(matches!(err, SensusError::Anonymization(_)));
}
