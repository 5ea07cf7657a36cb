/*!
 * Integration tests for the local → remote data pipeline
 *
 * Records flow from probes through the local buffer to the remote sink.
 * Commits retain data on failure and cancellation, and only anonymized
 * copies ever reach the sink.
 */

use std::sync::Arc;
use std::time::Duration;

use sensus::config::{
    HealthConfig, LocalStoreConfig, ProtocolSettings, RemoteStoreConfig,
};
use sensus::context::ServiceContext;
use sensus::datum::{Datum, DatumKind, DatumPayload, FieldValue};
use sensus::health::HealthTrigger;
use sensus::probe::{Probe, ProbeMode, ProbeSpec};
use sensus::protocol::Protocol;
use sensus::testing::{wait_until, MemoryNotifier, MemorySink, ScriptedListeningSource};
use sensus::{Anonymizer, SensusError};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct Pipeline {
    protocol: Arc<Protocol>,
    source: Arc<ScriptedListeningSource>,
    probe: Arc<Probe>,
    sink: Arc<MemorySink>,
    _dir: TempDir,
}

fn pipeline(
    settings: ProtocolSettings,
    local: LocalStoreConfig,
    remote: RemoteStoreConfig,
    kind: DatumKind,
) -> Pipeline {
    let dir = TempDir::new().unwrap();
    let ctx = Arc::new(ServiceContext::new(Arc::new(MemoryNotifier::new()), dir.path()));
    let sink = Arc::new(MemorySink::new());
    let mut protocol = Protocol::new(
        settings,
        local,
        remote,
        &HealthConfig::default(),
        sink.clone(),
        ctx,
    );

    let source = Arc::new(ScriptedListeningSource::new());
    let probe = protocol.add_probe(ProbeSpec {
        probe_type: "test.source".to_string(),
        display_name: "Source".to_string(),
        datum_kind: kind,
        enabled: true,
        mode: ProbeMode::Listening(source.clone()),
    });

    Pipeline {
        protocol: Arc::new(protocol),
        source,
        probe,
        sink,
        _dir: dir,
    }
}

fn no_retry() -> RemoteStoreConfig {
    RemoteStoreConfig {
        max_retries: 0,
        ..Default::default()
    }
}

fn quiet_local(capacity: usize) -> LocalStoreConfig {
    LocalStoreConfig {
        capacity,
        commit_interval_secs: 3600,
        ..Default::default()
    }
}

fn location(latitude: f64, longitude: f64) -> DatumPayload {
    DatumPayload::Location {
        latitude,
        longitude,
        accuracy: Some(5.0),
    }
}

#[tokio::test]
async fn test_end_to_end_commit_after_remote_failure() {
    let p = pipeline(
        ProtocolSettings::default(),
        quiet_local(3),
        no_retry(),
        DatumKind::Light,
    );
    p.sink.fail_next_sends(1);
    p.protocol.start().await.unwrap();

    for brightness in [1.0, 2.0, 3.0] {
        p.source.emit_light(brightness).unwrap();
    }
    let local = p.protocol.local_store().clone();
    let sink = p.sink.clone();
    assert!(
        wait_until(Duration::from_secs(2), move || {
            local.buffered_len() == 3 || sink.send_calls() > 0
        })
        .await
    );

    p.protocol.test_health(HealthTrigger::Scheduled).await;
    p.protocol.test_health(HealthTrigger::Scheduled).await;

    let committed_lights = p
        .sink
        .received()
        .iter()
        .filter(|d| d.kind() == DatumKind::Light)
        .count();
    assert_eq!(committed_lights, 3);
    assert!(p.sink.send_calls() >= 2);
    assert_eq!(p.protocol.local_store().buffered_len(), 0);
    assert!(!p.protocol.remote_store().has_non_probe_data());
    assert!(p
        .sink
        .received()
        .iter()
        .any(|d| d.kind() == DatumKind::ProtocolReport));

    p.protocol.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_flush_is_reported_as_warning() {
    let p = pipeline(
        ProtocolSettings::default(),
        LocalStoreConfig {
            pressure_ratio: 1.0,
            ..quiet_local(100)
        },
        no_retry(),
        DatumKind::Light,
    );
    p.protocol.start().await.unwrap();
    p.source.emit_light(1.0).unwrap();
    let local = p.protocol.local_store().clone();
    assert!(wait_until(Duration::from_secs(2), move || local.buffered_len() == 1).await);

    p.sink.fail_next_sends(1);
    let report = p.protocol.test_health(HealthTrigger::Scheduled).await;

    match report.payload() {
        DatumPayload::ProtocolReport { warning, .. } => {
            assert!(warning.contains("Failed to commit"));
        }
        other => panic!("unexpected payload {:?}", other),
    }
    assert_eq!(p.protocol.local_store().buffered_len(), 1);
    p.protocol.stop().await.unwrap();
}

#[tokio::test]
async fn test_sink_receives_anonymized_copies_only() {
    let p = pipeline(
        ProtocolSettings::default(),
        quiet_local(100),
        no_retry(),
        DatumKind::Location,
    );
    let registry = p.protocol.anonymization();
    registry
        .set_anonymizer(DatumKind::Location, "latitude", Some(Anonymizer::RoundTenths))
        .unwrap();
    registry
        .set_anonymizer(DatumKind::Location, "accuracy", Some(Anonymizer::Omit))
        .unwrap();
    registry
        .set_anonymizer(DatumKind::Location, "timestamp", Some(Anonymizer::TimelineShift))
        .unwrap();

    p.protocol.start().await.unwrap();
    p.source.emit(location(38.0336, -78.5080)).unwrap();
    p.source.emit(location(38.0401, -78.5120)).unwrap();
    let local = p.protocol.local_store().clone();
    assert!(wait_until(Duration::from_secs(2), move || local.buffered_len() == 2).await);

    let originals = p.protocol.local_store().snapshot();
    assert!(originals.iter().all(|d| !d.is_anonymized()));
    assert_eq!(originals[0].field("latitude"), Some(FieldValue::Number(Some(38.0336))));

    p.protocol.test_health(HealthTrigger::User).await;

    let sent: Vec<Datum> = p
        .sink
        .received()
        .into_iter()
        .filter(|d| d.kind() == DatumKind::Location)
        .collect();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(Datum::is_anonymized));
    assert_eq!(sent[0].field("latitude"), Some(FieldValue::Number(Some(38.0))));
    assert_eq!(sent[0].field("longitude"), Some(FieldValue::Number(Some(-78.5080))));
    assert_eq!(sent[0].field("accuracy"), Some(FieldValue::Number(None)));

    // Timeline shift hides absolute time but keeps intervals
    assert!(sent[0].timestamp() < originals[0].timestamp());
    assert_eq!(
        sent[1].timestamp() - sent[0].timestamp(),
        originals[1].timestamp() - originals[0].timestamp()
    );
    assert_eq!(sent[0].id(), originals[0].id());

    p.protocol.stop().await.unwrap();
}

#[tokio::test]
async fn test_anonymization_applied_once_per_export() {
    let p = pipeline(
        ProtocolSettings::default(),
        LocalStoreConfig {
            anonymize_locally: true,
            ..quiet_local(100)
        },
        no_retry(),
        DatumKind::Location,
    );
    p.protocol
        .anonymization()
        .set_anonymizer(DatumKind::Location, "latitude", Some(Anonymizer::RoundTenths))
        .unwrap();
    p.protocol
        .anonymization()
        .set_anonymizer(DatumKind::Location, "timestamp", Some(Anonymizer::TimelineShift))
        .unwrap();

    p.protocol.start().await.unwrap();
    p.source.emit(location(38.0336, -78.5080)).unwrap();
    let local = p.protocol.local_store().clone();
    assert!(wait_until(Duration::from_secs(2), move || local.buffered_len() == 1).await);
    let stored = p.protocol.local_store().snapshot().remove(0);

    p.protocol.test_health(HealthTrigger::User).await;

    let sent = p
        .sink
        .received()
        .into_iter()
        .find(|d| d.kind() == DatumKind::Location)
        .unwrap();
    // Not shifted a second time on the way out
    assert_eq!(sent.timestamp(), stored.timestamp());
    assert_eq!(sent.field("latitude"), Some(FieldValue::Number(Some(38.0))));

    p.protocol.stop().await.unwrap();
}

#[tokio::test]
async fn test_cancelled_commit_keeps_staged_records() {
    let p = pipeline(
        ProtocolSettings::default(),
        quiet_local(100),
        no_retry(),
        DatumKind::Light,
    );
    p.protocol.start().await.unwrap();
    let remote = p.protocol.remote_store().clone();
    remote.add_non_probe_datum(Datum::protocol_report(chrono::Utc::now(), "", "", "a"));
    remote.add_non_probe_datum(Datum::protocol_report(chrono::Utc::now(), "", "", "b"));
    p.sink.set_delay(Duration::from_secs(30));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = remote.commit(Vec::new(), &cancel).await.unwrap_err();
    assert!(matches!(err, SensusError::Cancelled));
    assert_eq!(remote.staged_count(), 2);
    assert!(remote.has_non_probe_data());

    p.sink.set_delay(Duration::ZERO);
    remote
        .commit(Vec::new(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(!remote.has_non_probe_data());
    assert_eq!(p.sink.received().len(), 2);

    p.protocol.stop().await.unwrap();
}

#[tokio::test]
async fn test_forced_reports_reach_remote_without_upload() {
    let p = pipeline(
        ProtocolSettings {
            force_reports_to_remote: true,
            ..Default::default()
        },
        LocalStoreConfig {
            upload_to_remote: false,
            ..quiet_local(100)
        },
        no_retry(),
        DatumKind::Light,
    );
    p.protocol.start().await.unwrap();
    p.source.emit_light(1.0).unwrap();

    let first = p.protocol.test_health(HealthTrigger::Scheduled).await;
    assert!(p.protocol.remote_store().has_non_probe_data());

    p.protocol.test_health(HealthTrigger::Scheduled).await;

    let received = p.sink.received();
    assert!(received.iter().any(|d| d.id() == first.id()));
    assert!(received.iter().all(|d| d.kind() == DatumKind::ProtocolReport));
    p.protocol.stop().await.unwrap();
}

#[tokio::test]
async fn test_eviction_surfaces_in_health_report() {
    let p = pipeline(
        ProtocolSettings::default(),
        LocalStoreConfig {
            upload_to_remote: false,
            ..quiet_local(2)
        },
        no_retry(),
        DatumKind::Light,
    );
    p.protocol.start().await.unwrap();
    for brightness in [1.0, 2.0, 3.0, 4.0] {
        p.source.emit_light(brightness).unwrap();
    }
    let probe = p.probe.clone();
    let local = p.protocol.local_store().clone();
    assert!(
        wait_until(Duration::from_secs(2), move || {
            probe.stored_count() == 4 && local.retention_state().evicted_total == 2
        })
        .await
    );

    let report = p.protocol.test_health(HealthTrigger::Scheduled).await;
    match report.payload() {
        DatumPayload::ProtocolReport { warning, .. } => {
            assert!(warning.contains("lost 2 record(s)"));
        }
        other => panic!("unexpected payload {:?}", other),
    }
    let kept: Vec<_> = p
        .protocol
        .local_store()
        .snapshot()
        .iter()
        .map(|d| d.field("brightness"))
        .collect();
    assert_eq!(
        kept,
        vec![
            Some(FieldValue::Number(Some(3.0))),
            Some(FieldValue::Number(Some(4.0)))
        ]
    );
    p.protocol.stop().await.unwrap();
}

#[tokio::test]
async fn test_reward_confirmed_after_commit() {
    let p = pipeline(
        ProtocolSettings::default(),
        quiet_local(100),
        no_retry(),
        DatumKind::Light,
    );
    p.protocol.start().await.unwrap();

    p.protocol.submit_participation_reward();
    assert!(p.protocol.remote_store().has_non_probe_data());

    p.protocol.test_health(HealthTrigger::User).await;
    assert!(!p.protocol.remote_store().has_non_probe_data());
    assert!(p
        .sink
        .received()
        .iter()
        .any(|d| d.kind() == DatumKind::ParticipationReward));
    p.protocol.stop().await.unwrap();
}
