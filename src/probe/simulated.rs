//! Simulated capabilities used by the demo binary
//!
//! They stand in for platform sensor bindings so a protocol can be run end
//! to end on any machine.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::datum::{Datum, DatumKind, DatumPayload};
use crate::error::Result;

use super::{
    DatumSink, ListeningSource, PollSchedule, PollingSource, ProbeCatalog, ProbeDescriptor,
    ProbeMode,
};

pub const LOCATION: &str = "sensus.location";
pub const LIGHT: &str = "sensus.light";
pub const WLAN: &str = "sensus.wlan";
pub const ACCELERATION: &str = "sensus.acceleration";

/// Catalog of every simulated capability
pub fn simulated_catalog() -> ProbeCatalog {
    let mut catalog = ProbeCatalog::new();

    catalog
        .register(ProbeDescriptor::new(LOCATION, "Location", DatumKind::Location, || {
            let source = Arc::new(SimulatedLocation::new(38.0336, -78.5080));
            ProbeMode::ActivePassive {
                listening: source.clone(),
                polling: source,
                schedule: PollSchedule {
                    interval: Duration::from_secs(60),
                    timeout: Duration::from_secs(15),
                },
            }
        }))
        .register(ProbeDescriptor::new(LIGHT, "Light", DatumKind::Light, || {
            ProbeMode::Polling {
                source: Arc::new(SimulatedLight),
                schedule: PollSchedule {
                    interval: Duration::from_secs(30),
                    timeout: Duration::from_secs(5),
                },
            }
        }))
        .register(ProbeDescriptor::new(WLAN, "WLAN", DatumKind::Wlan, || {
            ProbeMode::Listening(Arc::new(PeriodicEmitter::new(
                Duration::from_secs(45),
                random_wlan,
            )))
        }))
        .register(
            ProbeDescriptor::new(ACCELERATION, "Acceleration", DatumKind::Acceleration, || {
                ProbeMode::Listening(Arc::new(PeriodicEmitter::new(
                    Duration::from_secs(1),
                    random_acceleration,
                )))
            })
            .disabled_by_default(),
        );

    catalog
}

fn random_wlan() -> DatumPayload {
    const ACCESS_POINTS: [&str; 3] = ["a4:2b:b0:11:9c:01", "a4:2b:b0:11:9c:02", "f0:9f:c2:7e:10:aa"];
    let mut rng = rand::rng();
    let connected = rng.random_bool(0.8);
    DatumPayload::Wlan {
        access_point_bssid: connected
            .then(|| ACCESS_POINTS[rng.random_range(0..ACCESS_POINTS.len())].to_string()),
    }
}

fn random_acceleration() -> DatumPayload {
    let mut rng = rand::rng();
    DatumPayload::Acceleration {
        x: rng.random_range(-0.2..0.2),
        y: rng.random_range(-0.2..0.2),
        z: 9.81 + rng.random_range(-0.1..0.1),
    }
}

struct Emitter {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

type Generator = Arc<dyn Fn() -> DatumPayload + Send + Sync>;

/// Listening source that delivers a generated reading on a fixed period
pub struct PeriodicEmitter {
    period: Duration,
    generate: Generator,
    emitter: Mutex<Option<Emitter>>,
}

impl PeriodicEmitter {
    pub fn new<F>(period: Duration, generate: F) -> Self
    where
        F: Fn() -> DatumPayload + Send + Sync + 'static,
    {
        Self {
            period,
            generate: Arc::new(generate),
            emitter: Mutex::new(None),
        }
    }

    fn spawn(&self, sink: DatumSink) {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let period = self.period;
        let generate = Arc::clone(&self.generate);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }
                // Drops are counted by the sink
                let _ = sink.emit(generate());
            }
            debug!(probe = sink.probe_type(), "Simulated listener exited");
        });

        let previous = self
            .emitter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(Emitter { cancel, task });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
    }

    /// True when the emitter was started but its task has exited
    fn has_died(&self) -> bool {
        self.emitter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|emitter| emitter.task.is_finished())
    }

    async fn halt(&self) {
        let emitter = self
            .emitter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(emitter) = emitter {
            emitter.cancel.cancel();
            let _ = emitter.task.await;
        }
    }
}

#[async_trait]
impl ListeningSource for PeriodicEmitter {
    async fn start_listening(&self, sink: DatumSink) -> Result<()> {
        self.spawn(sink);
        Ok(())
    }

    async fn stop_listening(&self) -> Result<()> {
        self.halt().await;
        Ok(())
    }

    async fn test_health(&self) -> Result<bool> {
        Ok(self.has_died())
    }
}

/// Polling light sensor
pub struct SimulatedLight;

#[async_trait]
impl PollingSource for SimulatedLight {
    async fn poll(&self) -> Result<Datum> {
        let brightness = rand::rng().random_range(0.0..1000.0);
        Ok(Datum::new(LIGHT, DatumPayload::Light { brightness }))
    }
}

/// Random-walk position, readable on demand and pushed periodically
pub struct SimulatedLocation {
    position: Arc<Mutex<(f64, f64)>>,
    listener: PeriodicEmitter,
}

impl SimulatedLocation {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        let position = Arc::new(Mutex::new((latitude, longitude)));
        let walker = Arc::clone(&position);
        Self {
            position,
            listener: PeriodicEmitter::new(Duration::from_secs(120), move || step(&walker)),
        }
    }
}

fn step(position: &Mutex<(f64, f64)>) -> DatumPayload {
    let mut rng = rand::rng();
    let mut guard = position
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.0 += rng.random_range(-0.0005..0.0005);
    guard.1 += rng.random_range(-0.0005..0.0005);

    DatumPayload::Location {
        latitude: guard.0,
        longitude: guard.1,
        accuracy: Some(rng.random_range(3.0..25.0)),
    }
}

#[async_trait]
impl PollingSource for SimulatedLocation {
    async fn poll(&self) -> Result<Datum> {
        Ok(Datum::new(LOCATION, step(&self.position)))
    }
}

#[async_trait]
impl ListeningSource for SimulatedLocation {
    async fn start_listening(&self, sink: DatumSink) -> Result<()> {
        self.listener.spawn(sink);
        Ok(())
    }

    async fn stop_listening(&self) -> Result<()> {
        self.listener.halt().await;
        Ok(())
    }

    async fn test_health(&self) -> Result<bool> {
        Ok(self.listener.has_died())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProbeConfig;
    use crate::health::HealthReport;
    use crate::probe::{Probe, ProbeState};
    use tokio::sync::mpsc;

    #[test]
    fn test_catalog_contents() {
        let catalog = simulated_catalog();
        assert_eq!(catalog.len(), 4);
        assert!(catalog.contains(LOCATION));
        assert!(!catalog.get(ACCELERATION).unwrap().default_enabled);
        assert_eq!(catalog.get(LOCATION).unwrap().default_spec().mode.name(), "active-passive");
    }

    #[tokio::test]
    async fn test_light_poll() {
        let datum = SimulatedLight.poll().await.unwrap();
        assert_eq!(datum.kind(), DatumKind::Light);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_emitter_delivers_until_stopped() {
        let (tx, mut rx) = mpsc::channel(8);
        let spec = simulated_catalog()
            .resolve(&ProbeConfig::new(WLAN))
            .unwrap();
        let probe = Probe::new(spec, tx);

        probe.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(100)).await;
        let mut report = HealthReport::new();
        assert!(!probe.test_health(&mut report).await);
        probe.stop().await.unwrap();

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 2);
        assert_eq!(probe.state(), ProbeState::Stopped);
    }

    #[tokio::test]
    async fn test_dead_emitter_reports_fault() {
        let emitter = PeriodicEmitter::new(Duration::from_secs(1), || DatumPayload::Light {
            brightness: 1.0,
        });
        assert!(!emitter.test_health().await.unwrap());

        // A task that already finished stands in for a crashed listener
        let task = tokio::spawn(async {});
        while !task.is_finished() {
            tokio::task::yield_now().await;
        }
        *emitter.emitter.lock().unwrap() = Some(Emitter {
            cancel: CancellationToken::new(),
            task,
        });
        assert!(emitter.test_health().await.unwrap());
    }
}
