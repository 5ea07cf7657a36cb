//! Registered probe capabilities, keyed by abstract probe-type identifier
//!
//! Configuration names probes by type id (`sensus.location`); the catalog
//! resolves those ids against the capabilities available in this process.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ProbeConfig;
use crate::datum::DatumKind;

use super::{PollSchedule, ProbeMode, ProbeSpec};

type ModeFactory = Arc<dyn Fn() -> ProbeMode + Send + Sync>;

/// One registered capability
#[derive(Clone)]
pub struct ProbeDescriptor {
    pub probe_type: String,
    pub display_name: String,
    pub datum_kind: DatumKind,
    pub default_enabled: bool,
    factory: ModeFactory,
}

impl fmt::Debug for ProbeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeDescriptor")
            .field("probe_type", &self.probe_type)
            .field("display_name", &self.display_name)
            .field("datum_kind", &self.datum_kind)
            .field("default_enabled", &self.default_enabled)
            .finish()
    }
}

impl ProbeDescriptor {
    pub fn new<F>(
        probe_type: impl Into<String>,
        display_name: impl Into<String>,
        datum_kind: DatumKind,
        factory: F,
    ) -> Self
    where
        F: Fn() -> ProbeMode + Send + Sync + 'static,
    {
        Self {
            probe_type: probe_type.into(),
            display_name: display_name.into(),
            datum_kind,
            default_enabled: true,
            factory: Arc::new(factory),
        }
    }

    pub fn disabled_by_default(mut self) -> Self {
        self.default_enabled = false;
        self
    }

    /// Spec with the descriptor's defaults
    pub fn default_spec(&self) -> ProbeSpec {
        ProbeSpec {
            probe_type: self.probe_type.clone(),
            display_name: self.display_name.clone(),
            datum_kind: self.datum_kind,
            enabled: self.default_enabled,
            mode: (self.factory)(),
        }
    }

    /// Spec with the configured enabled flag and polling overrides applied
    pub fn configured_spec(&self, config: &ProbeConfig) -> ProbeSpec {
        let mut spec = self.default_spec();
        spec.enabled = config.enabled;

        if let Some(current) = spec.mode.schedule() {
            let schedule = PollSchedule {
                interval: config
                    .poll_interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(current.interval),
                timeout: config
                    .poll_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(current.timeout),
            };
            spec.mode = spec.mode.with_schedule(schedule);
        }

        spec
    }
}

/// Capabilities available to protocols in this process
#[derive(Debug, Clone, Default)]
pub struct ProbeCatalog {
    entries: BTreeMap<String, ProbeDescriptor>,
}

impl ProbeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability, replacing any previous one with the same type id
    pub fn register(&mut self, descriptor: ProbeDescriptor) -> &mut Self {
        self.entries
            .insert(descriptor.probe_type.clone(), descriptor);
        self
    }

    pub fn get(&self, probe_type: &str) -> Option<&ProbeDescriptor> {
        self.entries.get(probe_type)
    }

    pub fn contains(&self, probe_type: &str) -> bool {
        self.entries.contains_key(probe_type)
    }

    pub fn resolve(&self, config: &ProbeConfig) -> Option<ProbeSpec> {
        self.get(&config.probe_type)
            .map(|descriptor| descriptor.configured_spec(config))
    }

    /// Registered type ids in sorted order
    pub fn probe_types(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ProbeDescriptor> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
