//! Top-level assembly of the governance core.
//!
//! One [`GovernanceCore`] is constructed at process start and passed by
//! reference to every caller; there is no ambient global state. The
//! gateways (audit, ledger, quarantine) are injected so deployments can
//! swap the in-memory implementations for real ones.

use crate::events::EventBus;
use crate::gateways::{AuditSink, LedgerGateway, QuarantineSink};
use crate::monitor::MonitoringService;
use crate::movement::MovementProcessor;
use crate::registry::FlagRegistry;
use crate::rollout::RolloutController;
use crate::switchboard::Switchboard;
use govcore_common::{FlagDefinition, GovConfig, GovError};
use std::sync::Arc;
use tracing::info;

/// The assembled governance core: flag switchboard, movement processor,
/// monitoring, and rollout control sharing one event bus.
pub struct GovernanceCore {
    switchboard: Arc<Switchboard>,
    movements: Arc<MovementProcessor>,
    monitor: Arc<MonitoringService>,
    rollouts: Arc<RolloutController>,
    events: EventBus,
}

impl GovernanceCore {
    /// Build the core from an explicit flag catalog.
    pub fn new(
        config: GovConfig,
        definitions: Vec<FlagDefinition>,
        ledger: Arc<dyn LedgerGateway>,
        audit: Arc<dyn AuditSink>,
        quarantine: Arc<dyn QuarantineSink>,
    ) -> Result<Self, GovError> {
        let registry = Arc::new(FlagRegistry::new(definitions)?);
        let events = EventBus::new(config.monitor.alert_buffer);
        let switchboard = Arc::new(Switchboard::new(registry, audit.clone(), events.clone()));
        let monitor = Arc::new(MonitoringService::new(config.monitor.clone()));
        let movements = Arc::new(MovementProcessor::new(
            switchboard.clone(),
            ledger,
            audit,
            quarantine,
            events.clone(),
            &config,
        ));
        let rollouts = Arc::new(RolloutController::new(
            switchboard.clone(),
            monitor.clone(),
            events.clone(),
            config.safety.clone(),
            config.health.clone(),
        ));
        info!("governance core assembled");
        Ok(Self {
            switchboard,
            movements,
            monitor,
            rollouts,
            events,
        })
    }

    /// Build the core with the built-in flag catalog plus extras.
    pub fn with_builtin_catalog(
        config: GovConfig,
        extra_definitions: Vec<FlagDefinition>,
        ledger: Arc<dyn LedgerGateway>,
        audit: Arc<dyn AuditSink>,
        quarantine: Arc<dyn QuarantineSink>,
    ) -> Result<Self, GovError> {
        let mut definitions = crate::registry::builtin_definitions();
        definitions.extend(extra_definitions);
        Self::new(config, definitions, ledger, audit, quarantine)
    }

    /// Start background work: the periodic rollout health sampler.
    pub fn start(&self) {
        self.rollouts.start_sampler();
        info!("governance core started");
    }

    /// Stop background work. Safe to call more than once.
    pub fn shutdown(&self) {
        self.rollouts.stop_sampler();
        info!("governance core shut down");
    }

    pub fn switchboard(&self) -> &Arc<Switchboard> {
        &self.switchboard
    }

    pub fn movements(&self) -> &Arc<MovementProcessor> {
        &self.movements
    }

    pub fn monitor(&self) -> &Arc<MonitoringService> {
        &self.monitor
    }

    pub fn rollouts(&self) -> &Arc<RolloutController> {
        &self.rollouts
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::{MemoryAudit, MemoryLedger, MemoryQuarantine};
    use govcore_common::FlagTier;

    fn core() -> GovernanceCore {
        GovernanceCore::with_builtin_catalog(
            GovConfig::default(),
            vec![],
            Arc::new(MemoryLedger::new()),
            Arc::new(MemoryAudit::new()),
            Arc::new(MemoryQuarantine::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn assembles_with_builtin_catalog() {
        let core = core();
        assert!(
            core.switchboard()
                .is_enabled(FlagTier::Component, "gateway_enforcement")
                .await
        );
    }

    #[test]
    fn invalid_catalog_fails_construction() {
        let defs = vec![
            FlagDefinition::new("x", FlagTier::Component, false),
            FlagDefinition::new("x", FlagTier::Component, true),
        ];
        let result = GovernanceCore::new(
            GovConfig::default(),
            defs,
            Arc::new(MemoryLedger::new()),
            Arc::new(MemoryAudit::new()),
            Arc::new(MemoryQuarantine::new()),
        );
        assert!(matches!(result, Err(GovError::InvalidCatalog(_))));
    }

    #[tokio::test]
    async fn start_and_shutdown_are_idempotent() {
        let core = core();
        core.start();
        core.start();
        core.shutdown();
        core.shutdown();
    }
}
