//! Mutable flag state and mutation API over the flag registry.
//!
//! State is partitioned into three mutual-exclusion domains (component,
//! workflow, emergency) so unrelated reads and writes do not contend.
//! Cross-domain work (the disable cascade) snapshots one domain, releases
//! the lock, then applies transitions through the same public entrypoint
//! used for direct calls; domain locks are acquired in the fixed order
//! emergency -> component -> workflow and never held across a cascade step.
//! The two paths that read one domain before writing the other — workflow
//! enable (dependency check) and component disable (cascade) — serialize
//! on a topology mutex taken before any domain lock, so an enable cannot
//! slip between a cascade's snapshot and its writes.
//!
//! Reads resolve the emergency override first — the `emergency_disable_all`
//! kill-switch sits on an atomic, so no read ever needs a mutation lock to
//! answer "everything is off".

use crate::events::{EventBus, GovernanceEvent};
use crate::gateways::AuditSink;
use crate::registry::{EMERGENCY_DISABLE_ALL, FlagRegistry};
use chrono::Utc;
use govcore_common::{AuditRecord, FlagDefinition, FlagTier, GovError};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

const SERVICE_NAME: &str = "switchboard";

/// Outcome of a flag mutation.
///
/// `Refused` carries the boolean-false semantics of the emergency
/// override: the mutation did not happen, but the caller did not misuse
/// the API, so it is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagWriteOutcome {
    /// The flag changed state.
    Applied,
    /// The flag was already in the requested state.
    NoOp,
    /// The mutation was refused (emergency override active).
    Refused { reason: String },
}

impl FlagWriteOutcome {
    /// Whether the flag is now in the requested state.
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Applied | Self::NoOp)
    }
}

/// Read-through cache over stored flag state, invalidated synchronously on
/// every successful write.
#[derive(Default)]
struct FlagCache {
    entries: RwLock<HashMap<(FlagTier, String), bool>>,
}

impl FlagCache {
    async fn get(&self, tier: FlagTier, name: &str) -> Option<bool> {
        self.entries.read().await.get(&(tier, name.to_string())).copied()
    }

    async fn put(&self, tier: FlagTier, name: &str, value: bool) {
        self.entries
            .write()
            .await
            .insert((tier, name.to_string()), value);
    }

    async fn invalidate(&self, tier: FlagTier, name: &str) {
        self.entries.write().await.remove(&(tier, name.to_string()));
    }

    async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

/// Compute the workflows a component disable must cascade to: the
/// component's affected workflows that are currently enabled, in
/// deterministic order.
fn cascade_targets(def: &FlagDefinition, workflow_state: &HashMap<String, bool>) -> Vec<String> {
    def.affected_workflows
        .iter()
        .filter(|wf| workflow_state.get(*wf).copied().unwrap_or(false))
        .cloned()
        .collect()
}

/// Central flag switchboard: the only writer of flag state.
pub struct Switchboard {
    registry: Arc<FlagRegistry>,
    /// True while `emergency_disable_all` is active.
    kill_all: AtomicBool,
    emergencies: RwLock<HashMap<String, bool>>,
    components: RwLock<HashMap<String, bool>>,
    workflows: RwLock<HashMap<String, bool>>,
    /// Serializes workflow enables against component-disable cascades.
    topology: Mutex<()>,
    cache: FlagCache,
    audit: Arc<dyn AuditSink>,
    events: EventBus,
}

impl Switchboard {
    pub fn new(registry: Arc<FlagRegistry>, audit: Arc<dyn AuditSink>, events: EventBus) -> Self {
        Self {
            registry,
            kill_all: AtomicBool::new(false),
            emergencies: RwLock::new(HashMap::new()),
            components: RwLock::new(HashMap::new()),
            workflows: RwLock::new(HashMap::new()),
            topology: Mutex::new(()),
            cache: FlagCache::default(),
            audit,
            events,
        }
    }

    pub fn registry(&self) -> &FlagRegistry {
        &self.registry
    }

    /// Whether a flag is currently enabled.
    ///
    /// Never raises: an unknown name fails closed (returns `false` with a
    /// warning). While `emergency_disable_all` is active every call
    /// returns `false` regardless of stored state.
    pub async fn is_enabled(&self, tier: FlagTier, name: &str) -> bool {
        if self.kill_all.load(Ordering::SeqCst) {
            return false;
        }

        let Some(def) = self.registry.get(tier, name) else {
            warn!("read of unknown {} flag '{}', failing closed", tier, name);
            return false;
        };

        if tier == FlagTier::Emergency {
            return self
                .emergencies
                .read()
                .await
                .get(name)
                .copied()
                .unwrap_or(def.default);
        }

        if self.gated_by_emergency(tier, name).await {
            return false;
        }

        if let Some(cached) = self.cache.get(tier, name).await {
            return cached;
        }

        let stored = self
            .domain(tier)
            .read()
            .await
            .get(name)
            .copied()
            .unwrap_or(def.default);
        self.cache.put(tier, name, stored).await;
        stored
    }

    /// Enable a flag.
    pub async fn enable(
        &self,
        tier: FlagTier,
        name: &str,
        reason: &str,
        actor: &str,
    ) -> Result<FlagWriteOutcome, GovError> {
        self.set_flag(tier, name, true, reason, actor).await
    }

    /// Disable a flag. Disabling a component first disables each of its
    /// currently-enabled affected workflows through this same entrypoint,
    /// each producing its own audit entry.
    pub async fn disable(
        &self,
        tier: FlagTier,
        name: &str,
        reason: &str,
        actor: &str,
    ) -> Result<FlagWriteOutcome, GovError> {
        self.set_flag(tier, name, false, reason, actor).await
    }

    /// Activate an emergency flag. Requires a non-empty reason.
    ///
    /// Activating `emergency_disable_all` additionally clears all stored
    /// component and workflow state for consistency; scoped emergency
    /// flags only gate the names in their typed `affects` sets.
    ///
    /// Emergency transitions are exempt from the kill-switch refusal —
    /// they are the break-glass path and must stay operable.
    pub async fn activate_emergency(
        &self,
        name: &str,
        reason: &str,
        actor: &str,
    ) -> Result<FlagWriteOutcome, GovError> {
        self.set_emergency(name, true, reason, actor).await
    }

    /// Deactivate an emergency flag. Requires a non-empty reason.
    pub async fn deactivate_emergency(
        &self,
        name: &str,
        reason: &str,
        actor: &str,
    ) -> Result<FlagWriteOutcome, GovError> {
        self.set_emergency(name, false, reason, actor).await
    }

    // ── Internals ──────────────────────────────────────────────────────────

    fn domain(&self, tier: FlagTier) -> &RwLock<HashMap<String, bool>> {
        match tier {
            FlagTier::Component => &self.components,
            FlagTier::Workflow => &self.workflows,
            FlagTier::Emergency => &self.emergencies,
        }
    }

    /// Whether a scoped emergency flag currently gates this name.
    async fn gated_by_emergency(&self, tier: FlagTier, name: &str) -> bool {
        let active = self.emergencies.read().await;
        for (emergency, is_active) in active.iter() {
            if !is_active {
                continue;
            }
            let Some(def) = self.registry.get(FlagTier::Emergency, emergency) else {
                continue;
            };
            let gated = match tier {
                FlagTier::Component => def.affects_components.contains(name),
                FlagTier::Workflow => def.affects_workflows.contains(name),
                FlagTier::Emergency => false,
            };
            if gated {
                return true;
            }
        }
        false
    }

    fn set_flag<'a>(
        &'a self,
        tier: FlagTier,
        name: &'a str,
        desired: bool,
        reason: &'a str,
        actor: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<FlagWriteOutcome, GovError>> + Send + 'a>> {
        Box::pin(async move {
            if tier == FlagTier::Emergency {
                return self.set_emergency(name, desired, reason, actor).await;
            }

            if self.kill_all.load(Ordering::SeqCst) {
                let refusal = "emergency override active".to_string();
                warn!(
                    "refused {} of {} flag '{}' by {}: {}",
                    if desired { "enable" } else { "disable" },
                    tier,
                    name,
                    actor,
                    refusal
                );
                self.audit_flag(tier, name, "mutation_refused", None, None, reason, actor);
                return Ok(FlagWriteOutcome::Refused { reason: refusal });
            }

            // A workflow enable reads component state before writing
            // workflow state; a component disable reads workflow state
            // before writing component state. Serializing the two keeps
            // "enabled workflow implies enabled dependencies" true under
            // concurrent mutation. Cascaded workflow disables re-enter
            // here without taking the lock, so the cascade cannot
            // self-deadlock; no domain lock is ever held at this point.
            let _topology = if (tier == FlagTier::Workflow && desired)
                || (tier == FlagTier::Component && !desired)
            {
                Some(self.topology.lock().await)
            } else {
                None
            };

            let def = self
                .registry
                .get(tier, name)
                .ok_or_else(|| GovError::UnknownFlag {
                    tier,
                    name: name.to_string(),
                })?
                .clone();

            if desired && tier == FlagTier::Workflow {
                self.check_dependencies(&def).await?;
            }

            if !desired && tier == FlagTier::Component && !def.affected_workflows.is_empty() {
                let snapshot = self.workflow_state_snapshot().await;
                for workflow in cascade_targets(&def, &snapshot) {
                    let cascade_reason =
                        format!("cascade: component '{}' disabled ({})", name, reason);
                    self.disable(FlagTier::Workflow, &workflow, &cascade_reason, actor)
                        .await?;
                }
            }

            let before;
            {
                let mut state = self.domain(tier).write().await;
                before = state.get(name).copied().unwrap_or(def.default);
                if before == desired {
                    drop(state);
                    debug!("{} flag '{}' already {}, no-op", tier, name, desired);
                    self.audit_flag(
                        tier,
                        name,
                        "no_op",
                        Some(before),
                        Some(desired),
                        reason,
                        actor,
                    );
                    return Ok(FlagWriteOutcome::NoOp);
                }
                state.insert(name.to_string(), desired);
            }
            self.cache.invalidate(tier, name).await;

            info!(
                "{} flag '{}' {} -> {} by {} ({})",
                tier, name, before, desired, actor, reason
            );
            self.audit_flag(
                tier,
                name,
                if desired { "enable" } else { "disable" },
                Some(before),
                Some(desired),
                reason,
                actor,
            );
            self.events.publish(GovernanceEvent::FlagChanged {
                tier,
                name: name.to_string(),
                enabled: desired,
                reason: reason.to_string(),
                actor: actor.to_string(),
                at: Utc::now(),
            });
            Ok(FlagWriteOutcome::Applied)
        })
    }

    async fn check_dependencies(&self, def: &FlagDefinition) -> Result<(), GovError> {
        let mut missing = std::collections::BTreeSet::new();
        for dep in &def.dependencies {
            if !self.is_enabled(FlagTier::Component, dep).await {
                missing.insert(dep.clone());
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(GovError::DependencyNotMet {
                workflow: def.name.clone(),
                missing,
            })
        }
    }

    /// Effective workflow state (stored values over defaults) for the
    /// cascade computation. Lock released before any cascade step runs.
    async fn workflow_state_snapshot(&self) -> HashMap<String, bool> {
        let stored = self.workflows.read().await;
        self.registry
            .definitions(FlagTier::Workflow)
            .map(|def| {
                let enabled = stored.get(&def.name).copied().unwrap_or(def.default);
                (def.name.clone(), enabled)
            })
            .collect()
    }

    async fn set_emergency(
        &self,
        name: &str,
        desired: bool,
        reason: &str,
        actor: &str,
    ) -> Result<FlagWriteOutcome, GovError> {
        if reason.trim().is_empty() {
            return Err(GovError::Validation(
                "emergency transitions require a non-empty reason".to_string(),
            ));
        }
        let def = self
            .registry
            .get(FlagTier::Emergency, name)
            .ok_or_else(|| GovError::UnknownFlag {
                tier: FlagTier::Emergency,
                name: name.to_string(),
            })?
            .clone();

        let before;
        {
            let mut state = self.emergencies.write().await;
            before = state.get(name).copied().unwrap_or(def.default);
            if before == desired {
                self.audit_emergency(&def, "no_op", before, desired, reason, actor);
                return Ok(FlagWriteOutcome::NoOp);
            }
            state.insert(name.to_string(), desired);
        }

        if name == EMERGENCY_DISABLE_ALL {
            self.kill_all.store(desired, Ordering::SeqCst);
            if desired {
                // Clear stored state so nothing stale survives the override.
                self.components.write().await.clear();
                self.workflows.write().await.clear();
                self.cache.clear().await;
            }
        }

        warn!(
            "emergency flag '{}' {} by {} ({})",
            name,
            if desired { "ACTIVATED" } else { "deactivated" },
            actor,
            reason
        );
        self.audit_emergency(
            &def,
            if desired { "activate_emergency" } else { "deactivate_emergency" },
            before,
            desired,
            reason,
            actor,
        );
        self.events.publish(GovernanceEvent::EmergencyChanged {
            name: name.to_string(),
            active: desired,
            reason: reason.to_string(),
            actor: actor.to_string(),
            at: Utc::now(),
        });
        Ok(FlagWriteOutcome::Applied)
    }

    fn audit_flag(
        &self,
        tier: FlagTier,
        name: &str,
        operation: &str,
        before: Option<bool>,
        after: Option<bool>,
        reason: &str,
        actor: &str,
    ) {
        self.audit.record(AuditRecord {
            model: "flag".to_string(),
            object_id: format!("{}:{}", tier, name),
            operation: operation.to_string(),
            source_service: SERVICE_NAME.to_string(),
            actor: actor.to_string(),
            before: before.map(|b| json!({ "enabled": b })),
            after: after.map(|a| json!({ "enabled": a })),
            reason: Some(reason.to_string()),
            timestamp: Utc::now(),
        });
    }

    fn audit_emergency(
        &self,
        def: &FlagDefinition,
        operation: &str,
        before: bool,
        after: bool,
        reason: &str,
        actor: &str,
    ) {
        let affected = if def.name == EMERGENCY_DISABLE_ALL {
            json!("all")
        } else {
            json!({
                "components": def.affects_components,
                "workflows": def.affects_workflows,
            })
        };
        self.audit.record(AuditRecord {
            model: "flag".to_string(),
            object_id: format!("emergency:{}", def.name),
            operation: operation.to_string(),
            source_service: SERVICE_NAME.to_string(),
            actor: actor.to_string(),
            before: Some(json!({ "active": before })),
            after: Some(json!({ "active": after, "affected": affected })),
            reason: Some(reason.to_string()),
            timestamp: Utc::now(),
        });
    }
}
