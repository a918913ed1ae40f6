//! Phased, metric-gated enablement of workflow enforcement.
//!
//! A rollout walks DISABLED → MONITORING → PILOT → GRADUAL → FULL, one
//! phase per `advance()` call. Each advance re-runs the safety checks
//! over the metrics accumulated since the current phase began; a failed
//! check forces an automatic rollback to DISABLED and disables the
//! workflow flag. Health reporting is advisory and never mutates state
//! on its own.
//!
//! Phase transitions are not cancellable mid-flight but always
//! resumable: a crash between commits leaves the last committed phase,
//! and the caller re-advances explicitly.

use crate::events::{EventBus, GovernanceEvent};
use crate::monitor::MonitoringService;
use crate::switchboard::Switchboard;
use chrono::{DateTime, Utc};
use govcore_common::{FlagTier, GovError, HealthConfig, HealthStatus, RolloutPhase, SafetyConfig};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const SERVICE_NAME: &str = "rollout_controller";

/// Terminal classification of one workflow invocation, fed back into
/// the rollout metric windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowOutcome {
    Success,
    Error,
    Blocked,
}

/// One safety check evaluated during `advance()`.
#[derive(Debug, Clone, Serialize)]
pub struct SafetyCheck {
    pub name: String,
    pub observed: f64,
    pub limit: f64,
    pub passed: bool,
}

/// Result of an `advance()` call, including the checks that gated it.
#[derive(Debug, Clone, Serialize)]
pub struct AdvanceReport {
    pub workflow: String,
    pub from: RolloutPhase,
    /// Phase after the call committed. Equals `from` only when the
    /// advance was refused without rollback.
    pub to: RolloutPhase,
    pub safety_checks: Vec<SafetyCheck>,
    pub safety_checks_passed: bool,
    pub automatic_rollback: bool,
}

impl AdvanceReport {
    /// Map a refused advance to its error form for callers that want
    /// `?`-style propagation instead of inspecting the report.
    pub fn as_result(&self) -> Result<RolloutPhase, GovError> {
        if self.safety_checks_passed {
            return Ok(self.to);
        }
        let failed: Vec<String> = self
            .safety_checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| format!("{} = {:.4} > {:.4}", c.name, c.observed, c.limit))
            .collect();
        Err(GovError::RolloutSafety {
            workflow: self.workflow.clone(),
            reason: failed.join("; "),
        })
    }
}

/// Advisory health snapshot for a workflow's rollout window.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub workflow: String,
    pub status: HealthStatus,
    pub error_rate: f64,
    pub blocked_rate: f64,
    pub success_rate: f64,
    pub samples: usize,
    /// Advisory only: set when the window would fail the advance safety
    /// checks. The caller decides whether to call `rollback()`.
    pub rollback_recommended: bool,
    pub sampled_at: DateTime<Utc>,
}

/// Public view of one workflow's rollout state.
#[derive(Debug, Clone, Serialize)]
pub struct RolloutStatus {
    pub workflow: String,
    pub phase: RolloutPhase,
    pub target: RolloutPhase,
    pub started_at: DateTime<Utc>,
}

struct RolloutRecord {
    phase: RolloutPhase,
    target: RolloutPhase,
    started_at: DateTime<Utc>,
    /// Metrics are evaluated against the window since this point.
    phase_started: Instant,
}

/// Phase state machine over [`Switchboard`] flags and
/// [`MonitoringService`] metrics.
pub struct RolloutController {
    switchboard: Arc<Switchboard>,
    monitor: Arc<MonitoringService>,
    events: EventBus,
    safety: SafetyConfig,
    health: HealthConfig,
    records: RwLock<HashMap<String, RolloutRecord>>,
    sampler_running: AtomicBool,
}

impl RolloutController {
    pub fn new(
        switchboard: Arc<Switchboard>,
        monitor: Arc<MonitoringService>,
        events: EventBus,
        safety: SafetyConfig,
        health: HealthConfig,
    ) -> Self {
        Self {
            switchboard,
            monitor,
            events,
            safety,
            health,
            records: RwLock::new(HashMap::new()),
            sampler_running: AtomicBool::new(false),
        }
    }

    /// Begin a rollout for a registered workflow.
    ///
    /// The record starts in MONITORING and metric collection begins; no
    /// enforcement flag is touched yet.
    pub async fn start(&self, workflow: &str, target: RolloutPhase) -> Result<(), GovError> {
        self.require_workflow(workflow)?;
        if target <= RolloutPhase::Monitoring {
            return Err(GovError::Validation(format!(
                "rollout target for '{}' must be beyond monitoring, got {}",
                workflow, target
            )));
        }

        let mut records = self.records.write().await;
        if let Some(existing) = records.get(workflow) {
            if existing.phase != RolloutPhase::Disabled {
                return Err(GovError::RolloutAlreadyActive {
                    workflow: workflow.to_string(),
                    phase: existing.phase,
                });
            }
        }

        self.monitor.clear_prefix(&metric_prefix(workflow)).await;
        records.insert(
            workflow.to_string(),
            RolloutRecord {
                phase: RolloutPhase::Monitoring,
                target,
                started_at: Utc::now(),
                phase_started: Instant::now(),
            },
        );
        info!(
            "rollout started for '{}' toward {}, now monitoring",
            workflow, target
        );
        self.events.publish(GovernanceEvent::RolloutTransition {
            workflow: workflow.to_string(),
            from: RolloutPhase::Disabled,
            to: RolloutPhase::Monitoring,
            automatic: false,
            at: Utc::now(),
        });
        Ok(())
    }

    /// Attempt the next phase toward the rollout's target.
    ///
    /// Safety checks run over the metrics of the current phase; a failed
    /// check forces an automatic rollback and the report carries
    /// `automatic_rollback = true`. PILOT and FULL enable the workflow
    /// flag; GRADUAL widens scope with no additional flag change.
    pub async fn advance(&self, workflow: &str) -> Result<AdvanceReport, GovError> {
        self.require_workflow(workflow)?;

        let mut records = self.records.write().await;
        let record = records
            .get_mut(workflow)
            .ok_or_else(|| GovError::Validation(format!("no rollout started for '{workflow}'")))?;
        let from = record.phase;
        let next = from.next_toward(record.target).ok_or_else(|| {
            GovError::Validation(format!(
                "rollout for '{}' is already at its target phase {}",
                workflow, record.target
            ))
        })?;

        let checks = self.run_safety_checks(workflow, record.phase_started).await;
        if checks.iter().any(|c| !c.passed) {
            warn!(
                "rollout advance refused for '{}': safety checks failed, rolling back",
                workflow
            );
            record.phase = RolloutPhase::Disabled;
            drop(records);
            self.apply_rollback(workflow, "automatic rollback: safety checks failed", true)
                .await?;
            return Ok(AdvanceReport {
                workflow: workflow.to_string(),
                from,
                to: RolloutPhase::Disabled,
                safety_checks: checks,
                safety_checks_passed: false,
                automatic_rollback: true,
            });
        }

        if matches!(next, RolloutPhase::Pilot | RolloutPhase::Full) {
            let outcome = self
                .switchboard
                .enable(
                    FlagTier::Workflow,
                    workflow,
                    &format!("rollout advance to {next}"),
                    SERVICE_NAME,
                )
                .await?;
            if !outcome.succeeded() {
                return Err(GovError::RolloutSafety {
                    workflow: workflow.to_string(),
                    reason: format!("flag mutation refused entering {next}"),
                });
            }
        }

        record.phase = next;
        record.phase_started = Instant::now();
        info!("rollout for '{}' advanced {} -> {}", workflow, from, next);
        self.events.publish(GovernanceEvent::RolloutTransition {
            workflow: workflow.to_string(),
            from,
            to: next,
            automatic: false,
            at: Utc::now(),
        });
        Ok(AdvanceReport {
            workflow: workflow.to_string(),
            from,
            to: next,
            safety_checks: checks,
            safety_checks_passed: true,
            automatic_rollback: false,
        })
    }

    /// Roll a workflow back to DISABLED.
    ///
    /// Idempotent: rolling back an already-DISABLED (or never-started)
    /// workflow is a success.
    pub async fn rollback(&self, workflow: &str, reason: &str) -> Result<(), GovError> {
        self.require_workflow(workflow)?;
        {
            let mut records = self.records.write().await;
            match records.get_mut(workflow) {
                Some(record) if record.phase == RolloutPhase::Disabled => return Ok(()),
                Some(record) => record.phase = RolloutPhase::Disabled,
                None => return Ok(()),
            }
        }
        self.apply_rollback(workflow, reason, false).await
    }

    /// Advisory health classification over the current phase's window.
    pub async fn monitor_health(&self, workflow: &str) -> Result<HealthReport, GovError> {
        self.require_workflow(workflow)?;
        let since = {
            let records = self.records.read().await;
            records
                .get(workflow)
                .map(|r| r.phase_started)
                .unwrap_or_else(Instant::now)
        };

        let prefix = metric_prefix(workflow);
        let total = self
            .monitor
            .sum_since(&format!("{prefix}total"), since)
            .await;
        let errors = self
            .monitor
            .sum_since(&format!("{prefix}errors"), since)
            .await;
        let blocked = self
            .monitor
            .sum_since(&format!("{prefix}blocked"), since)
            .await;

        let (error_rate, blocked_rate) = if total > 0.0 {
            (errors / total, blocked / total)
        } else {
            (0.0, 0.0)
        };
        let success_rate = 1.0 - error_rate;

        let status = if error_rate > self.health.critical_error_rate
            || blocked_rate > self.health.critical_blocked_rate
        {
            HealthStatus::Critical
        } else if error_rate > self.health.warning_error_rate
            || success_rate < self.health.min_success_rate
        {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        };

        let rollback_recommended = error_rate > self.safety.max_error_rate
            || blocked_rate > self.safety.max_blocked_rate;

        Ok(HealthReport {
            workflow: workflow.to_string(),
            status,
            error_rate,
            blocked_rate,
            success_rate,
            samples: total as usize,
            rollback_recommended,
            sampled_at: Utc::now(),
        })
    }

    /// Record one workflow invocation outcome into the rollout windows.
    pub async fn observe(&self, workflow: &str, outcome: WorkflowOutcome, duration: Duration) {
        let prefix = metric_prefix(workflow);
        let tags = HashMap::new();
        self.monitor
            .record(&format!("{prefix}total"), 1.0, tags.clone())
            .await;
        match outcome {
            WorkflowOutcome::Success => {}
            WorkflowOutcome::Error => {
                self.monitor
                    .record(&format!("{prefix}errors"), 1.0, tags.clone())
                    .await;
            }
            WorkflowOutcome::Blocked => {
                self.monitor
                    .record(&format!("{prefix}blocked"), 1.0, tags.clone())
                    .await;
            }
        }
        self.monitor
            .record(&format!("{prefix}duration_ms"), duration.as_secs_f64() * 1_000.0, tags)
            .await;
    }

    /// Current state of one rollout, if one was started.
    pub async fn status(&self, workflow: &str) -> Option<RolloutStatus> {
        let records = self.records.read().await;
        records.get(workflow).map(|r| RolloutStatus {
            workflow: workflow.to_string(),
            phase: r.phase,
            target: r.target,
            started_at: r.started_at,
        })
    }

    /// All rollouts currently beyond DISABLED.
    pub async fn active(&self) -> Vec<RolloutStatus> {
        let records = self.records.read().await;
        records
            .iter()
            .filter(|(_, r)| r.phase != RolloutPhase::Disabled)
            .map(|(workflow, r)| RolloutStatus {
                workflow: workflow.clone(),
                phase: r.phase,
                target: r.target,
                started_at: r.started_at,
            })
            .collect()
    }

    /// Spawn the periodic health sampler. Each tick logs the advisory
    /// health of every active rollout; it never rolls anything back and
    /// never holds a state lock across its sleep.
    pub fn start_sampler(self: &Arc<Self>) {
        if self.sampler_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let controller = self.clone();
        let interval = controller.health.sample_interval();
        tokio::spawn(async move {
            while controller.sampler_running.load(Ordering::SeqCst) {
                tokio::time::sleep(interval).await;
                if !controller.sampler_running.load(Ordering::SeqCst) {
                    break;
                }
                for status in controller.active().await {
                    match controller.monitor_health(&status.workflow).await {
                        Ok(report) => {
                            let gauge = match report.status {
                                HealthStatus::Healthy => 0.0,
                                HealthStatus::Warning => 1.0,
                                HealthStatus::Critical => 2.0,
                            };
                            controller
                                .monitor
                                .record(
                                    &format!("{}health", metric_prefix(&status.workflow)),
                                    gauge,
                                    HashMap::new(),
                                )
                                .await;
                            if report.status == HealthStatus::Critical {
                                warn!(
                                    "rollout '{}' health critical at {}: error_rate {:.4}, blocked_rate {:.4}",
                                    status.workflow, status.phase, report.error_rate, report.blocked_rate
                                );
                            } else {
                                debug!(
                                    "rollout '{}' health {:?} at {}",
                                    status.workflow, report.status, status.phase
                                );
                            }
                        }
                        Err(err) => warn!(
                            "health sample failed for '{}': {}",
                            status.workflow, err
                        ),
                    }
                }
            }
            debug!("rollout health sampler stopped");
        });
    }

    /// Stop the health sampler after its current tick.
    pub fn stop_sampler(&self) {
        self.sampler_running.store(false, Ordering::SeqCst);
    }

    // ── Internals ──────────────────────────────────────────────────────────

    fn require_workflow(&self, workflow: &str) -> Result<(), GovError> {
        if self
            .switchboard
            .registry()
            .contains(FlagTier::Workflow, workflow)
        {
            Ok(())
        } else {
            Err(GovError::UnknownWorkflow(workflow.to_string()))
        }
    }

    async fn run_safety_checks(&self, workflow: &str, since: Instant) -> Vec<SafetyCheck> {
        let prefix = metric_prefix(workflow);
        let total = self
            .monitor
            .sum_since(&format!("{prefix}total"), since)
            .await;

        // No traffic yet is a pass: a freshly-started phase with clean
        // (empty) metrics may advance.
        let (error_rate, blocked_rate) = if total > 0.0 {
            let errors = self
                .monitor
                .sum_since(&format!("{prefix}errors"), since)
                .await;
            let blocked = self
                .monitor
                .sum_since(&format!("{prefix}blocked"), since)
                .await;
            (errors / total, blocked / total)
        } else {
            (0.0, 0.0)
        };

        let degradation = match self
            .monitor
            .mean_since(&format!("{prefix}duration_ms"), since)
            .await
        {
            Some(mean) if self.safety.baseline_duration_ms > 0.0 => {
                mean / self.safety.baseline_duration_ms
            }
            _ => 1.0,
        };

        vec![
            SafetyCheck {
                name: "error_rate".to_string(),
                observed: error_rate,
                limit: self.safety.max_error_rate,
                passed: error_rate <= self.safety.max_error_rate,
            },
            SafetyCheck {
                name: "blocked_rate".to_string(),
                observed: blocked_rate,
                limit: self.safety.max_blocked_rate,
                passed: blocked_rate <= self.safety.max_blocked_rate,
            },
            SafetyCheck {
                name: "performance_degradation".to_string(),
                observed: degradation,
                limit: self.safety.max_perf_degradation,
                passed: degradation <= self.safety.max_perf_degradation,
            },
        ]
    }

    /// Disable the workflow flag (plus any component side-effects its
    /// definition names), clear the rollout metric windows, and publish
    /// the transition. The phase itself is already committed by the
    /// caller.
    async fn apply_rollback(
        &self,
        workflow: &str,
        reason: &str,
        automatic: bool,
    ) -> Result<(), GovError> {
        self.switchboard
            .disable(FlagTier::Workflow, workflow, reason, SERVICE_NAME)
            .await?;

        let side_effects: Vec<String> = self
            .switchboard
            .registry()
            .get(FlagTier::Workflow, workflow)
            .map(|def| def.affects_components.iter().cloned().collect())
            .unwrap_or_default();
        for component in side_effects {
            self.switchboard
                .disable(
                    FlagTier::Component,
                    &component,
                    &format!("rollback of workflow '{workflow}': {reason}"),
                    SERVICE_NAME,
                )
                .await?;
        }

        self.monitor.clear_prefix(&metric_prefix(workflow)).await;
        info!("rollout for '{}' rolled back to disabled: {}", workflow, reason);
        self.events.publish(GovernanceEvent::RolloutTransition {
            workflow: workflow.to_string(),
            from: RolloutPhase::Disabled,
            to: RolloutPhase::Disabled,
            automatic,
            at: Utc::now(),
        });
        Ok(())
    }
}

fn metric_prefix(workflow: &str) -> String {
    format!("rollout.{workflow}.")
}
