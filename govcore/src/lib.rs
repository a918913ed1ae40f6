//! Governance enforcement core: dependency-aware feature flags,
//! idempotent stock-movement processing, metric-driven monitoring, and
//! phased workflow rollout.
//!
//! # Architecture
//!
//! - [`switchboard::Switchboard`] — tiered flag state (component,
//!   workflow, emergency) over an immutable
//!   [`registry::FlagRegistry`], with cascading disables, kill-switch
//!   overrides, and a full audit trail.
//! - [`movement::MovementProcessor`] — the single write path for stock
//!   levels, pairing each movement with a balanced ledger entry and
//!   deduplicating by idempotency key.
//! - [`monitor::MonitoringService`] — rolling metric windows with
//!   threshold/rate alert rules and cooldowns.
//! - [`rollout::RolloutController`] — the DISABLED → MONITORING → PILOT
//!   → GRADUAL → FULL phase machine, gated by safety checks with
//!   automatic rollback.
//!
//! [`service::GovernanceCore`] wires these together around one event
//! bus and the injected audit/ledger/quarantine gateways.

pub mod events;
pub mod gateways;
pub mod idempotency;
pub mod monitor;
pub mod movement;
pub mod registry;
pub mod rollout;
pub mod service;
pub mod switchboard;

pub use events::{EventBus, GovernanceEvent};
pub use gateways::{
    AuditSink, LedgerEntry, LedgerGateway, LedgerLine, MemoryAudit, MemoryLedger,
    MemoryQuarantine, NewLedgerEntry, QuarantineRecord, QuarantineSink,
};
pub use idempotency::{Begin, IdempotencyGuard};
pub use monitor::{Alert, AlertCondition, AlertRule, MonitoringService};
pub use movement::MovementProcessor;
pub use registry::{EMERGENCY_DISABLE_ALL, FlagRegistry, MOVEMENT_LEDGER_PAIRING, builtin_definitions};
pub use rollout::{
    AdvanceReport, HealthReport, RolloutController, RolloutStatus, SafetyCheck, WorkflowOutcome,
};
pub use service::GovernanceCore;
pub use switchboard::{FlagWriteOutcome, Switchboard};

pub use govcore_common as common;
