//! Error taxonomy and catalog for the Governance Enforcement Core.
//!
//! This module defines the `GovError` taxonomy raised by the core services
//! plus a catalog of unique error codes, categorized by subsystem. Each
//! catalog entry carries remediation steps for operators.
//!
//! # Error Code Ranges
//!
//! | Range      | Category    | Description                             |
//! |------------|-------------|-----------------------------------------|
//! | E001-E099  | Flags       | Switchboard and registry errors         |
//! | E100-E199  | Movement    | Stock movement and invariant errors     |
//! | E200-E299  | Rollout     | Rollout state machine errors            |
//! | E300-E399  | Concurrency | Lock and contention errors              |
//! | E500-E599  | Internal    | Internal/unexpected errors              |

pub mod catalog;

pub use catalog::{ErrorCategory, ErrorCode, ErrorEntry};

use crate::types::{FlagTier, RolloutPhase};
use std::collections::BTreeSet;
use thiserror::Error;

/// Errors raised by the governance core services.
///
/// `EmergencyOverrideActive` is deliberately absent: a mutation refused by
/// the emergency override is surfaced as a refused write outcome, not an
/// error. Likewise an idempotency conflict is not an error — the caller
/// receives the stored prior result.
#[derive(Debug, Error)]
pub enum GovError {
    /// A write named a flag the registry does not know. Fail-fast; reads
    /// fail closed instead.
    #[error("unknown {tier} flag '{name}'")]
    UnknownFlag { tier: FlagTier, name: String },

    /// Enabling a workflow whose component dependencies are not all enabled.
    #[error("cannot enable workflow '{workflow}': dependencies not met: {missing:?}")]
    DependencyNotMet {
        workflow: String,
        missing: BTreeSet<String>,
    },

    /// The request shape is invalid (bad enum value, zero delta, missing
    /// or non-positive unit cost).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Applying the movement would drive the stock level below zero.
    /// Fatal for the attempt; the attempt is quarantined, never retried
    /// automatically.
    #[error(
        "negative stock violation for {key}: current {current} + delta {delta} < 0"
    )]
    NegativeStock {
        key: String,
        current: i64,
        delta: i64,
    },

    /// The ledger gateway refused or failed to create the paired entry.
    /// The whole movement attempt is rolled back and quarantined.
    #[error("ledger entry creation failed: {0}")]
    LedgerFailure(String),

    /// A bounded lock or in-flight wait expired. Safe to retry.
    #[error("timed out acquiring '{resource}' after {waited_ms}ms")]
    ConcurrencyTimeout { resource: String, waited_ms: u64 },

    /// The named workflow is not in the supported rollout set.
    #[error("unknown workflow '{0}'")]
    UnknownWorkflow(String),

    /// `start` was called while a non-disabled rollout already exists.
    #[error("rollout for '{workflow}' already active in phase {phase}")]
    RolloutAlreadyActive {
        workflow: String,
        phase: RolloutPhase,
    },

    /// Safety checks failed during `advance`; an automatic rollback was
    /// performed.
    #[error("rollout safety failure for '{workflow}': {reason}")]
    RolloutSafety { workflow: String, reason: String },

    /// Registry construction found an inconsistent catalog.
    #[error("invalid flag catalog: {0}")]
    InvalidCatalog(String),
}

impl GovError {
    /// Catalog code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownFlag { .. } => ErrorCode::FlagUnknown,
            Self::DependencyNotMet { .. } => ErrorCode::FlagDependencyNotMet,
            Self::InvalidCatalog(_) => ErrorCode::FlagCatalogInvalid,
            Self::Validation(_) => ErrorCode::MovementValidationFailed,
            Self::NegativeStock { .. } => ErrorCode::MovementNegativeStock,
            Self::LedgerFailure(_) => ErrorCode::MovementLedgerFailed,
            Self::UnknownWorkflow(_) => ErrorCode::RolloutUnknownWorkflow,
            Self::RolloutAlreadyActive { .. } => ErrorCode::RolloutAlreadyActive,
            Self::RolloutSafety { .. } => ErrorCode::RolloutSafetyFailed,
            Self::ConcurrencyTimeout { .. } => ErrorCode::LockTimeout,
        }
    }

    /// Whether the caller may safely retry the operation as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyTimeout { .. })
    }
}
