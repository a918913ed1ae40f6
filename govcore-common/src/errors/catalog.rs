//! Error catalog for the Governance Enforcement Core.
//!
//! Each error scenario maps to a unique code in the GOV-Exxx format with a
//! message template and remediation steps, so operators can act on an audit
//! trail entry without reading source code.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code enumeration covering governance core error scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // =========================================================================
    // Flag Errors (E001-E099)
    // =========================================================================
    /// Flag name not present in the registry (write path)
    FlagUnknown,
    /// Workflow enable blocked by disabled component dependencies
    FlagDependencyNotMet,
    /// Registry load found duplicate names or dangling references
    FlagCatalogInvalid,

    // =========================================================================
    // Movement Errors (E100-E199)
    // =========================================================================
    /// Movement request failed shape validation
    MovementValidationFailed,
    /// Movement would drive the stock level negative
    MovementNegativeStock,
    /// Paired ledger entry creation failed; movement rolled back
    MovementLedgerFailed,

    // =========================================================================
    // Rollout Errors (E200-E299)
    // =========================================================================
    /// Workflow not in the supported rollout set
    RolloutUnknownWorkflow,
    /// A non-disabled rollout already exists for the workflow
    RolloutAlreadyActive,
    /// Safety checks failed during advance; automatic rollback performed
    RolloutSafetyFailed,

    // =========================================================================
    // Concurrency Errors (E300-E399)
    // =========================================================================
    /// Bounded lock or in-flight wait expired
    LockTimeout,
}

/// Category of an error code, grouping by subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Flags,
    Movement,
    Rollout,
    Concurrency,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flags => write!(f, "flags"),
            Self::Movement => write!(f, "movement"),
            Self::Rollout => write!(f, "rollout"),
            Self::Concurrency => write!(f, "concurrency"),
        }
    }
}

/// A catalog entry: code string, category, message, and remediation steps.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEntry {
    pub code: &'static str,
    pub category: ErrorCategory,
    pub message: &'static str,
    pub remediation: &'static [&'static str],
}

impl ErrorCode {
    /// Look up the catalog entry for this code.
    pub fn entry(&self) -> ErrorEntry {
        match self {
            Self::FlagUnknown => ErrorEntry {
                code: "GOV-E001",
                category: ErrorCategory::Flags,
                message: "Flag name is not registered",
                remediation: &[
                    "Check the flag name for typos against the registry catalog",
                    "Register the flag definition before writing to it",
                ],
            },
            Self::FlagDependencyNotMet => ErrorEntry {
                code: "GOV-E002",
                category: ErrorCategory::Flags,
                message: "Workflow enable blocked by disabled component dependencies",
                remediation: &[
                    "Enable the listed component flags first",
                    "Review the workflow's declared dependencies",
                ],
            },
            Self::FlagCatalogInvalid => ErrorEntry {
                code: "GOV-E003",
                category: ErrorCategory::Flags,
                message: "Flag catalog failed validation at load",
                remediation: &[
                    "Remove duplicate flag names",
                    "Ensure dependencies and affects sets reference registered flags",
                ],
            },
            Self::MovementValidationFailed => ErrorEntry {
                code: "GOV-E101",
                category: ErrorCategory::Movement,
                message: "Movement request failed validation",
                remediation: &[
                    "Supply a non-zero quantity delta",
                    "Supply a positive unit cost for inbound movements",
                ],
            },
            Self::MovementNegativeStock => ErrorEntry {
                code: "GOV-E102",
                category: ErrorCategory::Movement,
                message: "Movement would drive stock below zero",
                remediation: &[
                    "Check current stock before issuing outbound movements",
                    "Review the quarantined attempt for data entry mistakes",
                ],
            },
            Self::MovementLedgerFailed => ErrorEntry {
                code: "GOV-E103",
                category: ErrorCategory::Movement,
                message: "Ledger entry creation failed; stock change rolled back",
                remediation: &[
                    "Check ledger gateway availability",
                    "Retry the movement with the same idempotency key once the gateway recovers",
                ],
            },
            Self::RolloutUnknownWorkflow => ErrorEntry {
                code: "GOV-E201",
                category: ErrorCategory::Rollout,
                message: "Workflow is not in the supported rollout set",
                remediation: &["Check the workflow name against the supported set"],
            },
            Self::RolloutAlreadyActive => ErrorEntry {
                code: "GOV-E202",
                category: ErrorCategory::Rollout,
                message: "A rollout is already in progress for this workflow",
                remediation: &[
                    "Advance or roll back the existing rollout before starting a new one",
                ],
            },
            Self::RolloutSafetyFailed => ErrorEntry {
                code: "GOV-E203",
                category: ErrorCategory::Rollout,
                message: "Safety checks failed; the rollout was rolled back automatically",
                remediation: &[
                    "Inspect error and blocked rates for the workflow",
                    "Fix the underlying enforcement issue before restarting the rollout",
                ],
            },
            Self::LockTimeout => ErrorEntry {
                code: "GOV-E301",
                category: ErrorCategory::Concurrency,
                message: "Timed out waiting for a resource lock",
                remediation: &[
                    "Retry the operation",
                    "If persistent, look for a stuck movement holding the resource",
                ],
            },
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entry().code)
    }
}
