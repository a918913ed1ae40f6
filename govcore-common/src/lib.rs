//! Shared types, errors, and configuration for the Governance Enforcement
//! Core.
//!
//! This crate carries no service logic: it defines the domain vocabulary
//! (flags, movements, rollout phases), the error taxonomy with its catalog
//! of GOV-Exxx codes, and the configuration surface consumed by the
//! `govcore` services.

pub mod config;
pub mod errors;
pub mod types;

pub use config::{
    GovConfig, HealthConfig, IdempotencyConfig, LockConfig, MonitorConfig, SafetyConfig,
};
pub use errors::{ErrorCategory, ErrorCode, ErrorEntry, GovError};
pub use types::{
    AuditRecord, DocumentType, FlagDefinition, FlagTier, HealthStatus, MovementRecord,
    MovementRequest, MovementType, ProductId, RolloutPhase, StockKey, WarehouseId,
};
