//! Common types used across governance core components.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Unique identifier for a product.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProductId(pub String);

impl ProductId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WarehouseId(pub String);

impl WarehouseId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WarehouseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key for a stock level row: one quantity per product per warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub product: ProductId,
    pub warehouse: WarehouseId,
}

impl StockKey {
    pub fn new(product: impl Into<String>, warehouse: impl Into<String>) -> Self {
        Self {
            product: ProductId::new(product),
            warehouse: WarehouseId::new(warehouse),
        }
    }
}

impl std::fmt::Display for StockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.product, self.warehouse)
    }
}

/// Tier of a governance flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagTier {
    /// Infrastructure-level enforcement (e.g. gateway enforcement).
    Component,
    /// Business-workflow-level enforcement.
    Workflow,
    /// Break-glass override flags.
    Emergency,
}

impl std::fmt::Display for FlagTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Component => write!(f, "component"),
            Self::Workflow => write!(f, "workflow"),
            Self::Emergency => write!(f, "emergency"),
        }
    }
}

/// Immutable definition of a governance flag, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagDefinition {
    /// Unique flag name within its tier.
    pub name: String,
    /// Which tier this flag belongs to.
    pub tier: FlagTier,
    /// State the flag takes before any mutation.
    #[serde(default)]
    pub default: bool,
    /// Critical flags guard invariants and warrant extra alerting.
    #[serde(default)]
    pub critical: bool,
    /// Component flags this flag requires to be enabled (workflow tier only).
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// Workflows that must be disabled when this component is disabled
    /// (component tier only).
    #[serde(default)]
    pub affected_workflows: BTreeSet<String>,
    /// On an emergency flag: component flags gated while it is active.
    /// On a workflow flag: component flags disabled alongside it when a
    /// rollout of the workflow is rolled back.
    #[serde(default)]
    pub affects_components: BTreeSet<String>,
    /// Workflow flags gated while this emergency flag is active
    /// (emergency tier only).
    #[serde(default)]
    pub affects_workflows: BTreeSet<String>,
    /// Human-readable description for operators.
    #[serde(default)]
    pub description: String,
}

impl FlagDefinition {
    /// Convenience constructor for a flag with no relationships.
    pub fn new(name: impl Into<String>, tier: FlagTier, default: bool) -> Self {
        Self {
            name: name.into(),
            tier,
            default,
            critical: false,
            dependencies: BTreeSet::new(),
            affected_workflows: BTreeSet::new(),
            affects_components: BTreeSet::new(),
            affects_workflows: BTreeSet::new(),
            description: String::new(),
        }
    }
}

/// Direction/kind of a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    /// Goods received into stock.
    In,
    /// Goods issued out of stock.
    Out,
    /// Manual stock correction.
    Adjustment,
    /// Inter-warehouse transfer leg.
    Transfer,
}

impl std::fmt::Display for MovementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::In => write!(f, "in"),
            Self::Out => write!(f, "out"),
            Self::Adjustment => write!(f, "adjustment"),
            Self::Transfer => write!(f, "transfer"),
        }
    }
}

/// Source document classification derived from the movement's reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Sale,
    Purchase,
    Transfer,
    Adjustment,
    Opening,
    Other,
}

impl DocumentType {
    /// Derive the document type from the free-form source reference,
    /// falling back to the movement type, else `Other`.
    pub fn derive(source_reference: &str, movement_type: MovementType) -> Self {
        let reference = source_reference.to_ascii_lowercase();
        for (needle, doc) in [
            ("sale", Self::Sale),
            ("purchase", Self::Purchase),
            ("transfer", Self::Transfer),
            ("adjustment", Self::Adjustment),
            ("opening", Self::Opening),
        ] {
            if reference.contains(needle) {
                return doc;
            }
        }
        match movement_type {
            MovementType::Out => Self::Sale,
            MovementType::In => Self::Purchase,
            MovementType::Transfer => Self::Transfer,
            MovementType::Adjustment => Self::Adjustment,
        }
    }
}

/// A request to change a stock level, submitted to the movement processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementRequest {
    pub product: ProductId,
    pub warehouse: WarehouseId,
    /// Signed quantity change; must be non-zero.
    pub quantity_delta: i64,
    pub movement_type: MovementType,
    /// Reference to the originating business document.
    pub source_reference: String,
    /// Caller-supplied token guaranteeing at-most-once side effects.
    pub idempotency_key: String,
    pub actor: String,
    /// Required and strictly positive for `In` movements.
    pub unit_cost: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl MovementRequest {
    pub fn stock_key(&self) -> StockKey {
        StockKey {
            product: self.product.clone(),
            warehouse: self.warehouse.clone(),
        }
    }
}

/// Record of a processed stock movement and its paired ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementRecord {
    pub id: Uuid,
    pub product: ProductId,
    pub warehouse: WarehouseId,
    pub quantity_delta: i64,
    pub movement_type: MovementType,
    pub document_type: DocumentType,
    pub source_reference: String,
    pub idempotency_key: String,
    pub actor: String,
    /// Stock level before this movement was applied.
    pub level_before: i64,
    /// Stock level after this movement was applied.
    pub level_after: i64,
    /// Id of the ledger entry created in the same atomic unit; absent when
    /// ledger pairing was disabled by policy at processing time.
    pub ledger_entry_id: Option<Uuid>,
    pub processed_at: DateTime<Utc>,
}

/// Rollout phase for a workflow's enforcement, totally ordered.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RolloutPhase {
    /// Enforcement fully off; no rollout in progress.
    Disabled = 0,
    /// Collecting metrics, no enforcement yet.
    Monitoring = 1,
    /// Enforcement enabled for a pilot scope.
    Pilot = 2,
    /// Scope widened beyond the pilot without further flag changes.
    Gradual = 3,
    /// Enforcement fully enabled.
    Full = 4,
}

impl RolloutPhase {
    /// The next phase on the path to `target`, or `None` when already there
    /// (or past it).
    pub fn next_toward(self, target: RolloutPhase) -> Option<RolloutPhase> {
        if self >= target {
            return None;
        }
        Some(match self {
            Self::Disabled => Self::Monitoring,
            Self::Monitoring => Self::Pilot,
            Self::Pilot => Self::Gradual,
            Self::Gradual => Self::Full,
            Self::Full => return None,
        })
    }
}

impl std::fmt::Display for RolloutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Monitoring => write!(f, "monitoring"),
            Self::Pilot => write!(f, "pilot"),
            Self::Gradual => write!(f, "gradual"),
            Self::Full => write!(f, "full"),
        }
    }
}

/// Advisory health classification for a workflow under rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::Healthy
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Append-only audit entry emitted by every mutating operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Logical model the operation touched (e.g. "flag", "stock_level").
    pub model: String,
    /// Identifier of the touched object within that model.
    pub object_id: String,
    /// Operation name (e.g. "enable", "process_movement").
    pub operation: String,
    /// Component that produced the entry.
    pub source_service: String,
    pub actor: String,
    /// State before the operation, when meaningful.
    pub before: Option<serde_json::Value>,
    /// State after the operation, when meaningful.
    pub after: Option<serde_json::Value>,
    /// Caller-supplied reason for the audit trail.
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}
