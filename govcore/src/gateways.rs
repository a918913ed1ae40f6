//! Trait seams for the core's external collaborators.
//!
//! The core never writes audit, ledger, or quarantine rows directly; it
//! calls through these traits. Audit and quarantine are fire-and-forget —
//! a sink failure must never roll back the primary operation. The ledger
//! gateway is the sole accepted path for financial postings.
//!
//! In-memory implementations are provided for tests and embedders that
//! wire persistence elsewhere.

use chrono::{DateTime, Utc};
use govcore_common::{AuditRecord, GovError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use uuid::Uuid;

/// Append-only audit sink. Implementations must not fail the caller.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditRecord);
}

/// One line of a balanced double-entry posting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerLine {
    pub account: String,
    pub debit: Decimal,
    pub credit: Decimal,
    pub description: String,
}

impl LedgerLine {
    pub fn debit(account: impl Into<String>, amount: Decimal, description: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            debit: amount,
            credit: Decimal::ZERO,
            description: description.into(),
        }
    }

    pub fn credit(account: impl Into<String>, amount: Decimal, description: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            debit: Decimal::ZERO,
            credit: amount,
            description: description.into(),
        }
    }
}

/// Request to create a ledger entry paired with a core operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub source_module: String,
    pub source_model: String,
    pub source_id: String,
    pub lines: Vec<LedgerLine>,
    pub idempotency_key: String,
    pub actor: String,
}

/// A created ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub source_module: String,
    pub source_model: String,
    pub source_id: String,
    pub lines: Vec<LedgerLine>,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Gateway creating balanced accounting entries. The movement processor
/// calls this synchronously inside its atomic unit; a failure unwinds the
/// whole movement.
pub trait LedgerGateway: Send + Sync {
    fn create_entry(&self, entry: NewLedgerEntry) -> Result<LedgerEntry, GovError>;
}

/// Record of an invalid or invariant-violating attempt, isolated for
/// manual review. Never deleted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub model: String,
    pub object_id: String,
    pub corruption_type: String,
    pub reason: String,
    pub payload: serde_json::Value,
    pub actor: String,
    pub quarantined_at: DateTime<Utc>,
}

/// Sink isolating bad records for review.
pub trait QuarantineSink: Send + Sync {
    fn quarantine(&self, record: QuarantineRecord);
}

// =========================================================================
// In-memory implementations
// =========================================================================

/// In-memory audit sink.
#[derive(Default)]
pub struct MemoryAudit {
    entries: Mutex<Vec<AuditRecord>>,
}

impl MemoryAudit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded entries, in insertion order.
    pub fn entries(&self) -> Vec<AuditRecord> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl AuditSink for MemoryAudit {
    fn record(&self, entry: AuditRecord) {
        debug!(
            "audit: {} {} on {}/{} by {}",
            entry.source_service, entry.operation, entry.model, entry.object_id, entry.actor
        );
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).push(entry);
    }
}

/// In-memory ledger gateway with a togglable failure mode for testing
/// round-trip atomicity.
#[derive(Default)]
pub struct MemoryLedger {
    entries: Mutex<Vec<LedgerEntry>>,
    failing: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `create_entry` call fail (or recover).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl LedgerGateway for MemoryLedger {
    fn create_entry(&self, entry: NewLedgerEntry) -> Result<LedgerEntry, GovError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GovError::LedgerFailure(
                "ledger gateway unavailable".to_string(),
            ));
        }

        let total_debit: Decimal = entry.lines.iter().map(|l| l.debit).sum();
        let total_credit: Decimal = entry.lines.iter().map(|l| l.credit).sum();
        if total_debit != total_credit {
            return Err(GovError::LedgerFailure(format!(
                "unbalanced entry: debit {} != credit {}",
                total_debit, total_credit
            )));
        }

        let created = LedgerEntry {
            id: Uuid::new_v4(),
            source_module: entry.source_module,
            source_model: entry.source_model,
            source_id: entry.source_id,
            lines: entry.lines,
            total_debit,
            total_credit,
            created_at: Utc::now(),
        };
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(created.clone());
        Ok(created)
    }
}

/// In-memory quarantine sink.
#[derive(Default)]
pub struct MemoryQuarantine {
    records: Mutex<Vec<QuarantineRecord>>,
}

impl MemoryQuarantine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<QuarantineRecord> {
        self.records.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl QuarantineSink for MemoryQuarantine {
    fn quarantine(&self, record: QuarantineRecord) {
        debug!(
            "quarantine: {} {}/{}: {}",
            record.corruption_type, record.model, record.object_id, record.reason
        );
        self.records
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(record);
    }
}
